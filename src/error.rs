/// Gestion centralisée des erreurs du moteur de recommandation
///
/// Hiérarchie d'erreurs pour un debugging efficace et une gestion robuste

use std::fmt;
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppError {
    // Configuration et initialisation
    ConfigError { message: String },
    EngineNotInitialized,

    // Erreurs de providers externes
    ProviderFailure { provider_id: String, message: String },
    ProviderTimeout { provider_id: String, timeout_ms: u64 },
    DuplicateProvider { provider_id: String },
    UnknownProvider { provider_id: String },

    // Erreurs de stockage
    StoreFailure { message: String },
    SerializationError { message: String },

    // Erreurs de données
    MissingData { resource: String },
    InvalidInput { message: String },
    InvalidDimension { expected: usize, got: usize },

    // Erreurs d'entraînement
    TrainingFailure { message: String },
    DatasetTooSmall { got: usize, min: usize },
    TrainingInProgress,

    // Erreurs génériques
    InternalError { message: String },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ConfigError { message } => write!(f, "Configuration error: {}", message),
            AppError::EngineNotInitialized => write!(f, "Engine not initialized"),
            AppError::ProviderFailure { provider_id, message } => write!(f, "Provider failure: {} - {}", provider_id, message),
            AppError::ProviderTimeout { provider_id, timeout_ms } => write!(f, "Provider timeout: {} after {}ms", provider_id, timeout_ms),
            AppError::DuplicateProvider { provider_id } => write!(f, "Duplicate provider id: {}", provider_id),
            AppError::UnknownProvider { provider_id } => write!(f, "Unknown provider id: {}", provider_id),
            AppError::StoreFailure { message } => write!(f, "Store failure: {}", message),
            AppError::SerializationError { message } => write!(f, "Serialization error: {}", message),
            AppError::MissingData { resource } => write!(f, "Missing data: {}", resource),
            AppError::InvalidInput { message } => write!(f, "Invalid input: {}", message),
            AppError::InvalidDimension { expected, got } => write!(f, "Invalid vector dimension: expected {} but got {}", expected, got),
            AppError::TrainingFailure { message } => write!(f, "Training failure: {}", message),
            AppError::DatasetTooSmall { got, min } => write!(f, "Dataset too small: {} samples, minimum {}", got, min),
            AppError::TrainingInProgress => write!(f, "Training already in progress"),
            AppError::InternalError { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for AppError {}

pub type Result<T> = std::result::Result<T, AppError>;

// Conversions depuis les erreurs standard
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::StoreFailure { message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError { message: err.to_string() }
    }
}
