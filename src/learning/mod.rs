/// Boucle d'apprentissage
///
/// Journal d'événements, affinités utilisateur avec décroissance
/// temporelle, extraction d'échantillons d'entraînement et scheduler de
/// réentraînement.

pub mod recorder;
pub mod preferences;
pub mod predictor;
pub mod scheduler;

pub use recorder::{
    DatasetMetadata, DatasetOptions, EventRecorder, TrainingDataset, TrainingSample,
};
pub use preferences::{PreferenceSnapshot, PreferenceStore};
pub use predictor::{HeuristicPredictor, Predictor, TrainingResult};
pub use scheduler::TrainingScheduler;
