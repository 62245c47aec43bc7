/// Coeur de recommandation d'un lecteur de musique personnel
///
/// Agrégation de features multi-providers, scoring hybride, moteur
/// vectoriel (embeddings, index, co-occurrence, profil de goût) et boucle
/// d'apprentissage. Pure bibliothèque: le catalogue, la persistance et le
/// prédicteur neuronal sont fournis par l'hôte via des traits.

pub mod error;
pub mod config;
pub mod model;
pub mod cache;
pub mod storage;
pub mod features;
pub mod vector;
pub mod scoring;
pub mod learning;
pub mod playlist;
pub mod radio;
pub mod library;
pub mod engine;

// Re-exports pour faciliter l'utilisation
pub use error::{AppError, Result};
pub use config::{EngineConfig, ExplorationLevel, CURRENT_ANALYSIS_VERSION};
pub use engine::{get_engine, init_engine, reset_engine, Engine, EngineStats, SmartQueue};
pub use features::{FeatureAggregator, FeatureProvider, ProviderDescriptor, ProviderMode};
pub use library::{LibrarySource, SignalProcessor};
pub use learning::{EventRecorder, PreferenceStore, Predictor, TrainingResult, TrainingScheduler};
pub use model::{
    AggregatedFeatures, AudioDescriptors, Embedding, Track, TrackRef, UserEvent,
};
pub use playlist::{PlaylistGenerator, PlaylistMethod, PlaylistOptions};
pub use radio::{RadioGenerator, RadioSeed};
pub use scoring::{
    HybridScorer, QueueMode, ScoredTrack, ScoringContext, SequentialScorer, SessionTrack,
    TrackScore,
};
pub use storage::{FeatureStore, FileKvStore, KVStore, MemoryKvStore};
pub use vector::{CoOccurrenceMatrix, EmbeddingEngine, TasteProfile, VectorIndex};
