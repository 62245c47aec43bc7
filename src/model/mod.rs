/// Modèle de données partagé du moteur
///
/// Entités possédées chacune par un seul composant; l'orchestrateur ne
/// détient que des références.

pub mod track;
pub mod features;
pub mod events;

pub use track::{Track, AudioDescriptors, KeyMode};
pub use features::{
    AggregatedFeatures, Embedding, EmotionDescriptors, FeatureKind, GenreDescriptors,
    GenreSource, LyricsDescriptors, MoodCategory, ProvenanceEntry, ThemeTag,
};
pub use events::{
    Activity, DislikeReason, DownloadAction, EventContext, ListenSource, PlaylistAction,
    QueueAction, TrackRef, UserEvent,
};

/// Horodatage courant en millisecondes depuis l'epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
