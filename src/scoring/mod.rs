/// Scoring hybride
///
/// Fusion pondérée de 15+ composantes avec piste d'explication, scoring
/// séquentiel conscient de la session, et construction du vecteur de
/// features pour le prédicteur.

pub mod feature_vector;
pub mod mood;
pub mod sequential;
pub mod hybrid;

pub use feature_vector::{build_feature_vector, FEATURE_VECTOR_DIM};
pub use hybrid::HybridScorer;
pub use sequential::{SequentialScorer, SequentialScores};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ExplorationLevel;
use crate::model::{
    Activity, AggregatedFeatures, KeyMode, MoodCategory, Track,
};

/// Mode de la file en cours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueMode {
    Normal,
    Radio,
    Playlist,
}

impl Default for QueueMode {
    fn default() -> Self {
        QueueMode::Normal
    }
}

/// Vue allégée d'une piste de session pour le scoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTrack {
    pub track_id: String,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub bpm: Option<f32>,
    pub energy: Option<f32>,
    pub danceability: Option<f32>,
    pub key: Option<u8>,
    pub mode: Option<KeyMode>,
    pub embedding: Option<Vec<f32>>,
}

impl SessionTrack {
    /// Projette une piste et ses features agrégées en vue de session
    pub fn from_features(track: &Track, features: &AggregatedFeatures) -> Self {
        let audio = features.audio.as_ref().or(track.audio.as_ref());
        Self {
            track_id: track.track_id.clone(),
            artist: track.primary_artist().map(|s| s.to_string()),
            genre: features
                .genre
                .as_ref()
                .map(|g| g.primary_genre.clone())
                .or_else(|| track.primary_genre().map(|s| s.to_string())),
            bpm: audio.and_then(|a| a.bpm),
            energy: audio.and_then(|a| a.energy),
            danceability: audio.and_then(|a| a.danceability),
            key: audio.and_then(|a| a.key),
            mode: audio.and_then(|a| a.mode),
            embedding: features.embedding.as_ref().map(|e| e.vector.clone()),
        }
    }
}

/// Contexte partagé d'un appel de scoring
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    /// Piste en cours de lecture, si une session est active
    pub current_track: Option<SessionTrack>,
    /// Dernières pistes de la session, la plus récente en dernier
    pub session_tracks: Vec<SessionTrack>,
    /// Pistes en file d'attente (pour la diversité)
    pub queued: Vec<SessionTrack>,
    pub user_mood: Option<MoodCategory>,
    pub activity: Option<Activity>,
    pub hour_of_day: u8,
    pub day_of_week: u8, // 0 = dimanche
    /// Surcharge ponctuelle du niveau d'exploration configuré
    pub exploration: Option<ExplorationLevel>,
    pub queue_mode: QueueMode,
    /// Dérive radio courante (pistes déjà émises depuis le seed)
    pub radio_drift: u32,
}

/// Score final d'une piste avec piste d'explication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackScore {
    pub track_id: String,
    pub final_score: f32, // 0.0 - 100.0
    pub confidence: f32,  // 0.0 - 1.0
    /// Valeur normalisée de chaque composante calculée
    pub components: HashMap<String, f32>,
    /// Phrases courtes, ordre déterministe
    pub explanation: Vec<String>,
}

/// Piste accompagnée de son score
#[derive(Debug, Clone)]
pub struct ScoredTrack {
    pub track: Track,
    pub score: TrackScore,
}
