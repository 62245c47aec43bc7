/// Événements utilisateur: le signal d'apprentissage du moteur
///
/// Union taguée à variantes fixes; chaque site de dispatch fait un match
/// exhaustif. Un événement est immuable une fois enregistré.

use serde::{Deserialize, Serialize};

use crate::model::features::MoodCategory;

/// Référence de piste embarquée dans un événement
///
/// Snapshot minimal pour que le PreferenceStore puisse mettre à jour les
/// affinités sans repasser par la bibliothèque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRef {
    pub track_id: String,
    pub artists: Vec<String>,
    pub genres: Vec<String>,
    pub duration_s: f32,
}

impl TrackRef {
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(|s| s.as_str())
    }
}

/// Source d'une écoute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenSource {
    Library,
    Search,
    Recommendation,
    Radio,
    Playlist,
    Queue,
    External,
}

/// Activité déclarée par l'utilisateur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activity {
    Workout,
    Study,
    Party,
    Relax,
    Commute,
    Sleep,
}

/// Contexte ambiant au moment d'un événement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventContext {
    pub activity: Option<Activity>,
    pub mood: Option<MoodCategory>,
    /// Position dans la session d'écoute, si connue
    pub session_position: Option<u32>,
}

/// Raison d'un dislike, ensemble fixe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DislikeReason {
    NotInterested,
    WrongMood,
    TooRepetitive,
    BadQuality,
    DislikeArtist,
    Other,
}

impl DislikeReason {
    /// Poids de sévérité, utilisé par les affinités et les labels d'entraînement
    pub fn weight(self) -> f32 {
        match self {
            DislikeReason::DislikeArtist => 1.0,
            DislikeReason::NotInterested => 0.8,
            DislikeReason::TooRepetitive => 0.6,
            DislikeReason::WrongMood => 0.4, // contextuel, pas un rejet de la piste
            DislikeReason::BadQuality => 0.5,
            DislikeReason::Other => 0.6,
        }
    }
}

/// Action sur la file d'attente
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueAction {
    Add,
    Remove,
    MoveUp,
    MoveDown,
    PlayNext,
}

/// Action sur une playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaylistAction {
    Add,
    Remove,
}

/// Action de téléchargement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadAction {
    Download,
    Remove,
}

/// Événement utilisateur
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserEvent {
    Listen {
        track: TrackRef,
        duration_s: f32,
        completion: f32, // 0.0 - 1.0
        completed: bool,
        source: ListenSource,
        context: EventContext,
        timestamp: i64, // ms epoch
    },
    Skip {
        track: TrackRef,
        skip_percentage: f32, // 0.0 - 1.0
        early: bool,
        context: EventContext,
        timestamp: i64,
    },
    Like {
        track: TrackRef,
        strength: u8, // 1 ou 2
        timestamp: i64,
    },
    Dislike {
        track: TrackRef,
        reason: DislikeReason,
        comment: Option<String>,
        timestamp: i64,
    },
    Queue {
        track: TrackRef,
        action: QueueAction,
        position: Option<u32>,
        timestamp: i64,
    },
    Playlist {
        track: TrackRef,
        playlist_id: String,
        action: PlaylistAction,
        timestamp: i64,
    },
    Search {
        query: String,
        selected_track: Option<TrackRef>,
        position: Option<u32>,
        timestamp: i64,
    },
    Download {
        track: TrackRef,
        action: DownloadAction,
        timestamp: i64,
    },
}

impl UserEvent {
    pub fn timestamp(&self) -> i64 {
        match self {
            UserEvent::Listen { timestamp, .. } => *timestamp,
            UserEvent::Skip { timestamp, .. } => *timestamp,
            UserEvent::Like { timestamp, .. } => *timestamp,
            UserEvent::Dislike { timestamp, .. } => *timestamp,
            UserEvent::Queue { timestamp, .. } => *timestamp,
            UserEvent::Playlist { timestamp, .. } => *timestamp,
            UserEvent::Search { timestamp, .. } => *timestamp,
            UserEvent::Download { timestamp, .. } => *timestamp,
        }
    }

    /// Piste concernée, si l'événement en référence une
    pub fn track(&self) -> Option<&TrackRef> {
        match self {
            UserEvent::Listen { track, .. } => Some(track),
            UserEvent::Skip { track, .. } => Some(track),
            UserEvent::Like { track, .. } => Some(track),
            UserEvent::Dislike { track, .. } => Some(track),
            UserEvent::Queue { track, .. } => Some(track),
            UserEvent::Playlist { track, .. } => Some(track),
            UserEvent::Search { selected_track, .. } => selected_track.as_ref(),
            UserEvent::Download { track, .. } => Some(track),
        }
    }

    /// Signal positif: l'utilisateur a manifesté de l'intérêt
    pub fn is_positive_signal(&self) -> bool {
        match self {
            UserEvent::Listen { completed, completion, .. } => *completed || *completion >= 0.8,
            UserEvent::Skip { .. } => false,
            UserEvent::Like { .. } => true,
            UserEvent::Dislike { .. } => false,
            UserEvent::Queue { action, .. } => !matches!(action, QueueAction::Remove),
            UserEvent::Playlist { action, .. } => matches!(action, PlaylistAction::Add),
            UserEvent::Search { selected_track, .. } => selected_track.is_some(),
            UserEvent::Download { action, .. } => matches!(action, DownloadAction::Download),
        }
    }

    /// Signal négatif: l'utilisateur a manifesté du rejet
    pub fn is_negative_signal(&self) -> bool {
        match self {
            UserEvent::Listen { .. } => false,
            UserEvent::Skip { .. } => true,
            UserEvent::Like { .. } => false,
            UserEvent::Dislike { .. } => true,
            UserEvent::Queue { action, .. } => matches!(action, QueueAction::Remove),
            UserEvent::Playlist { action, .. } => matches!(action, PlaylistAction::Remove),
            UserEvent::Search { .. } => false,
            UserEvent::Download { action, .. } => matches!(action, DownloadAction::Remove),
        }
    }

    /// Poids relatif de l'événement pour l'accumulation vectorielle
    pub fn weight(&self) -> f32 {
        match self {
            UserEvent::Listen { completed, completion, .. } => {
                if *completed {
                    1.0
                } else {
                    0.6 * completion
                }
            }
            UserEvent::Skip { early, .. } => {
                if *early {
                    1.0
                } else {
                    0.5
                }
            }
            UserEvent::Like { strength, .. } => {
                if *strength >= 2 {
                    2.0
                } else {
                    1.5
                }
            }
            UserEvent::Dislike { reason, .. } => 1.5 * reason.weight(),
            UserEvent::Queue { action, .. } => match action {
                QueueAction::PlayNext => 0.8,
                QueueAction::Add => 0.5,
                QueueAction::MoveUp => 0.3,
                QueueAction::MoveDown => 0.2,
                QueueAction::Remove => 0.4,
            },
            UserEvent::Playlist { .. } => 1.0,
            UserEvent::Search { .. } => 0.4,
            UserEvent::Download { .. } => 0.8,
        }
    }
}
