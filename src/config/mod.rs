/// Configuration du moteur de recommandation
///
/// Toutes les constantes d'algorithme vivent ici, regroupées par sous-système.

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Version courante des analyses de features
///
/// Incrémentée à chaque changement de sémantique; les enregistrements
/// persistés sous une version antérieure sont traités comme absents.
pub const CURRENT_ANALYSIS_VERSION: u32 = 3;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    // Configuration des features
    pub features: FeatureConfig,

    // Configuration du stockage
    pub store: StoreConfig,

    // Configuration des embeddings
    pub embedding: EmbeddingConfig,

    // Configuration du scoring
    pub scoring: ScoringConfig,

    // Configuration du scoring séquentiel
    pub sequential: SequentialConfig,

    // Configuration de la matrice de co-occurrence
    pub cooccurrence: CoOccurrenceConfig,

    // Configuration du profil de goût
    pub taste: TasteConfig,

    // Configuration des playlists
    pub playlist: PlaylistConfig,

    // Configuration des radios
    pub radio: RadioConfig,

    // Configuration de l'apprentissage
    pub learning: LearningConfig,

    // Configuration du scheduler d'entraînement
    pub scheduler: SchedulerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Priorité maximale pour qu'un provider soit "core"
    pub core_priority_threshold: i32,
    /// Timeout par appel provider
    pub provider_timeout: Duration,
    /// Fetch des providers core en parallèle
    pub parallel_core_fetch: bool,
    /// TTL du cache mémoire
    pub cache_ttl: Duration,
    /// Taille maximale du cache mémoire (LRU au-delà)
    pub cache_max_entries: usize,
    /// Taille maximale du cache de similarités paires
    pub similarity_cache_max: usize,
    /// Nombre maximal de fetches simultanés (back-pressure)
    pub inflight_cap: usize,
    /// Taille de lot pour prefetch
    pub prefetch_batch_size: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            core_priority_threshold: 50,
            provider_timeout: Duration::from_secs(10),
            parallel_core_fetch: true,
            cache_ttl: Duration::from_secs(24 * 3600), // 24 heures
            cache_max_entries: 5000,
            similarity_cache_max: 10_000,
            inflight_cap: 64,
            prefetch_batch_size: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Fenêtre de debounce avant flush des clés sales
    pub flush_debounce: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_debounce: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Dimension D des vecteurs (projet entier)
    pub dimension: usize,
    /// Normalisation L2 à l'écriture
    pub normalize: bool,
    /// Poids du nouveau vecteur lors d'un update (0.7·new + 0.3·old)
    pub update_blend: f32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: 128,
            normalize: true,
            update_blend: 0.7,
        }
    }
}

/// Niveau d'exploration souhaité par l'utilisateur
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplorationLevel {
    Low,
    Balanced,
    High,
}

impl ExplorationLevel {
    /// Bonus maximal accordé à la nouveauté
    pub fn bonus(self) -> f32 {
        match self {
            ExplorationLevel::Low => 0.05,
            ExplorationLevel::Balanced => 0.15,
            ExplorationLevel::High => 0.25,
        }
    }
}

/// Table des poids des composantes positives du score hybride
///
/// La somme des poids positifs vaut 1.0; les pénalités ont des
/// multiplicateurs indépendants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub base_preference: f32,
    pub ml_prediction: f32,
    pub audio_match: f32,
    pub mood_match: f32,
    pub harmonic_flow: f32,
    pub temporal_fit: f32,
    pub session_flow: f32,
    pub activity_match: f32,
    pub exploration_bonus: f32,
    pub serendipity: f32,
    pub diversity: f32,
    pub trajectory_fit: f32,
    pub tempo_flow: f32,
    pub genre_transition: f32,
    pub energy_trend: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base_preference: 0.20,
            ml_prediction: 0.18,
            audio_match: 0.10,
            mood_match: 0.07,
            harmonic_flow: 0.05,
            temporal_fit: 0.05,
            session_flow: 0.05,
            activity_match: 0.04,
            exploration_bonus: 0.03,
            serendipity: 0.03,
            diversity: 0.04,
            trajectory_fit: 0.05,
            tempo_flow: 0.04,
            genre_transition: 0.04,
            energy_trend: 0.03,
        }
    }
}

/// Multiplicateurs des pénalités
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PenaltyMultipliers {
    pub recent_play: f32,
    pub dislike: f32,
    pub repetition: f32,
    pub fatigue: f32,
}

impl Default for PenaltyMultipliers {
    fn default() -> Self {
        Self {
            recent_play: 1.0,
            dislike: 1.5,
            repetition: 1.0,
            fatigue: 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub penalties: PenaltyMultipliers,
    /// Niveau d'exploration
    pub exploration: ExplorationLevel,
    /// Taille du cache d'explications (FIFO)
    pub explain_cache_size: usize,
    /// Durée de vie du snapshot de préférences dans le scorer
    pub preference_snapshot_ttl: Duration,
    /// Fenêtre de récence pour la pénalité de réécoute
    pub recent_play_window: Duration,
    /// Nombre de pistes du même artiste en session avant pénalité
    pub repetition_threshold: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            penalties: PenaltyMultipliers::default(),
            exploration: ExplorationLevel::Balanced,
            explain_cache_size: 100,
            preference_snapshot_ttl: Duration::from_secs(300), // 5 minutes
            recent_play_window: Duration::from_secs(3600), // 1 heure
            repetition_threshold: 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequentialConfig {
    /// Fenêtre de session considérée (dernières N pistes)
    pub window: usize,
    pub trajectory_weight: f32,
    pub tempo_weight: f32,
    pub genre_weight: f32,
    pub energy_weight: f32,
    /// Pas d'apprentissage des transitions de genre
    pub transition_learning_rate: f32,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            window: 5,
            trajectory_weight: 0.30,
            tempo_weight: 0.25,
            genre_weight: 0.25,
            energy_weight: 0.20,
            transition_learning_rate: 0.05,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoOccurrenceConfig {
    /// Nombre maximal de paires retenues
    pub max_pairs: usize,
    /// Facteur de décroissance quotidien
    pub decay_factor: f32,
    /// Compte minimal pour survivre au decay
    pub min_count: f32,
    /// Lambda de la pondération par proximité e^(-λ·|Δpos|)
    pub proximity_lambda: f32,
    /// Poids d'une lecture séquentielle
    pub sequential_weight: f32,
    /// Poids d'un like consécutif à une lecture
    pub like_after_play_weight: f32,
}

impl Default for CoOccurrenceConfig {
    fn default() -> Self {
        Self {
            max_pairs: 50_000,
            decay_factor: 0.98,
            min_count: 2.0,
            proximity_lambda: 0.1,
            sequential_weight: 1.5,
            like_after_play_weight: 3.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TasteConfig {
    /// Interactions minimales avant que le profil soit valide
    pub min_interactions: u32,
    /// Alpha de base du lissage exponentiel
    pub base_alpha: f32,
}

impl Default for TasteConfig {
    fn default() -> Self {
        Self {
            min_interactions: 10,
            base_alpha: 0.85,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaylistConfig {
    /// Maximum de pistes par artiste dans une playlist
    pub max_per_artist: usize,
    /// Multiplicateur de candidats avant sélection (3·limit)
    pub candidate_multiplier: usize,
    /// Poids embedding/collaboratif pour seeds et artist-radio
    pub seed_merge_weights: (f32, f32),
    /// Poids embedding/collaboratif pour find-similar
    pub similar_merge_weights: (f32, f32),
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            max_per_artist: 3,
            candidate_multiplier: 3,
            seed_merge_weights: (0.7, 0.3),
            similar_merge_weights: (0.6, 0.4),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Maximum de pistes par artiste dans une fournée radio
    pub max_per_artist: usize,
    /// Multiplicateur de candidats (3·count)
    pub candidate_multiplier: usize,
    /// Poids du seed au démarrage
    pub seed_weight_start: f32,
    /// Plancher du poids du seed
    pub seed_weight_floor: f32,
    /// Décroissance du poids par piste émise
    pub drift_step: f32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            max_per_artist: 2,
            candidate_multiplier: 3,
            seed_weight_start: 0.7,
            seed_weight_floor: 0.3,
            drift_step: 0.02,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Plafond du journal d'événements
    pub max_events: usize,
    /// Sauvegarde automatique tous les N événements
    pub autosave_every: usize,
    /// Taille minimale d'un dataset d'entraînement
    pub min_training_samples: usize,
    /// Facteur de décroissance quotidien des affinités
    pub affinity_decay_factor: f32,
    /// Taille maximale de l'index des lectures récentes
    pub recent_plays_max: usize,
    /// Taille conservée après troncature
    pub recent_plays_keep: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            autosave_every: 10,
            min_training_samples: 50,
            affinity_decay_factor: 0.98,
            recent_plays_max: 1000,
            recent_plays_keep: 500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Nouveaux événements requis avant un réentraînement
    pub min_new_events: usize,
    /// Intervalle minimal entre deux entraînements
    pub min_interval: Duration,
    /// Délai court avant exécution quand les conditions sont réunies
    pub short_fuse: Duration,
    /// Inactivité requise pour un entraînement "idle"
    pub idle_threshold: Duration,
    /// Détection d'inactivité activée
    pub idle_detection: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_new_events: 25,
            min_interval: Duration::from_secs(15 * 60), // 15 minutes
            short_fuse: Duration::from_secs(1),
            idle_threshold: Duration::from_secs(120),
            idle_detection: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            scoring: ScoringConfig::default(),
            sequential: SequentialConfig::default(),
            cooccurrence: CoOccurrenceConfig::default(),
            taste: TasteConfig::default(),
            playlist: PlaylistConfig::default(),
            radio: RadioConfig::default(),
            learning: LearningConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = ScoringWeights::default();
        let sum = w.base_preference + w.ml_prediction + w.audio_match + w.mood_match
            + w.harmonic_flow + w.temporal_fit + w.session_flow + w.activity_match
            + w.exploration_bonus + w.serendipity + w.diversity + w.trajectory_fit
            + w.tempo_flow + w.genre_transition + w.energy_trend;
        assert!((sum - 1.0).abs() < 1e-6, "somme des poids = {}", sum);
    }

    #[test]
    fn test_exploration_bonus_levels() {
        assert!(ExplorationLevel::Low.bonus() < ExplorationLevel::Balanced.bonus());
        assert!(ExplorationLevel::Balanced.bonus() < ExplorationLevel::High.bonus());
    }
}
