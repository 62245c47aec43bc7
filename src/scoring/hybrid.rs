/// Scoreur hybride
///
/// Fusionne les composantes pondérées (préférences, prédiction ML,
/// adéquation audio, flux harmonique, signaux séquentiels...) en un score
/// calibré 0-100 avec piste d'explication. Les pénalités ont des
/// multiplicateurs indépendants.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::ScoringConfig;
use crate::error::{AppError, Result};
use crate::features::FeatureAggregator;
use crate::learning::preferences::{PreferenceSnapshot, PreferenceStore};
use crate::learning::Predictor;
use crate::model::{now_ms, AggregatedFeatures, KeyMode, Track, UserEvent};
use crate::scoring::feature_vector::build_feature_vector;
use crate::scoring::mood::{activity_match, mood_match, serendipity_score};
use crate::scoring::sequential::SequentialScorer;
use crate::scoring::{ScoringContext, SessionTrack, TrackScore};
use crate::vector::math::cosine_similarity;

/// Points de base des pénalités, avant multiplicateur
const RECENT_PLAY_POINTS: f32 = 15.0;
const DISLIKE_POINTS: f32 = 20.0;
const REPETITION_POINTS: f32 = 10.0;
const FATIGUE_POINTS: f32 = 10.0;

/// Ordre déterministe des composantes pour l'explication
const COMPONENT_ORDER: [&str; 15] = [
    "basePreference",
    "mlPrediction",
    "audioMatch",
    "moodMatch",
    "harmonicFlow",
    "temporalFit",
    "sessionFlow",
    "activityMatch",
    "explorationBonus",
    "serendipityScore",
    "diversityScore",
    "trajectoryFit",
    "tempoFlow",
    "genreTransition",
    "energyTrend",
];

const PENALTY_ORDER: [&str; 4] =
    ["recentPlayPenalty", "dislikePenalty", "repetitionPenalty", "fatiguePenalty"];

pub struct HybridScorer {
    config: ScoringConfig,
    preferences: Arc<PreferenceStore>,
    predictor: Arc<dyn Predictor>,
    sequential: Arc<SequentialScorer>,
    aggregator: FeatureAggregator,
    /// Snapshot des préférences, rafraîchi après TTL ou sur like/dislike
    preference_cache: Mutex<Option<(Instant, Arc<PreferenceSnapshot>)>>,
    /// Scores récents pour `explain`, éviction FIFO
    explain_cache: Mutex<VecDeque<TrackScore>>,
    scores_computed: AtomicU64,
}

impl HybridScorer {
    pub fn new(
        config: ScoringConfig,
        preferences: Arc<PreferenceStore>,
        predictor: Arc<dyn Predictor>,
        sequential: Arc<SequentialScorer>,
        aggregator: FeatureAggregator,
    ) -> Self {
        Self {
            config,
            preferences,
            predictor,
            sequential,
            aggregator,
            preference_cache: Mutex::new(None),
            explain_cache: Mutex::new(VecDeque::new()),
            scores_computed: AtomicU64::new(0),
        }
    }

    /// Snapshot de préférences partagé, TTL de 5 minutes
    fn preference_snapshot(&self) -> Arc<PreferenceSnapshot> {
        let mut cache = self.preference_cache.lock();
        if let Some((taken_at, snapshot)) = cache.as_ref() {
            if taken_at.elapsed() < self.config.preference_snapshot_ttl {
                return snapshot.clone();
            }
        }
        let fresh = Arc::new(self.preferences.snapshot());
        *cache = Some((Instant::now(), fresh.clone()));
        fresh
    }

    /// Invalidation immédiate du snapshot sur les signaux forts
    pub fn handle_event(&self, event: &UserEvent) {
        if matches!(event, UserEvent::Like { .. } | UserEvent::Dislike { .. }) {
            *self.preference_cache.lock() = None;
            debug!("Snapshot de préférences invalidé par un signal fort");
        }
    }

    pub fn scores_computed(&self) -> u64 {
        self.scores_computed.load(Ordering::Relaxed)
    }

    /// Score d'une piste unique
    pub async fn score_track(&self, track: &Track, context: &ScoringContext) -> TrackScore {
        let features = self.aggregator.get(&track.track_id).await;
        let snapshot = self.preference_snapshot();
        self.score_with(track, &features, &snapshot, context)
    }

    /// Scoring par lots: fetch des features en parallèle, scoring
    /// séquentiel sous le même contexte et le même snapshot
    pub async fn score_batch(&self, tracks: &[Track], context: &ScoringContext) -> Vec<TrackScore> {
        let ids: Vec<String> = tracks.iter().map(|t| t.track_id.clone()).collect();
        let features = self.aggregator.get_batch(&ids).await;
        let snapshot = self.preference_snapshot();
        tracks
            .iter()
            .zip(features.iter())
            .map(|(track, features)| self.score_with(track, features, &snapshot, context))
            .collect()
    }

    /// Explication du dernier score d'une piste
    pub fn explain(&self, track_id: &str) -> Result<TrackScore> {
        let cache = self.explain_cache.lock();
        cache
            .iter()
            .rev()
            .find(|s| s.track_id == track_id)
            .cloned()
            .ok_or_else(|| AppError::MissingData {
                resource: format!("score en cache pour {}", track_id),
            })
    }

    fn remember(&self, score: &TrackScore) {
        let mut cache = self.explain_cache.lock();
        cache.push_back(score.clone());
        while cache.len() > self.config.explain_cache_size {
            cache.pop_front();
        }
    }

    /// Coeur du scoring, entièrement déterministe pour des entrées fixes
    fn score_with(
        &self,
        track: &Track,
        features: &AggregatedFeatures,
        snapshot: &PreferenceSnapshot,
        context: &ScoringContext,
    ) -> TrackScore {
        self.scores_computed.fetch_add(1, Ordering::Relaxed);
        let weights = &self.config.weights;
        let now = now_ms();
        let mut fusion = Fusion::default();

        // basePreference: mélange artiste/genre des affinités normalisées
        let artist_affinity = track.primary_artist().and_then(|a| {
            snapshot.knows_artist(a).then(|| snapshot.artist_affinity(a))
        });
        let genre_affinity = track.primary_genre().and_then(|g| {
            snapshot.knows_genre(g).then(|| snapshot.genre_affinity(g))
        });
        let base_preference = match (artist_affinity, genre_affinity) {
            (None, None) => None,
            (artist, genre) => {
                let artist = artist.unwrap_or(0.0);
                let genre = genre.unwrap_or(0.0);
                Some(((0.7 * artist + 0.3 * genre) + 1.0) / 2.0)
            }
        };
        fusion.fuse("basePreference", base_preference, weights.base_preference);

        // mlPrediction: poids effectif proportionnel à la confiance du modèle
        let predictor_confidence = self.predictor.confidence();
        let effective_ml_weight =
            weights.ml_prediction * (0.1 + 0.5 * predictor_confidence.clamp(0.0, 1.0));
        let ml_prediction = if predictor_confidence > 0.0 {
            let vector = build_feature_vector(
                track,
                features,
                snapshot,
                context.hour_of_day,
                context.day_of_week,
                now,
            );
            Some(self.predictor.predict(&vector))
        } else {
            None
        };
        fusion.fuse("mlPrediction", ml_prediction, effective_ml_weight);

        fusion.fuse(
            "audioMatch",
            audio_match(track, features, context.current_track.as_ref()),
            weights.audio_match,
        );
        fusion.fuse(
            "moodMatch",
            context.user_mood.and_then(|mood| mood_match(mood, features)),
            weights.mood_match,
        );
        fusion.fuse(
            "harmonicFlow",
            harmonic_flow(features, track, context.current_track.as_ref()),
            weights.harmonic_flow,
        );

        // temporalFit: affinité genre-par-heure au moment présent
        let temporal_fit = track.primary_genre().and_then(|genre| {
            snapshot
                .genre_by_hour
                .contains_key(genre)
                .then(|| snapshot.genre_hour_affinity(genre, context.hour_of_day))
        });
        fusion.fuse("temporalFit", temporal_fit, weights.temporal_fit);

        fusion.fuse(
            "sessionFlow",
            session_flow(track, features, &context.session_tracks),
            weights.session_flow,
        );
        fusion.fuse(
            "activityMatch",
            context.activity.and_then(|a| activity_match(a, features)),
            weights.activity_match,
        );

        // explorationBonus: plafonné par le niveau d'exploration. La
        // nouveauté n'a de sens que contre un historique existant.
        let has_history = snapshot.total_listens > 0 || !snapshot.artists.is_empty();
        let epsilon = context.exploration.unwrap_or(self.config.exploration).bonus();
        let artist_known = track.primary_artist().map(|a| snapshot.knows_artist(a));
        let genre_known = track.primary_genre().map(|g| snapshot.knows_genre(g));
        let exploration_bonus = match (has_history, artist_known, genre_known) {
            (false, _, _) => None,
            (true, Some(false), _) => Some(epsilon),
            (true, Some(true), Some(false)) => Some(epsilon * 0.5),
            _ => None,
        };
        fusion.fuse_bonus("explorationBonus", exploration_bonus, weights.exploration_bonus);

        let serendipity = if has_history { serendipity_score(track, snapshot) } else { None };
        fusion.fuse_bonus("serendipityScore", serendipity, weights.serendipity);
        fusion.fuse("diversityScore", diversity_score(track, &context.queued), weights.diversity);

        // Signaux séquentiels
        if context.session_tracks.is_empty() {
            fusion.fuse("trajectoryFit", None, weights.trajectory_fit);
            fusion.fuse("tempoFlow", None, weights.tempo_flow);
            fusion.fuse("genreTransition", None, weights.genre_transition);
            fusion.fuse("energyTrend", None, weights.energy_trend);
        } else {
            let candidate = SessionTrack::from_features(track, features);
            let sequential = self.sequential.score(&candidate, &context.session_tracks);
            fusion.fuse("trajectoryFit", Some(sequential.trajectory_fit), weights.trajectory_fit);
            fusion.fuse("tempoFlow", Some(sequential.tempo_flow), weights.tempo_flow);
            fusion.fuse("genreTransition", Some(sequential.genre_transition), weights.genre_transition);
            fusion.fuse("energyTrend", Some(sequential.energy_progression), weights.energy_trend);
        }

        // Pénalités, multiplicateurs indépendants
        let multipliers = &self.config.penalties;
        let mut penalties: Vec<(&str, f32, f32)> = Vec::new();
        if snapshot.was_recently_played(&track.track_id, self.config.recent_play_window, now) {
            penalties.push(("recentPlayPenalty", 1.0, RECENT_PLAY_POINTS * multipliers.recent_play));
        }
        let dislike_level = if snapshot.is_track_disliked(&track.track_id) {
            1.0
        } else if track
            .primary_artist()
            .and_then(|a| snapshot.artist(a))
            .map(|a| a.dislike_count > 0)
            .unwrap_or(false)
        {
            0.6
        } else {
            0.0
        };
        if dislike_level > 0.0 {
            penalties.push(("dislikePenalty", dislike_level, DISLIKE_POINTS * multipliers.dislike));
        }
        let repetition = repetition_level(
            track,
            &context.session_tracks,
            &context.queued,
            self.config.repetition_threshold,
        );
        if repetition > 0.0 {
            penalties.push(("repetitionPenalty", repetition, REPETITION_POINTS * multipliers.repetition));
        }
        let fatigue = fatigue_level(features, &context.session_tracks);
        if fatigue > 0.0 {
            penalties.push(("fatiguePenalty", fatigue, FATIGUE_POINTS * multipliers.fatigue));
        }

        let penalty_points: f32 = penalties.iter().map(|(_, level, points)| level * points).sum();
        for (name, level, _) in &penalties {
            fusion.components.insert(name.to_string(), *level);
        }

        let (final_score, confidence, explanation) =
            if fusion.supplied == 0 && penalties.is_empty() {
                // Absence complète de données
                (50.0, 0.0, vec!["no data".to_string()])
            } else {
                let final_score =
                    ((fusion.positive() + fusion.bonus_sum) * 100.0 - penalty_points)
                        .clamp(0.0, 100.0);
                let confidence = (0.3 + 0.1 * fusion.supplied as f32).min(1.0);
                (final_score, confidence, build_explanation(&fusion.components))
            };

        let score = TrackScore {
            track_id: track.track_id.clone(),
            final_score,
            confidence,
            components: fusion.components,
            explanation,
        };
        self.remember(&score);
        score
    }
}

/// Accumulateur de fusion des composantes
///
/// Les composantes régulières contribuent à une moyenne pondérée (0.5
/// neutre quand la donnée manque); les canaux bonus s'ajoutent au-dessus
/// et ne contribuent jamais de valeur neutre.
#[derive(Default)]
struct Fusion {
    components: HashMap<String, f32>,
    supplied: usize,
    weighted_sum: f32,
    weight_mass: f32,
    bonus_sum: f32,
}

impl Fusion {
    fn fuse(&mut self, name: &str, value: Option<f32>, weight: f32) {
        self.weight_mass += weight;
        match value {
            Some(value) => {
                let value = value.clamp(0.0, 1.0);
                self.components.insert(name.to_string(), value);
                self.supplied += 1;
                self.weighted_sum += weight * value;
            }
            None => self.weighted_sum += weight * 0.5, // composante neutre
        }
    }

    fn fuse_bonus(&mut self, name: &str, value: Option<f32>, weight: f32) {
        if let Some(value) = value {
            let value = value.clamp(0.0, 1.0);
            self.components.insert(name.to_string(), value);
            self.supplied += 1;
            self.bonus_sum += weight * value;
        }
    }

    /// Moyenne pondérée des composantes régulières
    fn positive(&self) -> f32 {
        if self.weight_mass <= f32::EPSILON {
            0.5
        } else {
            self.weighted_sum / self.weight_mass
        }
    }
}

/// Similarité des descripteurs audio normalisés avec la piste en cours
fn audio_match(
    track: &Track,
    features: &AggregatedFeatures,
    current: Option<&SessionTrack>,
) -> Option<f32> {
    let current = current?;
    let audio = features.audio.as_ref().or(track.audio.as_ref())?;
    let mut squared = 0.0f32;
    let mut dims = 0usize;
    let mut push = |a: Option<f32>, b: Option<f32>| {
        if let (Some(a), Some(b)) = (a, b) {
            squared += (a - b).powi(2);
            dims += 1;
        }
    };
    push(audio.energy, current.energy);
    push(audio.danceability, current.danceability);
    push(audio.bpm.map(|b| (b - 20.0) / 280.0), current.bpm.map(|b| (b - 20.0) / 280.0));
    if dims == 0 {
        return None;
    }
    let distance = squared.sqrt();
    let max_distance = (dims as f32).sqrt();
    Some((1.0 - distance / max_distance).clamp(0.0, 1.0))
}

/// Distance sur le cycle des quintes avec bonus relatif et de mode
fn harmonic_flow(
    features: &AggregatedFeatures,
    track: &Track,
    current: Option<&SessionTrack>,
) -> Option<f32> {
    let current = current?;
    let audio = features.audio.as_ref().or(track.audio.as_ref())?;
    let (candidate_key, current_key) = (audio.key?, current.key?);
    let candidate_mode = audio.mode;
    let current_mode = current.mode;

    // Relatif majeur/mineur: mêmes altérations, modes opposés
    if let (Some(cm), Some(km)) = (current_mode, candidate_mode) {
        if cm != km {
            let relative = match cm {
                KeyMode::Major => (current_key + 9) % 12,
                KeyMode::Minor => (current_key + 3) % 12,
            };
            if relative == candidate_key {
                return Some(0.9);
            }
        }
    }

    // Position sur le cycle des quintes: pc · 7 mod 12
    let p1 = (current_key as i16 * 7) % 12;
    let p2 = (candidate_key as i16 * 7) % 12;
    let raw = (p1 - p2).unsigned_abs() as u16 % 12;
    let distance = raw.min(12 - raw) as f32; // 0..6
    let mut score = 1.0 - distance / 6.0;
    if current_mode.is_some() && current_mode == candidate_mode {
        score = (score + 0.1).min(1.0);
    }
    Some(score)
}

/// Continuité énergie/danceability avec les pistes récentes
fn session_flow(
    track: &Track,
    features: &AggregatedFeatures,
    session: &[SessionTrack],
) -> Option<f32> {
    if session.is_empty() {
        return None;
    }
    let audio = features.audio.as_ref().or(track.audio.as_ref())?;
    let mut scores = Vec::new();
    let energies: Vec<f32> = session.iter().filter_map(|t| t.energy).collect();
    if let (Some(energy), false) = (audio.energy, energies.is_empty()) {
        let mean = energies.iter().sum::<f32>() / energies.len() as f32;
        scores.push(1.0 - (energy - mean).abs());
    }
    let dance: Vec<f32> = session.iter().filter_map(|t| t.danceability).collect();
    if let (Some(danceability), false) = (audio.danceability, dance.is_empty()) {
        let mean = dance.iter().sum::<f32>() / dance.len() as f32;
        scores.push(1.0 - (danceability - mean).abs());
    }
    if scores.is_empty() {
        return None;
    }
    Some((scores.iter().sum::<f32>() / scores.len() as f32).clamp(0.0, 1.0))
}

/// Diversité contre la file: pénalise les artistes/genres saturés
fn diversity_score(track: &Track, queued: &[SessionTrack]) -> Option<f32> {
    if queued.is_empty() {
        return None;
    }
    let artist = track.primary_artist();
    let genre = track.primary_genre();
    let artist_count = queued
        .iter()
        .filter(|t| artist.is_some() && t.artist.as_deref() == artist)
        .count() as f32;
    let genre_count = queued
        .iter()
        .filter(|t| genre.is_some() && t.genre.as_deref() == genre)
        .count() as f32;
    let saturation = 0.6 * (artist_count / 3.0).min(1.0) + 0.4 * (genre_count / 5.0).min(1.0);
    Some((1.0 - saturation).clamp(0.0, 1.0))
}

/// Niveau de répétition d'artiste sur session + file
fn repetition_level(
    track: &Track,
    session: &[SessionTrack],
    queued: &[SessionTrack],
    threshold: usize,
) -> f32 {
    let Some(artist) = track.primary_artist() else {
        return 0.0;
    };
    let count = session
        .iter()
        .chain(queued.iter())
        .filter(|t| t.artist.as_deref() == Some(artist))
        .count();
    if count < threshold {
        0.0
    } else {
        (0.4 * (count - threshold + 1) as f32).min(1.0)
    }
}

/// Fatigue: similarité cumulée aux sonorités de la session
fn fatigue_level(features: &AggregatedFeatures, session: &[SessionTrack]) -> f32 {
    let Some(embedding) = features.embedding.as_ref() else {
        return 0.0;
    };
    let similarities: Vec<f32> = session
        .iter()
        .filter_map(|t| t.embedding.as_ref())
        .map(|v| cosine_similarity(&embedding.vector, v))
        .collect();
    if similarities.is_empty() {
        return 0.0;
    }
    let mean = similarities.iter().sum::<f32>() / similarities.len() as f32;
    if mean > 0.85 {
        ((mean - 0.85) / 0.15).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Phrases d'explication, ordre déterministe
fn build_explanation(components: &HashMap<String, f32>) -> Vec<String> {
    let mut explanation = Vec::new();
    for name in COMPONENT_ORDER {
        let Some(value) = components.get(name) else {
            continue;
        };
        if *value > 0.7 {
            explanation.push(format!("{}: strong ({:.2})", name, value));
        } else if *value < 0.3 {
            explanation.push(format!("{}: weak ({:.2})", name, value));
        }
    }
    for name in PENALTY_ORDER {
        if let Some(level) = components.get(name) {
            explanation.push(format!("{}: -{:.2}", name, level));
        }
    }
    if explanation.is_empty() {
        explanation.push("balanced profile".to_string());
    }
    explanation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureConfig, LearningConfig, SequentialConfig};
    use crate::learning::HeuristicPredictor;
    use crate::model::{AudioDescriptors, TrackRef};

    fn scorer() -> HybridScorer {
        let preferences = Arc::new(PreferenceStore::new(LearningConfig::default()));
        let predictor: Arc<dyn Predictor> = Arc::new(HeuristicPredictor::new(50));
        let sequential = Arc::new(SequentialScorer::new(SequentialConfig::default()));
        let aggregator = FeatureAggregator::new(FeatureConfig::default(), 3, None);
        HybridScorer::new(
            ScoringConfig::default(),
            preferences,
            predictor,
            sequential,
            aggregator,
        )
    }

    fn bare_track(id: &str) -> Track {
        Track {
            track_id: id.to_string(),
            title: "T".to_string(),
            artists: vec!["A".to_string()],
            duration_s: 200.0,
            album: None,
            release_year: None,
            genres: vec!["rock".to_string()],
            tags: vec![],
            audio: None,
        }
    }

    fn track_ref(track: &Track) -> TrackRef {
        TrackRef {
            track_id: track.track_id.clone(),
            artists: track.artists.clone(),
            genres: track.genres.clone(),
            duration_s: track.duration_s,
        }
    }

    #[tokio::test]
    async fn test_fresh_user_neutral_score() {
        let s = scorer();
        let score = s.score_track(&bare_track("t1"), &ScoringContext::default()).await;
        assert!((45.0..=55.0).contains(&score.final_score), "score {}", score.final_score);
        assert!(score.confidence < 0.2);
        assert!(score.explanation.iter().any(|e| e.contains("no data")));
    }

    #[tokio::test]
    async fn test_score_bounded_0_100() {
        let s = scorer();
        let track = bare_track("t1");
        // Affinités extrêmes dans les deux sens
        s.preferences.set_artist_affinity("A", 100.0);
        let high = s.score_track(&track, &ScoringContext::default()).await;
        assert!(high.final_score <= 100.0);
        s.handle_event(&UserEvent::Like { track: track_ref(&track), strength: 1, timestamp: 0 });
        s.preferences.set_artist_affinity("A", -100.0);
        s.handle_event(&UserEvent::Like { track: track_ref(&track), strength: 1, timestamp: 0 });
        let low = s.score_track(&track, &ScoringContext::default()).await;
        assert!(low.final_score >= 0.0);
        assert!(high.final_score > low.final_score);
    }

    #[tokio::test]
    async fn test_deterministic_for_same_preconditions() {
        let s = scorer();
        let track = bare_track("t1");
        let mut context = ScoringContext::default();
        context.hour_of_day = 14;
        context.day_of_week = 3;
        let first = s.score_track(&track, &context).await;
        let second = s.score_track(&track, &context).await;
        assert_eq!(first.final_score, second.final_score);
        assert_eq!(first.components, second.components);
        assert_eq!(first.explanation, second.explanation);
    }

    #[tokio::test]
    async fn test_liked_artist_scores_higher() {
        let s = scorer();
        let track = bare_track("t1");
        let neutral = s.score_track(&track, &ScoringContext::default()).await;
        let like = UserEvent::Like { track: track_ref(&track), strength: 2, timestamp: now_ms() };
        s.preferences.update_from_event(&like);
        s.handle_event(&like); // invalide le snapshot immédiatement
        let boosted = s.score_track(&track, &ScoringContext::default()).await;
        assert!(boosted.final_score > neutral.final_score);
        assert!(boosted.components.contains_key("basePreference"));
    }

    #[tokio::test]
    async fn test_dislike_penalty_applies() {
        let s = scorer();
        let track = bare_track("t1");
        let dislike = UserEvent::Dislike {
            track: track_ref(&track),
            reason: crate::model::DislikeReason::DislikeArtist,
            comment: None,
            timestamp: now_ms(),
        };
        s.preferences.update_from_event(&dislike);
        s.handle_event(&dislike);
        let score = s.score_track(&track, &ScoringContext::default()).await;
        assert!(score.components.contains_key("dislikePenalty"));
        assert!(score.explanation.iter().any(|e| e.contains("dislikePenalty")));
    }

    #[tokio::test]
    async fn test_components_subset_of_explanation_universe() {
        let s = scorer();
        let track = bare_track("t1");
        s.preferences.set_artist_affinity("A", 80.0);
        let score = s.score_track(&track, &ScoringContext::default()).await;
        let known: Vec<&str> =
            COMPONENT_ORDER.iter().chain(PENALTY_ORDER.iter()).copied().collect();
        for name in score.components.keys() {
            assert!(known.contains(&name.as_str()), "composante inconnue {}", name);
        }
    }

    #[tokio::test]
    async fn test_explain_cache_hit_and_miss() {
        let s = scorer();
        let track = bare_track("t1");
        let score = s.score_track(&track, &ScoringContext::default()).await;
        let explained = s.explain("t1").unwrap();
        assert_eq!(explained.final_score, score.final_score);
        assert!(matches!(s.explain("absent"), Err(AppError::MissingData { .. })));
    }

    #[tokio::test]
    async fn test_explain_cache_fifo_eviction() {
        let s = scorer();
        for i in 0..120 {
            s.score_track(&bare_track(&format!("t{}", i)), &ScoringContext::default()).await;
        }
        // Les 100 plus récents survivent
        assert!(s.explain("t0").is_err());
        assert!(s.explain("t119").is_ok());
    }

    #[tokio::test]
    async fn test_batch_scores_share_context() {
        let s = scorer();
        let tracks: Vec<Track> = (0..5).map(|i| bare_track(&format!("t{}", i))).collect();
        let scores = s.score_batch(&tracks, &ScoringContext::default()).await;
        assert_eq!(scores.len(), 5);
    }

    #[tokio::test]
    async fn test_session_enables_sequential_components() {
        let s = scorer();
        let mut track = bare_track("t1");
        track.audio = Some(AudioDescriptors {
            bpm: Some(122.0),
            energy: Some(0.6),
            ..Default::default()
        });
        let mut context = ScoringContext::default();
        context.session_tracks = vec![SessionTrack {
            track_id: "prev".to_string(),
            bpm: Some(120.0),
            energy: Some(0.55),
            genre: Some("rock".to_string()),
            ..Default::default()
        }];
        let score = s.score_track(&track, &context).await;
        assert!(score.components.contains_key("tempoFlow"));
        assert!(score.components.contains_key("genreTransition"));
        assert!(score.confidence > 0.3);
    }
}
