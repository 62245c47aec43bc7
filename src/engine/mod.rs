/// Orchestrateur du moteur de recommandation
///
/// Câble tous les sous-systèmes et expose l'API publique: scoring,
/// classement, radio, similarité, enregistrement d'événements et
/// entraînement. Un singleton optionnel est disponible via
/// `init_engine` / `get_engine` / `reset_engine`.

pub mod queue;

pub use queue::SmartQueue;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Timelike, Utc};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::CacheStats;
use crate::config::{EngineConfig, CURRENT_ANALYSIS_VERSION};
use crate::error::{AppError, Result};
use crate::features::{
    Capabilities, FeatureAggregator, FeatureProvider, ProviderDescriptor, ProviderMode,
};
use crate::library::LibrarySource;
use crate::learning::{
    DatasetOptions, EventRecorder, HeuristicPredictor, PreferenceStore, Predictor,
    TrainingResult, TrainingScheduler,
};
use crate::model::{
    now_ms, AudioDescriptors, Embedding, FeatureKind, GenreDescriptors, GenreSource, Track,
    UserEvent,
};
use crate::playlist::{merge_max_normalized, PlaylistGenerator, PlaylistMethod, PlaylistOptions};
use crate::radio::{RadioGenerator, RadioSeed};
use crate::scoring::{
    build_feature_vector, HybridScorer, ScoredTrack, ScoringContext, SequentialScorer, TrackScore,
};
use crate::storage::{FeatureStore, KVStore};
use crate::vector::{CoOccurrenceMatrix, EmbeddingEngine, TasteProfile, VectorIndex};

/// Statistiques agrégées du moteur
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub events_recorded: usize,
    pub scores_computed: u64,
    pub indexed_embeddings: usize,
    pub cooccurrence_pairs: usize,
    pub taste_interactions: u32,
    pub predictor_confidence: f32,
    pub feature_memory_cache: CacheStats,
    pub providers: usize,
}

struct EngineInner {
    config: EngineConfig,
    kv: Arc<dyn KVStore>,
    library: Arc<dyn LibrarySource>,
    feature_store: FeatureStore,
    aggregator: FeatureAggregator,
    embedding: Arc<EmbeddingEngine>,
    index: Arc<VectorIndex>,
    cooccurrence: Arc<CoOccurrenceMatrix>,
    taste: Arc<TasteProfile>,
    preferences: Arc<PreferenceStore>,
    recorder: Arc<EventRecorder>,
    predictor: Arc<dyn Predictor>,
    sequential: Arc<SequentialScorer>,
    scorer: Arc<HybridScorer>,
    playlist: Arc<PlaylistGenerator>,
    radio: RadioGenerator,
    scheduler: TrainingScheduler,
    queue: SmartQueue,
    event_counter: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Construit le moteur avec le prédicteur heuristique intégré
    pub async fn new(
        config: EngineConfig,
        kv: Arc<dyn KVStore>,
        library: Arc<dyn LibrarySource>,
    ) -> Result<Self> {
        let predictor: Arc<dyn Predictor> =
            Arc::new(HeuristicPredictor::new(config.learning.min_training_samples));
        Self::with_predictor(config, kv, library, predictor).await
    }

    /// Construit le moteur avec un prédicteur fourni par l'hôte
    pub async fn with_predictor(
        config: EngineConfig,
        kv: Arc<dyn KVStore>,
        library: Arc<dyn LibrarySource>,
        predictor: Arc<dyn Predictor>,
    ) -> Result<Self> {
        let feature_store = FeatureStore::open(
            kv.clone(),
            CURRENT_ANALYSIS_VERSION,
            config.store.flush_debounce,
        )
        .await?;
        let aggregator = FeatureAggregator::new(
            config.features.clone(),
            CURRENT_ANALYSIS_VERSION,
            Some(feature_store.clone()),
        );
        let embedding = Arc::new(EmbeddingEngine::new(config.embedding.clone()));
        let index = Arc::new(VectorIndex::new());
        let cooccurrence = Arc::new(CoOccurrenceMatrix::new(config.cooccurrence.clone()));
        let taste = Arc::new(TasteProfile::new(config.embedding.dimension, config.taste.clone()));
        let preferences = Arc::new(PreferenceStore::new(config.learning.clone()));
        let recorder = Arc::new(EventRecorder::new(config.learning.clone(), Some(kv.clone())));
        let sequential = Arc::new(SequentialScorer::new(config.sequential.clone()));
        let scorer = Arc::new(HybridScorer::new(
            config.scoring.clone(),
            preferences.clone(),
            predictor.clone(),
            sequential.clone(),
            aggregator.clone(),
        ));
        let playlist = Arc::new(PlaylistGenerator::new(
            config.playlist.clone(),
            embedding.clone(),
            index.clone(),
            cooccurrence.clone(),
            taste.clone(),
            library.clone(),
        ));
        let radio = RadioGenerator::new(
            config.radio.clone(),
            scorer.clone(),
            embedding.clone(),
            index.clone(),
            cooccurrence.clone(),
            library.clone(),
        );
        let scheduler = TrainingScheduler::new(config.scheduler.clone());
        let queue = SmartQueue::new(
            library.clone(),
            index.clone(),
            cooccurrence.clone(),
            taste.clone(),
        );

        let engine = Self {
            inner: Arc::new(EngineInner {
                config,
                kv,
                library,
                feature_store,
                aggregator,
                embedding,
                index,
                cooccurrence,
                taste,
                preferences,
                recorder,
                predictor,
                sequential,
                scorer,
                playlist,
                radio,
                scheduler,
                queue,
                event_counter: Arc::new(AtomicUsize::new(0)),
            }),
        };
        engine.wire_event_listeners();
        Ok(engine)
    }

    /// Abonne les sous-systèmes au flux d'événements
    ///
    /// Les événements sont appliqués dans l'ordre de réception; les
    /// résultats de scoring reflètent tous les événements précédents.
    fn wire_event_listeners(&self) {
        let inner = &self.inner;
        // Piste précédente: (track_id, genre) pour les transitions
        let last_played: Arc<Mutex<Option<(String, Option<String>)>>> =
            Arc::new(Mutex::new(None));

        {
            let preferences = inner.preferences.clone();
            inner.recorder.subscribe(move |event| preferences.update_from_event(event));
        }
        {
            let scorer = inner.scorer.clone();
            inner.recorder.subscribe(move |event| scorer.handle_event(event));
        }
        {
            let cooccurrence = inner.cooccurrence.clone();
            let sequential = inner.sequential.clone();
            let taste = inner.taste.clone();
            let index = inner.index.clone();
            let last_tracker = last_played.clone();
            inner.recorder.subscribe(move |event| {
                let mut last = last_tracker.lock();
                match event {
                    UserEvent::Listen { track, completed, timestamp, .. } => {
                        let genre = track.genres.first().cloned();
                        if let Some((previous_id, previous_genre)) = last.as_ref() {
                            if previous_id != &track.track_id {
                                cooccurrence.record_sequential_play(previous_id, &track.track_id);
                                if *completed {
                                    if let (Some(from), Some(to)) =
                                        (previous_genre.as_deref(), genre.as_deref())
                                    {
                                        sequential.reinforce_transition(from, to);
                                    }
                                }
                            }
                        }
                        if let Some(vector) = index.get(&track.track_id) {
                            let (hour, day) = hour_and_day(*timestamp);
                            taste.update_positive(&vector, event.weight(), hour, day);
                        }
                        cooccurrence.maybe_decay();
                        *last = Some((track.track_id.clone(), genre));
                    }
                    UserEvent::Skip { track, .. } => {
                        if let Some((_, previous_genre)) = last.as_ref() {
                            if let (Some(from), Some(to)) =
                                (previous_genre.as_deref(), track.genres.first())
                            {
                                sequential.weaken_transition(from, to);
                            }
                        }
                        if let Some(vector) = index.get(&track.track_id) {
                            taste.update_negative(&vector, event.weight());
                        }
                    }
                    UserEvent::Like { track, timestamp, .. } => {
                        if let Some((previous_id, _)) = last.as_ref() {
                            cooccurrence.record_like_after_play(previous_id, &track.track_id);
                        }
                        if let Some(vector) = index.get(&track.track_id) {
                            let (hour, day) = hour_and_day(*timestamp);
                            taste.update_positive(&vector, event.weight(), hour, day);
                        }
                    }
                    UserEvent::Dislike { track, .. } => {
                        if let Some(vector) = index.get(&track.track_id) {
                            taste.update_negative(&vector, event.weight());
                        }
                    }
                    UserEvent::Queue { .. }
                    | UserEvent::Playlist { .. }
                    | UserEvent::Search { .. }
                    | UserEvent::Download { .. } => {}
                }
            });
        }
        {
            let scheduler = inner.scheduler.clone();
            let counter = inner.event_counter.clone();
            inner.recorder.subscribe(move |_| {
                scheduler.notify_activity();
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                scheduler.check_and_schedule(count);
            });
        }
    }

    /// Charge l'état persisté et démarre les tâches de fond
    pub async fn initialize(&self) -> Result<()> {
        info!("🚀 Initialisation du moteur de recommandation");
        let inner = &self.inner;

        let events = inner.recorder.load().await?;
        inner.event_counter.store(events, Ordering::SeqCst);
        inner.preferences.load(&inner.kv).await?;
        let embeddings = inner.index.load(&inner.kv).await?;
        inner.cooccurrence.load(&inner.kv).await?;
        inner.taste.load(&inner.kv).await?;
        inner.sequential.load(&inner.kv).await?;
        if let Err(e) = inner.predictor.load(&inner.kv).await {
            warn!("Chargement du prédicteur en échec: {}", e);
        }

        // Providers core intégrés: métadonnées de la bibliothèque et
        // génération d'embeddings
        inner.aggregator.register_provider(
            Arc::new(MetadataProvider { library: inner.library.clone() }),
            None,
        )?;
        inner.aggregator.register_provider(
            Arc::new(EmbeddingProvider {
                library: inner.library.clone(),
                embedding: inner.embedding.clone(),
                cooccurrence: inner.cooccurrence.clone(),
                index: inner.index.clone(),
                dimension: inner.config.embedding.dimension,
            }),
            None,
        )?;

        // Scheduler: le callback d'entraînement capture un clone du moteur
        let engine = self.clone();
        let train_fn: crate::learning::scheduler::TrainFn = Arc::new(move || {
            let engine = engine.clone();
            let fut: futures::future::BoxFuture<'static, Result<()>> = Box::pin(async move {
                let result = engine.train().await;
                if !result.success {
                    return Err(AppError::TrainingFailure {
                        message: result.error.unwrap_or_else(|| "inconnu".to_string()),
                    });
                }
                Ok(())
            });
            fut
        });
        inner.scheduler.start(train_fn);

        info!(
            "✅ Moteur initialisé: {} événements, {} embeddings indexés",
            events, embeddings
        );
        Ok(())
    }

    /// Score d'une piste unique
    pub async fn score_track(&self, track: &Track, context: &ScoringContext) -> TrackScore {
        self.inner.scorer.score_track(track, context).await
    }

    /// Scoring par lots
    pub async fn score_batch(&self, tracks: &[Track], context: &ScoringContext) -> Vec<TrackScore> {
        self.inner.scorer.score_batch(tracks, context).await
    }

    /// score_batch + tri décroissant, égalités par id croissant
    pub async fn rank_candidates(
        &self,
        candidates: Vec<Track>,
        context: &ScoringContext,
    ) -> Vec<ScoredTrack> {
        let scores = self.inner.scorer.score_batch(&candidates, context).await;
        let mut ranked: Vec<ScoredTrack> = candidates
            .into_iter()
            .zip(scores.into_iter())
            .map(|(track, score)| ScoredTrack { track, score })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .final_score
                .partial_cmp(&a.score.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.track.track_id.cmp(&b.track.track_id))
        });
        ranked
    }

    /// Fan-in de la file intelligente + classement
    pub async fn get_next_tracks(
        &self,
        count: usize,
        context: &ScoringContext,
    ) -> Result<Vec<Track>> {
        let candidates = self.inner.queue.gather_candidates(count, context).await?;
        let ranked = self.rank_candidates(candidates, context).await;
        let selected: Vec<Track> =
            ranked.into_iter().take(count).map(|scored| scored.track).collect();
        for track in &selected {
            self.inner.queue.note_played(&track.track_id);
        }
        Ok(selected)
    }

    /// Génère une fournée de radio depuis un seed
    pub async fn generate_radio(
        &self,
        seed: &RadioSeed,
        count: usize,
        context: &ScoringContext,
    ) -> Result<Vec<Track>> {
        self.inner.radio.generate(seed, count, context, None).await
    }

    /// Variante reproductible (graine du PRNG explicite)
    pub async fn generate_radio_seeded(
        &self,
        seed: &RadioSeed,
        count: usize,
        context: &ScoringContext,
        rng_seed: u64,
    ) -> Result<Vec<Track>> {
        self.inner.radio.generate(seed, count, context, Some(rng_seed)).await
    }

    /// Génère une playlist par méthode
    pub async fn generate_playlist(
        &self,
        method: &PlaylistMethod,
        options: &PlaylistOptions,
    ) -> Result<Vec<Track>> {
        match method {
            PlaylistMethod::ArtistRadio(artist_id) => {
                self.inner.playlist.generate_for_artist(artist_id, options).await
            }
            _ => self.inner.playlist.generate(method, options).await,
        }
    }

    /// Pistes similaires: fusion embedding + co-occurrence (0.6/0.4)
    pub async fn find_similar(&self, track_id: &str, limit: usize) -> Result<Vec<ScoredTrack>> {
        let Some(query) = self.inner.index.get(track_id) else {
            // Meilleur effort: forcer la résolution des features (le
            // provider d'embedding alimente l'index) puis réessayer
            self.inner.aggregator.get(track_id).await;
            return match self.inner.index.get(track_id) {
                Some(_) => Box::pin(self.find_similar(track_id, limit)).await,
                None => Err(AppError::MissingData {
                    resource: format!("embedding pour {}", track_id),
                }),
            };
        };
        let embedding_hits: Vec<(String, f32)> = self
            .inner
            .index
            .search_by_cosine(&query, limit * 2 + 1)
            .into_iter()
            .filter(|(id, _)| id != track_id)
            .collect();
        let collaborative = self.inner.cooccurrence.get_related(track_id, limit * 2);
        let merged = merge_max_normalized(
            &embedding_hits,
            &collaborative,
            self.inner.playlist.similar_merge_weights(),
        );

        let mut results = Vec::new();
        for (id, similarity) in merged.into_iter().take(limit) {
            let Ok(Some(track)) = self.inner.library.get_track(&id).await else {
                continue;
            };
            let mut components = std::collections::HashMap::new();
            components.insert("similarity".to_string(), similarity.clamp(0.0, 1.0));
            results.push(ScoredTrack {
                track,
                score: TrackScore {
                    track_id: id,
                    final_score: (similarity * 100.0).clamp(0.0, 100.0),
                    confidence: 0.5,
                    components,
                    explanation: vec![format!("similarity: {:.2}", similarity)],
                },
            });
        }
        Ok(results)
    }

    /// Enregistre un événement utilisateur
    ///
    /// L'ordre de réception est préservé; le journal notifie tous les
    /// sous-systèmes abonnés avant de rendre la main.
    pub async fn record_event(&self, event: UserEvent) {
        if let Some(track) = event.track() {
            self.inner.queue.note_played(&track.track_id);
        }
        self.inner.recorder.record(event).await;
    }

    /// Explication du dernier score d'une piste
    pub fn explain(&self, track_id: &str) -> Result<TrackScore> {
        self.inner.scorer.explain(track_id)
    }

    /// Réinitialise la session d'écoute (action explicite)
    pub fn reset_session(&self) {
        self.inner.queue.reset_session();
    }

    /// Entraîne le prédicteur sur le journal d'événements
    pub async fn train(&self) -> TrainingResult {
        let inner = &self.inner;
        let options = DatasetOptions {
            balance_classes: true,
            max_samples: Some(2000),
            ..Default::default()
        };
        let mut dataset = inner.recorder.get_full_dataset(&options);
        if dataset.len() < inner.config.learning.min_training_samples {
            return TrainingResult::failure(AppError::DatasetTooSmall {
                got: dataset.len(),
                min: inner.config.learning.min_training_samples,
            });
        }

        // Remplissage des vecteurs de features sous un snapshot unique
        let snapshot = inner.preferences.snapshot();
        let now = now_ms();
        for bag in [
            &mut dataset.positives,
            &mut dataset.negatives,
            &mut dataset.partials,
        ] {
            for sample in bag.iter_mut() {
                let track = match inner.library.get_track(&sample.track.track_id).await {
                    Ok(Some(track)) => track,
                    _ => Track {
                        track_id: sample.track.track_id.clone(),
                        title: String::new(),
                        artists: sample.track.artists.clone(),
                        duration_s: sample.track.duration_s,
                        album: None,
                        release_year: None,
                        genres: sample.track.genres.clone(),
                        tags: Vec::new(),
                        audio: None,
                    },
                };
                let features = inner.aggregator.get(&track.track_id).await;
                let (hour, day) = hour_and_day(sample.timestamp);
                sample.feature_vector =
                    build_feature_vector(&track, &features, &snapshot, hour, day, now);
            }
        }

        match inner.predictor.fit(&dataset).await {
            Ok(result) => {
                inner.recorder.mark_trained();
                if let Err(e) = inner.predictor.save(&inner.kv).await {
                    warn!("Sauvegarde du prédicteur en échec: {}", e);
                }
                info!(
                    "Entraînement réussi: {} échantillons, confiance {:.2}",
                    result.samples_used,
                    inner.predictor.confidence()
                );
                result
            }
            Err(e) => {
                warn!("Entraînement en échec: {}", e);
                TrainingResult::failure(e)
            }
        }
    }

    /// Déclenche un entraînement immédiat via le scheduler
    pub async fn train_now(&self) {
        let count = self.inner.event_counter.load(Ordering::SeqCst);
        self.inner.scheduler.train_now(count).await;
    }

    /// Enregistre un provider de features externe
    pub fn register_feature_provider(
        &self,
        provider: Arc<dyn FeatureProvider>,
        mode: Option<ProviderMode>,
    ) -> Result<()> {
        self.inner.aggregator.register_provider(provider, mode)
    }

    pub fn unregister_feature_provider(&self, provider_id: &str) -> Result<()> {
        self.inner.aggregator.unregister_provider(provider_id)
    }

    /// Accès aux sous-systèmes pour l'hôte avancé
    pub fn aggregator(&self) -> &FeatureAggregator {
        &self.inner.aggregator
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.inner.preferences
    }

    pub fn recorder(&self) -> &Arc<EventRecorder> {
        &self.inner.recorder
    }

    pub fn taste(&self) -> &Arc<TasteProfile> {
        &self.inner.taste
    }

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        let aggregator_stats = inner.aggregator.stats();
        EngineStats {
            events_recorded: inner.recorder.event_count(),
            scores_computed: inner.scorer.scores_computed(),
            indexed_embeddings: inner.index.len(),
            cooccurrence_pairs: inner.cooccurrence.len(),
            taste_interactions: inner.taste.interaction_count(),
            predictor_confidence: inner.predictor.confidence(),
            feature_memory_cache: aggregator_stats.memory,
            providers: aggregator_stats.providers,
        }
    }

    /// Arrêt propre: stoppe le scheduler et persiste tout l'état
    pub async fn dispose(&self) -> Result<()> {
        info!("Arrêt du moteur: persistance de l'état");
        let inner = &self.inner;
        inner.scheduler.stop();
        inner.recorder.save().await?;
        inner.preferences.save(&inner.kv).await?;
        inner.index.save(&inner.kv).await?;
        inner.cooccurrence.save(&inner.kv).await?;
        inner.taste.save(&inner.kv).await?;
        inner.sequential.save(&inner.kv).await?;
        inner.feature_store.persist().await?;
        inner.kv.persist().await?;
        info!("✅ État persisté, moteur arrêté");
        Ok(())
    }
}

/// Provider core: descripteurs et genres des métadonnées de la bibliothèque
struct MetadataProvider {
    library: Arc<dyn LibrarySource>,
}

#[async_trait]
impl FeatureProvider for MetadataProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: "core-metadata".to_string(),
            priority: 5,
            mode: ProviderMode::Supplement,
            capabilities: Capabilities::new(&[FeatureKind::Audio, FeatureKind::Genre]),
            timeout: Duration::from_secs(2),
        }
    }

    async fn get_audio_features(&self, track_id: &str) -> Result<Option<AudioDescriptors>> {
        Ok(self.library.get_track(track_id).await?.and_then(|t| t.audio))
    }

    async fn get_genre_features(&self, track_id: &str) -> Result<Option<GenreDescriptors>> {
        let Some(track) = self.library.get_track(track_id).await? else {
            return Ok(None);
        };
        let Some(primary) = track.primary_genre() else {
            return Ok(None);
        };
        Ok(Some(GenreDescriptors {
            primary_genre: primary.to_string(),
            primary_confidence: 0.9,
            predictions: track
                .genres
                .iter()
                .enumerate()
                .map(|(i, g)| (g.clone(), 0.9 / (i + 1) as f32))
                .collect(),
            source: GenreSource::Metadata,
        }))
    }
}

/// Provider core: génération d'embeddings, alimente aussi l'index
struct EmbeddingProvider {
    library: Arc<dyn LibrarySource>,
    embedding: Arc<EmbeddingEngine>,
    cooccurrence: Arc<CoOccurrenceMatrix>,
    index: Arc<VectorIndex>,
    dimension: usize,
}

#[async_trait]
impl FeatureProvider for EmbeddingProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: "core-embedding".to_string(),
            priority: 10,
            mode: ProviderMode::Supplement,
            capabilities: Capabilities::new(&[FeatureKind::Embedding]),
            timeout: Duration::from_secs(5),
        }
    }

    async fn get_embedding(&self, track_id: &str) -> Result<Option<Embedding>> {
        let generated = match self.library.get_track(track_id).await? {
            Some(track) => self.embedding.generate(&track),
            None => {
                // Piste hors bibliothèque: repli collaboratif si la
                // matrice la connaît
                let Some(vector) =
                    self.cooccurrence.generate_collaborative_embedding(track_id, self.dimension)
                else {
                    return Ok(None);
                };
                Embedding {
                    vector,
                    version: 1,
                    created_at: now_ms(),
                    updated_at: now_ms(),
                    components: vec!["collaborative".to_string()],
                    confidence: 0.3,
                }
            }
        };
        self.index.add(track_id.to_string(), generated.vector.clone());
        Ok(Some(generated))
    }
}

/// Heure UTC (0-23) et jour de semaine (0 = dimanche) d'un timestamp ms
fn hour_and_day(timestamp_ms: i64) -> (u8, u8) {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(dt) => {
            (dt.hour() as u8, dt.weekday().num_days_from_sunday() as u8)
        }
        _ => (12, 3),
    }
}

// ---------------------------------------------------------------------------
// Singleton par processus
// ---------------------------------------------------------------------------

static ENGINE: Lazy<RwLock<Option<Engine>>> = Lazy::new(|| RwLock::new(None));

/// Construit, initialise et installe le moteur singleton
pub async fn init_engine(
    config: EngineConfig,
    kv: Arc<dyn KVStore>,
    library: Arc<dyn LibrarySource>,
) -> Result<Engine> {
    let engine = Engine::new(config, kv, library).await?;
    engine.initialize().await?;
    *ENGINE.write() = Some(engine.clone());
    Ok(engine)
}

/// Handle sur le moteur singleton
pub fn get_engine() -> Result<Engine> {
    ENGINE.read().clone().ok_or(AppError::EngineNotInitialized)
}

/// Oublie le singleton (l'appelant doit avoir fait `dispose` avant)
pub fn reset_engine() {
    *ENGINE.write() = None;
    debug!("Singleton du moteur réinitialisé");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DislikeReason, EventContext, ListenSource, TrackRef};
    use crate::storage::MemoryKvStore;
    use std::collections::HashMap;

    struct StubLibrary {
        tracks: HashMap<String, Track>,
    }

    #[async_trait]
    impl LibrarySource for StubLibrary {
        async fn get_track(&self, track_id: &str) -> Result<Option<Track>> {
            Ok(self.tracks.get(track_id).cloned())
        }
        async fn get_all_tracks(&self) -> Result<Vec<Track>> {
            let mut all: Vec<Track> = self.tracks.values().cloned().collect();
            all.sort_by(|a, b| a.track_id.cmp(&b.track_id));
            Ok(all)
        }
        async fn get_tracks_by_artist(&self, artist_id: &str) -> Result<Vec<Track>> {
            Ok(self
                .tracks
                .values()
                .filter(|t| t.primary_artist() == Some(artist_id))
                .cloned()
                .collect())
        }
        async fn get_tracks_by_genre(&self, genre: &str) -> Result<Vec<Track>> {
            Ok(self
                .tracks
                .values()
                .filter(|t| t.genres.iter().any(|g| g == genre))
                .cloned()
                .collect())
        }
        async fn get_liked_tracks(&self) -> Result<Vec<Track>> {
            Ok(vec![])
        }
        async fn get_playlist_tracks(&self, _playlist_id: &str) -> Result<Vec<Track>> {
            Ok(vec![])
        }
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Track>> {
            Ok(vec![])
        }
    }

    fn track(id: &str, artist: &str, genre: &str, energy: f32) -> Track {
        Track {
            track_id: id.to_string(),
            title: id.to_string(),
            artists: vec![artist.to_string()],
            duration_s: 200.0,
            album: None,
            release_year: Some(2021),
            genres: vec![genre.to_string()],
            tags: vec![],
            audio: Some(AudioDescriptors {
                bpm: Some(118.0 + energy * 40.0),
                energy: Some(energy),
                valence: Some(0.6),
                danceability: Some(0.5 + energy * 0.3),
                acousticness: Some(0.3),
                ..Default::default()
            }),
        }
    }

    fn catalogue() -> HashMap<String, Track> {
        let mut tracks = HashMap::new();
        for i in 0..30 {
            let t = track(
                &format!("t{}", i),
                &format!("artist{}", i % 8),
                if i % 2 == 0 { "rock" } else { "jazz" },
                0.3 + (i % 7) as f32 * 0.1,
            );
            tracks.insert(t.track_id.clone(), t);
        }
        tracks
    }

    async fn engine() -> Engine {
        let kv: Arc<dyn KVStore> = Arc::new(MemoryKvStore::new());
        let library = Arc::new(StubLibrary { tracks: catalogue() });
        let engine = Engine::new(EngineConfig::default(), kv, library).await.unwrap();
        engine.initialize().await.unwrap();
        engine
    }

    fn track_ref(id: &str, artist: &str, genre: &str) -> TrackRef {
        TrackRef {
            track_id: id.to_string(),
            artists: vec![artist.to_string()],
            genres: vec![genre.to_string()],
            duration_s: 200.0,
        }
    }

    fn listen(id: &str, artist: &str, genre: &str) -> UserEvent {
        UserEvent::Listen {
            track: track_ref(id, artist, genre),
            duration_s: 200.0,
            completion: 1.0,
            completed: true,
            source: ListenSource::Library,
            context: EventContext::default(),
            timestamp: now_ms(),
        }
    }

    #[tokio::test]
    async fn test_score_reflects_recorded_events() {
        let e = engine().await;
        let candidate = track("t0", "artist0", "rock", 0.5);
        let before = e.score_track(&candidate, &ScoringContext::default()).await;
        e.record_event(UserEvent::Like {
            track: track_ref("t0", "artist0", "rock"),
            strength: 2,
            timestamp: now_ms(),
        })
        .await;
        let after = e.score_track(&candidate, &ScoringContext::default()).await;
        assert!(after.final_score > before.final_score);
    }

    #[tokio::test]
    async fn test_rank_candidates_sorted_desc() {
        let e = engine().await;
        e.record_event(UserEvent::Like {
            track: track_ref("t2", "artist2", "rock"),
            strength: 2,
            timestamp: now_ms(),
        })
        .await;
        let candidates = vec![
            track("t1", "artist1", "jazz", 0.4),
            track("t2", "artist2", "rock", 0.5),
        ];
        let ranked = e.rank_candidates(candidates, &ScoringContext::default()).await;
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].score.final_score >= ranked[1].score.final_score);
        assert_eq!(ranked[0].track.track_id, "t2");
    }

    #[tokio::test]
    async fn test_get_next_tracks_returns_requested_count() {
        let e = engine().await;
        let next = e.get_next_tracks(5, &ScoringContext::default()).await.unwrap();
        assert_eq!(next.len(), 5);
        // Une seconde demande ne ressert pas les mêmes pistes
        let second = e.get_next_tracks(5, &ScoringContext::default()).await.unwrap();
        for t in &second {
            assert!(next.iter().all(|n| n.track_id != t.track_id));
        }
    }

    #[tokio::test]
    async fn test_find_similar_excludes_self() {
        let e = engine().await;
        // Résolution des features pour peupler l'index
        e.aggregator().get("t0").await;
        for i in 1..10 {
            e.aggregator().get(&format!("t{}", i)).await;
        }
        let similar = e.find_similar("t0", 5).await.unwrap();
        assert!(!similar.is_empty());
        assert!(similar.iter().all(|s| s.track.track_id != "t0"));
    }

    #[tokio::test]
    async fn test_radio_generation_respects_drift() {
        let e = engine().await;
        for i in 0..30 {
            e.aggregator().get(&format!("t{}", i)).await;
        }
        let seed = RadioSeed::Track("t0".to_string());
        let batch = e
            .generate_radio_seeded(&seed, 5, &ScoringContext::default(), 42)
            .await
            .unwrap();
        assert!(!batch.is_empty());
        assert!(batch.iter().all(|t| t.track_id != "t0"));
    }

    #[tokio::test]
    async fn test_train_fails_below_min_samples() {
        let e = engine().await;
        e.record_event(listen("t0", "artist0", "rock")).await;
        let result = e.train().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Dataset too small"));
    }

    #[tokio::test]
    async fn test_train_succeeds_with_enough_events() {
        let e = engine().await;
        // 60 positifs + 60 négatifs équilibrés
        for i in 0..60 {
            let id = format!("t{}", i % 30);
            e.record_event(listen(&id, &format!("artist{}", i % 8), "rock")).await;
            e.record_event(UserEvent::Skip {
                track: track_ref(&format!("t{}", (i + 1) % 30), "artistX", "jazz"),
                skip_percentage: 0.05,
                early: true,
                context: EventContext::default(),
                timestamp: now_ms(),
            })
            .await;
        }
        let result = e.train().await;
        assert!(result.success, "échec: {:?}", result.error);
        assert!(result.samples_used >= 50);
        assert!(e.stats().predictor_confidence > 0.0);
    }

    #[tokio::test]
    async fn test_dispose_persists_state() {
        let kv: Arc<dyn KVStore> = Arc::new(MemoryKvStore::new());
        let library = Arc::new(StubLibrary { tracks: catalogue() });
        let e = Engine::new(EngineConfig::default(), kv.clone(), library.clone())
            .await
            .unwrap();
        e.initialize().await.unwrap();
        e.record_event(listen("t0", "artist0", "rock")).await;
        e.dispose().await.unwrap();

        assert!(kv.get("audiio-ml-events").await.unwrap().is_some());
        assert!(kv.get("audiio-ml-preferences").await.unwrap().is_some());

        // Un second moteur recharge l'état persisté
        let resurrected = Engine::new(EngineConfig::default(), kv, library).await.unwrap();
        resurrected.initialize().await.unwrap();
        assert_eq!(resurrected.recorder().event_count(), 1);
        assert!(resurrected.preferences().artist_affinity("artist0") > 0.0);
    }

    #[tokio::test]
    async fn test_singleton_lifecycle() {
        reset_engine();
        assert!(matches!(get_engine(), Err(AppError::EngineNotInitialized)));
        let kv: Arc<dyn KVStore> = Arc::new(MemoryKvStore::new());
        let library = Arc::new(StubLibrary { tracks: catalogue() });
        init_engine(EngineConfig::default(), kv, library).await.unwrap();
        assert!(get_engine().is_ok());
        reset_engine();
        assert!(matches!(get_engine(), Err(AppError::EngineNotInitialized)));
    }

    #[tokio::test]
    async fn test_provider_registration_roundtrip() {
        let e = engine().await;
        struct NullProvider;
        #[async_trait]
        impl FeatureProvider for NullProvider {
            fn descriptor(&self) -> ProviderDescriptor {
                ProviderDescriptor {
                    id: "plugin-null".to_string(),
                    priority: 80,
                    mode: ProviderMode::Supplement,
                    capabilities: Capabilities::new(&[FeatureKind::Lyrics]),
                    timeout: Duration::from_secs(1),
                }
            }
        }
        e.register_feature_provider(Arc::new(NullProvider), Some(ProviderMode::Override))
            .unwrap();
        assert!(e.register_feature_provider(Arc::new(NullProvider), None).is_err());
        e.unregister_feature_provider("plugin-null").unwrap();
        assert!(e.unregister_feature_provider("plugin-null").is_err());
    }

    #[tokio::test]
    async fn test_dislike_lowers_subsequent_score() {
        let e = engine().await;
        let candidate = track("t5", "artist5", "jazz", 0.5);
        let before = e.score_track(&candidate, &ScoringContext::default()).await;
        e.record_event(UserEvent::Dislike {
            track: track_ref("t5", "artist5", "jazz"),
            reason: DislikeReason::DislikeArtist,
            comment: None,
            timestamp: now_ms(),
        })
        .await;
        let after = e.score_track(&candidate, &ScoringContext::default()).await;
        assert!(after.final_score < before.final_score);
        assert!(after.components.contains_key("dislikePenalty"));
    }
}
