/// Agrégateur de features multi-providers
///
/// Protocole de fusion: providers core en supplement, puis plugins
/// (override d'abord, par priorité décroissante). Les échecs de providers
/// sont isolés et loggués, jamais propagés aux appelants du scoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{load_in_batches, CacheStats, InflightMap, LruCache, TtlCache};
use crate::config::FeatureConfig;
use crate::error::{AppError, Result};
use crate::features::provider::{
    FeatureProvider, ProviderDescriptor, ProviderMode, ProviderOutput,
};
use crate::model::{now_ms, AggregatedFeatures, FeatureKind, ProvenanceEntry};
use crate::storage::FeatureStore;
use crate::vector::math::{cosine_similarity, normalize_in_place};

/// Statistiques de l'agrégateur
#[derive(Debug, Clone, Serialize)]
pub struct AggregatorStats {
    pub providers: usize,
    pub memory: CacheStats,
    pub similarity: CacheStats,
    pub inflight: usize,
    pub fetches: u64,
}

struct Inner {
    config: FeatureConfig,
    analysis_version: u32,
    providers: RwLock<Vec<Arc<dyn FeatureProvider>>>,
    /// Cache mémoire primaire, TTL + LRU
    memory: TtlCache<String, AggregatedFeatures>,
    /// Déduplication des fetches concurrents
    inflight: InflightMap<String, AggregatedFeatures>,
    /// Similarités cosinus par paire, clé indépendante de l'ordre
    similarity: LruCache<(String, String), f32>,
    /// Couche durable autoritaire, si attachée
    store: Option<FeatureStore>,
    fetches: AtomicU64,
}

#[derive(Clone)]
pub struct FeatureAggregator {
    inner: Arc<Inner>,
}

impl FeatureAggregator {
    pub fn new(config: FeatureConfig, analysis_version: u32, store: Option<FeatureStore>) -> Self {
        let memory = TtlCache::new(config.cache_ttl, config.cache_max_entries);
        let inflight = InflightMap::new(config.inflight_cap);
        let similarity = LruCache::new(config.similarity_cache_max);
        Self {
            inner: Arc::new(Inner {
                config,
                analysis_version,
                providers: RwLock::new(Vec::new()),
                memory,
                inflight,
                similarity,
                store,
                fetches: AtomicU64::new(0),
            }),
        }
    }

    /// Enregistre un provider; refuse les ids dupliqués
    pub fn register_provider(
        &self,
        provider: Arc<dyn FeatureProvider>,
        mode: Option<ProviderMode>,
    ) -> Result<()> {
        let mut descriptor = provider.descriptor();
        if let Some(mode) = mode {
            descriptor.mode = mode;
        }
        let mut providers = self.inner.providers.write();
        if providers.iter().any(|p| p.descriptor().id == descriptor.id) {
            return Err(AppError::DuplicateProvider { provider_id: descriptor.id });
        }
        info!(
            "Provider enregistré: {} (priorité {}, mode {:?})",
            descriptor.id, descriptor.priority, descriptor.mode
        );
        providers.push(provider);
        Ok(())
    }

    pub fn unregister_provider(&self, provider_id: &str) -> Result<()> {
        let mut providers = self.inner.providers.write();
        let before = providers.len();
        providers.retain(|p| p.descriptor().id != provider_id);
        if providers.len() == before {
            return Err(AppError::UnknownProvider { provider_id: provider_id.to_string() });
        }
        info!("Provider retiré: {}", provider_id);
        Ok(())
    }

    pub fn provider_count(&self) -> usize {
        self.inner.providers.read().len()
    }

    /// Résout les features d'une piste
    ///
    /// Chemin de lecture: cache mémoire → FeatureStore (si version valide)
    /// → map inflight → nouveau fetch. Deux appels concurrents pour la même
    /// piste partagent un seul fetch.
    pub async fn get(&self, track_id: &str) -> AggregatedFeatures {
        if let Some(cached) = self.inner.memory.get(&track_id.to_string()) {
            return cached;
        }
        if let Some(store) = &self.inner.store {
            if let Some(record) = store.get(track_id).await {
                self.inner.memory.insert(track_id.to_string(), record.clone());
                return record;
            }
        }
        let inner = self.inner.clone();
        let id = track_id.to_string();
        self.inner
            .inflight
            .get_or_load(track_id.to_string(), async move {
                Some(fetch_and_cache(inner, id).await)
            })
            .await
            .unwrap_or_else(|| {
                AggregatedFeatures::empty(track_id, self.inner.analysis_version)
            })
    }

    /// Résolution par lots, partageant le contexte de cache
    pub async fn get_batch(&self, track_ids: &[String]) -> Vec<AggregatedFeatures> {
        let loads = track_ids.iter().map(|id| self.get(id));
        join_all(loads).await
    }

    /// Préchauffe le cache par lots bornés, tolérant aux échecs individuels
    pub async fn prefetch(&self, track_ids: Vec<String>) {
        let batch = self.inner.config.prefetch_batch_size;
        let total = track_ids.len();
        load_in_batches(track_ids, batch, |id| async move {
            Some(self.get(&id).await)
        })
        .await;
        debug!("Prefetch terminé: {} pistes", total);
    }

    /// Similarité cosinus entre deux pistes dont les embeddings sont en cache
    pub fn cached_similarity(&self, a: &str, b: &str) -> Option<f32> {
        let key = pair_key(a, b);
        if let Some(hit) = self.inner.similarity.get(&key) {
            return Some(hit);
        }
        let va = self.cached_embedding(a)?;
        let vb = self.cached_embedding(b)?;
        let sim = cosine_similarity(&va, &vb);
        self.inner.similarity.insert(key, sim);
        Some(sim)
    }

    fn cached_embedding(&self, track_id: &str) -> Option<Vec<f32>> {
        self.inner
            .memory
            .get(&track_id.to_string())
            .and_then(|r| r.embedding.map(|e| e.vector))
    }

    /// Recherche best-effort sur les embeddings présents en cache
    ///
    /// Une piste sans embedding en cache n'est simplement pas considérée.
    pub fn find_similar_by_embedding(
        &self,
        query: &[f32],
        k: usize,
        exclude: &[String],
    ) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .inner
            .memory
            .snapshot()
            .into_iter()
            .filter(|(id, _)| !exclude.contains(id))
            .filter_map(|(id, record)| {
                record
                    .embedding
                    .map(|e| (id, cosine_similarity(query, &e.vector)))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    /// Invalide l'entrée mémoire d'une piste (la couche durable fait foi)
    pub fn invalidate(&self, track_id: &str) {
        self.inner.memory.remove(&track_id.to_string());
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            providers: self.inner.providers.read().len(),
            memory: self.inner.memory.stats(),
            similarity: self.inner.similarity.stats(),
            inflight: self.inner.inflight.len(),
            fetches: self.inner.fetches.load(Ordering::Relaxed),
        }
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

async fn fetch_and_cache(inner: Arc<Inner>, track_id: String) -> AggregatedFeatures {
    inner.fetches.fetch_add(1, Ordering::Relaxed);
    let record = fetch_from_providers(&inner, &track_id).await;
    inner.memory.insert(track_id.clone(), record.clone());
    if record.has_any() {
        if let Some(store) = &inner.store {
            store.set(&track_id, record.clone());
        }
    }
    record
}

/// Protocole de fusion pour une piste
async fn fetch_from_providers(inner: &Inner, track_id: &str) -> AggregatedFeatures {
    let threshold = inner.config.core_priority_threshold;
    let (core, plugins): (Vec<_>, Vec<_>) = {
        let providers = inner.providers.read();
        providers
            .iter()
            .cloned()
            .partition(|p| p.descriptor().priority <= threshold)
    };

    let mut record = AggregatedFeatures::empty(track_id, inner.analysis_version);

    // 1. Providers core, sémantique supplement, priorité décroissante
    let mut core_results = if inner.config.parallel_core_fetch {
        join_all(core.iter().map(|p| query_provider(p.clone(), track_id))).await
    } else {
        let mut ordered = core.clone();
        ordered.sort_by_key(|p| std::cmp::Reverse(p.descriptor().priority));
        let mut results = Vec::with_capacity(ordered.len());
        for p in ordered {
            results.push(query_provider(p, track_id).await);
        }
        results
    };
    core_results.retain(|r| r.is_some());
    let mut core_results: Vec<(ProviderDescriptor, ProviderOutput)> =
        core_results.into_iter().flatten().collect();
    core_results.sort_by_key(|(d, _)| std::cmp::Reverse(d.priority));
    for (descriptor, output) in core_results {
        apply_supplement(&mut record, &descriptor, output);
    }

    // 2. Providers plugin: override d'abord, puis supplement, chacun par
    //    priorité décroissante
    let mut plugin_results: Vec<(ProviderDescriptor, ProviderOutput)> =
        join_all(plugins.iter().map(|p| query_provider(p.clone(), track_id)))
            .await
            .into_iter()
            .flatten()
            .collect();
    plugin_results.sort_by_key(|(d, _)| {
        let override_first = match d.mode {
            ProviderMode::Override => 0,
            ProviderMode::Supplement => 1,
        };
        (override_first, std::cmp::Reverse(d.priority))
    });
    for (descriptor, output) in plugin_results {
        match descriptor.mode {
            ProviderMode::Override => apply_override(&mut record, &descriptor, output),
            ProviderMode::Supplement => apply_supplement(&mut record, &descriptor, output),
        }
    }

    record.last_updated = now_ms();
    record
}

/// Interroge chaque capacité déclarée d'un provider, borné par son timeout
async fn query_provider(
    provider: Arc<dyn FeatureProvider>,
    track_id: &str,
) -> Option<(ProviderDescriptor, ProviderOutput)> {
    let descriptor = provider.descriptor();
    let caps = descriptor.capabilities;
    let id = track_id.to_string();
    let provider_id = descriptor.id.clone();

    let work = async {
        let mut output = ProviderOutput { confidence: 1.0, ..Default::default() };
        if caps.has(FeatureKind::Audio) {
            match provider.get_audio_features(&id).await {
                Ok(audio) => output.audio = audio,
                Err(e) => warn!("Provider {} audio en échec: {}", provider_id, e),
            }
        }
        if caps.has(FeatureKind::Emotion) {
            match provider.get_emotion_features(&id).await {
                Ok(emotion) => output.emotion = emotion,
                Err(e) => warn!("Provider {} emotion en échec: {}", provider_id, e),
            }
        }
        if caps.has(FeatureKind::Lyrics) {
            match provider.get_lyrics_features(&id).await {
                Ok(lyrics) => output.lyrics = lyrics,
                Err(e) => warn!("Provider {} lyrics en échec: {}", provider_id, e),
            }
        }
        if caps.has(FeatureKind::Genre) {
            match provider.get_genre_features(&id).await {
                Ok(genre) => output.genre = genre,
                Err(e) => warn!("Provider {} genre en échec: {}", provider_id, e),
            }
        }
        if caps.has(FeatureKind::Embedding) {
            match provider.get_embedding(&id).await {
                Ok(Some(mut embedding)) => {
                    // Normalisation L2 à l'écriture, invariant du modèle
                    normalize_in_place(&mut embedding.vector);
                    output.embedding = Some(embedding);
                }
                Ok(None) => {}
                Err(e) => warn!("Provider {} embedding en échec: {}", provider_id, e),
            }
        }
        if caps.has(FeatureKind::Fingerprint) {
            match provider.get_fingerprint(&id).await {
                Ok(fingerprint) => output.fingerprint = fingerprint,
                Err(e) => warn!("Provider {} fingerprint en échec: {}", provider_id, e),
            }
        }
        if let Some(confidence) = output.audio.as_ref().and_then(|a| a.analysis_confidence) {
            output.confidence = confidence;
        }
        output
    };

    match tokio::time::timeout(descriptor.timeout, work).await {
        Ok(output) if !output.is_empty() => Some((descriptor, output)),
        Ok(_) => None,
        Err(_) => {
            warn!(
                "Provider {} timeout après {:?} pour {}",
                descriptor.id, descriptor.timeout, track_id
            );
            None
        }
    }
}

/// Sémantique supplement: ne remplit que les champs absents; les
/// descripteurs audio sont complétés sous-champ par sous-champ.
fn apply_supplement(
    record: &mut AggregatedFeatures,
    descriptor: &ProviderDescriptor,
    output: ProviderOutput,
) {
    let mut applied = Vec::new();
    if let Some(incoming) = output.audio {
        match &mut record.audio {
            Some(existing) => {
                let before = existing.clone();
                existing.supplement_from(&incoming);
                if !audio_equal_presence(&before, existing) {
                    applied.push(FeatureKind::Audio);
                }
            }
            slot @ None => {
                *slot = Some(incoming);
                applied.push(FeatureKind::Audio);
            }
        }
    }
    if record.emotion.is_none() && output.emotion.is_some() {
        record.emotion = output.emotion;
        applied.push(FeatureKind::Emotion);
    }
    if record.lyrics.is_none() && output.lyrics.is_some() {
        record.lyrics = output.lyrics;
        applied.push(FeatureKind::Lyrics);
    }
    if record.genre.is_none() && output.genre.is_some() {
        record.genre = output.genre;
        applied.push(FeatureKind::Genre);
    }
    if record.embedding.is_none() && output.embedding.is_some() {
        record.embedding = output.embedding;
        applied.push(FeatureKind::Embedding);
    }
    if record.fingerprint.is_none() && output.fingerprint.is_some() {
        record.fingerprint = output.fingerprint;
        applied.push(FeatureKind::Fingerprint);
    }
    if !applied.is_empty() {
        record.provenance.push(ProvenanceEntry {
            provider_id: descriptor.id.clone(),
            fields_supplied: applied,
            confidence: output.confidence,
        });
    }
}

/// Sémantique override: chaque genre fourni remplace intégralement
fn apply_override(
    record: &mut AggregatedFeatures,
    descriptor: &ProviderDescriptor,
    output: ProviderOutput,
) {
    let supplied = output.supplied_kinds();
    if supplied.is_empty() {
        return;
    }
    if output.audio.is_some() {
        record.audio = output.audio;
    }
    if output.emotion.is_some() {
        record.emotion = output.emotion;
    }
    if output.lyrics.is_some() {
        record.lyrics = output.lyrics;
    }
    if output.genre.is_some() {
        record.genre = output.genre;
    }
    if output.embedding.is_some() {
        record.embedding = output.embedding;
    }
    if output.fingerprint.is_some() {
        record.fingerprint = output.fingerprint;
    }
    record.provenance.push(ProvenanceEntry {
        provider_id: descriptor.id.clone(),
        fields_supplied: supplied,
        confidence: output.confidence,
    });
}

fn audio_equal_presence(a: &crate::model::AudioDescriptors, b: &crate::model::AudioDescriptors) -> bool {
    a.primary_field_count() == b.primary_field_count()
        && a.key.is_some() == b.key.is_some()
        && a.mode.is_some() == b.mode.is_some()
        && a.loudness.is_some() == b.loudness.is_some()
        && a.instrumentalness.is_some() == b.instrumentalness.is_some()
        && a.speechiness.is_some() == b.speechiness.is_some()
        && a.liveness.is_some() == b.liveness.is_some()
        && a.spectral_centroid.is_some() == b.spectral_centroid.is_some()
        && a.zero_crossing_rate.is_some() == b.zero_crossing_rate.is_some()
        && a.mfcc.is_some() == b.mfcc.is_some()
}
