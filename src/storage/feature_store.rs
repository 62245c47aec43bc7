/// Cache durable versionné des features par piste
///
/// Layout: un enregistrement par piste sous `feature:<track_id>`, un index
/// des ids connus sous `feature-index`. Les écritures sont coalescées dans
/// un ensemble sale puis flushées après la fenêtre de debounce, sur
/// `persist()` explicite ou à l'arrêt.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{now_ms, AggregatedFeatures};
use crate::storage::debounce::Debouncer;
use crate::storage::keys;
use crate::storage::kv::KVStore;

struct Inner {
    kv: Arc<dyn KVStore>,
    current_version: u32,
    /// Mémoire autoritaire des enregistrements valides
    records: DashMap<String, AggregatedFeatures>,
    /// Ids connus, persistés sous `feature-index`
    index: Mutex<BTreeSet<String>>,
    dirty: Mutex<HashSet<String>>,
}

#[derive(Clone)]
pub struct FeatureStore {
    inner: Arc<Inner>,
    debouncer: Debouncer,
}

impl FeatureStore {
    /// Ouvre le store et charge l'index des pistes connues
    pub async fn open(
        kv: Arc<dyn KVStore>,
        current_version: u32,
        flush_debounce: Duration,
    ) -> Result<Self> {
        let index = match kv.get(keys::FEATURE_INDEX).await? {
            Some(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!("Index de features illisible, reconstruit à vide: {}", e);
                    BTreeSet::new()
                }
            },
            None => BTreeSet::new(),
        };
        debug!("FeatureStore ouvert: {} pistes indexées", index.len());
        Ok(Self {
            inner: Arc::new(Inner {
                kv,
                current_version,
                records: DashMap::new(),
                index: Mutex::new(index),
                dirty: Mutex::new(HashSet::new()),
            }),
            debouncer: Debouncer::new(flush_debounce),
        })
    }

    /// Lit l'enregistrement d'une piste
    ///
    /// Un enregistrement persisté sous une version d'analyse antérieure est
    /// traité comme absent.
    pub async fn get(&self, track_id: &str) -> Option<AggregatedFeatures> {
        if let Some(cached) = self.inner.records.get(track_id) {
            return Some(cached.value().clone());
        }
        let key = format!("{}{}", keys::FEATURE_PREFIX, track_id);
        let raw = match self.inner.kv.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Lecture du store impossible pour {}: {}", track_id, e);
                return None;
            }
        };
        let record: AggregatedFeatures = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!("Enregistrement corrompu pour {}: {}", track_id, e);
                return None;
            }
        };
        if record.analysis_version < self.inner.current_version {
            // Version obsolète: l'appelant doit ré-analyser
            return None;
        }
        self.inner.records.insert(track_id.to_string(), record.clone());
        Some(record)
    }

    /// Vrai si un enregistrement valide (version courante) existe
    pub async fn has_valid_features(&self, track_id: &str) -> bool {
        self.get(track_id).await.is_some()
    }

    /// Fusionne `partial` avec l'enregistrement existant
    ///
    /// Les champs portés par `partial` remplacent l'existant; les champs
    /// non touchés sont préservés. L'enregistrement est réestampillé avec
    /// la version d'analyse courante.
    pub fn set(&self, track_id: &str, partial: AggregatedFeatures) {
        let mut record = self
            .inner
            .records
            .get(track_id)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| AggregatedFeatures::empty(track_id, self.inner.current_version));

        if let Some(incoming) = partial.audio {
            // Fusion champ à champ, l'entrant prime
            let mut merged = incoming;
            if let Some(existing) = &record.audio {
                merged.supplement_from(existing);
            }
            record.audio = Some(merged);
        }
        if partial.emotion.is_some() {
            record.emotion = partial.emotion;
        }
        if partial.lyrics.is_some() {
            record.lyrics = partial.lyrics;
        }
        if partial.genre.is_some() {
            record.genre = partial.genre;
        }
        if partial.embedding.is_some() {
            record.embedding = partial.embedding;
        }
        if partial.fingerprint.is_some() {
            record.fingerprint = partial.fingerprint;
        }
        for entry in partial.provenance {
            record.provenance.retain(|p| p.provider_id != entry.provider_id);
            record.provenance.push(entry);
        }
        record.last_updated = now_ms();
        record.analysis_version = self.inner.current_version;

        self.inner.records.insert(track_id.to_string(), record);
        self.inner.index.lock().insert(track_id.to_string());
        self.inner.dirty.lock().insert(track_id.to_string());
        self.schedule_flush();
    }

    fn schedule_flush(&self) {
        let inner = self.inner.clone();
        self.debouncer.schedule(move || async move {
            if let Err(e) = flush_inner(&inner).await {
                warn!("Flush différé du FeatureStore en échec: {}", e);
            }
        });
    }

    /// Flush immédiat des clés sales puis persistance du backend
    pub async fn persist(&self) -> Result<()> {
        self.debouncer.cancel();
        flush_inner(&self.inner).await?;
        self.inner.kv.persist().await
    }

    /// Ids de pistes connus de l'index
    pub fn known_ids(&self) -> Vec<String> {
        self.inner.index.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn flush_inner(inner: &Inner) -> Result<()> {
    let dirty: Vec<String> = {
        let mut guard = inner.dirty.lock();
        guard.drain().collect()
    };
    if dirty.is_empty() {
        return Ok(());
    }
    for track_id in &dirty {
        let Some(record) = inner.records.get(track_id).map(|r| r.value().clone()) else {
            continue;
        };
        let key = format!("{}{}", keys::FEATURE_PREFIX, track_id);
        match serde_json::to_string(&record) {
            Ok(payload) => {
                if let Err(e) = inner.kv.set(&key, payload).await {
                    // La mémoire reste autoritaire; la clé redevient sale
                    warn!("Écriture du store en échec pour {}: {}", track_id, e);
                    inner.dirty.lock().insert(track_id.clone());
                }
            }
            Err(e) => warn!("Sérialisation impossible pour {}: {}", track_id, e),
        }
    }
    let ids: Vec<String> = inner.index.lock().iter().cloned().collect();
    let payload = serde_json::to_string(&ids)?;
    if let Err(e) = inner.kv.set(keys::FEATURE_INDEX, payload).await {
        warn!("Écriture de l'index en échec: {}", e);
    }
    debug!("FeatureStore: {} enregistrements flushés", dirty.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GenreDescriptors, GenreSource};
    use crate::storage::kv::MemoryKvStore;

    fn genre(name: &str) -> GenreDescriptors {
        GenreDescriptors {
            primary_genre: name.to_string(),
            primary_confidence: 0.9,
            predictions: vec![],
            source: GenreSource::Metadata,
        }
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let kv: Arc<dyn KVStore> = Arc::new(MemoryKvStore::new());
        let store = FeatureStore::open(kv, 3, Duration::from_millis(10)).await.unwrap();

        let mut partial = AggregatedFeatures::empty("t1", 3);
        partial.genre = Some(genre("jazz"));
        store.set("t1", partial);

        let record = store.get("t1").await.unwrap();
        assert_eq!(record.genre.unwrap().primary_genre, "jazz");
        assert_eq!(record.analysis_version, 3);
        assert!(record.last_updated > 0);
    }

    #[tokio::test]
    async fn test_partial_merge_preserves_untouched_fields() {
        let kv: Arc<dyn KVStore> = Arc::new(MemoryKvStore::new());
        let store = FeatureStore::open(kv, 3, Duration::from_millis(10)).await.unwrap();

        let mut first = AggregatedFeatures::empty("t1", 3);
        first.fingerprint = Some("fp".to_string());
        store.set("t1", first);

        let mut second = AggregatedFeatures::empty("t1", 3);
        second.genre = Some(genre("rock"));
        store.set("t1", second);

        let record = store.get("t1").await.unwrap();
        assert_eq!(record.fingerprint.as_deref(), Some("fp"));
        assert_eq!(record.genre.unwrap().primary_genre, "rock");
    }

    #[tokio::test]
    async fn test_version_gating_treats_old_records_as_absent() {
        let kv: Arc<dyn KVStore> = Arc::new(MemoryKvStore::new());
        {
            let store = FeatureStore::open(kv.clone(), 2, Duration::from_millis(5)).await.unwrap();
            let mut partial = AggregatedFeatures::empty("t1", 2);
            partial.fingerprint = Some("fp".to_string());
            store.set("t1", partial);
            store.persist().await.unwrap();
        }
        // Version d'analyse incrémentée: l'ancien enregistrement est invisible
        let upgraded = FeatureStore::open(kv, 3, Duration::from_millis(5)).await.unwrap();
        assert!(!upgraded.has_valid_features("t1").await);
    }

    #[tokio::test]
    async fn test_debounced_flush_reaches_kv() {
        let kv = Arc::new(MemoryKvStore::new());
        let store =
            FeatureStore::open(kv.clone() as Arc<dyn KVStore>, 3, Duration::from_millis(20))
                .await
                .unwrap();
        let mut partial = AggregatedFeatures::empty("t1", 3);
        partial.fingerprint = Some("fp".to_string());
        store.set("t1", partial);
        // Avant la fenêtre: rien dans le KV
        assert!(kv.get("feature:t1").await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(kv.get("feature:t1").await.unwrap().is_some());
        assert!(kv.get("feature-index").await.unwrap().is_some());
    }
}
