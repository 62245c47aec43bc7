/// Caches mémoire bornés du moteur
///
/// Features :
/// - LRU borné par nombre d'entrées
/// - TTL avec éviction LRU au-delà de la taille maximale
/// - Map inflight pour dédupliquer les chargements concurrents
/// - Chargement par micro-lots avec tolérance aux échecs individuels

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::debug;

/// Statistiques d'un cache
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct LruEntry<V> {
    value: V,
    last_access: u64,
}

/// Cache LRU borné, verrou synchrone (aucun await sous le verrou)
pub struct LruCache<K, V> {
    entries: Mutex<LruState<K, V>>,
    max_entries: usize,
}

struct LruState<K, V> {
    map: HashMap<K, LruEntry<V>>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(LruState {
                map: HashMap::new(),
                clock: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.entries.lock();
        let state = &mut *guard;
        state.clock += 1;
        match state.map.get_mut(key) {
            Some(entry) => {
                entry.last_access = state.clock;
                let value = entry.value.clone();
                state.hits += 1;
                Some(value)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut guard = self.entries.lock();
        let state = &mut *guard;
        state.clock += 1;
        state.map.insert(key, LruEntry { value, last_access: state.clock });
        if state.map.len() > self.max_entries {
            // Éviction de l'entrée la moins récemment utilisée
            if let Some(oldest) = state
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                state.map.remove(&oldest);
                state.evictions += 1;
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().map.remove(key).map(|e| e.value)
    }

    pub fn clear(&self) {
        self.entries.lock().map.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.entries.lock();
        CacheStats {
            entries: state.map.len(),
            max_entries: self.max_entries,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

struct TtlEntry<V> {
    value: V,
    inserted_at: Instant,
    last_access: u64,
}

/// Cache TTL borné: expiration temporelle + éviction LRU au-delà de la taille
pub struct TtlCache<K, V> {
    entries: Mutex<TtlState<K, V>>,
    ttl: Duration,
    max_entries: usize,
}

struct TtlState<K, V> {
    map: HashMap<K, TtlEntry<V>>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(TtlState {
                map: HashMap::new(),
                clock: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.entries.lock();
        let state = &mut *guard;
        state.clock += 1;
        let expired = match state.map.get_mut(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                entry.last_access = state.clock;
                let value = entry.value.clone();
                state.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.map.remove(key);
            state.evictions += 1;
        }
        state.misses += 1;
        None
    }

    pub fn insert(&self, key: K, value: V) {
        let mut guard = self.entries.lock();
        let state = &mut *guard;
        state.clock += 1;
        state.map.insert(
            key,
            TtlEntry { value, inserted_at: Instant::now(), last_access: state.clock },
        );
        if state.map.len() > self.max_entries {
            if let Some(oldest) = state
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                state.map.remove(&oldest);
                state.evictions += 1;
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().map.remove(key).map(|e| e.value)
    }

    /// Snapshot des entrées non expirées, sans toucher l'ordre LRU
    pub fn snapshot(&self) -> Vec<(K, V)> {
        let state = self.entries.lock();
        state
            .map
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() <= self.ttl)
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Purge des entrées expirées
    pub fn cleanup_expired(&self) {
        let mut state = self.entries.lock();
        let ttl = self.ttl;
        let before = state.map.len();
        state.map.retain(|_, e| e.inserted_at.elapsed() <= ttl);
        let removed = before - state.map.len();
        if removed > 0 {
            state.evictions += removed as u64;
            debug!("Nettoyage du cache TTL: {} entrées expirées", removed);
        }
    }

    pub fn clear(&self) {
        self.entries.lock().map.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.entries.lock();
        CacheStats {
            entries: state.map.len(),
            max_entries: self.max_entries,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

type SharedLoad<V> = Shared<BoxFuture<'static, Option<V>>>;

/// Map inflight: un seul chargement concurrent par clé
///
/// Deux `get_or_load` simultanés pour la même clé partagent la même tâche;
/// les deux observent le même résultat. Un sémaphore plafonne le nombre de
/// chargements réellement actifs (back-pressure).
pub struct InflightMap<K, V> {
    inflight: Arc<DashMap<K, SharedLoad<V>>>,
    permits: Arc<Semaphore>,
}

impl<K, V> InflightMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cap: usize) -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(cap.max(1))),
        }
    }

    /// Nombre de chargements en cours
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    pub async fn get_or_load<F>(&self, key: K, load: F) -> Option<V>
    where
        F: Future<Output = Option<V>> + Send + 'static,
    {
        let shared = {
            match self.inflight.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(existing) => existing.get().clone(),
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let permits = self.permits.clone();
                    let fut: BoxFuture<'static, Option<V>> = async move {
                        // Back-pressure: attendre un slot plutôt que de
                        // lancer des tâches sans borne
                        let _permit = permits.acquire_owned().await.ok()?;
                        load.await
                    }
                    .boxed();
                    let shared = fut.shared();
                    slot.insert(shared.clone());
                    shared
                }
            }
        };
        let result = shared.await;
        self.inflight.remove(&key);
        result
    }
}

/// Chargement par micro-lots
///
/// Découpe les clés en lots de `batch_size` et charge chaque lot en
/// parallèle; un échec individuel n'interrompt pas le lot.
pub async fn load_in_batches<K, V, F, Fut>(
    keys: Vec<K>,
    batch_size: usize,
    loader: F,
) -> Vec<(K, Option<V>)>
where
    K: Clone,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Option<V>>,
{
    let batch_size = batch_size.max(1);
    let mut results = Vec::with_capacity(keys.len());
    for chunk in keys.chunks(batch_size) {
        let loads = chunk.iter().cloned().map(|k| {
            let fut = loader(k.clone());
            async move { (k, fut.await) }
        });
        let mut loaded = futures::future::join_all(loads).await;
        results.append(&mut loaded);
    }
    results
}
