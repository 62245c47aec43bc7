/// Index de plus proches voisins sur les embeddings
///
/// Scan linéaire exact: le contrat ne promet rien de mieux que
/// O(|index|·D) au pire, et les bibliothèques personnelles restent sous
/// la taille où une structure approchée se justifie.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{keys, KVStore};
use crate::vector::math::dot;

#[derive(Default)]
pub struct VectorIndex {
    /// BTreeMap pour une itération stable par id
    entries: RwLock<BTreeMap<String, Vec<f32>>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère un vecteur pré-normalisé
    pub fn add(&self, track_id: impl Into<String>, vector: Vec<f32>) {
        self.entries.write().insert(track_id.into(), vector);
    }

    pub fn remove(&self, track_id: &str) -> bool {
        self.entries.write().remove(track_id).is_some()
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.entries.read().contains_key(track_id)
    }

    pub fn get(&self, track_id: &str) -> Option<Vec<f32>> {
        self.entries.read().get(track_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Top-k par produit scalaire contre `query` (cosinus pour des
    /// vecteurs unitaires). Égalités départagées par id croissant.
    pub fn search_by_cosine(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let entries = self.entries.read();
        let mut scored: Vec<(String, f32)> = entries
            .iter()
            .filter(|(_, v)| v.len() == query.len())
            .map(|(id, v)| (id.clone(), dot(query, v)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    /// Snapshot `[track_id, vector]` persisté sous `embedding-index`
    pub async fn save(&self, kv: &Arc<dyn KVStore>) -> Result<()> {
        let pairs: Vec<(String, Vec<f32>)> = {
            let entries = self.entries.read();
            entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let payload = serde_json::to_string(&pairs)?;
        kv.set(keys::EMBEDDING_INDEX, payload).await?;
        debug!("Index d'embeddings sauvegardé: {} entrées", pairs.len());
        Ok(())
    }

    pub async fn load(&self, kv: &Arc<dyn KVStore>) -> Result<usize> {
        let Some(raw) = kv.get(keys::EMBEDDING_INDEX).await? else {
            return Ok(0);
        };
        let pairs: Vec<(String, Vec<f32>)> = match serde_json::from_str(&raw) {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!("Index d'embeddings illisible, ignoré: {}", e);
                return Ok(0);
            }
        };
        let count = pairs.len();
        let mut entries = self.entries.write();
        for (id, vector) in pairs {
            entries.insert(id, vector);
        }
        debug!("Index d'embeddings chargé: {} entrées", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;

    #[test]
    fn test_search_orders_by_similarity() {
        let index = VectorIndex::new();
        index.add("a", vec![1.0, 0.0]);
        index.add("b", vec![0.0, 1.0]);
        index.add("c", vec![0.707, 0.707]);

        let results = index.search_by_cosine(&[1.0, 0.0], 2);
        assert_eq!(results[0].0, "a");
        assert_eq!(results[1].0, "c");
    }

    #[test]
    fn test_ties_break_by_id() {
        let index = VectorIndex::new();
        index.add("zzz", vec![1.0, 0.0]);
        index.add("aaa", vec![1.0, 0.0]);
        let results = index.search_by_cosine(&[1.0, 0.0], 2);
        assert_eq!(results[0].0, "aaa");
        assert_eq!(results[1].0, "zzz");
    }

    #[test]
    fn test_dimension_mismatch_ignored() {
        let index = VectorIndex::new();
        index.add("bad", vec![1.0, 0.0, 0.0]);
        index.add("good", vec![1.0, 0.0]);
        let results = index.search_by_cosine(&[1.0, 0.0], 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "good");
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let kv: Arc<dyn KVStore> = Arc::new(MemoryKvStore::new());
        let index = VectorIndex::new();
        index.add("a", vec![1.0, 0.0]);
        index.add("b", vec![0.0, 1.0]);
        index.save(&kv).await.unwrap();

        let restored = VectorIndex::new();
        let loaded = restored.load(&kv).await.unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(restored.get("a"), Some(vec![1.0, 0.0]));
    }
}
