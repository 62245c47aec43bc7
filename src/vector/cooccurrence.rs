/// Matrice de co-occurrence mono-utilisateur
///
/// Compte pondéré par paire non ordonnée de pistes, avec buckets de
/// contexte, décroissance quotidienne et élagage borné.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::CoOccurrenceConfig;
use crate::error::Result;
use crate::model::now_ms;
use crate::storage::{keys, KVStore};
use crate::vector::math::normalize_in_place;

const MS_PER_DAY: i64 = 86_400_000;

/// Entrée pour une paire canonique (min, max)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoOccurrenceEntry {
    pub count: f32,
    /// Poids accumulé par contexte (playlist, sequential, like...)
    pub contexts: HashMap<String, f32>,
    pub first_seen: i64, // ms epoch
    pub last_seen: i64,  // ms epoch
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MatrixState {
    entries: HashMap<String, CoOccurrenceEntry>,
    /// Jour UTC de la dernière décroissance appliquée
    last_decay_day: i64,
}

pub struct CoOccurrenceMatrix {
    config: CoOccurrenceConfig,
    state: Mutex<MatrixState>,
}

impl CoOccurrenceMatrix {
    pub fn new(config: CoOccurrenceConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MatrixState::default()),
        }
    }

    /// Clé canonique indépendante de l'ordre
    fn pair_key(a: &str, b: &str) -> Option<String> {
        if a == b {
            return None;
        }
        if a < b {
            Some(format!("{}\u{1f}{}", a, b))
        } else {
            Some(format!("{}\u{1f}{}", b, a))
        }
    }

    fn split_key(key: &str) -> Option<(&str, &str)> {
        key.split_once('\u{1f}')
    }

    /// Enregistre toutes les paires d'une liste de lecture
    ///
    /// Chaque paire (i, j) à positions (p_i, p_j) reçoit
    /// `weight · e^(-λ·|p_j - p_i|)`.
    pub fn record_cooccurrence(&self, track_ids: &[String], context: &str, weight: f32) {
        let now = now_ms();
        let lambda = self.config.proximity_lambda;
        let mut state = self.state.lock();
        for i in 0..track_ids.len() {
            for j in (i + 1)..track_ids.len() {
                let Some(key) = Self::pair_key(&track_ids[i], &track_ids[j]) else {
                    continue;
                };
                let distance = (j - i) as f32;
                let contribution = weight * (-lambda * distance).exp();
                add_to_entry(&mut state.entries, key, context, contribution, now);
            }
        }
        drop(state);
        self.prune_if_needed(now);
    }

    /// Paire séquentielle: signal fort
    pub fn record_sequential_play(&self, prev: &str, current: &str) {
        let now = now_ms();
        let weight = self.config.sequential_weight;
        if let Some(key) = Self::pair_key(prev, current) {
            let mut state = self.state.lock();
            add_to_entry(&mut state.entries, key, "sequential", weight, now);
        }
        self.prune_if_needed(now);
    }

    /// Like juste après une écoute: signal très fort
    pub fn record_like_after_play(&self, played: &str, liked: &str) {
        let now = now_ms();
        let weight = self.config.like_after_play_weight;
        if let Some(key) = Self::pair_key(played, liked) {
            let mut state = self.state.lock();
            add_to_entry(&mut state.entries, key, "like", weight, now);
        }
        self.prune_if_needed(now);
    }

    /// Score symétrique d'une paire
    pub fn get_score(&self, a: &str, b: &str) -> f32 {
        let Some(key) = Self::pair_key(a, b) else {
            return 0.0;
        };
        self.state.lock().entries.get(&key).map(|e| e.count).unwrap_or(0.0)
    }

    /// Pistes les plus associées à `track_id`, égalités par id croissant
    pub fn get_related(&self, track_id: &str, limit: usize) -> Vec<(String, f32)> {
        let state = self.state.lock();
        let mut related: Vec<(String, f32)> = state
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                let (a, b) = Self::split_key(key)?;
                if a == track_id {
                    Some((b.to_string(), entry.count))
                } else if b == track_id {
                    Some((a.to_string(), entry.count))
                } else {
                    None
                }
            })
            .collect();
        related.sort_by(|x, y| {
            y.1.partial_cmp(&x.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| x.0.cmp(&y.0))
        });
        related.truncate(limit);
        related
    }

    /// Scores sommés sur plusieurs seeds, seeds exclus du résultat
    pub fn get_related_multiple(&self, seeds: &[String], limit: usize) -> Vec<(String, f32)> {
        let mut accumulated: HashMap<String, f32> = HashMap::new();
        for seed in seeds {
            for (id, score) in self.get_related(seed, usize::MAX) {
                if seeds.contains(&id) {
                    continue;
                }
                *accumulated.entry(id).or_insert(0.0) += score;
            }
        }
        let mut results: Vec<(String, f32)> = accumulated.into_iter().collect();
        results.sort_by(|x, y| {
            y.1.partial_cmp(&x.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| x.0.cmp(&y.0))
        });
        results.truncate(limit);
        results
    }

    /// Embedding collaboratif de repli dérivé des pistes associées
    ///
    /// Chaque piste associée est hachée vers des positions déterministes,
    /// pondérées par log(1 + score), puis le vecteur est normalisé.
    pub fn generate_collaborative_embedding(&self, track_id: &str, dim: usize) -> Option<Vec<f32>> {
        let related = self.get_related(track_id, 50);
        if related.is_empty() || dim == 0 {
            return None;
        }
        let mut vector = vec![0.0f32; dim];
        for (id, score) in related {
            let weight = (1.0 + score).ln();
            let digest = Sha256::digest(id.as_bytes());
            // Quatre positions par piste associée, signe alterné
            for chunk in digest.chunks(8).take(4) {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                let value = u64::from_le_bytes(bytes);
                let position = (value % dim as u64) as usize;
                let sign = if value & 1 == 0 { 1.0 } else { -1.0 };
                vector[position] += sign * weight;
            }
        }
        normalize_in_place(&mut vector);
        Some(vector)
    }

    /// Décroissance quotidienne, appliquée au plus une fois par jour UTC
    pub fn maybe_decay(&self) {
        self.maybe_decay_at(now_ms());
    }

    pub fn maybe_decay_at(&self, now: i64) {
        let today = now / MS_PER_DAY;
        let mut state = self.state.lock();
        if state.last_decay_day == 0 {
            state.last_decay_day = today;
            return;
        }
        let elapsed_days = today - state.last_decay_day;
        if elapsed_days < 1 {
            return;
        }
        let factor = self.config.decay_factor.powi(elapsed_days as i32);
        let min_count = self.config.min_count;
        for entry in state.entries.values_mut() {
            entry.count *= factor;
        }
        let before = state.entries.len();
        state.entries.retain(|_, e| e.count >= min_count);
        debug!(
            "Co-occurrence decay x{:.3}: {} -> {} paires",
            factor,
            before,
            state.entries.len()
        );
        state.last_decay_day = today;
    }

    /// Élagage: éviction des paires au plus faible count·e^(-age/7j)
    fn prune_if_needed(&self, now: i64) {
        let mut state = self.state.lock();
        if state.entries.len() <= self.config.max_pairs {
            return;
        }
        let excess = state.entries.len() - self.config.max_pairs;
        let mut scored: Vec<(String, f32)> = state
            .entries
            .iter()
            .map(|(key, entry)| {
                let age_days = ((now - entry.last_seen).max(0) as f32) / MS_PER_DAY as f32;
                (key.clone(), entry.count * (-age_days / 7.0).exp())
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        for (key, _) in scored.into_iter().take(excess) {
            state.entries.remove(&key);
        }
        debug!("Co-occurrence élaguée à {} paires", state.entries.len());
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot JSON sous `cooccurrence-matrix`
    pub async fn save(&self, kv: &Arc<dyn KVStore>) -> Result<()> {
        let payload = {
            let state = self.state.lock();
            serde_json::to_string(&*state)?
        };
        kv.set(keys::COOCCURRENCE, payload).await
    }

    /// Recharge le snapshot puis applique la décroissance due
    pub async fn load(&self, kv: &Arc<dyn KVStore>) -> Result<usize> {
        let Some(raw) = kv.get(keys::COOCCURRENCE).await? else {
            return Ok(0);
        };
        let loaded: MatrixState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!("Matrice de co-occurrence illisible, ignorée: {}", e);
                return Ok(0);
            }
        };
        let count = loaded.entries.len();
        *self.state.lock() = loaded;
        self.maybe_decay();
        Ok(count)
    }
}

fn add_to_entry(
    entries: &mut HashMap<String, CoOccurrenceEntry>,
    key: String,
    context: &str,
    contribution: f32,
    now: i64,
) {
    let entry = entries.entry(key).or_insert_with(|| CoOccurrenceEntry {
        count: 0.0,
        contexts: HashMap::new(),
        first_seen: now,
        last_seen: now,
    });
    entry.count += contribution;
    *entry.contexts.entry(context.to_string()).or_insert(0.0) += contribution;
    entry.last_seen = now;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> CoOccurrenceMatrix {
        CoOccurrenceMatrix::new(CoOccurrenceConfig::default())
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_score_is_symmetric() {
        let m = matrix();
        m.record_sequential_play("a", "b");
        assert_eq!(m.get_score("a", "b"), m.get_score("b", "a"));
        assert!((m.get_score("a", "b") - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_proximity_weighting_favors_neighbors() {
        let m = matrix();
        m.record_cooccurrence(&ids(&["a", "b", "c", "d"]), "playlist", 1.0);
        // |Δpos| = 1 pour (a,b), 3 pour (a,d)
        assert!(m.get_score("a", "b") > m.get_score("a", "d"));
    }

    #[test]
    fn test_self_pair_ignored() {
        let m = matrix();
        m.record_cooccurrence(&ids(&["a", "a"]), "playlist", 1.0);
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn test_related_sorted_with_lexicographic_ties() {
        let m = matrix();
        m.record_sequential_play("seed", "zz");
        m.record_sequential_play("seed", "aa");
        let related = m.get_related("seed", 10);
        assert_eq!(related.len(), 2);
        // Scores égaux: départage lexicographique
        assert_eq!(related[0].0, "aa");
        assert_eq!(related[1].0, "zz");
    }

    #[test]
    fn test_related_multiple_excludes_seeds() {
        let m = matrix();
        m.record_sequential_play("s1", "x");
        m.record_sequential_play("s2", "x");
        m.record_sequential_play("s1", "s2");
        let related = m.get_related_multiple(&ids(&["s1", "s2"]), 10);
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].0, "x");
        assert!((related[0].1 - 3.0).abs() < 1e-6); // 1.5 + 1.5
    }

    #[test]
    fn test_decay_drops_weak_entries() {
        let m = matrix();
        m.record_sequential_play("a", "b"); // count 1.5, sous min_count=2 après decay
        m.record_like_after_play("a", "c"); // count 3.0
        let now = now_ms();
        // Initialisation du jour de référence, puis 7 jours plus tard
        m.maybe_decay_at(now);
        m.maybe_decay_at(now + 7 * MS_PER_DAY);
        assert_eq!(m.get_score("a", "b"), 0.0);
        let expected = 3.0 * 0.98f32.powi(7);
        assert!((m.get_score("a", "c") - expected).abs() < 1e-3);
    }

    #[test]
    fn test_decay_applied_at_most_once_per_day() {
        let m = matrix();
        m.record_like_after_play("a", "b");
        let now = now_ms();
        m.maybe_decay_at(now);
        let before = m.get_score("a", "b");
        m.maybe_decay_at(now + MS_PER_DAY / 2);
        assert_eq!(m.get_score("a", "b"), before);
    }

    #[test]
    fn test_pruning_respects_max_pairs() {
        let mut config = CoOccurrenceConfig::default();
        config.max_pairs = 5;
        let m = CoOccurrenceMatrix::new(config);
        for i in 0..20 {
            m.record_sequential_play(&format!("t{}", i), &format!("t{}", i + 100));
        }
        assert!(m.len() <= 5);
    }

    #[test]
    fn test_collaborative_embedding_normalized() {
        let m = matrix();
        m.record_sequential_play("seed", "a");
        m.record_sequential_play("seed", "b");
        let embedding = m.generate_collaborative_embedding("seed", 64).unwrap();
        assert_eq!(embedding.len(), 64);
        let norm = crate::vector::math::l2_norm(&embedding);
        assert!((norm - 1.0).abs() < 1e-4);
        // Déterministe
        assert_eq!(embedding, m.generate_collaborative_embedding("seed", 64).unwrap());
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let kv: Arc<dyn KVStore> = Arc::new(crate::storage::MemoryKvStore::new());
        let m = matrix();
        m.record_like_after_play("a", "b");
        m.save(&kv).await.unwrap();

        let restored = matrix();
        let count = restored.load(&kv).await.unwrap();
        assert_eq!(count, 1);
        assert!((restored.get_score("a", "b") - 3.0).abs() < 1e-6);
    }
}
