/// Génération d'embeddings déterministes
///
/// Chaque piste est projetée dans R^D à partir de ses descripteurs audio,
/// de ses genres et de ses tags. La génération est déterministe: même
/// piste, même vecteur.

use std::f32::consts::E;

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::model::{now_ms, Embedding, MoodCategory, Track};
use crate::vector::math::{average, blend, normalize_in_place};

/// Nombre d'or, utilisé pour disperser les contributions dans les dimensions
const PHI: f32 = 1.618_034;

/// Longueur de l'axe court des vecteurs de base genre/tag
const BASE_AXIS: usize = 16;

/// Poids déclarés des descripteurs audio principaux
const AUDIO_WEIGHTS: [(&str, f32); 5] = [
    ("energy", 1.0),
    ("valence", 0.9),
    ("danceability", 0.8),
    ("bpm", 0.7),
    ("acousticness", 0.6),
];

pub struct EmbeddingEngine {
    config: EmbeddingConfig,
    /// Vecteurs de base par genre, axe court, générés à la demande
    genre_bases: DashMap<String, Vec<f32>>,
}

impl EmbeddingEngine {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            genre_bases: DashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Génère l'embedding d'une piste
    pub fn generate(&self, track: &Track) -> Embedding {
        let dim = self.config.dimension;
        let mut components: Vec<(String, Vec<f32>)> = Vec::new();

        if let Some(audio) = &track.audio {
            if audio.primary_field_count() >= 3 {
                components.push(("audio".to_string(), self.audio_vector(audio)));
            }
        }
        if !track.genres.is_empty() {
            components.push(("genre".to_string(), self.genre_component(&track.genres)));
        }
        if !track.tags.is_empty() {
            if let Some(tags) = self.tag_component(&track.tags) {
                components.push(("tags".to_string(), tags));
            }
        }

        let now = now_ms();
        let (mut vector, names, confidence) = if components.is_empty() {
            // Marqueur basse confiance: vecteur quasi constant avec un
            // léger jitter déterministe dérivé de l'id
            debug!("Aucune composante pour {}, embedding de repli", track.track_id);
            let mut rng = seeded_rng(&track.track_id);
            let base = 1.0 / (dim as f32).sqrt();
            let vector: Vec<f32> = (0..dim)
                .map(|_| base + rng.gen_range(-0.01..0.01))
                .collect();
            (vector, vec!["fallback".to_string()], 0.1)
        } else {
            let refs: Vec<&[f32]> = components.iter().map(|(_, v)| v.as_slice()).collect();
            let vector = average(&refs);
            let names: Vec<String> = components.iter().map(|(n, _)| n.clone()).collect();
            let confidence = (0.4 + 0.2 * components.len() as f32).min(1.0);
            (vector, names, confidence)
        };

        if self.config.normalize {
            normalize_in_place(&mut vector);
        }

        Embedding {
            vector,
            version: 1,
            created_at: now,
            updated_at: now,
            components: names,
            confidence,
        }
    }

    /// Vecteur audio: contributions dispersées par indexation au nombre d'or
    fn audio_vector(&self, audio: &crate::model::AudioDescriptors) -> Vec<f32> {
        let dim = self.config.dimension;
        let mut vector = vec![0.0f32; dim];

        let values: Vec<(usize, f32, f32)> = AUDIO_WEIGHTS
            .iter()
            .enumerate()
            .filter_map(|(i, (name, weight))| {
                let value = match *name {
                    "energy" => audio.energy,
                    "valence" => audio.valence,
                    "danceability" => audio.danceability,
                    "bpm" => audio.bpm.map(normalize_bpm),
                    "acousticness" => audio.acousticness,
                    _ => None,
                };
                value.map(|v| (i, v, *weight))
            })
            .collect();

        let n_features = values.len().max(1);
        let spread = (dim / n_features).max(1);
        for (i, value, weight) in &values {
            let base = ((*i as f32) * PHI * dim as f32).floor() as usize % dim;
            for j in 0..spread {
                let influence = weight * E.powf(-0.3 * j as f32);
                vector[(base + j) % dim] += value * influence;
            }
        }

        // Interactions de second ordre dans les bandes de queue
        if let (Some(energy), Some(valence)) = (audio.energy, audio.valence) {
            let band = dim.saturating_sub(8);
            for j in 0..4usize.min(dim) {
                vector[(band + j) % dim] += energy * valence * E.powf(-0.3 * j as f32);
            }
        }
        if let (Some(danceability), Some(bpm)) = (audio.danceability, audio.bpm) {
            let band = dim.saturating_sub(4);
            for j in 0..4usize.min(dim) {
                vector[(band + j) % dim] +=
                    danceability * normalize_bpm(bpm) * E.powf(-0.3 * j as f32);
            }
        }
        vector
    }

    /// Somme des vecteurs de base des genres, divisée par leur nombre
    fn genre_component(&self, genres: &[String]) -> Vec<f32> {
        let dim = self.config.dimension;
        let mut sum = vec![0.0f32; dim];
        for genre in genres {
            let base = self.genre_base(genre);
            let expanded = expand_to(&base, dim);
            for (s, x) in sum.iter_mut().zip(expanded.iter()) {
                *s += x;
            }
        }
        let inv = 1.0 / genres.len() as f32;
        for s in sum.iter_mut() {
            *s *= inv;
        }
        sum
    }

    /// Vecteur de tags: reconnaît les tokens d'humeur et de genre
    fn tag_component(&self, tags: &[String]) -> Option<Vec<f32>> {
        let dim = self.config.dimension;
        let mut parts: Vec<Vec<f32>> = Vec::new();
        for tag in tags {
            if let Some(mood) = MoodCategory::parse(tag) {
                parts.push(self.mood_base_vector(mood));
            } else {
                parts.push(expand_to(&self.genre_base(tag), dim));
            }
        }
        if parts.is_empty() {
            return None;
        }
        let refs: Vec<&[f32]> = parts.iter().map(|v| v.as_slice()).collect();
        Some(average(&refs))
    }

    /// Vecteur de base déterministe d'un genre, axe court, mis en cache
    fn genre_base(&self, genre: &str) -> Vec<f32> {
        let key = genre.trim().to_lowercase();
        if let Some(cached) = self.genre_bases.get(&key) {
            return cached.value().clone();
        }
        let mut rng = seeded_rng(&key);
        let base: Vec<f32> = (0..BASE_AXIS).map(|_| rng.gen_range(-1.0..1.0)).collect();
        self.genre_bases.insert(key, base.clone());
        base
    }

    fn mood_base_vector(&self, mood: MoodCategory) -> Vec<f32> {
        let dim = self.config.dimension;
        let mut vector = expand_to(&self.genre_base(mood.as_str()), dim);
        // Les deux premières dimensions portent la position valence/arousal
        let (valence, arousal) = mood.valence_arousal();
        if dim >= 2 {
            vector[0] = valence * 2.0 - 1.0;
            vector[1] = arousal * 2.0 - 1.0;
        }
        vector
    }

    /// Vecteur de requête pour une humeur libre
    ///
    /// Fallback: correspondance exacte → sous-chaîne → recouvrement de
    /// mots → vecteur neutre.
    pub fn generate_mood_vector(&self, mood: &str) -> Vec<f32> {
        let resolved = MoodCategory::parse(mood).or_else(|| word_overlap_mood(mood));
        let mut vector = match resolved {
            Some(category) => self.mood_base_vector(category),
            None => self.neutral_vector(),
        };
        normalize_in_place(&mut vector);
        vector
    }

    /// Vecteur de requête pour un genre libre
    pub fn generate_genre_query_vector(&self, genre: &str) -> Vec<f32> {
        let key = genre.trim().to_lowercase();
        let mut vector = if key.is_empty() {
            self.neutral_vector()
        } else {
            expand_to(&self.genre_base(&key), self.config.dimension)
        };
        normalize_in_place(&mut vector);
        vector
    }

    fn neutral_vector(&self) -> Vec<f32> {
        let dim = self.config.dimension;
        vec![1.0 / (dim as f32).sqrt(); dim]
    }

    /// Mélange un nouvel embedding avec l'existant (0.7·new + 0.3·old)
    ///
    /// Préserve `created_at`, réestampille `updated_at`, renormalise.
    pub fn update_embedding(&self, existing: &Embedding, fresh: &Embedding) -> Embedding {
        let alpha = self.config.update_blend;
        let mut vector = blend(&fresh.vector, &existing.vector, alpha);
        if self.config.normalize {
            normalize_in_place(&mut vector);
        }
        let mut components = existing.components.clone();
        for c in &fresh.components {
            if !components.contains(c) {
                components.push(c.clone());
            }
        }
        Embedding {
            vector,
            version: existing.version.max(fresh.version),
            created_at: existing.created_at,
            updated_at: now_ms(),
            components,
            confidence: existing.confidence.max(fresh.confidence),
        }
    }
}

/// BPM normalisé dans [0, 1] sur la plage documentée 20-300
fn normalize_bpm(bpm: f32) -> f32 {
    ((bpm - 20.0) / 280.0).clamp(0.0, 1.0)
}

/// Étend un vecteur court à `dim` par interpolation linéaire
fn expand_to(base: &[f32], dim: usize) -> Vec<f32> {
    if base.is_empty() || dim == 0 {
        return vec![0.0; dim];
    }
    if base.len() == dim {
        return base.to_vec();
    }
    let mut out = Vec::with_capacity(dim);
    let scale = (base.len() - 1).max(1) as f32 / (dim - 1).max(1) as f32;
    for i in 0..dim {
        let pos = i as f32 * scale;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(base.len() - 1);
        let frac = pos - lo as f32;
        out.push(base[lo] * (1.0 - frac) + base[hi] * frac);
    }
    out
}

/// RNG déterministe dérivé d'une clé texte
fn seeded_rng(key: &str) -> StdRng {
    let digest = Sha256::digest(key.as_bytes());
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    StdRng::from_seed(seed)
}

/// Fallback par recouvrement de mots sur les catégories d'humeur
fn word_overlap_mood(input: &str) -> Option<MoodCategory> {
    let words: Vec<String> = input
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.to_string())
        .collect();
    if words.is_empty() {
        return None;
    }
    MoodCategory::ALL
        .iter()
        .find(|mood| words.iter().any(|w| w == mood.as_str()))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AudioDescriptors;
    use crate::vector::math::{cosine_similarity, l2_norm};

    fn engine() -> EmbeddingEngine {
        EmbeddingEngine::new(EmbeddingConfig::default())
    }

    fn track(id: &str, energy: f32) -> Track {
        Track {
            track_id: id.to_string(),
            title: "T".to_string(),
            artists: vec!["A".to_string()],
            duration_s: 200.0,
            album: None,
            release_year: Some(2020),
            genres: vec!["rock".to_string()],
            tags: vec![],
            audio: Some(AudioDescriptors {
                energy: Some(energy),
                valence: Some(0.6),
                danceability: Some(0.7),
                bpm: Some(124.0),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_generate_is_deterministic() {
        let e = engine();
        let a = e.generate(&track("t1", 0.8));
        let b = e.generate(&track("t1", 0.8));
        assert_eq!(a.vector, b.vector);
    }

    #[test]
    fn test_generated_embedding_is_normalized() {
        let e = engine();
        let emb = e.generate(&track("t1", 0.8));
        assert!((l2_norm(&emb.vector) - 1.0).abs() < 1e-4);
        assert_eq!(emb.dimension(), 128);
    }

    #[test]
    fn test_fallback_embedding_has_low_confidence() {
        let e = engine();
        let bare = Track {
            track_id: "bare".to_string(),
            title: "B".to_string(),
            artists: vec![],
            duration_s: 100.0,
            album: None,
            release_year: None,
            genres: vec![],
            tags: vec![],
            audio: None,
        };
        let emb = e.generate(&bare);
        assert!(emb.confidence <= 0.1);
        assert_eq!(emb.components, vec!["fallback".to_string()]);
        assert!((l2_norm(&emb.vector) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_similar_tracks_have_similar_embeddings() {
        let e = engine();
        let a = e.generate(&track("t1", 0.80));
        let b = e.generate(&track("t2", 0.82));
        let far = e.generate(&Track {
            genres: vec!["ambient".to_string()],
            audio: Some(AudioDescriptors {
                energy: Some(0.05),
                valence: Some(0.2),
                danceability: Some(0.1),
                bpm: Some(60.0),
                ..Default::default()
            }),
            ..track("t3", 0.05)
        });
        let close = cosine_similarity(&a.vector, &b.vector);
        let distant = cosine_similarity(&a.vector, &far.vector);
        assert!(close > distant);
    }

    #[test]
    fn test_mood_vector_fallback_chain() {
        let e = engine();
        let exact = e.generate_mood_vector("happy");
        let overlapping = e.generate_mood_vector("feeling happy tonight");
        assert!((cosine_similarity(&exact, &overlapping) - 1.0).abs() < 1e-5);
        // Inconnu: vecteur neutre, toujours normalisé
        let neutral = e.generate_mood_vector("xyzzy");
        assert!((l2_norm(&neutral) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_update_blend_preserves_created_at() {
        let e = engine();
        let old = e.generate(&track("t1", 0.3));
        let fresh = e.generate(&track("t1", 0.9));
        let updated = e.update_embedding(&old, &fresh);
        assert_eq!(updated.created_at, old.created_at);
        assert!((l2_norm(&updated.vector) - 1.0).abs() < 1e-4);
        // Le nouveau vecteur domine le mélange
        assert!(
            cosine_similarity(&updated.vector, &fresh.vector)
                > cosine_similarity(&updated.vector, &old.vector)
        );
    }
}
