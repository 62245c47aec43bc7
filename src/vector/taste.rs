/// Profil de goût utilisateur
///
/// Moyenne mobile normalisée des vecteurs de pistes, pondérée par la force
/// des interactions, avec variantes contextuelles (moment de la journée,
/// week-end) et vecteur d'exploration orthogonal.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::TasteConfig;
use crate::error::Result;
use crate::storage::{keys, KVStore};
use crate::vector::math::{dot, l2_norm, normalize_in_place};

/// Créneau contextuel d'écoute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextSlot {
    Morning,
    Afternoon,
    Evening,
    Weekend,
}

impl ContextSlot {
    /// Créneau pour une heure (0-23) et un jour (0 = dimanche)
    pub fn for_time(hour: u8, day_of_week: u8) -> ContextSlot {
        if day_of_week == 0 || day_of_week == 6 {
            return ContextSlot::Weekend;
        }
        match hour {
            5..=11 => ContextSlot::Morning,
            12..=17 => ContextSlot::Afternoon,
            _ => ContextSlot::Evening,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TasteState {
    vector: Option<Vec<f32>>,
    interaction_count: u32,
    /// Variantes contextuelles: vecteur + nombre d'interactions du créneau
    contexts: HashMap<ContextSlot, (Vec<f32>, u32)>,
}

pub struct TasteProfile {
    dimension: usize,
    config: TasteConfig,
    state: Mutex<TasteState>,
}

impl TasteProfile {
    pub fn new(dimension: usize, config: TasteConfig) -> Self {
        Self {
            dimension,
            config,
            state: Mutex::new(TasteState::default()),
        }
    }

    /// Vrai une fois assez d'interactions accumulées
    pub fn is_valid(&self) -> bool {
        self.state.lock().interaction_count >= self.config.min_interactions
    }

    pub fn interaction_count(&self) -> u32 {
        self.state.lock().interaction_count
    }

    /// Vecteur de goût courant, unitaire quand peuplé
    pub fn vector(&self) -> Option<Vec<f32>> {
        self.state.lock().vector.clone()
    }

    /// Alpha du lissage: les signaux forts déplacent davantage le profil
    fn alpha_for(&self, weight: f32) -> f32 {
        (self.config.base_alpha - 0.05 * (weight - 1.0)).clamp(0.5, 0.95)
    }

    /// Signal positif: rapproche le profil du vecteur de la piste
    pub fn update_positive(&self, track_vector: &[f32], weight: f32, hour: u8, day_of_week: u8) {
        if track_vector.len() != self.dimension {
            warn!(
                "Vecteur de piste de dimension {} ignoré (profil en {})",
                track_vector.len(),
                self.dimension
            );
            return;
        }
        let alpha = self.alpha_for(weight);
        let mut state = self.state.lock();
        state.vector = Some(smooth(state.vector.as_deref(), track_vector, alpha, 1.0));
        state.interaction_count += 1;

        let slot = ContextSlot::for_time(hour, day_of_week);
        let dimension = self.dimension;
        let entry = state
            .contexts
            .entry(slot)
            .or_insert_with(|| (vec![0.0; dimension], 0));
        entry.0 = smooth(Some(&entry.0), track_vector, alpha, 1.0);
        entry.1 += 1;
    }

    /// Signal négatif: éloigne le profil du vecteur de la piste
    pub fn update_negative(&self, track_vector: &[f32], weight: f32) {
        if track_vector.len() != self.dimension {
            return;
        }
        let alpha = self.alpha_for(weight).max(0.85); // les rejets pèsent moins
        let mut state = self.state.lock();
        if let Some(current) = state.vector.as_deref() {
            state.vector = Some(smooth(Some(current), track_vector, alpha, -0.5));
        }
        state.interaction_count += 1;
    }

    /// Combinaison convexe avec un vecteur d'humeur, renormalisée
    pub fn blend_with_mood(&self, mood_vector: &[f32], mood_weight: f32) -> Vec<f32> {
        let state = self.state.lock();
        let mut blended = match state.vector.as_deref() {
            Some(taste) if taste.len() == mood_vector.len() => {
                let w = mood_weight.clamp(0.0, 1.0);
                taste
                    .iter()
                    .zip(mood_vector.iter())
                    .map(|(t, m)| (1.0 - w) * t + w * m)
                    .collect()
            }
            _ => mood_vector.to_vec(),
        };
        normalize_in_place(&mut blended);
        blended
    }

    /// Vecteur contextuel pour une heure et un jour donnés
    ///
    /// Combinaison convexe du profil global et de la variante du créneau,
    /// pondérée par la masse d'interactions du créneau.
    pub fn get_contextual_vector(&self, hour: u8, day_of_week: u8) -> Option<Vec<f32>> {
        let state = self.state.lock();
        let global = state.vector.as_deref()?;
        let slot = ContextSlot::for_time(hour, day_of_week);
        let mut result = match state.contexts.get(&slot) {
            Some((context_vector, count)) if *count > 0 => {
                let context_weight = (*count as f32 / (*count as f32 + 10.0)).min(0.6);
                global
                    .iter()
                    .zip(context_vector.iter())
                    .map(|(g, c)| (1.0 - context_weight) * g + context_weight * c)
                    .collect()
            }
            _ => global.to_vec(),
        };
        normalize_in_place(&mut result);
        Some(result)
    }

    /// Vecteur d'exploration approximativement orthogonal au profil
    ///
    /// Vecteur aléatoire (seedable) orthogonalisé par Gram-Schmidt.
    pub fn get_exploration_vector(&self, seed: Option<u64>) -> Vec<f32> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut random: Vec<f32> = (0..self.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
        if let Some(taste) = self.state.lock().vector.as_deref() {
            let projection = dot(&random, taste);
            for (r, t) in random.iter_mut().zip(taste.iter()) {
                *r -= projection * t;
            }
        }
        if l2_norm(&random) <= f32::EPSILON {
            // Dégénéré: repli sur un vecteur canonique
            random = vec![0.0; self.dimension];
            if !random.is_empty() {
                random[0] = 1.0;
            }
        }
        normalize_in_place(&mut random);
        random
    }

    /// Snapshot JSON sous `taste-profile`
    pub async fn save(&self, kv: &Arc<dyn KVStore>) -> Result<()> {
        let payload = {
            let state = self.state.lock();
            serde_json::to_string(&*state)?
        };
        kv.set(keys::TASTE_PROFILE, payload).await
    }

    pub async fn load(&self, kv: &Arc<dyn KVStore>) -> Result<bool> {
        let Some(raw) = kv.get(keys::TASTE_PROFILE).await? else {
            return Ok(false);
        };
        match serde_json::from_str::<TasteState>(&raw) {
            Ok(loaded) => {
                *self.state.lock() = loaded;
                Ok(true)
            }
            Err(e) => {
                warn!("Profil de goût illisible, ignoré: {}", e);
                Ok(false)
            }
        }
    }
}

/// Lissage exponentiel signé puis renormalisation
fn smooth(current: Option<&[f32]>, incoming: &[f32], alpha: f32, sign: f32) -> Vec<f32> {
    let mut next: Vec<f32> = match current {
        Some(current) if current.len() == incoming.len() && l2_norm(current) > f32::EPSILON => {
            current
                .iter()
                .zip(incoming.iter())
                .map(|(c, x)| alpha * c + sign * (1.0 - alpha) * x)
                .collect()
        }
        _ => incoming.iter().map(|x| sign * x).collect(),
    };
    normalize_in_place(&mut next);
    next
}
