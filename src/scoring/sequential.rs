/// Scoring séquentiel conscient de la session
///
/// Quatre signaux sur la trajectoire d'écoute récente: continuité
/// vectorielle, flux de tempo, transitions de genre apprises et
/// progression d'énergie.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SequentialConfig;
use crate::error::Result;
use crate::scoring::SessionTrack;
use crate::storage::KVStore;
use crate::vector::math::euclidean_distance;

const TRANSITIONS_KEY: &str = "genre-transitions";

/// Paires de genres voisines par défaut, avant tout apprentissage
const DEFAULT_TRANSITIONS: [(&str, &str, f32); 12] = [
    ("rock", "metal", 0.8),
    ("rock", "indie", 0.8),
    ("rock", "punk", 0.75),
    ("pop", "dance", 0.8),
    ("pop", "rnb", 0.7),
    ("electronic", "dance", 0.85),
    ("electronic", "ambient", 0.7),
    ("hip-hop", "rnb", 0.8),
    ("jazz", "blues", 0.8),
    ("jazz", "soul", 0.7),
    ("classical", "ambient", 0.65),
    ("folk", "country", 0.8),
];

/// Scores des quatre signaux séquentiels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequentialScores {
    pub trajectory_fit: f32,
    pub tempo_flow: f32,
    pub genre_transition: f32,
    pub energy_progression: f32,
    pub overall: f32,
    pub confidence: f32,
}

impl SequentialScores {
    fn neutral() -> Self {
        Self {
            trajectory_fit: 0.5,
            tempo_flow: 0.5,
            genre_transition: 0.5,
            energy_progression: 0.5,
            overall: 0.5,
            confidence: 0.3,
        }
    }
}

pub struct SequentialScorer {
    config: SequentialConfig,
    /// Matrice de transitions apprise: (de, vers) → score [0, 1]
    transitions: Mutex<HashMap<(String, String), f32>>,
}

impl SequentialScorer {
    pub fn new(config: SequentialConfig) -> Self {
        Self {
            config,
            transitions: Mutex::new(HashMap::new()),
        }
    }

    /// Score d'un candidat contre les dernières pistes de session
    pub fn score(&self, candidate: &SessionTrack, recent: &[SessionTrack]) -> SequentialScores {
        if recent.is_empty() {
            return SequentialScores::neutral();
        }
        let window = &recent[recent.len().saturating_sub(self.config.window)..];

        let trajectory_fit = self.trajectory_fit(candidate, window);
        let tempo_flow = self.tempo_flow(candidate, window);
        let genre_transition = self.genre_transition_score(candidate, window);
        let energy_progression = self.energy_progression(candidate, window);

        let overall = self.config.trajectory_weight * trajectory_fit
            + self.config.tempo_weight * tempo_flow
            + self.config.genre_weight * genre_transition
            + self.config.energy_weight * energy_progression;
        let confidence = (0.3 + 0.1 * window.len() as f32).min(0.9);

        SequentialScores {
            trajectory_fit,
            tempo_flow,
            genre_transition,
            energy_progression,
            overall,
            confidence,
        }
    }

    /// Continuité vectorielle: prédit v_next = v_last + 0.5·vélocité
    fn trajectory_fit(&self, candidate: &SessionTrack, window: &[SessionTrack]) -> f32 {
        let embeddings: Vec<&Vec<f32>> =
            window.iter().filter_map(|t| t.embedding.as_ref()).collect();
        let Some(candidate_vector) = candidate.embedding.as_ref() else {
            return 0.5;
        };
        let Some(last) = embeddings.last() else {
            return 0.5;
        };
        if embeddings.len() < 2 {
            // Pas de vélocité mesurable: continuité directe
            return (1.0 - euclidean_distance(candidate_vector, last)).max(0.0);
        }
        let dim = last.len();
        let mut velocity = vec![0.0f32; dim];
        let mut steps = 0usize;
        for pair in embeddings.windows(2) {
            if pair[0].len() != dim || pair[1].len() != dim {
                continue;
            }
            for (v, (a, b)) in velocity.iter_mut().zip(pair[1].iter().zip(pair[0].iter())) {
                *v += a - b;
            }
            steps += 1;
        }
        if steps == 0 {
            return 0.5;
        }
        let predicted: Vec<f32> = last
            .iter()
            .zip(velocity.iter())
            .map(|(l, v)| l + 0.5 * v / steps as f32)
            .collect();
        (1.0 - euclidean_distance(candidate_vector, &predicted)).max(0.0)
    }

    /// Table par morceaux sur |Δbpm| contre la dernière piste
    fn tempo_flow(&self, candidate: &SessionTrack, window: &[SessionTrack]) -> f32 {
        let last_bpm = window.iter().rev().find_map(|t| t.bpm);
        match (candidate.bpm, last_bpm) {
            (Some(cand), Some(last)) => match (cand - last).abs() {
                d if d <= 5.0 => 1.0,
                d if d <= 10.0 => 0.9,
                d if d <= 20.0 => 0.7,
                d if d <= 40.0 => 0.5,
                _ => 0.3,
            },
            _ => 0.5,
        }
    }

    /// Matrice apprise d'abord, défauts ensuite, inconnu → 0.4
    fn genre_transition_score(&self, candidate: &SessionTrack, window: &[SessionTrack]) -> f32 {
        let Some(to) = candidate.genre.as_deref() else {
            return 0.5;
        };
        let Some(from) = window.iter().rev().find_map(|t| t.genre.as_deref()) else {
            return 0.5;
        };
        let from = from.to_lowercase();
        let to = to.to_lowercase();
        if from == to {
            return 0.9; // rester dans le genre coule toujours
        }
        if let Some(learned) = self.transitions.lock().get(&(from.clone(), to.clone())) {
            return *learned;
        }
        for (a, b, score) in DEFAULT_TRANSITIONS {
            if (a == from && b == to) || (b == from && a == to) {
                return score;
            }
        }
        0.4
    }

    /// Tendance d'énergie: attendu = clamp(dernière + tendance)
    fn energy_progression(&self, candidate: &SessionTrack, window: &[SessionTrack]) -> f32 {
        let energies: Vec<f32> = window.iter().filter_map(|t| t.energy).collect();
        let Some(candidate_energy) = candidate.energy else {
            return 0.5;
        };
        let Some(last) = energies.last() else {
            return 0.5;
        };
        let trend = if energies.len() >= 2 {
            let deltas: f32 = energies.windows(2).map(|p| p[1] - p[0]).sum();
            deltas / (energies.len() - 1) as f32
        } else {
            0.0
        };
        let expected = (last + trend).clamp(0.0, 1.0);
        (1.0 - 2.0 * (candidate_energy - expected).abs()).max(0.0)
    }

    /// Renforce une transition après une écoute complète
    pub fn reinforce_transition(&self, from: &str, to: &str) {
        self.adjust_transition(from, to, self.config.transition_learning_rate);
    }

    /// Affaiblit une transition après un skip
    pub fn weaken_transition(&self, from: &str, to: &str) {
        self.adjust_transition(from, to, -self.config.transition_learning_rate);
    }

    fn adjust_transition(&self, from: &str, to: &str, delta: f32) {
        let key = (from.to_lowercase(), to.to_lowercase());
        if key.0 == key.1 {
            return;
        }
        let mut transitions = self.transitions.lock();
        let base = transitions.get(&key).copied().unwrap_or_else(|| {
            DEFAULT_TRANSITIONS
                .iter()
                .find(|(a, b, _)| (*a == key.0 && *b == key.1) || (*b == key.0 && *a == key.1))
                .map(|(_, _, s)| *s)
                .unwrap_or(0.4)
        });
        transitions.insert(key, (base + delta).clamp(0.0, 1.0));
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.lock().len()
    }

    /// Persistance de la matrice apprise
    pub async fn save(&self, kv: &Arc<dyn KVStore>) -> Result<()> {
        let flat: Vec<((String, String), f32)> = {
            let transitions = self.transitions.lock();
            transitions.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        let payload = serde_json::to_string(&flat)?;
        kv.set(TRANSITIONS_KEY, payload).await
    }

    pub async fn load(&self, kv: &Arc<dyn KVStore>) -> Result<usize> {
        let Some(raw) = kv.get(TRANSITIONS_KEY).await? else {
            return Ok(0);
        };
        match serde_json::from_str::<Vec<((String, String), f32)>>(&raw) {
            Ok(flat) => {
                let count = flat.len();
                *self.transitions.lock() = flat.into_iter().collect();
                Ok(count)
            }
            Err(e) => {
                warn!("Transitions de genre illisibles, ignorées: {}", e);
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> SequentialScorer {
        SequentialScorer::new(SequentialConfig::default())
    }

    fn session(id: &str, bpm: f32, energy: f32, genre: &str) -> SessionTrack {
        SessionTrack {
            track_id: id.to_string(),
            bpm: Some(bpm),
            energy: Some(energy),
            genre: Some(genre.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_session_is_neutral() {
        let s = scorer();
        let scores = s.score(&session("c", 120.0, 0.5, "rock"), &[]);
        assert_eq!(scores.overall, 0.5);
        assert_eq!(scores.confidence, 0.3);
    }

    #[test]
    fn test_tempo_flow_table() {
        let s = scorer();
        let recent = vec![session("a", 120.0, 0.5, "rock")];
        let flow = |bpm: f32| s.score(&session("c", bpm, 0.5, "rock"), &recent).tempo_flow;
        assert_eq!(flow(123.0), 1.0);
        assert_eq!(flow(128.0), 0.9);
        assert_eq!(flow(138.0), 0.7);
        assert_eq!(flow(155.0), 0.5);
        assert_eq!(flow(180.0), 0.3);
    }

    #[test]
    fn test_genre_transition_learning() {
        let s = scorer();
        let recent = vec![session("a", 120.0, 0.5, "rock")];
        let candidate = session("c", 120.0, 0.5, "jazz");
        let before = s.score(&candidate, &recent).genre_transition;
        assert!((before - 0.4).abs() < 1e-6); // paire inconnue

        s.reinforce_transition("rock", "jazz");
        let after = s.score(&candidate, &recent).genre_transition;
        assert!((after - 0.45).abs() < 1e-6);

        s.weaken_transition("rock", "jazz");
        s.weaken_transition("rock", "jazz");
        let weakened = s.score(&candidate, &recent).genre_transition;
        assert!((weakened - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_same_genre_flows() {
        let s = scorer();
        let recent = vec![session("a", 120.0, 0.5, "rock")];
        let scores = s.score(&session("c", 121.0, 0.5, "rock"), &recent);
        assert!(scores.genre_transition >= 0.9);
    }

    #[test]
    fn test_energy_progression_follows_trend() {
        let s = scorer();
        // Énergie croissante: 0.4 → 0.5 → 0.6, attendu ≈ 0.7
        let recent = vec![
            session("a", 120.0, 0.4, "rock"),
            session("b", 120.0, 0.5, "rock"),
            session("c", 120.0, 0.6, "rock"),
        ];
        let fitting = s.score(&session("d", 120.0, 0.7, "rock"), &recent);
        let breaking = s.score(&session("e", 120.0, 0.1, "rock"), &recent);
        assert!(fitting.energy_progression > breaking.energy_progression);
        assert!((fitting.energy_progression - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_trajectory_follows_velocity() {
        let s = scorer();
        let embed = |x: f32| Some(vec![x, 1.0 - x]);
        let mut a = session("a", 120.0, 0.5, "rock");
        a.embedding = embed(0.2);
        let mut b = session("b", 120.0, 0.5, "rock");
        b.embedding = embed(0.4);
        let recent = vec![a, b];
        // Vélocité +0.2, prédiction 0.4 + 0.1 = 0.5
        let mut on_track = session("c", 120.0, 0.5, "rock");
        on_track.embedding = embed(0.5);
        let mut off_track = session("d", 120.0, 0.5, "rock");
        off_track.embedding = embed(0.9);
        let good = s.score(&on_track, &recent).trajectory_fit;
        let bad = s.score(&off_track, &recent).trajectory_fit;
        assert!(good > bad);
        assert!((good - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_confidence_grows_with_window() {
        let s = scorer();
        let one = vec![session("a", 120.0, 0.5, "rock")];
        let four: Vec<SessionTrack> =
            (0..4).map(|i| session(&format!("t{}", i), 120.0, 0.5, "rock")).collect();
        let candidate = session("c", 120.0, 0.5, "rock");
        assert!(s.score(&candidate, &four).confidence > s.score(&candidate, &one).confidence);
        assert!(s.score(&candidate, &four).confidence <= 0.9);
    }
}
