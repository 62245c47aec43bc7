/// Prédicteur de préférence
///
/// Le réseau de neurones réel est une capacité externe; le trait expose
/// fit/predict/save/load. Un prédicteur heuristique (régression logistique
/// entraînée par SGD) sert de repli intégré pour que le moteur fonctionne
/// sans dépendance hôte.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::learning::recorder::TrainingDataset;
use crate::storage::KVStore;

const PREDICTOR_KEY: &str = "audiio-ml-predictor";

/// Résultat d'un entraînement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    pub success: bool,
    pub samples_used: usize,
    pub loss: Option<f32>,
    pub accuracy: Option<f32>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl TrainingResult {
    pub fn failure(error: AppError) -> Self {
        Self {
            success: false,
            samples_used: 0,
            loss: None,
            accuracy: None,
            duration_ms: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Capacité de prédiction, implémentable par l'hôte
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Entraîne sur un dataset; les échantillons sans vecteur sont ignorés
    async fn fit(&self, dataset: &TrainingDataset) -> Result<TrainingResult>;

    /// Score de préférence prédit dans [0, 1]
    fn predict(&self, features: &[f32]) -> f32;

    /// Confiance du modèle courant; 0.0 tant que rien n'est entraîné
    fn confidence(&self) -> f32;

    async fn save(&self, kv: &Arc<dyn KVStore>) -> Result<()>;
    async fn load(&self, kv: &Arc<dyn KVStore>) -> Result<bool>;
}

/// Modèle logistique: poids + biais, swappé atomiquement après fit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LogisticModel {
    weights: Vec<f32>,
    bias: f32,
    confidence: f32,
    trained_at: i64,
}

/// Prédicteur heuristique intégré
///
/// Régression logistique par descente de gradient stochastique. Le modèle
/// servi aux prédictions n'est remplacé qu'une fois l'entraînement
/// terminé: les appels concurrents observent l'ancien modèle.
pub struct HeuristicPredictor {
    model: RwLock<LogisticModel>,
    min_samples: usize,
    training: parking_lot::Mutex<()>,
}

impl HeuristicPredictor {
    pub fn new(min_samples: usize) -> Self {
        Self {
            model: RwLock::new(LogisticModel::default()),
            min_samples,
            training: parking_lot::Mutex::new(()),
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[async_trait]
impl Predictor for HeuristicPredictor {
    async fn fit(&self, dataset: &TrainingDataset) -> Result<TrainingResult> {
        let Some(_guard) = self.training.try_lock() else {
            return Err(AppError::TrainingInProgress);
        };
        let started = Instant::now();

        let samples: Vec<(&[f32], f32, f32)> = dataset
            .all_samples()
            .filter(|s| !s.feature_vector.is_empty())
            .map(|s| (s.feature_vector.as_slice(), s.label, s.weight.max(0.1)))
            .collect();
        if samples.len() < self.min_samples {
            return Err(AppError::DatasetTooSmall { got: samples.len(), min: self.min_samples });
        }
        let dim = samples[0].0.len();
        if samples.iter().any(|(v, _, _)| v.len() != dim) {
            return Err(AppError::TrainingFailure {
                message: "vecteurs de features de dimensions hétérogènes".to_string(),
            });
        }

        // SGD sur un modèle local; le modèle servi n'est pas touché
        let mut weights = vec![0.0f32; dim];
        let mut bias = 0.0f32;
        let learning_rate = 0.05f32;
        let epochs = 30;
        let mut last_loss = 0.0f32;
        for epoch in 0..epochs {
            let mut loss = 0.0f32;
            for (features, label, weight) in &samples {
                let z = features.iter().zip(weights.iter()).map(|(x, w)| x * w).sum::<f32>() + bias;
                let predicted = sigmoid(z);
                let err = predicted - label;
                loss += weight * err * err;
                let step = learning_rate * weight * err;
                for (w, x) in weights.iter_mut().zip(features.iter()) {
                    *w -= step * x;
                }
                bias -= step;
            }
            last_loss = loss / samples.len() as f32;
            if epoch == epochs - 1 {
                debug!("SGD époque {}: loss {:.4}", epoch, last_loss);
            }
        }

        // Exactitude en classification binaire au seuil 0.5
        let correct = samples
            .iter()
            .filter(|(features, label, _)| {
                let z =
                    features.iter().zip(weights.iter()).map(|(x, w)| x * w).sum::<f32>() + bias;
                (sigmoid(z) >= 0.5) == (*label >= 0.5)
            })
            .count();
        let accuracy = correct as f32 / samples.len() as f32;
        let confidence =
            (accuracy * (samples.len() as f32 / (samples.len() as f32 + 50.0))).clamp(0.0, 1.0);

        // Swap atomique du modèle servi
        *self.model.write() = LogisticModel {
            weights,
            bias,
            confidence,
            trained_at: crate::model::now_ms(),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Prédicteur entraîné: {} échantillons, accuracy {:.2}, {} ms",
            samples.len(),
            accuracy,
            duration_ms
        );
        Ok(TrainingResult {
            success: true,
            samples_used: samples.len(),
            loss: Some(last_loss),
            accuracy: Some(accuracy),
            duration_ms,
            error: None,
        })
    }

    fn predict(&self, features: &[f32]) -> f32 {
        let model = self.model.read();
        if model.weights.is_empty() || model.weights.len() != features.len() {
            return 0.5; // non entraîné ou dimension inattendue: neutre
        }
        let z = features.iter().zip(model.weights.iter()).map(|(x, w)| x * w).sum::<f32>()
            + model.bias;
        sigmoid(z)
    }

    fn confidence(&self) -> f32 {
        self.model.read().confidence
    }

    async fn save(&self, kv: &Arc<dyn KVStore>) -> Result<()> {
        let payload = {
            let model = self.model.read();
            serde_json::to_string(&*model)?
        };
        kv.set(PREDICTOR_KEY, payload).await
    }

    async fn load(&self, kv: &Arc<dyn KVStore>) -> Result<bool> {
        let Some(raw) = kv.get(PREDICTOR_KEY).await? else {
            return Ok(false);
        };
        match serde_json::from_str::<LogisticModel>(&raw) {
            Ok(loaded) => {
                *self.model.write() = loaded;
                Ok(true)
            }
            Err(e) => {
                warn!("Modèle persisté illisible, ignoré: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::recorder::TrainingSample;
    use crate::model::{EventContext, TrackRef};

    fn sample(features: Vec<f32>, label: f32, ts: i64) -> TrainingSample {
        TrainingSample {
            track: TrackRef {
                track_id: format!("t{}", ts),
                artists: vec![],
                genres: vec![],
                duration_s: 100.0,
            },
            feature_vector: features,
            label,
            weight: 1.0,
            context: EventContext::default(),
            timestamp: ts,
        }
    }

    fn separable_dataset(n: usize) -> TrainingDataset {
        let mut dataset = TrainingDataset::default();
        for i in 0..n {
            // Positifs autour de (0.9, 0.1), négatifs autour de (0.1, 0.9)
            let jitter = (i % 10) as f32 * 0.005;
            dataset.positives.push(sample(vec![0.9 - jitter, 0.1 + jitter], 1.0, i as i64));
            dataset
                .negatives
                .push(sample(vec![0.1 + jitter, 0.9 - jitter], 0.0, (n + i) as i64));
        }
        dataset
    }

    #[tokio::test]
    async fn test_untrained_predicts_neutral_with_zero_confidence() {
        let p = HeuristicPredictor::new(10);
        assert_eq!(p.predict(&[0.5, 0.5]), 0.5);
        assert_eq!(p.confidence(), 0.0);
    }

    #[tokio::test]
    async fn test_fit_learns_separable_data() {
        let p = HeuristicPredictor::new(10);
        let result = p.fit(&separable_dataset(30)).await.unwrap();
        assert!(result.success);
        assert!(result.accuracy.unwrap() > 0.9);
        assert!(p.confidence() > 0.0);
        assert!(p.predict(&[0.9, 0.1]) > 0.6);
        assert!(p.predict(&[0.1, 0.9]) < 0.4);
    }

    #[tokio::test]
    async fn test_dataset_too_small_is_rejected() {
        let p = HeuristicPredictor::new(50);
        let result = p.fit(&separable_dataset(5)).await;
        assert!(matches!(result, Err(AppError::DatasetTooSmall { got: 10, min: 50 })));
        // L'échec n'affecte pas le modèle servi
        assert_eq!(p.confidence(), 0.0);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let kv: Arc<dyn KVStore> = Arc::new(crate::storage::MemoryKvStore::new());
        let p = HeuristicPredictor::new(10);
        p.fit(&separable_dataset(30)).await.unwrap();
        p.save(&kv).await.unwrap();

        let restored = HeuristicPredictor::new(10);
        assert!(restored.load(&kv).await.unwrap());
        assert!((restored.confidence() - p.confidence()).abs() < 1e-6);
        assert!((restored.predict(&[0.9, 0.1]) - p.predict(&[0.9, 0.1])).abs() < 1e-6);
    }
}
