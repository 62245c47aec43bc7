/// Journal d'événements borné et extraction d'échantillons d'entraînement
///
/// Append-only avec plafond; au-delà, seule la tranche la plus récente est
/// conservée. Les listeners sont isolés: un listener qui panique ne casse
/// jamais l'append.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LearningConfig;
use crate::error::Result;
use crate::model::{EventContext, TrackRef, UserEvent};
use crate::storage::{keys, KVStore};

/// Échantillon d'entraînement extrait du journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSample {
    pub track: TrackRef,
    /// Vecteur de features, rempli par l'entraîneur avant le fit
    pub feature_vector: Vec<f32>,
    pub label: f32,  // 0.0 - 1.0
    pub weight: f32, // ≥ 0
    pub context: EventContext,
    pub timestamp: i64,
}

/// Métadonnées d'un dataset extrait
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub positive_count: usize,
    pub negative_count: usize,
    pub partial_count: usize,
    pub from_timestamp: Option<i64>,
    pub to_timestamp: Option<i64>,
    pub mean_label: f32,
}

/// Dataset en trois sacs: positifs, négatifs, partiels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingDataset {
    pub positives: Vec<TrainingSample>,
    pub negatives: Vec<TrainingSample>,
    pub partials: Vec<TrainingSample>,
    pub metadata: Option<DatasetMetadata>,
}

impl TrainingDataset {
    pub fn len(&self) -> usize {
        self.positives.len() + self.negatives.len() + self.partials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_samples(&self) -> impl Iterator<Item = &TrainingSample> {
        self.positives.iter().chain(self.negatives.iter()).chain(self.partials.iter())
    }
}

/// Options d'extraction du dataset
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub since: Option<i64>,
    pub until: Option<i64>,
    /// Complétion minimale pour qu'une écoute partielle entre au dataset
    pub min_completion: f32,
    pub balance_classes: bool,
    pub max_samples: Option<usize>,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            min_completion: 0.3,
            balance_classes: true,
            max_samples: None,
        }
    }
}

type Listener = Box<dyn Fn(&UserEvent) + Send + Sync>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecorderState {
    events: Vec<UserEvent>,
    last_training_at: i64,
    last_training_event_count: usize,
}

pub struct EventRecorder {
    config: LearningConfig,
    state: Mutex<RecorderState>,
    listeners: Mutex<Vec<Listener>>,
    kv: Option<Arc<dyn KVStore>>,
}

impl EventRecorder {
    pub fn new(config: LearningConfig, kv: Option<Arc<dyn KVStore>>) -> Self {
        Self {
            config,
            state: Mutex::new(RecorderState::default()),
            listeners: Mutex::new(Vec::new()),
            kv,
        }
    }

    /// Abonne un listener, appelé à chaque événement enregistré
    pub fn subscribe(&self, listener: impl Fn(&UserEvent) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Enregistre un événement
    ///
    /// Append, notification des listeners, auto-persistance tous les
    /// `autosave_every` événements.
    pub async fn record(&self, event: UserEvent) {
        let count = {
            let mut state = self.state.lock();
            state.events.push(event.clone());
            if state.events.len() > self.config.max_events {
                // Conservation de la tranche la plus récente
                let overflow = state.events.len() - self.config.max_events;
                state.events.drain(0..overflow);
            }
            state.events.len()
        };

        {
            let listeners = self.listeners.lock();
            for listener in listeners.iter() {
                if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                    warn!("Listener d'événement en panique, isolé");
                }
            }
        }

        if count % self.config.autosave_every == 0 {
            if let Err(e) = self.save().await {
                warn!("Auto-persistance du journal en échec: {}", e);
            }
        }
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn events_snapshot(&self) -> Vec<UserEvent> {
        self.state.lock().events.clone()
    }

    /// Marque la fin d'un entraînement réussi
    pub fn mark_trained(&self) {
        let mut state = self.state.lock();
        state.last_training_at = crate::model::now_ms();
        state.last_training_event_count = state.events.len();
    }

    pub fn events_since_last_training(&self) -> usize {
        let state = self.state.lock();
        state.events.len().saturating_sub(state.last_training_event_count)
    }

    /// Label gradué d'un skip, monotone croissant avec le pourcentage écouté
    pub fn graduated_skip_label(skip_percentage: f32) -> f32 {
        match skip_percentage {
            p if p < 0.10 => 0.0,
            p if p < 0.25 => 0.05,
            p if p < 0.50 => 0.15,
            p if p < 0.80 => 0.25,
            _ => 0.30,
        }
    }

    /// Extraction du dataset complet, avec équilibrage de classes optionnel
    pub fn get_full_dataset(&self, options: &DatasetOptions) -> TrainingDataset {
        let events = self.events_snapshot();
        let mut dataset = TrainingDataset::default();

        for event in &events {
            let ts = event.timestamp();
            if options.since.map(|s| ts < s).unwrap_or(false) {
                continue;
            }
            if options.until.map(|u| ts > u).unwrap_or(false) {
                continue;
            }
            match event {
                UserEvent::Listen { track, completion, completed, context, timestamp, .. } => {
                    if *completed {
                        dataset.positives.push(sample(track, 1.0, event.weight(), context, *timestamp));
                    } else if *completion >= options.min_completion {
                        dataset.partials.push(sample(track, *completion, event.weight(), context, *timestamp));
                    }
                }
                UserEvent::Skip { track, skip_percentage, context, timestamp, .. } => {
                    let label = Self::graduated_skip_label(*skip_percentage);
                    dataset.negatives.push(sample(track, label, event.weight(), context, *timestamp));
                }
                UserEvent::Dislike { track, reason, timestamp, .. } => {
                    let label = 0.2 * (1.0 - reason.weight());
                    dataset.negatives.push(sample(
                        track,
                        label,
                        event.weight(),
                        &EventContext::default(),
                        *timestamp,
                    ));
                }
                UserEvent::Like { track, strength, timestamp } => {
                    let label = if *strength >= 2 { 1.0 } else { 0.9 };
                    dataset.positives.push(sample(
                        track,
                        label,
                        event.weight(),
                        &EventContext::default(),
                        *timestamp,
                    ));
                }
                UserEvent::Queue { .. }
                | UserEvent::Playlist { .. }
                | UserEvent::Search { .. }
                | UserEvent::Download { .. } => {}
            }
        }

        if options.balance_classes {
            let target = dataset.positives.len().min(dataset.negatives.len());
            keep_most_recent(&mut dataset.positives, target);
            keep_most_recent(&mut dataset.negatives, target);
        }

        if let Some(max) = options.max_samples {
            let total = dataset.len();
            if total > max && total > 0 {
                // Sous-échantillonnage proportionnel des trois sacs
                let ratio = max as f32 / total as f32;
                let keep_pos = (dataset.positives.len() as f32 * ratio).floor() as usize;
                let keep_neg = (dataset.negatives.len() as f32 * ratio).floor() as usize;
                let keep_part = (dataset.partials.len() as f32 * ratio).floor() as usize;
                keep_most_recent(&mut dataset.positives, keep_pos);
                keep_most_recent(&mut dataset.negatives, keep_neg);
                keep_most_recent(&mut dataset.partials, keep_part);
            }
        }

        let total = dataset.len();
        let label_sum: f32 = dataset.all_samples().map(|s| s.label).sum();
        dataset.metadata = Some(DatasetMetadata {
            positive_count: dataset.positives.len(),
            negative_count: dataset.negatives.len(),
            partial_count: dataset.partials.len(),
            from_timestamp: dataset.all_samples().map(|s| s.timestamp).min(),
            to_timestamp: dataset.all_samples().map(|s| s.timestamp).max(),
            mean_label: if total > 0 { label_sum / total as f32 } else { 0.0 },
        });
        debug!(
            "Dataset extrait: {} positifs, {} négatifs, {} partiels",
            dataset.positives.len(),
            dataset.negatives.len(),
            dataset.partials.len()
        );
        dataset
    }

    /// Persistance JSON sous `audiio-ml-events`
    pub async fn save(&self) -> Result<()> {
        let Some(kv) = &self.kv else {
            return Ok(());
        };
        let payload = {
            let state = self.state.lock();
            serde_json::to_string(&*state)?
        };
        kv.set(keys::EVENTS, payload).await
    }

    pub async fn load(&self) -> Result<usize> {
        let Some(kv) = &self.kv else {
            return Ok(0);
        };
        let Some(raw) = kv.get(keys::EVENTS).await? else {
            return Ok(0);
        };
        match serde_json::from_str::<RecorderState>(&raw) {
            Ok(loaded) => {
                let count = loaded.events.len();
                *self.state.lock() = loaded;
                Ok(count)
            }
            Err(e) => {
                warn!("Journal d'événements illisible, repart de zéro: {}", e);
                Ok(0)
            }
        }
    }
}

fn sample(
    track: &TrackRef,
    label: f32,
    weight: f32,
    context: &EventContext,
    timestamp: i64,
) -> TrainingSample {
    TrainingSample {
        track: track.clone(),
        feature_vector: Vec::new(),
        label: label.clamp(0.0, 1.0),
        weight: weight.max(0.0),
        context: context.clone(),
        timestamp,
    }
}

fn keep_most_recent(samples: &mut Vec<TrainingSample>, target: usize) {
    if samples.len() <= target {
        return;
    }
    samples.sort_by_key(|s| std::cmp::Reverse(s.timestamp));
    samples.truncate(target);
    samples.sort_by_key(|s| s.timestamp);
}
