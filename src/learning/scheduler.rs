/// Scheduler de réentraînement
///
/// Déclenchement par nombre d'événements + intervalle minimal, par appel
/// explicite, ou par détection d'inactivité. Les erreurs du callback
/// d'entraînement sont attrapées et logguées; l'état reste exécutable.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;

/// Callback d'entraînement installé par l'orchestrateur
pub type TrainFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct SchedulerInner {
    config: SchedulerConfig,
    train_fn: Mutex<Option<TrainFn>>,
    running: AtomicBool,
    /// Au plus une exécution programmée à la fois
    pending: Mutex<Option<JoinHandle<()>>>,
    last_train: Mutex<Option<Instant>>,
    last_event_count: AtomicUsize,
    last_activity: Mutex<Instant>,
    idle_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct TrainingScheduler {
    inner: Arc<SchedulerInner>,
}

impl TrainingScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                train_fn: Mutex::new(None),
                running: AtomicBool::new(false),
                pending: Mutex::new(None),
                last_train: Mutex::new(None),
                last_event_count: AtomicUsize::new(0),
                last_activity: Mutex::new(Instant::now()),
                idle_task: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Installe le callback et passe en état `running`
    pub fn start(&self, train_fn: TrainFn) {
        *self.inner.train_fn.lock() = Some(train_fn);
        self.inner.running.store(true, Ordering::SeqCst);
        if self.inner.config.idle_detection {
            self.spawn_idle_loop();
        }
        info!("Scheduler d'entraînement démarré");
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.pending.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.idle_task.lock().take() {
            handle.abort();
        }
        info!("Scheduler d'entraînement arrêté");
    }

    /// Signale une activité utilisateur (réinitialise l'horloge idle)
    pub fn notify_activity(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    /// Appelé après chaque événement enregistré
    ///
    /// Conditions réunies (assez d'événements et intervalle écoulé):
    /// exécution à court délai. Assez d'événements mais intervalle en
    /// cours: exécution à la fin de l'intervalle. Sinon: no-op.
    pub fn check_and_schedule(&self, current_event_count: usize) {
        if !self.is_running() {
            return;
        }
        let new_events =
            current_event_count.saturating_sub(self.inner.last_event_count.load(Ordering::SeqCst));
        if new_events < self.inner.config.min_new_events {
            return;
        }
        let last_train = *self.inner.last_train.lock();
        let elapsed = last_train.map(|t| t.elapsed());
        let delay = match elapsed {
            Some(elapsed) if elapsed < self.inner.config.min_interval => {
                self.inner.config.min_interval - elapsed
            }
            _ => self.inner.config.short_fuse,
        };
        debug!(
            "Entraînement programmé dans {:?} ({} nouveaux événements)",
            delay, new_events
        );
        let inner = self.inner.clone();
        let mut pending = self.inner.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run_training(&inner, current_event_count).await;
        }));
    }

    /// Annule toute exécution programmée et entraîne immédiatement
    pub async fn train_now(&self, current_event_count: usize) {
        if let Some(pending) = self.inner.pending.lock().take() {
            pending.abort();
        }
        run_training(&self.inner, current_event_count).await;
    }

    fn spawn_idle_loop(&self) {
        let inner = self.inner.clone();
        let mut guard = self.inner.idle_task.lock();
        if guard.is_some() {
            return;
        }
        *guard = Some(tokio::spawn(async move {
            let tick = inner.config.idle_threshold / 4;
            let mut interval = tokio::time::interval(tick.max(std::time::Duration::from_millis(50)));
            loop {
                interval.tick().await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                let idle_for = inner.last_activity.lock().elapsed();
                if idle_for >= inner.config.idle_threshold {
                    debug!("Inactivité détectée ({:?}), entraînement opportuniste", idle_for);
                    let count = inner.last_event_count.load(Ordering::SeqCst);
                    run_training(&inner, count).await;
                    // Évite un redéclenchement immédiat
                    *inner.last_activity.lock() = Instant::now();
                }
            }
        }));
    }
}

async fn run_training(inner: &Arc<SchedulerInner>, event_count: usize) {
    if !inner.running.load(Ordering::SeqCst) {
        return;
    }
    let Some(train_fn) = inner.train_fn.lock().clone() else {
        return;
    };
    *inner.last_train.lock() = Some(Instant::now());
    inner.last_event_count.store(event_count, Ordering::SeqCst);
    match train_fn().await {
        Ok(()) => debug!("Entraînement terminé"),
        Err(e) => warn!("Entraînement en échec (le scheduler continue): {}", e),
    }
}
