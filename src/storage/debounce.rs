/// Débouncing des écritures
///
/// Au plus un timer par store: le premier `schedule` arme le timer, les
/// suivants sont absorbés jusqu'au flush.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Debouncer {
    delay: Duration,
    armed: Arc<AtomicBool>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Programme `flush` après la fenêtre de debounce
    ///
    /// No-op si un timer est déjà armé.
    pub fn schedule<F, Fut>(&self, flush: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        if self.armed.swap(true, Ordering::SeqCst) {
            return; // timer déjà armé
        }
        let armed = self.armed.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            armed.store(false, Ordering::SeqCst);
            flush().await;
        });
    }

    /// Désarme le timer en cours (le flush programmé devient sans objet
    /// si l'appelant a déjà vidé l'état sale)
    pub fn cancel(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_multiple_schedules_one_flush() {
        let debouncer = Debouncer::new(Duration::from_millis(30));
        let flushes = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let flushes = flushes.clone();
            debouncer.schedule(move || async move {
                flushes.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_armed());
    }

    #[tokio::test]
    async fn test_rearm_after_flush() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        let flushes = Arc::new(AtomicUsize::new(0));
        let f1 = flushes.clone();
        debouncer.schedule(move || async move {
            f1.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let f2 = flushes.clone();
        debouncer.schedule(move || async move {
            f2.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(flushes.load(Ordering::SeqCst), 2);
    }
}
