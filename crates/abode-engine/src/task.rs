use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A job that runs on a fixed period and never overlaps itself.
///
/// The same guard covers timer-driven runs and on-demand calls through
/// [`PeriodicTask::try_run`].
pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
    guard: Mutex<()>,
}

impl PeriodicTask {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            guard: Mutex::new(()),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs `job` unless a run is already in flight, in which case `None`.
    pub async fn try_run<F, Fut, T>(&self, job: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Ok(_running) = self.guard.try_lock() else {
            debug!("{}: previous run still in flight, skipping", self.name);
            return None;
        };
        Some(job().await)
    }

    /// Ticks until `shutdown` is cancelled. The first tick fires immediately.
    /// A run in progress is allowed to finish before the loop exits.
    pub fn spawn<F, Fut>(self: Arc<Self>, shutdown: CancellationToken, job: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            info!("{} started, period {:?}", self.name, self.period);
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.try_run(&job).await;
                    }
                }
            }

            info!("{} stopped", self.name);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn overlapping_run_is_skipped() {
        let task = Arc::new(PeriodicTask::new("test", Duration::from_secs(300)));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

        let first = {
            let task = task.clone();
            tokio::spawn(async move {
                task.try_run(|| async move {
                    started_tx.send(()).unwrap();
                    release_rx.await.unwrap();
                    1
                })
                .await
            })
        };

        started_rx.await.unwrap();
        assert_eq!(task.try_run(|| async { 2 }).await, None);

        release_tx.send(()).unwrap();
        assert_eq!(first.await.unwrap(), Some(1));
        assert_eq!(task.try_run(|| async { 3 }).await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_until_cancelled() {
        let task = Arc::new(PeriodicTask::new("test", Duration::from_secs(300)));
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = runs.clone();
        let handle = task.clone().spawn(shutdown.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Immediate tick plus two full periods.
        tokio::time::sleep(Duration::from_secs(601)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
