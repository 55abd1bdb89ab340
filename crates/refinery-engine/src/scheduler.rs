//! Interval-based periodic task scheduling for reconciliation sweeps and
//! cache-refresh background loops.
//!
//! Deliberately only supports fixed-interval scheduling, not cron
//! expressions — nothing in this pipeline needs calendar-aware timing, and a
//! cron parser would be a dependency with no caller.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Runs a closure on a fixed interval until its shutdown signal fires.
pub struct IntervalScheduler {
    shutdown_tx: broadcast::Sender<()>,
}

impl IntervalScheduler {
    /// Creates a scheduler with no tasks yet registered.
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Spawns `task` to run every `period`, starting after the first tick.
    /// Returns a handle the caller can `.await` on shutdown to ensure the
    /// last iteration finished cleanly.
    pub fn spawn<F, Fut>(&self, name: &'static str, period: Duration, mut task: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        task().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(task = name, "scheduled task stopping on shutdown signal");
                        break;
                    }
                }
            }
        })
    }

    /// Signals every spawned task to stop after its current iteration.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn spawned_task_runs_repeatedly_until_shutdown() {
        let scheduler = IntervalScheduler::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let handle = scheduler.spawn("test-task", Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.shutdown();
        handle.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
