//! Background garbage collection

use crate::store::PersistentStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Periodically sweeps a [`PersistentStore`]
pub struct GarbageCollector {
    store: Arc<PersistentStore>,
    interval: Duration,
}

impl GarbageCollector {
    /// Create a collector using the store's configured interval
    pub fn new(store: Arc<PersistentStore>) -> Self {
        let interval = store.options().gc_interval;
        Self { store, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start sweeping on the current tokio runtime
    ///
    /// The first sweep runs one interval after spawning.
    pub fn spawn(self) -> GcHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        GcHandle { shutdown, task }
    }

    async fn run(self, shutdown: CancellationToken) {
        // tokio rejects a zero period
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = period.as_secs_f64(), "Garbage collector started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.store.sweep().await;
                    if report.failed > 0 {
                        warn!(failed = report.failed, "Sweep incomplete, retrying next interval");
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }

        info!("Garbage collector stopped");
    }
}

/// Handle to a running [`GarbageCollector`]
pub struct GcHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl GcHandle {
    /// Stop the collector, letting an in-flight sweep finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Garbage collector task failed");
        }
    }

    /// Signal the collector to stop without waiting for it
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
