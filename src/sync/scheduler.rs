//! Periodic sync scheduler.
//!
//! One timer per process: `start` is idempotent and `stop` aborts the timer
//! task, allowing a later restart. Scheduled-run failures are logged and
//! never propagated; the run log is the only record of them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{RunOrchestrator, SyncError};

pub struct SyncScheduler {
    orchestrator: Arc<RunOrchestrator>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<RunOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            handle: Mutex::new(None),
        }
    }

    /// Start the periodic timer. No-op if already running.
    ///
    /// The first tick fires one interval after start, not immediately.
    pub fn start(&self) {
        let mut handle = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            info!("sync scheduler already running");
            return;
        }

        let orchestrator = self.orchestrator.clone();
        let period = self.interval;
        info!(interval_secs = period.as_secs(), "sync scheduler started");
        *handle = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                match orchestrator.run_full_sync().await {
                    Ok(outcome) => info!(message = %outcome.message(), "scheduled sync finished"),
                    Err(SyncError::SyncInFlight) => {
                        info!("scheduled sync skipped; another run is in flight")
                    }
                    Err(err) => error!(error = %err, "scheduled sync failed"),
                }
            }
        }));
    }

    /// Stop the timer. Safe to call when not running; `start` may follow.
    pub fn stop(&self) {
        let mut handle = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = handle.take() {
            task.abort();
            info!("sync scheduler stopped");
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
