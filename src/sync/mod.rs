//! Synchronization pipeline: catalog sync, coverage reconciliation and
//! broken-trace analysis, sequenced by the orchestrator and fired by the
//! scheduler.
//!
//! Each stage logs exactly one `SyncRun` row: opened Running before the work,
//! finalized Completed or Failed after. The failure marker commits even when
//! the stage's substantive writes roll back. No stage retries; a failed stage
//! waits for the next scheduled tick or a manual trigger.

use std::future::Future;

use tracing::error;

use crate::gateway::GatewayError;
use crate::store::{CoverageStore, StoreError, SyncStage, SyncStatus};

pub mod analyzer;
pub mod catalog;
pub mod coverage;
pub mod orchestrator;
pub mod scheduler;

pub use analyzer::BrokenTraceAnalyzer;
pub use catalog::CatalogSynchronizer;
pub use coverage::CoverageSynchronizer;
pub use orchestrator::{RunOrchestrator, SyncOutcome};
pub use scheduler::SyncScheduler;

/// Stage-level sync errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("remote gateway failure: {0}")]
    Gateway(#[from] GatewayError),

    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),

    /// A full sync is already in flight; at most one runs at a time.
    #[error("a full sync is already in flight")]
    SyncInFlight,
}

/// Run one stage under sync-run bookkeeping.
///
/// Opens a Running row, runs `op`, then finalizes the row with the outcome.
/// A failure while recording the failure itself is logged, not propagated,
/// so the original stage error survives.
pub(crate) async fn record_run<F, Fut>(
    store: &dyn CoverageStore,
    stage: SyncStage,
    op: F,
) -> Result<u64, SyncError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<u64, SyncError>>,
{
    let run_id = store.open_run(stage).await?;

    match op().await {
        Ok(count) => {
            store
                .finish_run(run_id, SyncStatus::Completed, count as i64, None)
                .await?;
            Ok(count)
        }
        Err(e) => {
            if let Err(mark_err) = store
                .finish_run(run_id, SyncStatus::Failed, 0, Some(&e.to_string()))
                .await
            {
                error!(
                    stage = %stage,
                    run_id,
                    error = %mark_err,
                    "failed to record sync run failure"
                );
            }
            Err(e)
        }
    }
}
