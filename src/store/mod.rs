//! Coverage store: persisted services, instrumentation state, broken-trace
//! candidates, and the sync run log.
//!
//! Write operations that touch more than one row are atomic per call: either
//! every row lands or none does. The sync run log is the exception by design;
//! its rows commit independently so a failed stage still leaves a failure
//! record behind.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

pub mod entities;
pub mod mock;
pub mod schema;
pub mod sqlite;

pub use entities::{
    BrokenTraceCandidate, CatalogEntry, CoverageUpdate, Infrastructure, InstrumentationStatus,
    Service, SyncRun, SyncStage, SyncStatus, TelemetryEntry, TelemetryObservation,
};
pub use sqlite::SqliteCoverageStore;

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("sync run not found: {0}")]
    RunNotFound(i64),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence boundary for the sync pipeline and the read-side queries.
#[async_trait]
pub trait CoverageStore: Send + Sync {
    /// Upsert the full catalog sweep in one transaction. Fields present in the
    /// new entries always win; `created_at` survives, `updated_at` is bumped.
    async fn upsert_services(&self, entries: &[CatalogEntry]) -> Result<()>;

    /// Apply a reconciled coverage sweep in one transaction. A `None`
    /// observation forces `instrumented = false` without clearing the
    /// previously observed language or last-seen timestamp.
    async fn apply_coverage(&self, updates: &[CoverageUpdate]) -> Result<()>;

    /// Discard all prior candidates and insert the replacement set, in one
    /// transaction. An empty slice clears the table.
    async fn replace_candidates(&self, candidates: &[BrokenTraceCandidate]) -> Result<()>;

    /// Insert a Running sync run row, returning its id. Commits immediately.
    async fn open_run(&self, stage: SyncStage) -> Result<i64>;

    /// Finalize a sync run row. Commits independently of any rolled-back
    /// stage writes.
    async fn finish_run(
        &self,
        id: i64,
        status: SyncStatus,
        records_processed: i64,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// All known services, ordered by name.
    async fn all_services(&self) -> Result<Vec<Service>>;

    /// One service by name.
    async fn service(&self, name: &str) -> Result<Option<Service>>;

    /// All instrumentation status rows, ordered by service name.
    async fn all_statuses(&self) -> Result<Vec<InstrumentationStatus>>;

    /// One status row by service name.
    async fn status(&self, service_name: &str) -> Result<Option<InstrumentationStatus>>;

    /// All candidates, most recent analysis first, keyed order within a run.
    async fn all_candidates(&self) -> Result<Vec<BrokenTraceCandidate>>;

    /// Page of candidates, most recent analysis first.
    async fn recent_candidates(&self, limit: u64, offset: u64)
        -> Result<Vec<BrokenTraceCandidate>>;

    /// One candidate by its deterministic key.
    async fn candidate(&self, trace_key: &str) -> Result<Option<BrokenTraceCandidate>>;

    /// Most recent completed run for a stage, if any.
    async fn latest_completed_run(&self, stage: SyncStage) -> Result<Option<SyncRun>>;

    /// Most recent runs across all stages, newest first.
    async fn recent_runs(&self, limit: u64) -> Result<Vec<SyncRun>>;
}

/// Open the SQLite-backed store at the configured path and create the schema.
pub async fn init_store(path: &str) -> Result<Arc<dyn CoverageStore>> {
    info!(path = %path, "opening coverage store");
    let store = SqliteCoverageStore::connect(path).await?;
    Ok(Arc::new(store))
}
