//! tracegap-sync: APM coverage sync daemon
//!
//! Periodically pulls the service catalog and trace telemetry from Datadog,
//! reconciles per-service instrumentation coverage into SQLite, and rebuilds
//! the broken-trace candidate list. The store is read by an external
//! presentation layer; this process only writes.
//!
//! ## Configuration
//! - TRACEGAP_CONFIG: path to a YAML config file (optional; `config.yaml`
//!   in the working directory is read when present)
//! - DD_API_KEY / DD_APP_KEY / DD_SITE: Datadog credentials
//! - SYNC_INTERVAL_MINUTES: minutes between full syncs (default: 15)
//! - DATABASE_URL: SQLite path (default: data/tracegap.db)
//! - TRACEGAP_LOG: tracing filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tracegap::bootstrap::init_tracing;
use tracegap::config::Config;
use tracegap::gateway::DatadogGateway;
use tracegap::store::init_store;
use tracegap::sync::{RunOrchestrator, SyncScheduler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    info!(
        site = %config.datadog.site,
        db = %config.storage.path,
        interval_minutes = config.sync.interval_minutes,
        "starting tracegap-sync"
    );

    let store = init_store(&config.storage.path).await?;
    let gateway = Arc::new(DatadogGateway::new(&config.datadog)?);
    let orchestrator = Arc::new(RunOrchestrator::new(gateway, store, &config.sync));

    // First run fires immediately; the scheduler covers the steady state.
    if let Err(err) = orchestrator.run_full_sync().await {
        tracing::error!(error = %err, "initial sync failed; will retry on schedule");
    }

    let scheduler = SyncScheduler::new(
        orchestrator,
        Duration::from_secs(config.sync.interval_minutes * 60),
    );
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    scheduler.stop();

    Ok(())
}
