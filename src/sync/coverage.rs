//! Coverage synchronizer.
//!
//! Reconciles the instrumentation status of every cataloged service against
//! the telemetry observed in the lookback window. Services present in the
//! window get a full observation upsert; services absent from it are marked
//! uninstrumented explicitly, so a service whose telemetry goes silent flips
//! back to `instrumented = false` on the next run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::{record_run, SyncError};
use crate::gateway::TelemetryGateway;
use crate::store::{CoverageStore, CoverageUpdate, SyncStage, TelemetryEntry};

pub struct CoverageSynchronizer {
    gateway: Arc<dyn TelemetryGateway>,
    store: Arc<dyn CoverageStore>,
    window: Duration,
}

impl CoverageSynchronizer {
    pub fn new(
        gateway: Arc<dyn TelemetryGateway>,
        store: Arc<dyn CoverageStore>,
        window: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            window,
        }
    }

    /// Reconcile instrumentation status for every known service.
    ///
    /// Telemetry is fetched in full before any write; the resulting update
    /// batch covers the entire catalog, applied in one atomic store call.
    /// Returns the number of services reconciled.
    pub async fn sync(&self) -> Result<u64, SyncError> {
        record_run(self.store.as_ref(), SyncStage::Coverage, || async {
            let telemetry = self.gateway.fetch_instrumented_services(self.window).await?;
            let observed = dedup_by_service(telemetry);

            let services = self.store.all_services().await?;
            let mut updates = Vec::with_capacity(services.len());
            let mut downgraded = 0usize;
            for service in &services {
                match observed.get(&service.name) {
                    Some(entry) => updates.push(CoverageUpdate::observed(entry)),
                    None => {
                        downgraded += 1;
                        updates.push(CoverageUpdate::negative(&service.name));
                    }
                }
            }

            if downgraded == services.len() && !services.is_empty() {
                warn!(
                    services = services.len(),
                    "no cataloged service reported telemetry in the window"
                );
            }

            self.store.apply_coverage(&updates).await?;

            info!(
                reconciled = updates.len(),
                instrumented = updates.len() - downgraded,
                "coverage sync completed"
            );
            Ok(updates.len() as u64)
        })
        .await
    }
}

/// Collapse telemetry rows onto one entry per service, first occurrence wins.
fn dedup_by_service(entries: Vec<TelemetryEntry>) -> HashMap<String, TelemetryEntry> {
    let mut by_service = HashMap::with_capacity(entries.len());
    for entry in entries {
        by_service
            .entry(entry.service_name.clone())
            .or_insert(entry);
    }
    by_service
}
