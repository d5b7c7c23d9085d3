//! Full-sync orchestrator.
//!
//! Runs the three stages strictly in order: catalog, coverage, trace
//! analysis. The first stage failure aborts the rest of the run; each stage
//! still logs its own `SyncRun` row. A single-flight flag keeps at most one
//! full sync in flight per process, covering both the periodic timer and
//! on-demand triggers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{BrokenTraceAnalyzer, CatalogSynchronizer, CoverageSynchronizer, SyncError};
use crate::config::SyncConfig;
use crate::gateway::TelemetryGateway;
use crate::store::CoverageStore;

/// Counts reported by a completed full sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub services_cataloged: u64,
    pub services_reconciled: u64,
    pub candidates_created: u64,
}

impl SyncOutcome {
    /// Human-readable summary for on-demand triggers.
    pub fn message(&self) -> String {
        format!(
            "sync completed: {} services cataloged, {} reconciled, {} broken-trace candidates",
            self.services_cataloged, self.services_reconciled, self.candidates_created
        )
    }
}

pub struct RunOrchestrator {
    catalog: CatalogSynchronizer,
    coverage: CoverageSynchronizer,
    analyzer: BrokenTraceAnalyzer,
    in_flight: AtomicBool,
}

/// Releases the single-flight flag when the run ends, on any path out.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RunOrchestrator {
    pub fn new(
        gateway: Arc<dyn TelemetryGateway>,
        store: Arc<dyn CoverageStore>,
        sync: &SyncConfig,
    ) -> Self {
        let window = Duration::from_secs(sync.telemetry_window_hours * 3600);
        Self {
            catalog: CatalogSynchronizer::new(gateway.clone(), store.clone()),
            coverage: CoverageSynchronizer::new(gateway.clone(), store.clone(), window),
            analyzer: BrokenTraceAnalyzer::new(gateway, store, sync.candidate_cap),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run the full pipeline once.
    ///
    /// Returns `SyncError::SyncInFlight` without side effects when another
    /// run holds the flag.
    pub async fn run_full_sync(&self) -> Result<SyncOutcome, SyncError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::SyncInFlight);
        }
        let _guard = FlightGuard(&self.in_flight);

        info!("full sync started");
        let services_cataloged = self.catalog.sync().await?;
        let services_reconciled = self.coverage.sync().await?;
        let candidates_created = self.analyzer.analyze().await?;

        let outcome = SyncOutcome {
            services_cataloged,
            services_reconciled,
            candidates_created,
        };
        info!(
            cataloged = outcome.services_cataloged,
            reconciled = outcome.services_reconciled,
            candidates = outcome.candidates_created,
            "full sync completed"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::gateway::MockGateway;
    use crate::store::entities::{CatalogEntry, Infrastructure, TelemetryEntry};
    use crate::store::mock::MockCoverageStore;
    use crate::store::{SyncStage, SyncStatus};

    fn catalog_entry(name: &str, customer_facing: bool) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            tags: BTreeMap::new(),
            team: None,
            environment: None,
            infrastructure: Infrastructure::Unknown,
            customer_facing,
            last_seen: Utc::now(),
        }
    }

    fn sync_config() -> SyncConfig {
        SyncConfig {
            interval_minutes: 15,
            telemetry_window_hours: 24,
            candidate_cap: 100,
            services_per_page: 50,
            traces_per_page: 25,
        }
    }

    #[tokio::test]
    async fn runs_all_three_stages_in_order() {
        let gateway = Arc::new(MockGateway::new());
        gateway
            .set_catalog(vec![
                catalog_entry("front", true),
                catalog_entry("back", false),
            ])
            .await;
        gateway
            .set_telemetry(vec![TelemetryEntry {
                service_name: "back".into(),
                language: Some("rust".into()),
                last_seen: Utc::now(),
                span_count_24h: 7,
            }])
            .await;
        let store = Arc::new(MockCoverageStore::new());

        let orchestrator = RunOrchestrator::new(gateway, store.clone(), &sync_config());
        let outcome = orchestrator.run_full_sync().await.unwrap();

        assert_eq!(outcome.services_cataloged, 2);
        assert_eq!(outcome.services_reconciled, 2);
        assert_eq!(outcome.candidates_created, 1);

        let stages: Vec<SyncStage> = store.runs().await.iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            vec![SyncStage::Catalog, SyncStage::Coverage, SyncStage::TraceAnalysis]
        );
    }

    #[tokio::test]
    async fn aborts_remaining_stages_on_first_failure() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_catalog(vec![catalog_entry("a", false)]).await;
        gateway.set_fail_telemetry(true).await;
        let store = Arc::new(MockCoverageStore::new());

        let orchestrator = RunOrchestrator::new(gateway, store.clone(), &sync_config());
        let err = orchestrator.run_full_sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Gateway(_)));

        let runs = store.runs().await;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, SyncStatus::Completed);
        assert_eq!(runs[1].stage, SyncStage::Coverage);
        assert_eq!(runs[1].status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn concurrent_runs_are_rejected_by_single_flight() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_catalog(vec![catalog_entry("a", false)]).await;
        gateway
            .set_catalog_delay(Duration::from_millis(100))
            .await;
        let store = Arc::new(MockCoverageStore::new());

        let orchestrator =
            Arc::new(RunOrchestrator::new(gateway, store.clone(), &sync_config()));
        let first = orchestrator.clone();
        let second = orchestrator.clone();
        let (a, b) = tokio::join!(
            async move { first.run_full_sync().await },
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                second.run_full_sync().await
            }
        );

        assert!(a.is_ok());
        assert!(matches!(b, Err(SyncError::SyncInFlight)));
        // The rejected run logged nothing.
        assert_eq!(store.runs().await.len(), 3);
    }

    #[tokio::test]
    async fn flag_is_released_after_failure() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_fail_catalog(true).await;
        let store = Arc::new(MockCoverageStore::new());

        let orchestrator = RunOrchestrator::new(gateway.clone(), store, &sync_config());
        assert!(orchestrator.run_full_sync().await.is_err());

        gateway.set_fail_catalog(false).await;
        assert!(orchestrator.run_full_sync().await.is_ok());
    }
}
