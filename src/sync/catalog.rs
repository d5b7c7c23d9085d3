//! Catalog synchronizer.
//!
//! Full-sweep upsert of the remote service catalog into the coverage store.
//! Every sync rewrites every service row (O(n) per run); fields from the new
//! definition always win. Services that drop out of the catalog are kept,
//! with their `last_seen_catalog` left to age.

use std::sync::Arc;

use tracing::info;

use super::{record_run, SyncError};
use crate::gateway::TelemetryGateway;
use crate::store::{CoverageStore, SyncStage};

pub struct CatalogSynchronizer {
    gateway: Arc<dyn TelemetryGateway>,
    store: Arc<dyn CoverageStore>,
}

impl CatalogSynchronizer {
    pub fn new(gateway: Arc<dyn TelemetryGateway>, store: Arc<dyn CoverageStore>) -> Self {
        Self { gateway, store }
    }

    /// Pull the full catalog and upsert every service, atomically per run.
    ///
    /// The pagination walk completes before any write, so a gateway failure
    /// on a later page leaves the store untouched. Returns the number of
    /// services processed.
    pub async fn sync(&self) -> Result<u64, SyncError> {
        record_run(self.store.as_ref(), SyncStage::Catalog, || async {
            let entries = self.gateway.fetch_catalog().await?;
            self.store.upsert_services(&entries).await?;

            info!(services = entries.len(), "catalog sync completed");
            Ok(entries.len() as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::gateway::MockGateway;
    use crate::store::entities::{CatalogEntry, Infrastructure};
    use crate::store::mock::MockCoverageStore;
    use crate::store::{StoreError, SyncStatus};

    fn entry(name: &str) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            tags: BTreeMap::new(),
            team: None,
            environment: None,
            infrastructure: Infrastructure::Unknown,
            customer_facing: false,
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sync_upserts_and_records_completed_run() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_catalog(vec![entry("a"), entry("b")]).await;
        let store = Arc::new(MockCoverageStore::new());

        let synchronizer = CatalogSynchronizer::new(gateway, store.clone());
        let count = synchronizer.sync().await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(store.all_services().await.unwrap().len(), 2);

        let runs = store.runs().await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].stage, SyncStage::Catalog);
        assert_eq!(runs[0].status, SyncStatus::Completed);
        assert_eq!(runs[0].records_processed, 2);
    }

    #[tokio::test]
    async fn gateway_failure_leaves_store_untouched_and_marks_run_failed() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_fail_catalog(true).await;
        let store = Arc::new(MockCoverageStore::new());

        let synchronizer = CatalogSynchronizer::new(gateway, store.clone());
        let err = synchronizer.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Gateway(_)));

        assert!(store.all_services().await.unwrap().is_empty());
        let runs = store.runs().await;
        assert_eq!(runs[0].status, SyncStatus::Failed);
        assert!(runs[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("injected catalog failure"));
    }

    #[tokio::test]
    async fn store_failure_propagates_as_persistence_error() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_catalog(vec![entry("a")]).await;
        let store = Arc::new(MockCoverageStore::new());
        store.set_fail_on_write(true).await;

        let synchronizer = CatalogSynchronizer::new(gateway, store.clone());
        let err = synchronizer.sync().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Store(StoreError::Unavailable(_))
        ));
        assert_eq!(store.runs().await[0].status, SyncStatus::Failed);
    }
}
