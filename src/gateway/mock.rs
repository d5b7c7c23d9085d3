//! Mock telemetry gateway for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{GatewayError, TelemetryGateway};
use crate::store::entities::{CatalogEntry, TelemetryEntry};

/// Gateway serving canned data, with per-call failure injection and an
/// optional artificial catalog latency for probing concurrent runs.
#[derive(Default)]
pub struct MockGateway {
    catalog: RwLock<Vec<CatalogEntry>>,
    telemetry: RwLock<Vec<TelemetryEntry>>,
    hints: RwLock<BTreeMap<String, BTreeSet<String>>>,
    fail_catalog: RwLock<bool>,
    fail_telemetry: RwLock<bool>,
    fail_hints: RwLock<bool>,
    catalog_delay: RwLock<Option<Duration>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_catalog(&self, entries: Vec<CatalogEntry>) {
        *self.catalog.write().await = entries;
    }

    pub async fn set_telemetry(&self, entries: Vec<TelemetryEntry>) {
        *self.telemetry.write().await = entries;
    }

    pub async fn set_hints(&self, hints: BTreeMap<String, BTreeSet<String>>) {
        *self.hints.write().await = hints;
    }

    pub async fn set_fail_catalog(&self, fail: bool) {
        *self.fail_catalog.write().await = fail;
    }

    pub async fn set_fail_telemetry(&self, fail: bool) {
        *self.fail_telemetry.write().await = fail;
    }

    pub async fn set_fail_hints(&self, fail: bool) {
        *self.fail_hints.write().await = fail;
    }

    /// Delay catalog fetches, keeping a full sync in flight long enough for
    /// a second trigger to observe it.
    pub async fn set_catalog_delay(&self, delay: Duration) {
        *self.catalog_delay.write().await = Some(delay);
    }
}

#[async_trait]
impl TelemetryGateway for MockGateway {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, GatewayError> {
        if let Some(delay) = *self.catalog_delay.read().await {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_catalog.read().await {
            return Err(GatewayError::RemoteUnavailable(
                "injected catalog failure".to_string(),
            ));
        }
        Ok(self.catalog.read().await.clone())
    }

    async fn fetch_instrumented_services(
        &self,
        _window: Duration,
    ) -> Result<Vec<TelemetryEntry>, GatewayError> {
        if *self.fail_telemetry.read().await {
            return Err(GatewayError::RemoteUnavailable(
                "injected telemetry failure".to_string(),
            ));
        }
        Ok(self.telemetry.read().await.clone())
    }

    async fn fetch_dependency_hints(
        &self,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, GatewayError> {
        if *self.fail_hints.read().await {
            return Err(GatewayError::RemoteUnavailable(
                "injected dependency hint failure".to_string(),
            ));
        }
        Ok(self.hints.read().await.clone())
    }
}
