//! In-memory coverage store for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::entities::{
    BrokenTraceCandidate, CatalogEntry, CoverageUpdate, InstrumentationStatus, Service, SyncRun,
    SyncStage, SyncStatus,
};
use super::{CoverageStore, Result, StoreError};

/// Mock store backed by in-memory maps, with write/read failure injection.
#[derive(Default)]
pub struct MockCoverageStore {
    services: RwLock<BTreeMap<String, Service>>,
    statuses: RwLock<BTreeMap<String, InstrumentationStatus>>,
    candidates: RwLock<Vec<BrokenTraceCandidate>>,
    runs: RwLock<Vec<SyncRun>>,
    fail_on_write: RwLock<bool>,
    fail_on_read: RwLock<bool>,
}

impl MockCoverageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next bulk writes fail with `StoreError::Unavailable`. Run-log
    /// writes are unaffected, mirroring the real store where the failure
    /// marker commits outside the stage transaction.
    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }

    /// All recorded runs, oldest first.
    pub async fn runs(&self) -> Vec<SyncRun> {
        self.runs.read().await.clone()
    }

    async fn check_write(&self) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    async fn check_read(&self) -> Result<()> {
        if *self.fail_on_read.read().await {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CoverageStore for MockCoverageStore {
    async fn upsert_services(&self, entries: &[CatalogEntry]) -> Result<()> {
        self.check_write().await?;
        let now = Utc::now();
        let mut services = self.services.write().await;
        for entry in entries {
            match services.get_mut(&entry.name) {
                Some(existing) => {
                    existing.tags = entry.tags.clone();
                    existing.team = entry.team.clone();
                    existing.environment = entry.environment.clone();
                    existing.infrastructure = entry.infrastructure;
                    existing.customer_facing = entry.customer_facing;
                    existing.last_seen_catalog = entry.last_seen;
                    existing.updated_at = now;
                }
                None => {
                    services.insert(
                        entry.name.clone(),
                        Service {
                            name: entry.name.clone(),
                            tags: entry.tags.clone(),
                            team: entry.team.clone(),
                            environment: entry.environment.clone(),
                            infrastructure: entry.infrastructure,
                            customer_facing: entry.customer_facing,
                            last_seen_catalog: entry.last_seen,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn apply_coverage(&self, updates: &[CoverageUpdate]) -> Result<()> {
        self.check_write().await?;
        let now = Utc::now();
        let mut statuses = self.statuses.write().await;
        for update in updates {
            let status = statuses
                .entry(update.service_name.clone())
                .or_insert_with(|| InstrumentationStatus {
                    service_name: update.service_name.clone(),
                    instrumented: false,
                    language: None,
                    last_seen_telemetry: None,
                    span_count_24h: 0,
                    created_at: now,
                    updated_at: now,
                });
            match &update.observation {
                Some(obs) => {
                    status.instrumented = true;
                    status.language = obs.language.clone();
                    status.last_seen_telemetry = Some(obs.last_seen);
                    status.span_count_24h = obs.span_count_24h;
                }
                None => {
                    status.instrumented = false;
                }
            }
            status.updated_at = now;
        }
        Ok(())
    }

    async fn replace_candidates(&self, candidates: &[BrokenTraceCandidate]) -> Result<()> {
        self.check_write().await?;
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| {
            b.analyzed_at
                .cmp(&a.analyzed_at)
                .then_with(|| a.trace_key.cmp(&b.trace_key))
        });
        *self.candidates.write().await = sorted;
        Ok(())
    }

    async fn open_run(&self, stage: SyncStage) -> Result<i64> {
        let mut runs = self.runs.write().await;
        let id = runs.len() as i64 + 1;
        runs.push(SyncRun {
            id,
            stage,
            status: SyncStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            records_processed: 0,
            error_message: None,
        });
        Ok(id)
    }

    async fn finish_run(
        &self,
        id: i64,
        status: SyncStatus,
        records_processed: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::RunNotFound(id))?;
        run.status = status;
        run.completed_at = Some(Utc::now());
        run.records_processed = records_processed;
        run.error_message = error_message.map(str::to_string);
        Ok(())
    }

    async fn all_services(&self) -> Result<Vec<Service>> {
        self.check_read().await?;
        Ok(self.services.read().await.values().cloned().collect())
    }

    async fn service(&self, name: &str) -> Result<Option<Service>> {
        self.check_read().await?;
        Ok(self.services.read().await.get(name).cloned())
    }

    async fn all_statuses(&self) -> Result<Vec<InstrumentationStatus>> {
        self.check_read().await?;
        Ok(self.statuses.read().await.values().cloned().collect())
    }

    async fn status(&self, service_name: &str) -> Result<Option<InstrumentationStatus>> {
        self.check_read().await?;
        Ok(self.statuses.read().await.get(service_name).cloned())
    }

    async fn all_candidates(&self) -> Result<Vec<BrokenTraceCandidate>> {
        self.check_read().await?;
        Ok(self.candidates.read().await.clone())
    }

    async fn recent_candidates(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<BrokenTraceCandidate>> {
        self.check_read().await?;
        Ok(self
            .candidates
            .read()
            .await
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn candidate(&self, trace_key: &str) -> Result<Option<BrokenTraceCandidate>> {
        self.check_read().await?;
        Ok(self
            .candidates
            .read()
            .await
            .iter()
            .find(|c| c.trace_key == trace_key)
            .cloned())
    }

    async fn latest_completed_run(&self, stage: SyncStage) -> Result<Option<SyncRun>> {
        self.check_read().await?;
        Ok(self
            .runs
            .read()
            .await
            .iter()
            .filter(|r| r.stage == stage && r.status == SyncStatus::Completed)
            .max_by_key(|r| r.completed_at)
            .cloned())
    }

    async fn recent_runs(&self, limit: u64) -> Result<Vec<SyncRun>> {
        self.check_read().await?;
        Ok(self
            .runs
            .read()
            .await
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
