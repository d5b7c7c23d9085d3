//! Read-side queries for the presentation layer.
//!
//! Free functions over `&dyn CoverageStore`: the store trait carries the
//! primitive reads, this module joins, filters and aggregates them. No
//! storage query language leaks past this boundary.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::store::{
    BrokenTraceCandidate, CoverageStore, Infrastructure, InstrumentationStatus, Result, Service,
    SyncRun, SyncStage,
};


/// Service-list filter. All fields are conjunctive; `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct ServiceFilter {
    pub team: Option<String>,
    pub environment: Option<String>,
    pub infrastructure: Option<Infrastructure>,
    pub instrumented: Option<bool>,
    pub customer_facing: Option<bool>,
    /// Tag filter: bare `key` matches presence, `key:value` or `key=value`
    /// matches exactly.
    pub tag: Option<String>,
    /// Case-insensitive substring match on the service name.
    pub name_contains: Option<String>,
}

impl ServiceFilter {
    fn matches(&self, service: &Service, status: Option<&InstrumentationStatus>) -> bool {
        if let Some(team) = &self.team {
            if service.team.as_deref() != Some(team.as_str()) {
                return false;
            }
        }
        if let Some(environment) = &self.environment {
            if service.environment.as_deref() != Some(environment.as_str()) {
                return false;
            }
        }
        if let Some(infrastructure) = self.infrastructure {
            if service.infrastructure != infrastructure {
                return false;
            }
        }
        if let Some(instrumented) = self.instrumented {
            let actual = status.map(|s| s.instrumented).unwrap_or(false);
            if actual != instrumented {
                return false;
            }
        }
        if let Some(customer_facing) = self.customer_facing {
            if service.customer_facing != customer_facing {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            let (key, value) = match tag.split_once([':', '=']) {
                Some((k, v)) => (k, Some(v)),
                None => (tag.as_str(), None),
            };
            match (service.tags.get(key), value) {
                (None, _) => return false,
                (Some(actual), Some(wanted)) if actual != wanted => return false,
                _ => {}
            }
        }
        if let Some(needle) = &self.name_contains {
            if !service
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// A service joined with its instrumentation status, if one exists yet.
#[derive(Debug, Clone)]
pub struct ServiceWithStatus {
    pub service: Service,
    pub status: Option<InstrumentationStatus>,
}

/// Distinct values for the presentation layer's filter dropdowns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub teams: Vec<String>,
    pub environments: Vec<String>,
    pub infrastructures: Vec<Infrastructure>,
}

/// One row of the tabular coverage export.
#[derive(Debug, Clone)]
pub struct CoverageRow {
    pub name: String,
    pub team: Option<String>,
    pub environment: Option<String>,
    pub infrastructure: Infrastructure,
    pub customer_facing: bool,
    pub instrumented: bool,
    pub language: Option<String>,
    pub last_seen_catalog: DateTime<Utc>,
    pub last_seen_telemetry: Option<DateTime<Utc>>,
}

/// Headline coverage numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageStats {
    pub total_services: u64,
    pub instrumented: u64,
    pub coverage_percent: f64,
}

/// Coverage split by infrastructure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfraBreakdown {
    pub infrastructure: Infrastructure,
    pub total: u64,
    pub instrumented: u64,
}

/// Broken-trace candidate aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub total_candidates: u64,
    pub distinct_roots: u64,
}

/// A candidate with its missing participants resolved to Service rows where
/// the catalog knows them.
#[derive(Debug, Clone)]
pub struct CandidateDetail {
    pub candidate: BrokenTraceCandidate,
    pub missing: Vec<(String, Option<Service>)>,
}

async fn statuses_by_name(
    store: &dyn CoverageStore,
) -> Result<HashMap<String, InstrumentationStatus>> {
    Ok(store
        .all_statuses()
        .await?
        .into_iter()
        .map(|s| (s.service_name.clone(), s))
        .collect())
}

/// Services matching `filter`, joined with status, ordered by name.
pub async fn list_services(
    store: &dyn CoverageStore,
    filter: &ServiceFilter,
) -> Result<Vec<ServiceWithStatus>> {
    let mut statuses = statuses_by_name(store).await?;
    let mut out = Vec::new();
    for service in store.all_services().await? {
        let status = statuses.remove(&service.name);
        if filter.matches(&service, status.as_ref()) {
            out.push(ServiceWithStatus { service, status });
        }
    }
    out.sort_by(|a, b| a.service.name.cmp(&b.service.name));
    Ok(out)
}

/// One service with its status, by exact name.
pub async fn service_detail(
    store: &dyn CoverageStore,
    name: &str,
) -> Result<Option<ServiceWithStatus>> {
    let Some(service) = store.service(name).await? else {
        return Ok(None);
    };
    let status = store.status(name).await?;
    Ok(Some(ServiceWithStatus { service, status }))
}

/// Distinct sorted teams, environments and infrastructure kinds.
pub async fn filter_options(store: &dyn CoverageStore) -> Result<FilterOptions> {
    let mut teams = BTreeSet::new();
    let mut environments = BTreeSet::new();
    let mut infrastructures = BTreeSet::new();
    for service in store.all_services().await? {
        if let Some(team) = service.team {
            teams.insert(team);
        }
        if let Some(environment) = service.environment {
            environments.insert(environment);
        }
        infrastructures.insert(service.infrastructure);
    }
    Ok(FilterOptions {
        teams: teams.into_iter().collect(),
        environments: environments.into_iter().collect(),
        infrastructures: infrastructures.into_iter().collect(),
    })
}

/// Full joined Service×Status dump for the export boundary, ordered by name.
pub async fn export_rows(store: &dyn CoverageStore) -> Result<Vec<CoverageRow>> {
    let statuses = statuses_by_name(store).await?;
    let mut rows: Vec<CoverageRow> = store
        .all_services()
        .await?
        .into_iter()
        .map(|service| {
            let status = statuses.get(&service.name);
            CoverageRow {
                name: service.name,
                team: service.team,
                environment: service.environment,
                infrastructure: service.infrastructure,
                customer_facing: service.customer_facing,
                instrumented: status.map(|s| s.instrumented).unwrap_or(false),
                language: status.and_then(|s| s.language.clone()),
                last_seen_catalog: service.last_seen_catalog,
                last_seen_telemetry: status.and_then(|s| s.last_seen_telemetry),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(rows)
}

/// Totals and coverage percentage across the whole catalog.
pub async fn coverage_stats(store: &dyn CoverageStore) -> Result<CoverageStats> {
    let statuses = statuses_by_name(store).await?;
    let total = store.all_services().await?.len() as u64;
    let instrumented = statuses.values().filter(|s| s.instrumented).count() as u64;
    let coverage_percent = if total == 0 {
        0.0
    } else {
        instrumented as f64 * 100.0 / total as f64
    };
    Ok(CoverageStats {
        total_services: total,
        instrumented,
        coverage_percent,
    })
}

/// Per-infrastructure totals, ordered by infrastructure label.
pub async fn infra_breakdown(store: &dyn CoverageStore) -> Result<Vec<InfraBreakdown>> {
    let statuses = statuses_by_name(store).await?;
    let mut by_infra: BTreeMap<&'static str, InfraBreakdown> = BTreeMap::new();
    for service in store.all_services().await? {
        let entry = by_infra
            .entry(service.infrastructure.as_str())
            .or_insert(InfraBreakdown {
                infrastructure: service.infrastructure,
                total: 0,
                instrumented: 0,
            });
        entry.total += 1;
        if statuses
            .get(&service.name)
            .map(|s| s.instrumented)
            .unwrap_or(false)
        {
            entry.instrumented += 1;
        }
    }
    Ok(by_infra.into_values().collect())
}

/// Customer-facing services without instrumentation, ordered by name.
pub async fn customer_facing_uninstrumented(
    store: &dyn CoverageStore,
) -> Result<Vec<ServiceWithStatus>> {
    let filter = ServiceFilter {
        customer_facing: Some(true),
        instrumented: Some(false),
        ..ServiceFilter::default()
    };
    list_services(store, &filter).await
}

/// Candidate count plus the number of distinct root services among them.
pub async fn candidate_stats(store: &dyn CoverageStore) -> Result<CandidateStats> {
    let candidates = store.all_candidates().await?;
    let distinct_roots = candidates
        .iter()
        .map(|c| c.root_service.as_str())
        .collect::<BTreeSet<_>>()
        .len() as u64;
    Ok(CandidateStats {
        total_candidates: candidates.len() as u64,
        distinct_roots,
    })
}

/// One page of candidates, most recent analysis first. Pages are 1-based.
pub async fn recent_candidates(
    store: &dyn CoverageStore,
    page: u64,
    per_page: u64,
) -> Result<Vec<BrokenTraceCandidate>> {
    let offset = page.saturating_sub(1) * per_page;
    store.recent_candidates(per_page, offset).await
}

/// One candidate with its missing participants resolved against the catalog.
pub async fn candidate_detail(
    store: &dyn CoverageStore,
    trace_key: &str,
) -> Result<Option<CandidateDetail>> {
    let Some(candidate) = store.candidate(trace_key).await? else {
        return Ok(None);
    };
    let mut missing = Vec::with_capacity(candidate.missing_services.len());
    for name in &candidate.missing_services {
        missing.push((name.clone(), store.service(name).await?));
    }
    Ok(Some(CandidateDetail { candidate, missing }))
}

/// Most recent completed run for a stage, if any.
pub async fn latest_completed_run(
    store: &dyn CoverageStore,
    stage: SyncStage,
) -> Result<Option<SyncRun>> {
    store.latest_completed_run(stage).await
}

/// Most recent runs across all stages, newest first.
pub async fn recent_runs(store: &dyn CoverageStore, limit: u64) -> Result<Vec<SyncRun>> {
    store.recent_runs(limit).await
}
