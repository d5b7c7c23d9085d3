//! Broken-trace analyzer.
//!
//! Two heuristic passes over the reconciled coverage state produce a capped
//! list of traces likely to be incomplete. The priority pass flags high-risk
//! uninstrumented services on their own; the dependency pass flags
//! instrumented roots whose hinted dependencies lack instrumentation. Both
//! passes share one cap counter; the priority pass runs first and can exhaust
//! it. Candidate keys are derived from service name plus evaluation date, so
//! same-day reruns replace rather than duplicate.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{record_run, SyncError};
use crate::gateway::TelemetryGateway;
use crate::store::{BrokenTraceCandidate, CoverageStore, Service, SyncStage};

/// Namespace for deterministic candidate UUIDs, derived from DNS-based UUIDv5.
static CANDIDATE_UUID_NAMESPACE: LazyLock<uuid::Uuid> =
    LazyLock::new(|| uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_DNS, b"tracegap.dev"));

/// Tag `domain` values treated as high-value for the priority heuristic.
const HIGH_VALUE_DOMAINS: &[&str] = &["experiences", "platform", "payments", "booking"];

/// Why an uninstrumented service qualified for the priority pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RiskReason {
    CustomerFacing,
    CriticalFlow,
    HighValueDomain,
}

fn risk_reasons(service: &Service) -> Vec<RiskReason> {
    let mut reasons = Vec::new();
    if service.customer_facing {
        reasons.push(RiskReason::CustomerFacing);
    }
    if service.tags.get("critical_flow").map(String::as_str) == Some("true") {
        reasons.push(RiskReason::CriticalFlow);
    }
    if let Some(domain) = service.tags.get("domain") {
        if HIGH_VALUE_DOMAINS.contains(&domain.as_str()) {
            reasons.push(RiskReason::HighValueDomain);
        }
    }
    reasons
}

/// Key for a priority-pass candidate: UUIDv5 over `<service>:<YYYY-MM-DD>`.
fn priority_key(service_name: &str, date: &DateTime<Utc>) -> String {
    let material = format!("{}:{}", service_name, date.format("%Y-%m-%d"));
    uuid::Uuid::new_v5(&CANDIDATE_UUID_NAMESPACE, material.as_bytes()).to_string()
}

/// Key for a dependency-pass candidate.
fn dependency_key(service_name: &str, date: &DateTime<Utc>) -> String {
    format!("dep-{}-{}", service_name, date.format("%Y-%m-%d"))
}

pub struct BrokenTraceAnalyzer {
    gateway: Arc<dyn TelemetryGateway>,
    store: Arc<dyn CoverageStore>,
    cap: usize,
}

impl BrokenTraceAnalyzer {
    pub fn new(
        gateway: Arc<dyn TelemetryGateway>,
        store: Arc<dyn CoverageStore>,
        cap: usize,
    ) -> Self {
        Self { gateway, store, cap }
    }

    /// Rebuild the broken-trace candidate list from current coverage state.
    ///
    /// Prior candidates are discarded wholesale; the replacement commits
    /// atomically even when the new list is empty. A dependency-hint fetch
    /// failure degrades the run to priority-pass results only. Returns the
    /// number of candidates created.
    pub async fn analyze(&self) -> Result<u64, SyncError> {
        record_run(self.store.as_ref(), SyncStage::TraceAnalysis, || async {
            let now = Utc::now();
            let mut services = self.store.all_services().await?;
            services.sort_by(|a, b| a.name.cmp(&b.name));

            let statuses = self.store.all_statuses().await?;
            let instrumented: BTreeSet<&str> = statuses
                .iter()
                .filter(|s| s.instrumented)
                .map(|s| s.service_name.as_str())
                .collect();

            let mut candidates = Vec::new();

            // Priority pass: high-risk services missing their own telemetry.
            for service in &services {
                if candidates.len() >= self.cap {
                    break;
                }
                if instrumented.contains(service.name.as_str()) {
                    continue;
                }
                let reasons = risk_reasons(service);
                if reasons.is_empty() {
                    continue;
                }
                candidates.push(BrokenTraceCandidate {
                    trace_key: priority_key(&service.name, &now),
                    root_service: service.name.clone(),
                    missing_services: vec![service.name.clone()],
                    total_services: 1,
                    missing_count: 1,
                    analyzed_at: now,
                });
            }
            let priority_created = candidates.len();

            // Dependency pass: instrumented roots with uninstrumented hinted
            // dependencies. Best effort; a hint fetch failure is swallowed.
            if candidates.len() < self.cap {
                match self.gateway.fetch_dependency_hints().await {
                    Ok(hints) => {
                        for (root, deps) in &hints {
                            if candidates.len() >= self.cap {
                                break;
                            }
                            if !instrumented.contains(root.as_str()) {
                                continue;
                            }
                            let missing: Vec<String> = deps
                                .iter()
                                .filter(|d| !instrumented.contains(d.as_str()))
                                .cloned()
                                .collect();
                            if missing.is_empty() {
                                continue;
                            }
                            candidates.push(BrokenTraceCandidate {
                                trace_key: dependency_key(root, &now),
                                root_service: root.clone(),
                                missing_count: missing.len() as i64,
                                missing_services: missing,
                                total_services: deps.len() as i64 + 1,
                                analyzed_at: now,
                            });
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "dependency hint fetch failed; keeping priority results only");
                    }
                }
            }

            self.store.replace_candidates(&candidates).await?;

            info!(
                candidates = candidates.len(),
                priority = priority_created,
                dependency = candidates.len() - priority_created,
                "broken-trace analysis completed"
            );
            Ok(candidates.len() as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::Utc;

    use super::*;
    use crate::gateway::MockGateway;
    use crate::store::entities::{CatalogEntry, CoverageUpdate, Infrastructure, TelemetryEntry};
    use crate::store::mock::MockCoverageStore;
    use crate::store::SyncStatus;

    fn catalog_entry(name: &str, customer_facing: bool, tags: &[(&str, &str)]) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            team: None,
            environment: None,
            infrastructure: Infrastructure::Unknown,
            customer_facing,
            last_seen: Utc::now(),
        }
    }

    async fn seed(
        store: &MockCoverageStore,
        entries: Vec<CatalogEntry>,
        instrumented: &[&str],
    ) {
        let updates: Vec<CoverageUpdate> = entries
            .iter()
            .map(|e| {
                if instrumented.contains(&e.name.as_str()) {
                    CoverageUpdate::observed(&TelemetryEntry {
                        service_name: e.name.clone(),
                        language: Some("go".into()),
                        last_seen: Utc::now(),
                        span_count_24h: 1,
                    })
                } else {
                    CoverageUpdate::negative(&e.name)
                }
            })
            .collect();
        store.upsert_services(&entries).await.unwrap();
        store.apply_coverage(&updates).await.unwrap();
    }

    #[tokio::test]
    async fn priority_pass_flags_only_risky_uninstrumented_services() {
        let store = Arc::new(MockCoverageStore::new());
        seed(
            &store,
            vec![
                catalog_entry("a", true, &[("critical_flow", "true")]),
                catalog_entry("b", false, &[]),
                catalog_entry("c", false, &[]),
            ],
            &["b"],
        )
        .await;

        let analyzer = BrokenTraceAnalyzer::new(Arc::new(MockGateway::new()), store.clone(), 10);
        let created = analyzer.analyze().await.unwrap();
        assert_eq!(created, 1);

        let candidates = store.all_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].root_service, "a");
        assert_eq!(candidates[0].missing_services, vec!["a".to_string()]);
        assert_eq!(candidates[0].total_services, 1);
        assert_eq!(candidates[0].missing_count, 1);
    }

    #[tokio::test]
    async fn high_value_domain_tag_qualifies() {
        let store = Arc::new(MockCoverageStore::new());
        seed(
            &store,
            vec![
                catalog_entry("pay", false, &[("domain", "payments")]),
                catalog_entry("blog", false, &[("domain", "marketing")]),
            ],
            &[],
        )
        .await;

        let analyzer = BrokenTraceAnalyzer::new(Arc::new(MockGateway::new()), store.clone(), 10);
        analyzer.analyze().await.unwrap();

        let candidates = store.all_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].root_service, "pay");
    }

    #[tokio::test]
    async fn dependency_pass_emits_multi_participant_candidate() {
        let store = Arc::new(MockCoverageStore::new());
        seed(
            &store,
            vec![
                catalog_entry("a", true, &[]),
                catalog_entry("b", false, &[]),
            ],
            &["b"],
        )
        .await;

        let gateway = Arc::new(MockGateway::new());
        let mut hints = BTreeMap::new();
        hints.insert("b".to_string(), BTreeSet::from(["a".to_string()]));
        gateway.set_hints(hints).await;

        let analyzer = BrokenTraceAnalyzer::new(gateway, store.clone(), 10);
        let created = analyzer.analyze().await.unwrap();
        assert_eq!(created, 2);

        let candidates = store.all_candidates().await.unwrap();
        let dep = candidates
            .iter()
            .find(|c| c.root_service == "b")
            .unwrap();
        assert!(dep.trace_key.starts_with("dep-b-"));
        assert_eq!(dep.missing_services, vec!["a".to_string()]);
        assert_eq!(dep.total_services, 2);
        assert_eq!(dep.missing_count, 1);
    }

    #[tokio::test]
    async fn cap_is_shared_and_priority_pass_wins() {
        let store = Arc::new(MockCoverageStore::new());
        let entries: Vec<_> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|n| catalog_entry(n, true, &[]))
            .collect();
        seed(&store, entries, &[]).await;

        let gateway = Arc::new(MockGateway::new());
        let mut hints = BTreeMap::new();
        hints.insert("x".to_string(), BTreeSet::from(["a".to_string()]));
        gateway.set_hints(hints).await;

        let analyzer = BrokenTraceAnalyzer::new(gateway, store.clone(), 2);
        let created = analyzer.analyze().await.unwrap();
        assert_eq!(created, 2);

        let candidates = store.all_candidates().await.unwrap();
        assert!(candidates.iter().all(|c| !c.trace_key.starts_with("dep-")));
    }

    #[tokio::test]
    async fn same_day_reruns_produce_identical_keys() {
        let store = Arc::new(MockCoverageStore::new());
        seed(
            &store,
            vec![catalog_entry("a", true, &[])],
            &[],
        )
        .await;

        let analyzer = BrokenTraceAnalyzer::new(Arc::new(MockGateway::new()), store.clone(), 10);
        analyzer.analyze().await.unwrap();
        let first: Vec<String> = store
            .all_candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.trace_key)
            .collect();

        analyzer.analyze().await.unwrap();
        let second: Vec<String> = store
            .all_candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.trace_key)
            .collect();

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn hint_failure_keeps_priority_results_and_completes_run() {
        let store = Arc::new(MockCoverageStore::new());
        seed(
            &store,
            vec![
                catalog_entry("a", true, &[]),
                catalog_entry("b", false, &[]),
            ],
            &["b"],
        )
        .await;

        let gateway = Arc::new(MockGateway::new());
        gateway.set_fail_hints(true).await;

        let analyzer = BrokenTraceAnalyzer::new(gateway, store.clone(), 10);
        let created = analyzer.analyze().await.unwrap();
        assert_eq!(created, 1);

        let runs = store.runs().await;
        assert_eq!(runs[0].stage, SyncStage::TraceAnalysis);
        assert_eq!(runs[0].status, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn clean_state_replaces_prior_candidates_with_empty_list() {
        let store = Arc::new(MockCoverageStore::new());
        seed(&store, vec![catalog_entry("a", true, &[])], &[]).await;

        let analyzer = BrokenTraceAnalyzer::new(Arc::new(MockGateway::new()), store.clone(), 10);
        analyzer.analyze().await.unwrap();
        assert_eq!(store.all_candidates().await.unwrap().len(), 1);

        // Service becomes instrumented; analysis must clear stale output.
        store
            .apply_coverage(&[CoverageUpdate::observed(&TelemetryEntry {
                service_name: "a".into(),
                language: None,
                last_seen: Utc::now(),
                span_count_24h: 5,
            })])
            .await
            .unwrap();
        analyzer.analyze().await.unwrap();
        assert!(store.all_candidates().await.unwrap().is_empty());
    }
}
