//! Datadog-backed telemetry gateway.
//!
//! Catalog definitions come from the service definition API, instrumentation
//! signals from a trace-metrics query, and dependency hints from the
//! `depends-on` lists on catalog definitions. Pagination is walked here; a
//! page shorter than the requested size terminates the walk.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{infer_language, parse_tags, GatewayError, TelemetryGateway};
use crate::config::DatadogSettings;
use crate::store::entities::{CatalogEntry, Infrastructure, TelemetryEntry};

const API_KEY_HEADER: &str = "DD-API-KEY";
const APP_KEY_HEADER: &str = "DD-APPLICATION-KEY";

/// Metrics query identifying services that emitted trace telemetry.
const TRACE_ACTIVITY_QUERY: &str = "trace.* by {service}.as_count()";

#[derive(Debug, Deserialize)]
struct DefinitionPage {
    #[serde(default)]
    data: Vec<ServiceDefinition>,
}

#[derive(Debug, Deserialize)]
struct ServiceDefinition {
    #[serde(default)]
    id: String,
    #[serde(default)]
    attributes: DefinitionAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct DefinitionAttributes {
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, rename = "depends-on")]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    #[serde(default)]
    series: Vec<MetricSeries>,
}

#[derive(Debug, Deserialize)]
struct MetricSeries {
    #[serde(default)]
    tag_set: Vec<String>,
    #[serde(default)]
    pointlist: Vec<Vec<Option<f64>>>,
}

/// Gateway over the Datadog catalog and metrics APIs.
pub struct DatadogGateway {
    client: Client,
    base_url: String,
    api_key: String,
    app_key: String,
    page_size: u64,
}

impl DatadogGateway {
    /// Build a gateway from settings. The per-request timeout bounds every
    /// call; a hit timeout surfaces as `RemoteUnavailable`.
    pub fn new(settings: &DatadogSettings) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: format!("https://api.{}", settings.site),
            api_key: settings.api_key.clone(),
            app_key: settings.app_key.clone(),
            page_size: settings.page_size,
        })
    }

    /// Override the API base URL (tests against a local endpoint).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header(API_KEY_HEADER, &self.api_key)
            .header(APP_KEY_HEADER, &self.app_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::RemoteUnavailable(format!(
                "HTTP {} - {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        Ok(response.json::<T>().await?)
    }

    async fn fetch_definition_page(&self, page: u64) -> Result<Vec<ServiceDefinition>, GatewayError> {
        let page_size = self.page_size.to_string();
        let page_number = page.to_string();
        let body: DefinitionPage = self
            .get_json(
                "/api/v2/services/definitions",
                &[
                    ("page[size]", page_size),
                    ("page[number]", page_number),
                ],
            )
            .await?;
        Ok(body.data)
    }

    async fn fetch_all_definitions(&self) -> Result<Vec<ServiceDefinition>, GatewayError> {
        collect_pages(self.page_size, |page| self.fetch_definition_page(page)).await
    }
}

/// Walk numbered pages until a page comes back shorter than `page_size`.
async fn collect_pages<T, F, Fut>(page_size: u64, mut fetch: F) -> Result<Vec<T>, GatewayError>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<Vec<T>, GatewayError>>,
{
    let mut all = Vec::new();
    let mut page = 0u64;
    loop {
        let batch = fetch(page).await?;
        let short = (batch.len() as u64) < page_size.max(1);
        all.extend(batch);
        if short {
            break;
        }
        page += 1;
    }
    Ok(all)
}

fn entry_from_definition(def: &ServiceDefinition) -> CatalogEntry {
    let tags = parse_tags(&def.attributes.tags);

    let team = def
        .attributes
        .team
        .clone()
        .or_else(|| tags.get("team").cloned());
    let environment = tags.get("env").cloned();
    let infrastructure = extract_infrastructure(&def.attributes.tags, &tags);
    let customer_facing = def.attributes.tags.iter().any(|tag| {
        let lower = tag.to_ascii_lowercase();
        lower.contains("customer-facing") || lower.contains("public")
    });

    CatalogEntry {
        name: def.id.clone(),
        tags,
        team,
        environment,
        infrastructure,
        customer_facing,
        last_seen: Utc::now(),
    }
}

fn extract_infrastructure(raw: &[String], tags: &BTreeMap<String, String>) -> Infrastructure {
    if let Some(value) = tags.get("infrastructure") {
        return Infrastructure::parse(value);
    }
    for tag in raw {
        let parsed = Infrastructure::parse(tag);
        if parsed != Infrastructure::Unknown {
            return parsed;
        }
    }
    Infrastructure::Unknown
}

fn entry_from_series(series: &MetricSeries) -> Option<TelemetryEntry> {
    let service_name = series.tag_set.iter().find_map(|tag| {
        tag.strip_prefix("service:")
            .map(|name| name.to_string())
            .filter(|name| !name.is_empty())
    })?;

    let span_count_24h = series
        .pointlist
        .iter()
        .filter_map(|point| point.get(1).copied().flatten())
        .sum::<f64>() as i64;

    Some(TelemetryEntry {
        service_name,
        language: infer_language(&series.tag_set),
        last_seen: Utc::now(),
        span_count_24h,
    })
}

#[async_trait]
impl TelemetryGateway for DatadogGateway {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, GatewayError> {
        let definitions = self.fetch_all_definitions().await?;
        let entries: Vec<CatalogEntry> = definitions
            .iter()
            .filter(|def| !def.id.is_empty())
            .map(entry_from_definition)
            .collect();
        debug!(services = entries.len(), "fetched catalog definitions");
        Ok(entries)
    }

    async fn fetch_instrumented_services(
        &self,
        window: Duration,
    ) -> Result<Vec<TelemetryEntry>, GatewayError> {
        let to = Utc::now();
        let from = to - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(24));

        let body: MetricsResponse = self
            .get_json(
                "/api/v1/query",
                &[
                    ("from", from.timestamp().to_string()),
                    ("to", to.timestamp().to_string()),
                    ("query", TRACE_ACTIVITY_QUERY.to_string()),
                ],
            )
            .await?;

        let entries: Vec<TelemetryEntry> =
            body.series.iter().filter_map(entry_from_series).collect();
        debug!(services = entries.len(), "fetched instrumented services");
        Ok(entries)
    }

    async fn fetch_dependency_hints(
        &self,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, GatewayError> {
        let definitions = self.fetch_all_definitions().await?;

        let mut hints = BTreeMap::new();
        for def in &definitions {
            if def.id.is_empty() || def.attributes.depends_on.is_empty() {
                continue;
            }
            let deps: BTreeSet<String> = def
                .attributes
                .depends_on
                .iter()
                .filter(|dep| !dep.is_empty())
                .cloned()
                .collect();
            if !deps.is_empty() {
                hints.insert(def.id.clone(), deps);
            }
        }
        debug!(services = hints.len(), "collected dependency hints");
        Ok(hints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str, team: Option<&str>, tags: &[&str], deps: &[&str]) -> ServiceDefinition {
        ServiceDefinition {
            id: id.to_string(),
            attributes: DefinitionAttributes {
                team: team.map(str::to_string),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                depends_on: deps.iter().map(|d| d.to_string()).collect(),
            },
        }
    }

    #[test]
    fn definition_fields_are_extracted() {
        let def = definition(
            "checkout",
            None,
            &["team:payments", "env:prod", "infrastructure:eks", "public-api"],
            &[],
        );
        let entry = entry_from_definition(&def);
        assert_eq!(entry.name, "checkout");
        assert_eq!(entry.team.as_deref(), Some("payments"));
        assert_eq!(entry.environment.as_deref(), Some("prod"));
        assert_eq!(entry.infrastructure, Infrastructure::Eks);
        assert!(entry.customer_facing);
    }

    #[test]
    fn explicit_team_attribute_wins_over_tag() {
        let def = definition("checkout", Some("platform"), &["team:payments"], &[]);
        let entry = entry_from_definition(&def);
        assert_eq!(entry.team.as_deref(), Some("platform"));
    }

    #[test]
    fn infrastructure_falls_back_to_tag_substring() {
        let def = definition("worker", None, &["cluster:prod-ecs-main"], &[]);
        assert_eq!(
            entry_from_definition(&def).infrastructure,
            Infrastructure::Ecs
        );
    }

    #[test]
    fn series_without_service_tag_is_skipped() {
        let series = MetricSeries {
            tag_set: vec!["env:prod".to_string()],
            pointlist: vec![vec![Some(0.0), Some(10.0)]],
        };
        assert!(entry_from_series(&series).is_none());
    }

    #[test]
    fn series_span_counts_sum_over_points() {
        let series = MetricSeries {
            tag_set: vec!["service:checkout".to_string(), "language:go".to_string()],
            pointlist: vec![
                vec![Some(0.0), Some(10.0)],
                vec![Some(1.0), None],
                vec![Some(2.0), Some(5.5)],
            ],
        };
        let entry = entry_from_series(&series).unwrap();
        assert_eq!(entry.service_name, "checkout");
        assert_eq!(entry.language.as_deref(), Some("Go"));
        assert_eq!(entry.span_count_24h, 15);
    }

    #[tokio::test]
    async fn pagination_stops_on_short_page() {
        let pages = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]];
        let fetched = std::cell::RefCell::new(0usize);
        let all = collect_pages(3, |page| {
            *fetched.borrow_mut() += 1;
            let batch = pages[page as usize].clone();
            async move { Ok(batch) }
        })
        .await
        .unwrap();
        assert_eq!(all, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(*fetched.borrow(), 3);
    }

    #[tokio::test]
    async fn pagination_stops_on_empty_first_page() {
        let all: Vec<i32> = collect_pages(3, |_| async { Ok(Vec::new()) }).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn pagination_propagates_mid_walk_errors() {
        let err = collect_pages(2, |page| async move {
            if page < 2 {
                Ok(vec![0, 1])
            } else {
                Err(GatewayError::RemoteUnavailable("boom".to_string()))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::RemoteUnavailable(_)));
    }
}
