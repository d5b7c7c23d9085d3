//! Persisted entities for the coverage store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Infrastructure class a service runs on, as reported by catalog tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Infrastructure {
    Eks,
    Ecs,
    Ec2,
    Unknown,
}

impl Infrastructure {
    /// Stable string form used in storage and filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Infrastructure::Eks => "EKS",
            Infrastructure::Ecs => "ECS",
            Infrastructure::Ec2 => "EC2",
            Infrastructure::Unknown => "Unknown",
        }
    }

    /// Parse a stored or tag-supplied value. Unrecognized input maps to `Unknown`.
    pub fn parse(value: &str) -> Self {
        let lower = value.to_ascii_lowercase();
        if lower.contains("eks") {
            Infrastructure::Eks
        } else if lower.contains("ecs") {
            Infrastructure::Ecs
        } else if lower.contains("ec2") {
            Infrastructure::Ec2
        } else {
            Infrastructure::Unknown
        }
    }
}

impl std::fmt::Display for Infrastructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A service known to the external catalog.
///
/// Written only by the catalog synchronizer. Services are never deleted by
/// sync; a service that drops out of the catalog persists with a stale
/// `last_seen_catalog`.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    /// Unique service name; the row key.
    pub name: String,
    /// Structured tags extracted from the catalog definition.
    pub tags: BTreeMap<String, String>,
    pub team: Option<String>,
    pub environment: Option<String>,
    pub infrastructure: Infrastructure,
    pub customer_facing: bool,
    pub last_seen_catalog: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Instrumentation state for one service, 1:1 by name, created lazily by the
/// coverage synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentationStatus {
    pub service_name: String,
    /// Explicit negative: false both for never-observed services and for
    /// services whose telemetry has gone silent.
    pub instrumented: bool,
    pub language: Option<String>,
    pub last_seen_telemetry: Option<DateTime<Utc>>,
    pub span_count_24h: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A trace inferred to be incomplete because at least one participant lacks
/// instrumentation. Rebuilt wholesale on every analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokenTraceCandidate {
    /// Deterministic identifier derived from the root service and the
    /// evaluation date, so same-day reruns do not duplicate.
    pub trace_key: String,
    pub root_service: String,
    /// Uninstrumented participants, in stable (sorted) order.
    pub missing_services: Vec<String>,
    pub total_services: i64,
    pub missing_count: i64,
    pub analyzed_at: DateTime<Utc>,
}

/// Pipeline stage kinds, one SyncRun row per stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStage {
    Catalog,
    Coverage,
    TraceAnalysis,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Catalog => "catalog",
            SyncStage::Coverage => "coverage",
            SyncStage::TraceAnalysis => "trace_analysis",
        }
    }
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of one pipeline stage execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRun {
    pub id: i64,
    pub stage: SyncStage,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: i64,
    pub error_message: Option<String>,
}

/// One service definition as produced by the telemetry gateway's catalog
/// fetch, already reduced to structured fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub team: Option<String>,
    pub environment: Option<String>,
    pub infrastructure: Infrastructure,
    pub customer_facing: bool,
    pub last_seen: DateTime<Utc>,
}

/// One instrumented-service observation from the telemetry window.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEntry {
    pub service_name: String,
    pub language: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub span_count_24h: i64,
}

/// Reconciled instrumentation state for one service, applied in bulk by the
/// coverage synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageUpdate {
    pub service_name: String,
    /// `Some` when the service appeared in the telemetry window. `None` forces
    /// `instrumented = false` but leaves the previously observed language and
    /// last-seen timestamp in place.
    pub observation: Option<TelemetryObservation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryObservation {
    pub language: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub span_count_24h: i64,
}

impl CoverageUpdate {
    /// Update for a service observed in telemetry.
    pub fn observed(entry: &TelemetryEntry) -> Self {
        Self {
            service_name: entry.service_name.clone(),
            observation: Some(TelemetryObservation {
                language: entry.language.clone(),
                last_seen: entry.last_seen,
                span_count_24h: entry.span_count_24h,
            }),
        }
    }

    /// Explicit negative for a service absent from the telemetry window.
    pub fn negative(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            observation: None,
        }
    }
}
