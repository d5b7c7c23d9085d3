//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Services table schema.
#[derive(Iden)]
pub enum Services {
    Table,
    #[iden = "name"]
    Name,
    #[iden = "tags"]
    Tags,
    #[iden = "team"]
    Team,
    #[iden = "environment"]
    Environment,
    #[iden = "infrastructure"]
    Infrastructure,
    #[iden = "customer_facing"]
    CustomerFacing,
    #[iden = "last_seen_catalog"]
    LastSeenCatalog,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Instrumentation status table schema, 1:1 with services by name.
#[derive(Iden)]
pub enum Statuses {
    #[iden = "instrumentation_status"]
    Table,
    #[iden = "service_name"]
    ServiceName,
    #[iden = "instrumented"]
    Instrumented,
    #[iden = "language"]
    Language,
    #[iden = "last_seen_telemetry"]
    LastSeenTelemetry,
    #[iden = "span_count_24h"]
    SpanCount24h,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Broken trace candidates table schema.
#[derive(Iden)]
pub enum Candidates {
    #[iden = "broken_trace_candidates"]
    Table,
    #[iden = "trace_key"]
    TraceKey,
    #[iden = "root_service"]
    RootService,
    #[iden = "missing_services"]
    MissingServices,
    #[iden = "total_services"]
    TotalServices,
    #[iden = "missing_count"]
    MissingCount,
    #[iden = "analyzed_at"]
    AnalyzedAt,
}

/// Sync run log table schema.
#[derive(Iden)]
pub enum SyncRuns {
    #[iden = "sync_runs"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "stage"]
    Stage,
    #[iden = "status"]
    Status,
    #[iden = "started_at"]
    StartedAt,
    #[iden = "completed_at"]
    CompletedAt,
    #[iden = "records_processed"]
    RecordsProcessed,
    #[iden = "error_message"]
    ErrorMessage,
}

/// SQL for creating the services table.
pub const CREATE_SERVICES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS services (
    name TEXT NOT NULL PRIMARY KEY,
    tags TEXT NOT NULL DEFAULT '{}',
    team TEXT,
    environment TEXT,
    infrastructure TEXT NOT NULL DEFAULT 'Unknown',
    customer_facing INTEGER NOT NULL DEFAULT 0,
    last_seen_catalog TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL for creating the instrumentation status table.
pub const CREATE_STATUSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS instrumentation_status (
    service_name TEXT NOT NULL PRIMARY KEY,
    instrumented INTEGER NOT NULL DEFAULT 0,
    language TEXT,
    last_seen_telemetry TEXT,
    span_count_24h INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL for creating the broken trace candidates table.
pub const CREATE_CANDIDATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS broken_trace_candidates (
    trace_key TEXT NOT NULL PRIMARY KEY,
    root_service TEXT NOT NULL,
    missing_services TEXT NOT NULL DEFAULT '[]',
    total_services INTEGER NOT NULL DEFAULT 0,
    missing_count INTEGER NOT NULL DEFAULT 0,
    analyzed_at TEXT NOT NULL
)
"#;

/// SQL for creating the sync runs table.
pub const CREATE_SYNC_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    stage TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    started_at TEXT NOT NULL,
    completed_at TEXT,
    records_processed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
)
"#;

/// Schema DDL, executed one statement at a time at store init.
pub const DDL: &[&str] = &[
    CREATE_SERVICES_TABLE,
    CREATE_STATUSES_TABLE,
    CREATE_CANDIDATES_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_candidates_analyzed_at ON broken_trace_candidates(analyzed_at)",
    "CREATE INDEX IF NOT EXISTS idx_candidates_root_service ON broken_trace_candidates(root_service)",
    CREATE_SYNC_RUNS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_sync_runs_stage ON sync_runs(stage)",
];
