//! SQLite implementation of the coverage store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::entities::{
    BrokenTraceCandidate, CatalogEntry, CoverageUpdate, Infrastructure, InstrumentationStatus,
    Service, SyncRun, SyncStage, SyncStatus,
};
use super::schema::{Candidates, Services, Statuses, SyncRuns, DDL};
use super::{CoverageStore, Result, StoreError};

/// SQLite-backed coverage store.
pub struct SqliteCoverageStore {
    pool: SqlitePool,
}

/// Fixed precision keeps stored timestamps lexicographically ordered.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_stage(raw: &str) -> SyncStage {
    match raw {
        "catalog" => SyncStage::Catalog,
        "coverage" => SyncStage::Coverage,
        _ => SyncStage::TraceAnalysis,
    }
}

fn parse_status(raw: &str) -> SyncStatus {
    match raw {
        "running" => SyncStatus::Running,
        "completed" => SyncStatus::Completed,
        _ => SyncStatus::Failed,
    }
}

impl SqliteCoverageStore {
    /// Create a store over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database at `path` and create the schema.
    ///
    /// `:memory:` opens a single-connection in-memory database, used by tests.
    pub async fn connect(path: &str) -> Result<Self> {
        let pool = if path == ":memory:" {
            // Each pooled connection would otherwise get its own empty
            // in-memory database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
            SqlitePool::connect(&format!("sqlite:{path}?mode=rwc")).await?
        };

        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init(&self) -> Result<()> {
        for statement in DDL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_services(
        conn: &mut SqliteConnection,
        entries: &[CatalogEntry],
        now: DateTime<Utc>,
    ) -> Result<()> {
        for entry in entries {
            let tags = serde_json::to_string(&entry.tags)?;
            let sql = Query::insert()
                .into_table(Services::Table)
                .columns([
                    Services::Name,
                    Services::Tags,
                    Services::Team,
                    Services::Environment,
                    Services::Infrastructure,
                    Services::CustomerFacing,
                    Services::LastSeenCatalog,
                    Services::CreatedAt,
                    Services::UpdatedAt,
                ])
                .values_panic([
                    entry.name.clone().into(),
                    tags.into(),
                    entry.team.clone().into(),
                    entry.environment.clone().into(),
                    entry.infrastructure.as_str().into(),
                    entry.customer_facing.into(),
                    fmt_ts(entry.last_seen).into(),
                    fmt_ts(now).into(),
                    fmt_ts(now).into(),
                ])
                .on_conflict(
                    OnConflict::column(Services::Name)
                        .update_columns([
                            Services::Tags,
                            Services::Team,
                            Services::Environment,
                            Services::Infrastructure,
                            Services::CustomerFacing,
                            Services::LastSeenCatalog,
                            Services::UpdatedAt,
                        ])
                        .to_owned(),
                )
                .to_string(SqliteQueryBuilder);

            sqlx::query(&sql).execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn insert_coverage(
        conn: &mut SqliteConnection,
        updates: &[CoverageUpdate],
        now: DateTime<Utc>,
    ) -> Result<()> {
        for update in updates {
            // InsertStatement is !Send; build the SQL in an inner scope so the
            // statement is dropped before the await and the future stays Send.
            let sql = {
                let stmt = match &update.observation {
                    Some(obs) => Query::insert()
                        .into_table(Statuses::Table)
                        .columns([
                            Statuses::ServiceName,
                            Statuses::Instrumented,
                            Statuses::Language,
                            Statuses::LastSeenTelemetry,
                            Statuses::SpanCount24h,
                            Statuses::CreatedAt,
                            Statuses::UpdatedAt,
                        ])
                        .values_panic([
                            update.service_name.clone().into(),
                            true.into(),
                            obs.language.clone().into(),
                            Some(fmt_ts(obs.last_seen)).into(),
                            obs.span_count_24h.into(),
                            fmt_ts(now).into(),
                            fmt_ts(now).into(),
                        ])
                        .on_conflict(
                            OnConflict::column(Statuses::ServiceName)
                                .update_columns([
                                    Statuses::Instrumented,
                                    Statuses::Language,
                                    Statuses::LastSeenTelemetry,
                                    Statuses::SpanCount24h,
                                    Statuses::UpdatedAt,
                                ])
                                .to_owned(),
                        )
                        .to_owned(),
                    // Explicit negative: only the flag flips, prior telemetry
                    // attributes are kept for display.
                    None => Query::insert()
                        .into_table(Statuses::Table)
                        .columns([
                            Statuses::ServiceName,
                            Statuses::Instrumented,
                            Statuses::SpanCount24h,
                            Statuses::CreatedAt,
                            Statuses::UpdatedAt,
                        ])
                        .values_panic([
                            update.service_name.clone().into(),
                            false.into(),
                            0i64.into(),
                            fmt_ts(now).into(),
                            fmt_ts(now).into(),
                        ])
                        .on_conflict(
                            OnConflict::column(Statuses::ServiceName)
                                .update_columns([Statuses::Instrumented, Statuses::UpdatedAt])
                                .to_owned(),
                        )
                        .to_owned(),
                };
                stmt.to_string(SqliteQueryBuilder)
            };
            sqlx::query(&sql).execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn insert_candidates(
        conn: &mut SqliteConnection,
        candidates: &[BrokenTraceCandidate],
    ) -> Result<()> {
        let delete = Query::delete()
            .from_table(Candidates::Table)
            .to_string(SqliteQueryBuilder);
        sqlx::query(&delete).execute(&mut *conn).await?;

        for candidate in candidates {
            let missing = serde_json::to_string(&candidate.missing_services)?;
            let sql = Query::insert()
                .into_table(Candidates::Table)
                .columns([
                    Candidates::TraceKey,
                    Candidates::RootService,
                    Candidates::MissingServices,
                    Candidates::TotalServices,
                    Candidates::MissingCount,
                    Candidates::AnalyzedAt,
                ])
                .values_panic([
                    candidate.trace_key.clone().into(),
                    candidate.root_service.clone().into(),
                    missing.into(),
                    candidate.total_services.into(),
                    candidate.missing_count.into(),
                    fmt_ts(candidate.analyzed_at).into(),
                ])
                .to_string(SqliteQueryBuilder);

            sqlx::query(&sql).execute(&mut *conn).await?;
        }
        Ok(())
    }

    fn service_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Service> {
        let tags: String = row.get("tags");
        let infrastructure: String = row.get("infrastructure");
        let last_seen: String = row.get("last_seen_catalog");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        Ok(Service {
            name: row.get("name"),
            tags: serde_json::from_str(&tags)?,
            team: row.get("team"),
            environment: row.get("environment"),
            infrastructure: Infrastructure::parse(&infrastructure),
            customer_facing: row.get("customer_facing"),
            last_seen_catalog: parse_ts(&last_seen)?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    fn status_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<InstrumentationStatus> {
        let last_seen: Option<String> = row.get("last_seen_telemetry");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        Ok(InstrumentationStatus {
            service_name: row.get("service_name"),
            instrumented: row.get("instrumented"),
            language: row.get("language"),
            last_seen_telemetry: parse_opt_ts(last_seen)?,
            span_count_24h: row.get("span_count_24h"),
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    fn candidate_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<BrokenTraceCandidate> {
        let missing: String = row.get("missing_services");
        let analyzed_at: String = row.get("analyzed_at");

        Ok(BrokenTraceCandidate {
            trace_key: row.get("trace_key"),
            root_service: row.get("root_service"),
            missing_services: serde_json::from_str(&missing)?,
            total_services: row.get("total_services"),
            missing_count: row.get("missing_count"),
            analyzed_at: parse_ts(&analyzed_at)?,
        })
    }

    fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SyncRun> {
        let stage: String = row.get("stage");
        let status: String = row.get("status");
        let started_at: String = row.get("started_at");
        let completed_at: Option<String> = row.get("completed_at");

        Ok(SyncRun {
            id: row.get("id"),
            stage: parse_stage(&stage),
            status: parse_status(&status),
            started_at: parse_ts(&started_at)?,
            completed_at: parse_opt_ts(completed_at)?,
            records_processed: row.get("records_processed"),
            error_message: row.get("error_message"),
        })
    }

    fn select_candidates() -> sea_query::SelectStatement {
        Query::select()
            .columns([
                Candidates::TraceKey,
                Candidates::RootService,
                Candidates::MissingServices,
                Candidates::TotalServices,
                Candidates::MissingCount,
                Candidates::AnalyzedAt,
            ])
            .from(Candidates::Table)
            .order_by(Candidates::AnalyzedAt, Order::Desc)
            .order_by(Candidates::TraceKey, Order::Asc)
            .to_owned()
    }

    fn select_runs() -> sea_query::SelectStatement {
        Query::select()
            .columns([
                SyncRuns::Id,
                SyncRuns::Stage,
                SyncRuns::Status,
                SyncRuns::StartedAt,
                SyncRuns::CompletedAt,
                SyncRuns::RecordsProcessed,
                SyncRuns::ErrorMessage,
            ])
            .from(SyncRuns::Table)
            .to_owned()
    }
}

#[async_trait]
impl CoverageStore for SqliteCoverageStore {
    async fn upsert_services(&self, entries: &[CatalogEntry]) -> Result<()> {
        let now = Utc::now();

        // BEGIN IMMEDIATE acquires the write lock upfront, preventing
        // deadlocks when concurrent DEFERRED transactions race to upgrade
        // from shared to exclusive.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::insert_services(&mut conn, entries, now).await {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn apply_coverage(&self, updates: &[CoverageUpdate]) -> Result<()> {
        let now = Utc::now();

        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::insert_coverage(&mut conn, updates, now).await {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn replace_candidates(&self, candidates: &[BrokenTraceCandidate]) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::insert_candidates(&mut conn, candidates).await {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn open_run(&self, stage: SyncStage) -> Result<i64> {
        let sql = Query::insert()
            .into_table(SyncRuns::Table)
            .columns([SyncRuns::Stage, SyncRuns::Status, SyncRuns::StartedAt])
            .values_panic([
                stage.as_str().into(),
                SyncStatus::Running.as_str().into(),
                fmt_ts(Utc::now()).into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    async fn finish_run(
        &self,
        id: i64,
        status: SyncStatus,
        records_processed: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let sql = Query::update()
            .table(SyncRuns::Table)
            .values([
                (SyncRuns::Status, status.as_str().into()),
                (SyncRuns::CompletedAt, fmt_ts(Utc::now()).into()),
                (SyncRuns::RecordsProcessed, records_processed.into()),
                (
                    SyncRuns::ErrorMessage,
                    error_message.map(str::to_string).into(),
                ),
            ])
            .and_where(Expr::col(SyncRuns::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(id));
        }
        Ok(())
    }

    async fn all_services(&self) -> Result<Vec<Service>> {
        let sql = Query::select()
            .columns([
                Services::Name,
                Services::Tags,
                Services::Team,
                Services::Environment,
                Services::Infrastructure,
                Services::CustomerFacing,
                Services::LastSeenCatalog,
                Services::CreatedAt,
                Services::UpdatedAt,
            ])
            .from(Services::Table)
            .order_by(Services::Name, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::service_from_row).collect()
    }

    async fn service(&self, name: &str) -> Result<Option<Service>> {
        let sql = Query::select()
            .columns([
                Services::Name,
                Services::Tags,
                Services::Team,
                Services::Environment,
                Services::Infrastructure,
                Services::CustomerFacing,
                Services::LastSeenCatalog,
                Services::CreatedAt,
                Services::UpdatedAt,
            ])
            .from(Services::Table)
            .and_where(Expr::col(Services::Name).eq(name))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::service_from_row).transpose()
    }

    async fn all_statuses(&self) -> Result<Vec<InstrumentationStatus>> {
        let sql = Query::select()
            .columns([
                Statuses::ServiceName,
                Statuses::Instrumented,
                Statuses::Language,
                Statuses::LastSeenTelemetry,
                Statuses::SpanCount24h,
                Statuses::CreatedAt,
                Statuses::UpdatedAt,
            ])
            .from(Statuses::Table)
            .order_by(Statuses::ServiceName, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::status_from_row).collect()
    }

    async fn status(&self, service_name: &str) -> Result<Option<InstrumentationStatus>> {
        let sql = Query::select()
            .columns([
                Statuses::ServiceName,
                Statuses::Instrumented,
                Statuses::Language,
                Statuses::LastSeenTelemetry,
                Statuses::SpanCount24h,
                Statuses::CreatedAt,
                Statuses::UpdatedAt,
            ])
            .from(Statuses::Table)
            .and_where(Expr::col(Statuses::ServiceName).eq(service_name))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::status_from_row).transpose()
    }

    async fn all_candidates(&self) -> Result<Vec<BrokenTraceCandidate>> {
        let sql = Self::select_candidates().to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::candidate_from_row).collect()
    }

    async fn recent_candidates(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<BrokenTraceCandidate>> {
        let sql = Self::select_candidates()
            .limit(limit)
            .offset(offset)
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::candidate_from_row).collect()
    }

    async fn candidate(&self, trace_key: &str) -> Result<Option<BrokenTraceCandidate>> {
        let sql = Query::select()
            .columns([
                Candidates::TraceKey,
                Candidates::RootService,
                Candidates::MissingServices,
                Candidates::TotalServices,
                Candidates::MissingCount,
                Candidates::AnalyzedAt,
            ])
            .from(Candidates::Table)
            .and_where(Expr::col(Candidates::TraceKey).eq(trace_key))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::candidate_from_row).transpose()
    }

    async fn latest_completed_run(&self, stage: SyncStage) -> Result<Option<SyncRun>> {
        let sql = Self::select_runs()
            .and_where(Expr::col(SyncRuns::Stage).eq(stage.as_str()))
            .and_where(Expr::col(SyncRuns::Status).eq(SyncStatus::Completed.as_str()))
            .order_by(SyncRuns::CompletedAt, Order::Desc)
            .limit(1)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::run_from_row).transpose()
    }

    async fn recent_runs(&self, limit: u64) -> Result<Vec<SyncRun>> {
        let sql = Self::select_runs()
            .order_by(SyncRuns::Id, Order::Desc)
            .limit(limit)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::run_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::super::entities::TelemetryEntry;
    use super::*;

    fn entry(name: &str) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            tags: BTreeMap::from([("env".to_string(), "prod".to_string())]),
            team: Some("checkout".to_string()),
            environment: Some("prod".to_string()),
            infrastructure: Infrastructure::Eks,
            customer_facing: false,
            last_seen: Utc::now(),
        }
    }

    async fn store() -> SqliteCoverageStore {
        SqliteCoverageStore::connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn upsert_preserves_created_at_and_bumps_updated_at() {
        let store = store().await;
        store.upsert_services(&[entry("api")]).await.unwrap();
        let first = store.service("api").await.unwrap().unwrap();

        let mut changed = entry("api");
        changed.team = Some("payments".to_string());
        store.upsert_services(&[changed]).await.unwrap();

        let second = store.service("api").await.unwrap().unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.team.as_deref(), Some("payments"));
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn negative_coverage_keeps_prior_language() {
        let store = store().await;
        store.upsert_services(&[entry("api")]).await.unwrap();

        let observed = TelemetryEntry {
            service_name: "api".to_string(),
            language: Some("Go".to_string()),
            last_seen: Utc::now(),
            span_count_24h: 42,
        };
        store
            .apply_coverage(&[CoverageUpdate::observed(&observed)])
            .await
            .unwrap();

        store
            .apply_coverage(&[CoverageUpdate::negative("api")])
            .await
            .unwrap();

        let status = store.status("api").await.unwrap().unwrap();
        assert!(!status.instrumented);
        assert_eq!(status.language.as_deref(), Some("Go"));
        assert!(status.last_seen_telemetry.is_some());
    }

    #[tokio::test]
    async fn replace_candidates_discards_prior_set() {
        let store = store().await;
        let old = BrokenTraceCandidate {
            trace_key: "old".to_string(),
            root_service: "api".to_string(),
            missing_services: vec!["api".to_string()],
            total_services: 1,
            missing_count: 1,
            analyzed_at: Utc::now(),
        };
        store.replace_candidates(&[old]).await.unwrap();

        let new = BrokenTraceCandidate {
            trace_key: "new".to_string(),
            root_service: "web".to_string(),
            missing_services: vec!["web".to_string()],
            total_services: 1,
            missing_count: 1,
            analyzed_at: Utc::now(),
        };
        store.replace_candidates(&[new]).await.unwrap();

        let all = store.all_candidates().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].trace_key, "new");
        assert!(store.candidate("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_log_round_trip() {
        let store = store().await;
        let id = store.open_run(SyncStage::Catalog).await.unwrap();
        store
            .finish_run(id, SyncStatus::Completed, 7, None)
            .await
            .unwrap();

        let latest = store
            .latest_completed_run(SyncStage::Catalog)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.records_processed, 7);
        assert!(latest.completed_at.is_some());
        assert!(latest.error_message.is_none());

        assert!(store
            .latest_completed_run(SyncStage::Coverage)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn finish_unknown_run_is_an_error() {
        let store = store().await;
        let err = store
            .finish_run(999, SyncStatus::Failed, 0, Some("boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound(999)));
    }

    #[tokio::test]
    async fn connect_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("coverage.db");
        let store = SqliteCoverageStore::connect(path.to_str().unwrap())
            .await
            .unwrap();
        store.upsert_services(&[entry("api")]).await.unwrap();
        assert_eq!(store.all_services().await.unwrap().len(), 1);
    }
}
