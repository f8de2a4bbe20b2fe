//! PostgreSQL migration store
//!
//! Transitions become single guarded `UPDATE ... RETURNING` statements. A
//! start that carries an admission limit first locks its cluster row, so
//! the running-alter count in the statement cannot race another start.

use super::models::{
    Cluster, CustomOptions, MetaRequest, Migration, MigrationDefinition, MigrationStatus, RunProgress,
    TableStats,
};
use super::store::{BatchOutcome, MigrationRepository};
use super::transition::{ApplyOutcome, Assignment, BatchPolicy, Effect, Guard, Transition};
use crate::ddl::DdlAction;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use postgres_types::ToSql;
use std::collections::HashMap;
use tokio_postgres::{Row, Transaction as PgTransaction};
use tracing::debug;
use uuid::Uuid;

type Param = Box<dyn ToSql + Sync + Send>;

pub(crate) const MIGRATION_COLUMNS: &str = "id, lock_version, cluster_name, database, ddl_statement, \
     final_insert, pr_url, custom_options, initial_runtype, action, mode, table_name, parsed_statement, \
     requestor, meta_request_id, status, runtype, staged, auto_run, editable, approved_by, approved_at, \
     started_at, completed_at, error_message, table_rows_start, table_rows_end, table_size_start, \
     table_size_end, index_size_start, index_size_end, copy_percentage, run_host, work_directory, \
     created_at, updated_at";

const STATS_COLUMNS: [&str; 6] = [
    "table_rows_start",
    "table_rows_end",
    "table_size_start",
    "table_size_end",
    "index_size_start",
    "index_size_end",
];

fn status_codes(statuses: &[MigrationStatus]) -> Vec<i16> {
    statuses.iter().map(MigrationStatus::code).collect()
}

fn parse_text<T: std::str::FromStr<Err = String>>(row: &Row, column: &str) -> Result<T, AppError> {
    let value: String = row.try_get(column)?;
    value.parse().map_err(AppError::Internal)
}

pub(crate) fn migration_from_row(row: &Row) -> Result<Migration, AppError> {
    let code: i16 = row.try_get("status")?;
    let status = MigrationStatus::from_code(code)
        .ok_or_else(|| AppError::Internal(format!("Unknown migration status code {}", code)))?;
    let custom_options: serde_json::Value = row.try_get("custom_options")?;

    Ok(Migration {
        id: row.try_get("id")?,
        lock_version: row.try_get("lock_version")?,
        definition: MigrationDefinition {
            cluster_name: row.try_get("cluster_name")?,
            database: row.try_get("database")?,
            ddl_statement: row.try_get("ddl_statement")?,
            final_insert: row.try_get("final_insert")?,
            pr_url: row.try_get("pr_url")?,
            custom_options: CustomOptions::decode(&custom_options),
            initial_runtype: parse_text(row, "initial_runtype")?,
            action: parse_text(row, "action")?,
            mode: parse_text(row, "mode")?,
            table: row.try_get("table_name")?,
            parsed_statement: row.try_get("parsed_statement")?,
        },
        requestor: row.try_get("requestor")?,
        meta_request_id: row.try_get("meta_request_id")?,
        status,
        runtype: parse_text(row, "runtype")?,
        staged: row.try_get("staged")?,
        auto_run: row.try_get("auto_run")?,
        editable: row.try_get("editable")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
        progress: RunProgress {
            stats: TableStats {
                table_rows_start: row.try_get("table_rows_start")?,
                table_rows_end: row.try_get("table_rows_end")?,
                table_size_start: row.try_get("table_size_start")?,
                table_size_end: row.try_get("table_size_end")?,
                index_size_start: row.try_get("index_size_start")?,
                index_size_end: row.try_get("index_size_end")?,
            },
            copy_percentage: row.try_get("copy_percentage")?,
            run_host: row.try_get("run_host")?,
            work_directory: row.try_get("work_directory")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn meta_request_from_row(row: &Row) -> Result<MetaRequest, AppError> {
    let custom_options: serde_json::Value = row.try_get("custom_options")?;
    Ok(MetaRequest {
        id: row.try_get("id")?,
        ddl_statement: row.try_get("ddl_statement")?,
        final_insert: row.try_get("final_insert")?,
        pr_url: row.try_get("pr_url")?,
        requestor: row.try_get("requestor")?,
        custom_options: CustomOptions::decode(&custom_options),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Positional statement under construction
#[derive(Default)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    /// Bind a value and return its placeholder
    fn bind<T: ToSql + Sync + Send + 'static>(&mut self, value: T) -> String {
        self.params.push(Box::new(value));
        format!("${}", self.params.len())
    }

    fn refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect()
    }
}

/// `WHERE` clause for the row-local and aggregate parts of a guard.
/// `$1` is always the migration id.
fn where_clause(stmt: &mut Statement, guard: &Guard) -> String {
    let mut conditions = vec!["id = $1".to_string()];
    if let Some(statuses) = &guard.statuses {
        conditions.push(format!("status = ANY({})", stmt.bind(status_codes(statuses))));
    }
    if let Some(version) = guard.lock_version {
        conditions.push(format!("lock_version = {}", stmt.bind(version)));
    }
    if let Some(staged) = guard.staged {
        conditions.push(format!("staged = {}", stmt.bind(staged)));
    }
    if let Some(editable) = guard.editable {
        conditions.push(format!("editable = {}", stmt.bind(editable)));
    }
    if let Some(limit) = guard.admission_limit {
        let running = stmt.bind(status_codes(&MigrationStatus::RUNNING));
        let alter = stmt.bind(DdlAction::Alter.as_str().to_string());
        let limit = stmt.bind(limit);
        conditions.push(format!(
            "(SELECT COUNT(*) FROM migrations r WHERE r.cluster_name = migrations.cluster_name \
             AND r.id <> migrations.id AND r.action = {} AND r.status = ANY({})) < {}",
            alter, running, limit
        ));
    }
    conditions.join(" AND ")
}

fn set_clauses(stmt: &mut Statement, assignment: &Assignment) -> Vec<String> {
    match assignment {
        Assignment::Status(status) => vec![format!("status = {}", stmt.bind(status.code()))],
        Assignment::RunType(runtype) => vec![format!("runtype = {}", stmt.bind(runtype.to_string()))],
        Assignment::Staged(staged) => vec![format!("staged = {}", stmt.bind(*staged))],
        Assignment::AutoRun(auto_run) => vec![format!("auto_run = {}", stmt.bind(*auto_run))],
        Assignment::Editable(editable) => vec![format!("editable = {}", stmt.bind(*editable))],
        Assignment::ApprovedBy(by) => vec![format!("approved_by = {}", stmt.bind(by.clone()))],
        Assignment::ApprovedAt(at) => vec![format!("approved_at = {}", stmt.bind(*at))],
        Assignment::StartedAt(at) => vec![format!("started_at = {}", stmt.bind(*at))],
        Assignment::CompletedAt(at) => vec![format!("completed_at = {}", stmt.bind(*at))],
        Assignment::ErrorMessage(msg) => vec![format!("error_message = {}", stmt.bind(msg.clone()))],
        Assignment::Definition(d) => vec![
            format!("cluster_name = {}", stmt.bind(d.cluster_name.clone())),
            format!("database = {}", stmt.bind(d.database.clone())),
            format!("ddl_statement = {}", stmt.bind(d.ddl_statement.clone())),
            format!("final_insert = {}", stmt.bind(d.final_insert.clone())),
            format!("pr_url = {}", stmt.bind(d.pr_url.clone())),
            format!("custom_options = {}", stmt.bind(d.custom_options.encode())),
            format!("initial_runtype = {}", stmt.bind(d.initial_runtype.to_string())),
            format!("action = {}", stmt.bind(d.action.to_string())),
            format!("mode = {}", stmt.bind(d.mode.to_string())),
            format!("table_name = {}", stmt.bind(d.table.clone())),
            format!("parsed_statement = {}", stmt.bind(d.parsed_statement.clone())),
        ],
        Assignment::Progress(p) => {
            let mut coalesce = |column: &str, value: Param| {
                stmt.params.push(value);
                format!("{col} = COALESCE(${n}, {col})", col = column, n = stmt.params.len())
            };
            vec![
                coalesce("table_rows_start", Box::new(p.stats.table_rows_start)),
                coalesce("table_rows_end", Box::new(p.stats.table_rows_end)),
                coalesce("table_size_start", Box::new(p.stats.table_size_start)),
                coalesce("table_size_end", Box::new(p.stats.table_size_end)),
                coalesce("index_size_start", Box::new(p.stats.index_size_start)),
                coalesce("index_size_end", Box::new(p.stats.index_size_end)),
                coalesce("copy_percentage", Box::new(p.copy_percentage)),
                coalesce("run_host", Box::new(p.run_host.clone())),
                coalesce("work_directory", Box::new(p.work_directory.clone())),
            ]
        }
        Assignment::ClearStats => STATS_COLUMNS.iter().map(|c| format!("{} = NULL", c)).collect(),
    }
}

/// Guarded statement for one transition on migration `id`
pub(crate) fn transition_statement(id: Uuid, transition: &Transition) -> Statement {
    let mut stmt = Statement::default();
    stmt.bind(id);

    match &transition.effect {
        Effect::Delete => {
            let conditions = where_clause(&mut stmt, &transition.guard);
            stmt.sql = format!(
                "DELETE FROM migrations WHERE {} RETURNING {}",
                conditions, MIGRATION_COLUMNS
            );
        }
        Effect::Update(assignments) => {
            let mut sets: Vec<String> = assignments
                .iter()
                .flat_map(|a| set_clauses(&mut stmt, a))
                .collect();
            sets.push("lock_version = lock_version + 1".to_string());
            sets.push(format!("updated_at = {}", stmt.bind(Utc::now())));
            let conditions = where_clause(&mut stmt, &transition.guard);
            stmt.sql = format!(
                "UPDATE migrations SET {} WHERE {} RETURNING {}",
                sets.join(", "),
                conditions,
                MIGRATION_COLUMNS
            );
        }
    }
    stmt
}

fn insert_statement(m: &Migration) -> Statement {
    let mut stmt = Statement::default();
    let d = &m.definition;
    let p = &m.progress;
    let placeholders = [
        stmt.bind(m.id),
        stmt.bind(m.lock_version),
        stmt.bind(d.cluster_name.clone()),
        stmt.bind(d.database.clone()),
        stmt.bind(d.ddl_statement.clone()),
        stmt.bind(d.final_insert.clone()),
        stmt.bind(d.pr_url.clone()),
        stmt.bind(d.custom_options.encode()),
        stmt.bind(d.initial_runtype.to_string()),
        stmt.bind(d.action.to_string()),
        stmt.bind(d.mode.to_string()),
        stmt.bind(d.table.clone()),
        stmt.bind(d.parsed_statement.clone()),
        stmt.bind(m.requestor.clone()),
        stmt.bind(m.meta_request_id),
        stmt.bind(m.status.code()),
        stmt.bind(m.runtype.to_string()),
        stmt.bind(m.staged),
        stmt.bind(m.auto_run),
        stmt.bind(m.editable),
        stmt.bind(m.approved_by.clone()),
        stmt.bind(m.approved_at),
        stmt.bind(m.started_at),
        stmt.bind(m.completed_at),
        stmt.bind(m.error_message.clone()),
        stmt.bind(p.stats.table_rows_start),
        stmt.bind(p.stats.table_rows_end),
        stmt.bind(p.stats.table_size_start),
        stmt.bind(p.stats.table_size_end),
        stmt.bind(p.stats.index_size_start),
        stmt.bind(p.stats.index_size_end),
        stmt.bind(p.copy_percentage),
        stmt.bind(p.run_host.clone()),
        stmt.bind(p.work_directory.clone()),
        stmt.bind(m.created_at),
        stmt.bind(m.updated_at),
    ];
    stmt.sql = format!(
        "INSERT INTO migrations ({}) VALUES ({}) RETURNING {}",
        MIGRATION_COLUMNS,
        placeholders.join(", "),
        MIGRATION_COLUMNS
    );
    stmt
}

/// Migration store backed by a deadpool-postgres pool
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// One transition inside an open transaction
    async fn apply_in(tx: &PgTransaction<'_>, id: Uuid, transition: &Transition) -> Result<ApplyOutcome, AppError> {
        if transition.guard.admission_limit.is_some() {
            // Serializes admission per cluster until the transaction ends
            tx.query(
                "SELECT c.name FROM clusters c JOIN migrations m ON m.cluster_name = c.name \
                 WHERE m.id = $1 FOR UPDATE OF c",
                &[&id],
            )
            .await?;
        }

        let stmt = transition_statement(id, transition);
        if let Some(row) = tx.query_opt(stmt.sql.as_str(), &stmt.refs()).await? {
            return Ok(ApplyOutcome::Applied(migration_from_row(&row)?));
        }

        // Nothing matched: tell a failed row guard from a full cluster
        let query = format!("SELECT {} FROM migrations WHERE id = $1", MIGRATION_COLUMNS);
        let outcome = match tx.query_opt(query.as_str(), &[&id]).await? {
            Some(row) if transition.guard.matches(&migration_from_row(&row)?) => ApplyOutcome::AtCapacity,
            _ => ApplyOutcome::Rejected,
        };
        debug!(migration_id = %id, transition = transition.name, outcome = ?outcome, "Guard did not match");
        Ok(outcome)
    }

    async fn owners(&self, cluster_name: Option<&str>) -> Result<HashMap<String, Vec<String>>, AppError> {
        let client = self.pool.get().await?;
        let rows = match cluster_name {
            Some(name) => {
                client
                    .query(
                        "SELECT cluster_name, username FROM cluster_owners WHERE cluster_name = $1 ORDER BY username",
                        &[&name],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        "SELECT cluster_name, username FROM cluster_owners ORDER BY cluster_name, username",
                        &[],
                    )
                    .await?
            }
        };

        let mut owners: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            owners
                .entry(row.try_get("cluster_name")?)
                .or_default()
                .push(row.try_get("username")?);
        }
        Ok(owners)
    }

    async fn query_migrations(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Migration>, AppError> {
        let client = self.pool.get().await?;
        client
            .query(sql, params)
            .await?
            .iter()
            .map(migration_from_row)
            .collect()
    }
}

fn cluster_from_row(row: &Row, owners: &mut HashMap<String, Vec<String>>) -> Result<Cluster, AppError> {
    let name: String = row.try_get("name")?;
    Ok(Cluster {
        owners: owners.remove(&name).unwrap_or_default(),
        rw_host: row.try_get("rw_host")?,
        port: row.try_get("port")?,
        admin_review_required: row.try_get("admin_review_required")?,
        name,
    })
}

#[async_trait]
impl MigrationRepository for PgStore {
    async fn upsert_cluster(&self, cluster: Cluster) -> Result<Cluster, AppError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute(
            "INSERT INTO clusters (name, rw_host, port, admin_review_required) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (name) DO UPDATE SET rw_host = EXCLUDED.rw_host, port = EXCLUDED.port, \
             admin_review_required = EXCLUDED.admin_review_required",
            &[&cluster.name, &cluster.rw_host, &cluster.port, &cluster.admin_review_required],
        )
        .await?;
        tx.execute("DELETE FROM cluster_owners WHERE cluster_name = $1", &[&cluster.name])
            .await?;
        for owner in &cluster.owners {
            tx.execute(
                "INSERT INTO cluster_owners (cluster_name, username) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&cluster.name, owner],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(cluster)
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>, AppError> {
        let row = {
            let client = self.pool.get().await?;
            client
                .query_opt(
                    "SELECT name, rw_host, port, admin_review_required FROM clusters WHERE name = $1",
                    &[&name],
                )
                .await?
        };
        match row {
            Some(row) => {
                let mut owners = self.owners(Some(name)).await?;
                Ok(Some(cluster_from_row(&row, &mut owners)?))
            }
            None => Ok(None),
        }
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, AppError> {
        let rows = {
            let client = self.pool.get().await?;
            client
                .query(
                    "SELECT name, rw_host, port, admin_review_required FROM clusters ORDER BY name",
                    &[],
                )
                .await?
        };
        let mut owners = self.owners(None).await?;
        rows.iter().map(|row| cluster_from_row(row, &mut owners)).collect()
    }

    async fn insert_meta_request(&self, meta: MetaRequest, members: Vec<Migration>) -> Result<(), AppError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute(
            "INSERT INTO meta_requests (id, ddl_statement, final_insert, pr_url, requestor, custom_options, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &meta.id,
                &meta.ddl_statement,
                &meta.final_insert,
                &meta.pr_url,
                &meta.requestor,
                &meta.custom_options.encode(),
                &meta.created_at,
                &meta.updated_at,
            ],
        )
        .await?;
        for member in &members {
            let stmt = insert_statement(member);
            tx.execute(stmt.sql.as_str(), &stmt.refs()).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_meta_request(&self, id: Uuid) -> Result<Option<MetaRequest>, AppError> {
        let client = self.pool.get().await?;
        client
            .query_opt(
                "SELECT id, ddl_statement, final_insert, pr_url, requestor, custom_options, created_at, updated_at \
                 FROM meta_requests WHERE id = $1",
                &[&id],
            )
            .await?
            .as_ref()
            .map(meta_request_from_row)
            .transpose()
    }

    async fn update_meta_request(&self, meta: MetaRequest) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE meta_requests SET ddl_statement = $2, final_insert = $3, pr_url = $4, \
                 custom_options = $5, updated_at = $6 WHERE id = $1",
                &[
                    &meta.id,
                    &meta.ddl_statement,
                    &meta.final_insert,
                    &meta.pr_url,
                    &meta.custom_options.encode(),
                    &meta.updated_at,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("Meta request {} not found", meta.id)));
        }
        Ok(())
    }

    async fn insert(&self, migration: Migration) -> Result<Migration, AppError> {
        let client = self.pool.get().await?;
        let stmt = insert_statement(&migration);
        let row = client.query_one(stmt.sql.as_str(), &stmt.refs()).await.map_err(|e| {
            if e.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION) {
                AppError::Conflict(format!("Migration {} already exists", migration.id))
            } else {
                AppError::Database(e)
            }
        })?;
        migration_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Migration>, AppError> {
        let query = format!("SELECT {} FROM migrations WHERE id = $1", MIGRATION_COLUMNS);
        Ok(self.query_migrations(&query, &[&id]).await?.pop())
    }

    async fn list(&self, status: Option<MigrationStatus>) -> Result<Vec<Migration>, AppError> {
        match status {
            Some(status) => {
                let query = format!(
                    "SELECT {} FROM migrations WHERE status = $1 ORDER BY updated_at DESC, created_at DESC",
                    MIGRATION_COLUMNS
                );
                self.query_migrations(&query, &[&status.code()]).await
            }
            None => {
                let query = format!(
                    "SELECT {} FROM migrations ORDER BY updated_at DESC, created_at DESC",
                    MIGRATION_COLUMNS
                );
                self.query_migrations(&query, &[]).await
            }
        }
    }

    async fn list_by_meta_request(&self, meta_request_id: Uuid) -> Result<Vec<Migration>, AppError> {
        let query = format!(
            "SELECT {} FROM migrations WHERE meta_request_id = $1 ORDER BY created_at",
            MIGRATION_COLUMNS
        );
        self.query_migrations(&query, &[&meta_request_id]).await
    }

    async fn staged(&self, limit: usize) -> Result<Vec<Migration>, AppError> {
        let query = format!(
            "SELECT {} FROM migrations WHERE staged AND status = ANY($1) \
             ORDER BY updated_at DESC, created_at DESC LIMIT $2",
            MIGRATION_COLUMNS
        );
        let machine = status_codes(&MigrationStatus::MACHINE);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_migrations(&query, &[&machine, &limit]).await
    }

    async fn oldest_auto_run(&self, status: MigrationStatus) -> Result<Vec<Migration>, AppError> {
        let query = format!(
            "SELECT DISTINCT ON (cluster_name) {} FROM migrations WHERE status = $1 AND auto_run \
             ORDER BY cluster_name, created_at, id",
            MIGRATION_COLUMNS
        );
        self.query_migrations(&query, &[&status.code()]).await
    }

    async fn apply(&self, id: Uuid, transition: &Transition) -> Result<ApplyOutcome, AppError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let outcome = Self::apply_in(&tx, id, transition).await?;
        if outcome.is_applied() {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(outcome)
    }

    async fn apply_all(
        &self,
        batch: Vec<(Uuid, Transition)>,
        policy: BatchPolicy,
    ) -> Result<BatchOutcome, AppError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let mut outcomes = Vec::with_capacity(batch.len());
        for (id, transition) in &batch {
            outcomes.push(Self::apply_in(&tx, *id, transition).await?);
        }

        let committed = match policy {
            BatchPolicy::AllOrNothing => outcomes.iter().all(ApplyOutcome::is_applied),
            BatchPolicy::BestEffort => outcomes.iter().any(ApplyOutcome::is_applied),
        };
        if committed {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }

        Ok(BatchOutcome { outcomes, committed })
    }
}
