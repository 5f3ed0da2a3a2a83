//! SQLite scan store
//!
//! Handles all database interactions for workflows, requests, results and
//! remote job records. JSON payload columns are stored as TEXT.

use super::{RemoteJobFilter, RemoteJobUpdate, ScanStore, StoreError};
use crate::models::{
    now_iso, JsonMap, RemoteJobRecord, ScanRequest, ScanResult, Workflow, WorkflowState,
    WorkflowStep,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

const MEMORY_URL: &str = "sqlite::memory:";

const UPSERT_STEP: &str = "INSERT INTO workflow_steps (id, workflow_id, agent, input, output, status, dependencies) \
     VALUES (?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT(id) DO UPDATE SET workflow_id = excluded.workflow_id, agent = excluded.agent, \
     input = excluded.input, output = excluded.output, status = excluded.status, \
     dependencies = excluded.dependencies";

const JOB_COLUMNS: &str = "id, request_id, agent, target, k8s_job_name, namespace, status, \
     created_at, started_at, completed_at, error_message, metadata";

/// Database connection pool for scan persistence
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `db_url` and run migrations
    ///
    /// Accepts `sqlite:` URLs or bare file paths.
    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        let in_memory = db_url.contains(":memory:");

        let connection_string = if db_url.starts_with("sqlite:") {
            db_url.to_string()
        } else {
            format!("sqlite:{}", db_url)
        };

        if !in_memory {
            let path = connection_string
                .trim_start_matches("sqlite:")
                .trim_start_matches("//");
            if let Some(parent) = PathBuf::from(path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Connection(format!("Failed to create db directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&connection_string)
            .map_err(|e| StoreError::Connection(format!("Invalid database path: {}", e)))?
            .create_if_missing(true);

        // Each in-memory connection is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!("Connected to SQLite database at: {}", db_url);

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// A private in-memory database, used by tests and ephemeral runs
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect(MEMORY_URL).await
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations...");

        let migration_sql = include_str!("../../migrations/001_create_scan_tables.sql");

        // Strip comments and normalize whitespace
        let mut cleaned_sql = String::new();
        for line in migration_sql.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }
            let without_comments = match trimmed.find("--") {
                Some(comment_pos) => &trimmed[..comment_pos],
                None => trimmed,
            };
            cleaned_sql.push_str(without_comments.trim());
            cleaned_sql.push(' ');
        }

        let statements = cleaned_sql
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty());

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    StoreError::Migration(format!(
                        "{} - Statement: {}",
                        e,
                        statement.chars().take(100).collect::<String>()
                    ))
                })?;
        }

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    Ok(serde_json::from_str(text)?)
}

fn from_json_opt<T: DeserializeOwned>(text: Option<String>) -> Result<Option<T>, StoreError> {
    text.as_deref().map(from_json).transpose()
}

fn upsert_step(step: &WorkflowStep) -> Result<Query<'static, Sqlite, SqliteArguments<'static>>, StoreError> {
    let output = step.output.as_ref().map(to_json).transpose()?;
    Ok(sqlx::query(UPSERT_STEP)
        .bind(step.id.clone())
        .bind(step.workflow_id.clone())
        .bind(step.agent.clone())
        .bind(to_json(&step.input)?)
        .bind(output)
        .bind(step.status.as_str())
        .bind(to_json(&step.dependencies)?))
}

#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    state: String,
    context: String,
}

#[derive(FromRow)]
struct StepRow {
    id: String,
    workflow_id: String,
    agent: String,
    input: String,
    output: Option<String>,
    status: String,
    dependencies: String,
}

impl StepRow {
    fn into_step(self) -> Result<WorkflowStep, StoreError> {
        Ok(WorkflowStep {
            id: self.id,
            workflow_id: self.workflow_id,
            agent: self.agent,
            input: from_json(&self.input)?,
            output: from_json_opt(self.output)?,
            status: self.status.parse()?,
            dependencies: from_json(&self.dependencies)?,
        })
    }
}

#[derive(FromRow)]
struct RequestRow {
    id: String,
    target: String,
    requested_agents: String,
    priority: i64,
    workflow_id: Option<String>,
    execution_mode: Option<String>,
}

impl RequestRow {
    fn into_request(self) -> Result<ScanRequest, StoreError> {
        Ok(ScanRequest {
            id: self.id,
            target: self.target,
            requested_agents: from_json(&self.requested_agents)?,
            priority: self.priority,
            workflow_id: self.workflow_id,
            execution_mode: self.execution_mode.as_deref().map(str::parse).transpose()?,
        })
    }
}

#[derive(FromRow)]
struct ResultRow {
    id: String,
    request_id: String,
    agent: String,
    status: String,
    output: String,
    analysis: Option<String>,
    metadata: String,
}

impl ResultRow {
    fn into_result(self) -> Result<ScanResult, StoreError> {
        Ok(ScanResult {
            id: self.id,
            request_id: self.request_id,
            agent: self.agent,
            status: self.status.parse()?,
            output: from_json(&self.output)?,
            analysis: from_json_opt(self.analysis)?,
            metadata: from_json(&self.metadata)?,
        })
    }
}

#[derive(FromRow)]
struct JobRow {
    id: String,
    request_id: String,
    agent: String,
    target: String,
    k8s_job_name: String,
    namespace: String,
    status: String,
    created_at: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    error_message: Option<String>,
    metadata: Option<String>,
}

impl JobRow {
    fn into_record(self) -> Result<RemoteJobRecord, StoreError> {
        Ok(RemoteJobRecord {
            id: self.id,
            request_id: self.request_id,
            agent: self.agent,
            target: self.target,
            job_name: self.k8s_job_name,
            namespace: self.namespace,
            status: self.status.parse()?,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_message: self.error_message,
            metadata: from_json_opt::<JsonMap>(self.metadata)?,
        })
    }
}

fn collect_jobs(rows: Vec<JobRow>) -> Result<Vec<RemoteJobRecord>, StoreError> {
    rows.into_iter().map(JobRow::into_record).collect()
}

#[async_trait]
impl ScanStore for SqliteStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflows (id, name, description, state, context) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, description = excluded.description, \
             state = excluded.state, context = excluded.context",
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.state.as_str())
        .bind(to_json(&workflow.context)?)
        .execute(&mut *tx)
        .await?;

        for step in &workflow.steps {
            upsert_step(step)?.execute(&mut *tx).await?;
        }

        tx.commit().await?;

        debug!(workflow_id = %workflow.id, steps = workflow.steps.len(), "Saved workflow");
        Ok(())
    }

    async fn save_workflow_step(&self, step: &WorkflowStep) -> Result<(), StoreError> {
        upsert_step(step)?.execute(&self.pool).await?;
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            "SELECT id, name, description, state, context FROM workflows WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let steps = sqlx::query_as::<_, StepRow>(
            "SELECT id, workflow_id, agent, input, output, status, dependencies \
             FROM workflow_steps WHERE workflow_id = ? ORDER BY rowid ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StepRow::into_step)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Workflow {
            id: row.id,
            name: row.name,
            description: row.description,
            state: row.state.parse()?,
            steps,
            context: from_json(&row.context)?,
        }))
    }

    async fn update_workflow_state(
        &self,
        id: &str,
        state: WorkflowState,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE workflows SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_scan_request(&self, request: &ScanRequest) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO scan_requests (id, target, requested_agents, priority, workflow_id, execution_mode, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id)
        .bind(&request.target)
        .bind(to_json(&request.requested_agents)?)
        .bind(request.priority)
        .bind(&request.workflow_id)
        .bind(request.execution_mode.map(|m| m.as_str()))
        .bind(now_iso())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(request.id.clone())
            }
            other => StoreError::Database(other),
        })?;

        debug!(request_id = %request.id, "Saved scan request");
        Ok(())
    }

    async fn list_scan_history(&self, limit: i64) -> Result<Vec<ScanRequest>, StoreError> {
        sqlx::query_as::<_, RequestRow>(
            "SELECT id, target, requested_agents, priority, workflow_id, execution_mode \
             FROM scan_requests ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(RequestRow::into_request)
        .collect()
    }

    async fn save_scan_result(&self, result: &ScanResult) -> Result<(), StoreError> {
        let analysis = result.analysis.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "INSERT INTO scan_results (id, request_id, agent, status, output, analysis, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET request_id = excluded.request_id, agent = excluded.agent, \
             status = excluded.status, output = excluded.output, analysis = excluded.analysis, \
             metadata = excluded.metadata",
        )
        .bind(&result.id)
        .bind(&result.request_id)
        .bind(&result.agent)
        .bind(result.status.as_str())
        .bind(to_json(&result.output)?)
        .bind(analysis)
        .bind(to_json(&result.metadata)?)
        .execute(&self.pool)
        .await?;

        debug!(result_id = %result.id, status = %result.status, "Saved scan result");
        Ok(())
    }

    async fn get_scan_results(&self, request_id: &str) -> Result<Vec<ScanResult>, StoreError> {
        sqlx::query_as::<_, ResultRow>(
            "SELECT id, request_id, agent, status, output, analysis, metadata \
             FROM scan_results WHERE request_id = ? ORDER BY rowid ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ResultRow::into_result)
        .collect()
    }

    async fn get_scan_report(&self, result_id: &str) -> Result<Option<ScanResult>, StoreError> {
        sqlx::query_as::<_, ResultRow>(
            "SELECT id, request_id, agent, status, output, analysis, metadata \
             FROM scan_results WHERE id = ?",
        )
        .bind(result_id)
        .fetch_optional(&self.pool)
        .await?
        .map(ResultRow::into_result)
        .transpose()
    }

    async fn save_remote_job(&self, record: &RemoteJobRecord) -> Result<(), StoreError> {
        let metadata = record.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(&format!(
            "INSERT INTO k8s_jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET request_id = excluded.request_id, agent = excluded.agent, \
             target = excluded.target, k8s_job_name = excluded.k8s_job_name, \
             namespace = excluded.namespace, status = excluded.status, \
             created_at = excluded.created_at, started_at = excluded.started_at, \
             completed_at = excluded.completed_at, error_message = excluded.error_message, \
             metadata = excluded.metadata",
            JOB_COLUMNS
        ))
        .bind(&record.id)
        .bind(&record.request_id)
        .bind(&record.agent)
        .bind(&record.target)
        .bind(&record.job_name)
        .bind(&record.namespace)
        .bind(record.status.as_str())
        .bind(&record.created_at)
        .bind(&record.started_at)
        .bind(&record.completed_at)
        .bind(&record.error_message)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %record.id, job_name = %record.job_name, status = %record.status, "Saved remote job record");
        Ok(())
    }

    async fn update_remote_job_status(
        &self,
        id: &str,
        update: RemoteJobUpdate,
    ) -> Result<(), StoreError> {
        let metadata = update.metadata.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "UPDATE k8s_jobs SET status = ?, \
             started_at = COALESCE(?, started_at), \
             completed_at = COALESCE(?, completed_at), \
             error_message = COALESCE(?, error_message), \
             metadata = COALESCE(?, metadata) \
             WHERE id = ?",
        )
        .bind(update.status.as_str())
        .bind(&update.started_at)
        .bind(&update.completed_at)
        .bind(&update.error_message)
        .bind(metadata)
        .bind(id)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %id, status = %update.status, "Updated remote job status");
        Ok(())
    }

    async fn get_remote_job(&self, id: &str) -> Result<Option<RemoteJobRecord>, StoreError> {
        sqlx::query_as::<_, JobRow>(&format!("SELECT {} FROM k8s_jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(JobRow::into_record)
            .transpose()
    }

    async fn list_active_remote_jobs(
        &self,
        limit: i64,
    ) -> Result<Vec<RemoteJobRecord>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM k8s_jobs WHERE status IN ('pending', 'running') \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
            JOB_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect_jobs(rows)
    }

    async fn list_remote_jobs(
        &self,
        filter: &RemoteJobFilter,
    ) -> Result<Vec<RemoteJobRecord>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM k8s_jobs \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR request_id = ?2) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
            JOB_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&filter.request_id)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;
        collect_jobs(rows)
    }
}
