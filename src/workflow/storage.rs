//! Execution state store
//!
//! `ExecutionStore` is the repository abstraction the scheduler core talks to.
//! `SqliteExecutionStore` is the sqlx-backed implementation used by the binary
//! and the tests. Every status transition is a single-row write; no locking
//! beyond what SQLite gives a single statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::cron;
use crate::error::{Result, SchedulerError};
use crate::workflow::types::{
    format_timestamp, new_id, parse_timestamp, ExecutionDetail, ExecutionStatus, ExecutionStep,
    UpsertOutcome, Workflow, WorkflowDefinition, WorkflowExecution, WorkflowStatus,
    WorkflowStatusSummary,
};

/// CRUD over workflows, executions and steps.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a workflow by name, or refresh description and schedule of an
    /// existing one. The stored status of an existing row is preserved.
    async fn upsert_workflow(&self, definition: &WorkflowDefinition) -> Result<UpsertOutcome>;

    /// Workflow by id, `None` when no row matches.
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>>;

    /// Workflow by its unique name. The match is exact and case-sensitive.
    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>>;

    /// Every stored workflow, ordered by name.
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;

    /// Set Active or Inactive. Fails with `WorkflowNotFound` for unknown ids.
    ///
    /// Only the cron trigger reads the status; targeted and manual runs of
    /// an Inactive workflow still execute.
    async fn set_workflow_status(&self, id: &str, status: WorkflowStatus) -> Result<()>;

    /// Replace the schedule. `None` or blank clears it; anything else must be
    /// a valid cron expression.
    async fn update_schedule(&self, id: &str, schedule: Option<&str>) -> Result<()>;

    /// Stamp when a worker last finished running the workflow.
    async fn touch_last_executed(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// New Pending execution. Fails with `WorkflowNotFound` for unknown parents.
    async fn create_execution(&self, workflow_id: &str, started: DateTime<Utc>) -> Result<WorkflowExecution>;

    /// Execution by id, `None` when no row matches.
    async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>>;

    /// Write back status, timestamps, duration and log of an execution.
    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<()>;

    /// All Pending executions, oldest `started` first.
    async fn pending_executions(&self) -> Result<Vec<WorkflowExecution>>;

    /// Oldest Pending execution of one workflow, reused by targeted dispatch
    /// instead of creating a new row.
    async fn oldest_pending_for_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowExecution>>;

    /// Most recent execution by `started`.
    async fn latest_execution(&self, workflow_id: &str) -> Result<Option<WorkflowExecution>>;

    /// Whether anything is Pending or Running for the workflow.
    async fn has_in_flight_execution(&self, workflow_id: &str) -> Result<bool>;

    /// Record a new step row, normally in Running state.
    ///
    /// Fails with `ExecutionNotFound` for unknown parents.
    async fn insert_step(&self, step: &ExecutionStep) -> Result<()>;

    /// Write back status, output, completion time and duration of a step.
    async fn update_step(&self, step: &ExecutionStep) -> Result<()>;

    /// Steps in creation order.
    async fn steps_for_execution(&self, execution_id: &str) -> Result<Vec<ExecutionStep>>;

    /// An execution together with its steps, `None` when the id is unknown.
    async fn execution_with_steps(&self, id: &str) -> Result<Option<ExecutionDetail>> {
        let Some(execution) = self.get_execution(id).await? else {
            return Ok(None);
        };
        let steps = self.steps_for_execution(id).await?;
        Ok(Some(ExecutionDetail { execution, steps }))
    }

    /// Every workflow with its latest execution and whether work is in flight.
    async fn workflow_statuses(&self) -> Result<Vec<WorkflowStatusSummary>> {
        let mut summaries = Vec::new();
        for workflow in self.list_workflows().await? {
            let last_execution = self.latest_execution(&workflow.id).await?;
            let is_running = self.has_in_flight_execution(&workflow.id).await?;
            summaries.push(WorkflowStatusSummary {
                workflow,
                last_execution,
                is_running,
            });
        }
        Ok(summaries)
    }
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) a database file shared by the dispatcher and
    /// its worker processes, and make sure the schema exists.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("🗄️ Opening execution database: {}", path.display());
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                schedule TEXT,
                status INTEGER NOT NULL DEFAULT 1,
                last_executed TEXT,
                created TEXT NOT NULL,
                modified TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL REFERENCES workflows(id),
                status TEXT NOT NULL DEFAULT 'pending',
                started TEXT,
                completed TEXT,
                duration INTEGER,
                log TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_steps (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL REFERENCES workflow_executions(id),
                step_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                input_data TEXT,
                output_data TEXT,
                started TEXT,
                completed TEXT,
                duration INTEGER NOT NULL DEFAULT 0,
                created TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_workflow ON workflow_executions(workflow_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_status ON workflow_executions(status, started)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_steps_execution ON execution_steps(execution_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn workflow_exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn execution_exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM workflow_executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

const WORKFLOW_COLUMNS: &str =
    "id, name, description, schedule, status, last_executed, created, modified";
const EXECUTION_COLUMNS: &str = "id, workflow_id, status, started, completed, duration, log";
const STEP_COLUMNS: &str =
    "id, execution_id, step_name, status, input_data, output_data, started, completed, duration, created";

fn optional_timestamp(row: &SqliteRow, field: &'static str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(field)?;
    raw.map(|value| parse_timestamp(field, &value)).transpose()
}

fn required_timestamp(row: &SqliteRow, field: &'static str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(field)?;
    parse_timestamp(field, &raw)
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow> {
    Ok(Workflow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        schedule: row.try_get("schedule")?,
        status: WorkflowStatus::from_i64(row.try_get("status")?),
        last_executed: optional_timestamp(row, "last_executed")?,
        created: required_timestamp(row, "created")?,
        modified: required_timestamp(row, "modified")?,
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution> {
    let status: String = row.try_get("status")?;
    Ok(WorkflowExecution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        status: status.parse()?,
        started: optional_timestamp(row, "started")?,
        completed: optional_timestamp(row, "completed")?,
        duration: row.try_get("duration")?,
        log: row.try_get("log")?,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<ExecutionStep> {
    let status: String = row.try_get("status")?;
    Ok(ExecutionStep {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        step_name: row.try_get("step_name")?,
        status: status.parse()?,
        input_data: row.try_get("input_data")?,
        output_data: row.try_get("output_data")?,
        started: optional_timestamp(row, "started")?,
        completed: optional_timestamp(row, "completed")?,
        duration: row.try_get("duration")?,
        created: required_timestamp(row, "created")?,
    })
}

fn normalized_schedule(schedule: Option<&str>) -> Result<Option<String>> {
    match schedule.map(str::trim).filter(|s| !s.is_empty()) {
        Some(expr) => {
            cron::parse(expr)?;
            Ok(Some(expr.to_string()))
        }
        None => Ok(None),
    }
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn upsert_workflow(&self, definition: &WorkflowDefinition) -> Result<UpsertOutcome> {
        let schedule = normalized_schedule(definition.schedule.as_deref())?;
        let now = format_timestamp(&Utc::now());

        let updated = sqlx::query(
            "UPDATE workflows SET description = ?, schedule = ?, modified = ? WHERE name = ?",
        )
        .bind(&definition.description)
        .bind(&schedule)
        .bind(&now)
        .bind(&definition.name)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(UpsertOutcome::Updated);
        }

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, description, schedule, status, created, modified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new_id())
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(&schedule)
        .bind(definition.default_status.as_i64())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(UpsertOutcome::Created)
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let query = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>> {
        let query = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE name = ?");
        let row = sqlx::query(&query).bind(name).fetch_optional(&self.pool).await?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let query = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY name ASC");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(workflow_from_row).collect()
    }

    async fn set_workflow_status(&self, id: &str, status: WorkflowStatus) -> Result<()> {
        let result = sqlx::query("UPDATE workflows SET status = ?, modified = ? WHERE id = ?")
            .bind(status.as_i64())
            .bind(format_timestamp(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::WorkflowNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn update_schedule(&self, id: &str, schedule: Option<&str>) -> Result<()> {
        let schedule = normalized_schedule(schedule)?;
        let result = sqlx::query("UPDATE workflows SET schedule = ?, modified = ? WHERE id = ?")
            .bind(&schedule)
            .bind(format_timestamp(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::WorkflowNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn touch_last_executed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE workflows SET last_executed = ?, modified = ? WHERE id = ?")
            .bind(format_timestamp(&at))
            .bind(format_timestamp(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::WorkflowNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn create_execution(&self, workflow_id: &str, started: DateTime<Utc>) -> Result<WorkflowExecution> {
        if !self.workflow_exists(workflow_id).await? {
            return Err(SchedulerError::WorkflowNotFound(workflow_id.to_string()));
        }

        let execution = WorkflowExecution::pending(workflow_id, started);
        sqlx::query(
            "INSERT INTO workflow_executions (id, workflow_id, status, started) VALUES (?, ?, ?, ?)",
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(execution.started.as_ref().map(format_timestamp))
        .execute(&self.pool)
        .await?;

        Ok(execution)
    }

    async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>> {
        let query = format!("SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = ?");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(execution_from_row).transpose()
    }

    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = ?, started = ?, completed = ?, duration = ?, log = ?
            WHERE id = ?
            "#,
        )
        .bind(execution.status.as_str())
        .bind(execution.started.as_ref().map(format_timestamp))
        .bind(execution.completed.as_ref().map(format_timestamp))
        .bind(execution.duration)
        .bind(&execution.log)
        .bind(&execution.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::ExecutionNotFound(execution.id.clone()));
        }
        Ok(())
    }

    async fn pending_executions(&self) -> Result<Vec<WorkflowExecution>> {
        let query = format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE status = 'pending' ORDER BY started ASC, rowid ASC"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(execution_from_row).collect()
    }

    async fn oldest_pending_for_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowExecution>> {
        let query = format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE status = 'pending' AND workflow_id = ? ORDER BY started ASC, rowid ASC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(execution_from_row).transpose()
    }

    async fn latest_execution(&self, workflow_id: &str) -> Result<Option<WorkflowExecution>> {
        let query = format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE workflow_id = ? ORDER BY started DESC, rowid DESC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(execution_from_row).transpose()
    }

    async fn has_in_flight_execution(&self, workflow_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM workflow_executions WHERE workflow_id = ? AND status IN ('pending', 'running') LIMIT 1",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn insert_step(&self, step: &ExecutionStep) -> Result<()> {
        if !self.execution_exists(&step.execution_id).await? {
            return Err(SchedulerError::ExecutionNotFound(step.execution_id.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO execution_steps
                (id, execution_id, step_name, status, input_data, output_data, started, completed, duration, created)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&step.id)
        .bind(&step.execution_id)
        .bind(&step.step_name)
        .bind(step.status.as_str())
        .bind(&step.input_data)
        .bind(&step.output_data)
        .bind(step.started.as_ref().map(format_timestamp))
        .bind(step.completed.as_ref().map(format_timestamp))
        .bind(step.duration)
        .bind(format_timestamp(&step.created))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_step(&self, step: &ExecutionStep) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE execution_steps
            SET status = ?, output_data = ?, completed = ?, duration = ?
            WHERE id = ?
            "#,
        )
        .bind(step.status.as_str())
        .bind(&step.output_data)
        .bind(step.completed.as_ref().map(format_timestamp))
        .bind(step.duration)
        .bind(&step.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn steps_for_execution(&self, execution_id: &str) -> Result<Vec<ExecutionStep>> {
        let query = format!(
            "SELECT {STEP_COLUMNS} FROM execution_steps WHERE execution_id = ? ORDER BY created ASC, rowid ASC"
        );
        let rows = sqlx::query(&query)
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(step_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn definition(name: &str, schedule: Option<&str>, status: WorkflowStatus) -> WorkflowDefinition {
        WorkflowDefinition {
            name: name.to_string(),
            description: format!("{name} workflow"),
            schedule: schedule.map(str::to_string),
            default_status: status,
        }
    }

    async fn store_with(name: &str) -> (SqliteExecutionStore, Workflow) {
        let store = SqliteExecutionStore::in_memory().await.unwrap();
        store
            .upsert_workflow(&definition(name, Some("* * * * *"), WorkflowStatus::Active))
            .await
            .unwrap();
        let workflow = store.find_workflow_by_name(name).await.unwrap().unwrap();
        (store, workflow)
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_preserving_status() {
        let store = SqliteExecutionStore::in_memory().await.unwrap();
        let outcome = store
            .upsert_workflow(&definition("Sample", Some("0 * * * *"), WorkflowStatus::Inactive))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let created = store.find_workflow_by_name("Sample").await.unwrap().unwrap();
        assert_eq!(created.status, WorkflowStatus::Inactive);
        store.set_workflow_status(&created.id, WorkflowStatus::Active).await.unwrap();

        let outcome = store
            .upsert_workflow(&definition("Sample", Some("*/5 * * * *"), WorkflowStatus::Inactive))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let updated = store.get_workflow(&created.id).await.unwrap().unwrap();
        assert_eq!(updated.status, WorkflowStatus::Active);
        assert_eq!(updated.schedule.as_deref(), Some("*/5 * * * *"));
        assert_eq!(store.list_workflows().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_schedules_are_rejected_before_writing() {
        let store = SqliteExecutionStore::in_memory().await.unwrap();
        let err = store
            .upsert_workflow(&definition("Broken", Some("61 * * * *"), WorkflowStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
        assert!(store.find_workflow_by_name("Broken").await.unwrap().is_none());

        let (store, workflow) = store_with("Sample").await;
        assert!(store.update_schedule(&workflow.id, Some("* * *")).await.is_err());
        store.update_schedule(&workflow.id, Some("  ")).await.unwrap();
        let cleared = store.get_workflow(&workflow.id).await.unwrap().unwrap();
        assert_eq!(cleared.schedule, None);
    }

    #[tokio::test]
    async fn executions_require_an_existing_workflow() {
        let store = SqliteExecutionStore::in_memory().await.unwrap();
        let err = store.create_execution("missing", Utc::now()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn pending_executions_are_oldest_first() {
        let (store, workflow) = store_with("Sample").await;
        let base = Utc::now();
        let late = store.create_execution(&workflow.id, base).await.unwrap();
        let early = store
            .create_execution(&workflow.id, base - ChronoDuration::minutes(5))
            .await
            .unwrap();
        let tie = store.create_execution(&workflow.id, base).await.unwrap();

        let pending: Vec<String> = store
            .pending_executions()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(pending, vec![early.id.clone(), late.id.clone(), tie.id.clone()]);

        let oldest = store.oldest_pending_for_workflow(&workflow.id).await.unwrap().unwrap();
        assert_eq!(oldest.id, early.id);
    }

    #[tokio::test]
    async fn save_execution_round_trips_terminal_fields() {
        let (store, workflow) = store_with("Sample").await;
        let mut execution = store.create_execution(&workflow.id, Utc::now()).await.unwrap();
        assert!(store.has_in_flight_execution(&workflow.id).await.unwrap());

        execution.mark_running(Utc::now());
        store.save_execution(&execution).await.unwrap();
        execution.finish(ExecutionStatus::Failed, Utc::now(), 42, Some("boom".to_string()));
        store.save_execution(&execution).await.unwrap();

        let loaded = store.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Failed);
        assert_eq!(loaded.duration, Some(42));
        assert_eq!(loaded.log.as_deref(), Some("boom"));
        assert!(loaded.started <= loaded.completed);
        assert!(!store.has_in_flight_execution(&workflow.id).await.unwrap());
        assert!(store.pending_executions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn steps_require_execution_and_keep_creation_order() {
        let (store, workflow) = store_with("Sample").await;
        let orphan = ExecutionStep::running("missing", "orphan", None, Utc::now());
        assert!(matches!(
            store.insert_step(&orphan).await.unwrap_err(),
            SchedulerError::ExecutionNotFound(_)
        ));

        let execution = store.create_execution(&workflow.id, Utc::now()).await.unwrap();
        let at = Utc::now();
        for name in ["fetch", "transform", "load"] {
            let step = ExecutionStep::running(&execution.id, name, None, at);
            store.insert_step(&step).await.unwrap();
        }

        let detail = store.execution_with_steps(&execution.id).await.unwrap().unwrap();
        let names: Vec<&str> = detail.steps.iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(names, vec!["fetch", "transform", "load"]);
        assert!(store.execution_with_steps("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn workflow_statuses_report_latest_and_running_flag() {
        let (store, workflow) = store_with("Sample").await;
        store
            .upsert_workflow(&definition("Idle", None, WorkflowStatus::Inactive))
            .await
            .unwrap();

        let base = Utc::now();
        let mut first = store
            .create_execution(&workflow.id, base - ChronoDuration::minutes(1))
            .await
            .unwrap();
        first.finish(ExecutionStatus::Completed, base, 10, None);
        store.save_execution(&first).await.unwrap();
        let second = store.create_execution(&workflow.id, base).await.unwrap();

        let statuses = store.workflow_statuses().await.unwrap();
        assert_eq!(statuses.len(), 2);

        let idle = statuses.iter().find(|s| s.workflow.name == "Idle").unwrap();
        assert!(idle.last_execution.is_none());
        assert!(!idle.is_running);

        let sample = statuses.iter().find(|s| s.workflow.name == "Sample").unwrap();
        assert_eq!(sample.last_execution.as_ref().unwrap().id, second.id);
        assert!(sample.is_running);
    }

    #[tokio::test]
    async fn file_database_is_shared_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tickflow.db");

        let writer = SqliteExecutionStore::connect(&path).await.unwrap();
        writer
            .upsert_workflow(&definition("Sample", None, WorkflowStatus::Active))
            .await
            .unwrap();

        let reader = SqliteExecutionStore::connect(&path).await.unwrap();
        assert!(reader.find_workflow_by_name("Sample").await.unwrap().is_some());
    }
}
