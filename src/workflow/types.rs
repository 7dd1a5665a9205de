//! Core record types
//!
//! Workflows own executions; executions own steps. Ids are 36-character UUID
//! strings and must be treated as opaque.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SchedulerError;

/// Fresh opaque record id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Canonical text form for stored timestamps.
///
/// Fixed-width millisecond precision, so string order equals time order.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(field: &'static str, raw: &str) -> Result<DateTime<Utc>, SchedulerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| SchedulerError::Decode {
            field,
            value: raw.to_string(),
        })
}

/// Whether the scheduler may trigger a workflow on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Active,
    Inactive,
}

impl WorkflowStatus {
    /// Stored as 1 (active) / 0 (inactive).
    pub fn as_i64(self) -> i64 {
        match self {
            WorkflowStatus::Active => 1,
            WorkflowStatus::Inactive => 0,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        if value == 1 {
            WorkflowStatus::Active
        } else {
            WorkflowStatus::Inactive
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            WorkflowStatus::Active => WorkflowStatus::Inactive,
            WorkflowStatus::Inactive => WorkflowStatus::Active,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Active => f.write_str("Active"),
            WorkflowStatus::Inactive => f.write_str("Inactive"),
        }
    }
}

/// Lifecycle of executions and steps.
///
/// Pending -> Running -> Completed | Failed. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Pending or Running.
    pub fn is_in_flight(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = SchedulerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(SchedulerError::Decode {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// A named, schedulable unit of business logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    /// Unique human key; also the registry lookup key.
    pub name: String,
    pub description: Option<String>,
    /// 5-field cron expression, validated before it is stored.
    pub schedule: Option<String>,
    pub status: WorkflowStatus,
    pub last_executed: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Workflow {
    /// Schedule string if present and non-blank.
    pub fn active_schedule(&self) -> Option<&str> {
        self.schedule.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Metadata a workflow implementation contributes at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: String,
    pub schedule: Option<String>,
    /// Only applied when the workflow row is first created.
    pub default_status: WorkflowStatus,
}

/// Result of registering a definition with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    /// Whole milliseconds; set exactly when the status is terminal.
    pub duration: Option<i64>,
    /// Failure text, set when the run fails.
    pub log: Option<String>,
}

impl WorkflowExecution {
    pub fn pending(workflow_id: impl Into<String>, started: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            started: Some(started),
            completed: None,
            duration: None,
            log: None,
        }
    }

    pub fn mark_running(&mut self, at: DateTime<Utc>) {
        self.status = ExecutionStatus::Running;
        self.started = Some(at);
    }

    /// Move to Completed or Failed, stamping completion time and duration.
    pub fn finish(&mut self, status: ExecutionStatus, at: DateTime<Utc>, duration_ms: i64, log: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed = Some(at);
        self.duration = Some(duration_ms.max(0));
        if log.is_some() {
            self.log = log;
        }
    }
}

/// One logged sub-unit of work inside an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    pub execution_id: String,
    pub step_name: String,
    pub status: ExecutionStatus,
    pub input_data: Option<String>,
    /// Serialized result, or the failure message.
    pub output_data: Option<String>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub duration: i64,
    pub created: DateTime<Utc>,
}

impl ExecutionStep {
    /// A step that has just begun.
    pub fn running(
        execution_id: impl Into<String>,
        step_name: impl Into<String>,
        input_data: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            execution_id: execution_id.into(),
            step_name: step_name.into(),
            status: ExecutionStatus::Running,
            input_data,
            output_data: None,
            started: Some(at),
            completed: None,
            duration: 0,
            created: at,
        }
    }
}

/// One execution with its steps in canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetail {
    pub execution: WorkflowExecution,
    pub steps: Vec<ExecutionStep>,
}

/// Per-workflow status projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusSummary {
    pub workflow: Workflow,
    pub last_execution: Option<WorkflowExecution>,
    /// Anything Pending or Running for this workflow.
    pub is_running: bool,
}
