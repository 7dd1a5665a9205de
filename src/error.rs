//! Error types shared across the scheduler.
//!
//! `SchedulerError` covers everything the library can reject or fail on.
//! `StepError` is the failure a workflow's own business logic raises inside a step.

use crate::cron::CronError;
use crate::workflow::types::ExecutionStatus;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors produced by the scheduler core.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A schedule string failed cron validation.
    #[error("Invalid cron expression '{expr}': {source}")]
    InvalidCron {
        expr: String,
        #[source]
        source: CronError,
    },

    /// No implementation is registered under this workflow name.
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// No workflow row matches the given id or name.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// No execution row matches the given id.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// The execution is already Completed or Failed.
    #[error("Execution {id} already finished with status {status}")]
    ExecutionAlreadyFinished { id: String, status: ExecutionStatus },

    /// Business logic failed inside a step or workflow body.
    #[error(transparent)]
    Step(#[from] StepError),

    /// A worker could not be launched.
    #[error("Failed to spawn worker for execution {execution_id}: {reason}")]
    Spawn { execution_id: String, reason: String },

    /// A stored column could not be decoded.
    #[error("Invalid stored value for {field}: {value}")]
    Decode { field: &'static str, value: String },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A failure raised by workflow business logic.
///
/// The message is what ends up in the step's output column and the
/// execution's log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StepError {
    message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_message_is_transparent() {
        let err = SchedulerError::from(StepError::new("upstream returned 503"));
        assert_eq!(err.to_string(), "upstream returned 503");
    }

    #[test]
    fn step_error_from_anyhow_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("fetching invoices");
        let step = StepError::from(err);
        assert_eq!(step.message(), "fetching invoices: connection refused");
    }

    #[test]
    fn already_finished_mentions_status() {
        let err = SchedulerError::ExecutionAlreadyFinished {
            id: "abc".to_string(),
            status: ExecutionStatus::Completed,
        };
        assert_eq!(err.to_string(), "Execution abc already finished with status completed");
    }
}
