//! tickflow: cron-scheduled workflow runner
//!
//! Workflows are named units of business logic registered in code. The cron
//! trigger enqueues Pending executions when schedules come due, the dispatcher
//! admits them under a concurrency ceiling, and each admitted execution runs in
//! its own worker, recording every step in SQLite.

// Environment-driven configuration
pub mod config;

// 5-field cron parsing, matching and next-run search
pub mod cron;

pub mod error;

// Records, persistence and the implementation registry
pub mod workflow;

// Step logging, workers, supervision, admission and the cron trigger
pub mod runtime;

// Workflows shipped with the binary
pub mod workflows;

// Wiring used by the binary
pub mod app;

pub use error::{Result, SchedulerError, StepError};
pub use runtime::{Dispatcher, StepRunner, WorkflowRuntime};
pub use workflow::{ExecutionStatus, ExecutionStore, SqliteExecutionStore, WorkflowRegistry, WorkflowStatus};
