//! Workflow management layer
//!
//! Record types, SQLite persistence behind the `ExecutionStore` trait, and the
//! name-keyed registry of implementations.

pub mod types;

pub mod storage;

pub mod registry;

pub use registry::{SyncReport, WorkflowFactory, WorkflowRegistry};
pub use storage::{ExecutionStore, SqliteExecutionStore};
pub use types::{
    ExecutionDetail, ExecutionStatus, ExecutionStep, Workflow, WorkflowDefinition, WorkflowExecution,
    WorkflowStatus, WorkflowStatusSummary,
};
