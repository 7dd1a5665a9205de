//! Execution runner
//!
//! Runs one workflow execution inside a worker: resolves the implementation,
//! records the Running transition, drives `process`, and persists the terminal
//! status. Errors from the business logic fail the execution; they never
//! escape as panics or leave the row in a non-terminal state.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Result, SchedulerError};
use crate::runtime::step::{elapsed_ms, StepRunner};
use crate::runtime::workflow::WorkflowRuntime;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::storage::ExecutionStore;
use crate::workflow::types::{ExecutionStatus, WorkflowExecution};

/// Drives a single execution against the store.
#[derive(Clone)]
pub struct ExecutionRunner {
    store: Arc<dyn ExecutionStore>,
}

impl ExecutionRunner {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Run `workflow.process` for `execution_id` and record the outcome.
    ///
    /// On success the execution becomes Completed; on error it becomes Failed
    /// with the error text as its log and the same error is returned. Either
    /// way `completed` and `duration` are stamped.
    pub async fn execute(&self, execution_id: &str, workflow: &dyn WorkflowRuntime) -> Result<()> {
        let execution = self.load_unfinished(execution_id).await?;
        let timer = Instant::now();

        tracing::info!(
            execution_id = %execution.id,
            workflow = %workflow.name(),
            "🚀 Executing workflow"
        );

        let steps = StepRunner::new(self.store.clone(), execution_id);
        let outcome = workflow.process(&steps).await;

        // Steps may have touched related rows; finish from the latest copy.
        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .unwrap_or(execution);
        let duration = elapsed_ms(timer);

        match outcome {
            Ok(()) => {
                execution.finish(ExecutionStatus::Completed, Utc::now(), duration, None);
                self.store.save_execution(&execution).await?;
                tracing::info!(
                    execution_id = %execution.id,
                    duration_ms = duration,
                    "✅ Execution completed"
                );
                Ok(())
            }
            Err(err) => {
                execution.finish(ExecutionStatus::Failed, Utc::now(), duration, Some(err.to_string()));
                self.store.save_execution(&execution).await?;
                tracing::error!(
                    execution_id = %execution.id,
                    duration_ms = duration,
                    error = %err,
                    "❌ Execution failed"
                );
                Err(err)
            }
        }
    }

    async fn load_unfinished(&self, execution_id: &str) -> Result<WorkflowExecution> {
        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| SchedulerError::ExecutionNotFound(execution_id.to_string()))?;

        if execution.status.is_terminal() {
            return Err(SchedulerError::ExecutionAlreadyFinished {
                id: execution.id,
                status: execution.status,
            });
        }
        Ok(execution)
    }
}

/// Worker entry point: run the execution `execution_id` to a terminal state.
///
/// Marks the row Running, resolves the implementation by the workflow's name,
/// executes it and stamps the workflow's `last_executed` on success. An
/// unregistered workflow name fails the execution immediately.
pub async fn run_execution(
    store: Arc<dyn ExecutionStore>,
    registry: &WorkflowRegistry,
    execution_id: &str,
) -> Result<()> {
    let runner = ExecutionRunner::new(store.clone());
    let mut execution = runner.load_unfinished(execution_id).await?;

    let workflow = store
        .get_workflow(&execution.workflow_id)
        .await?
        .ok_or_else(|| SchedulerError::WorkflowNotFound(execution.workflow_id.clone()))?;

    execution.mark_running(Utc::now());
    store.save_execution(&execution).await?;
    tracing::info!(
        execution_id = %execution.id,
        workflow = %workflow.name,
        "🏃 Execution running"
    );

    let implementation = match registry.create(&workflow.name) {
        Ok(implementation) => implementation,
        Err(err) => {
            execution.finish(ExecutionStatus::Failed, Utc::now(), 0, Some(err.to_string()));
            store.save_execution(&execution).await?;
            tracing::error!(execution_id = %execution.id, error = %err, "❌ No implementation registered");
            return Err(err);
        }
    };

    runner.execute(execution_id, implementation.as_ref()).await?;
    store.touch_last_executed(&workflow.id, Utc::now()).await?;
    Ok(())
}
