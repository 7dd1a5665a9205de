//! Step logging around workflow business logic.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Result, SchedulerError, StepError};
use crate::workflow::storage::ExecutionStore;
use crate::workflow::types::{ExecutionStatus, ExecutionStep};

/// A synchronous unit of work run inside a step.
///
/// Implemented for any `FnOnce() -> Result<T, StepError>` returning a
/// serializable value, so closures work directly.
pub trait StepCommand: Send {
    type Output: Serialize + Send;

    fn execute(self) -> std::result::Result<Self::Output, StepError>;
}

impl<F, T> StepCommand for F
where
    F: FnOnce() -> std::result::Result<T, StepError> + Send,
    T: Serialize + Send,
{
    type Output = T;

    fn execute(self) -> std::result::Result<T, StepError> {
        self()
    }
}

/// Records steps for one execution.
pub struct StepRunner {
    store: Arc<dyn ExecutionStore>,
    execution_id: String,
}

impl StepRunner {
    pub fn new(store: Arc<dyn ExecutionStore>, execution_id: impl Into<String>) -> Self {
        Self {
            store,
            execution_id: execution_id.into(),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Run `work` once as a logged step and hand back its result.
    pub async fn run_step<F, T>(&self, step_name: &str, input: Option<String>, work: F) -> Result<T>
    where
        F: FnOnce() -> std::result::Result<T, StepError> + Send,
        T: Serialize + Send,
    {
        self.run_command(step_name, input, work).await
    }

    /// Run `command` once as a logged step and hand back its result.
    ///
    /// The step row is written as Running before the command starts and
    /// updated once it ends. A failing command is recorded as Failed with its
    /// message as output, then returned to the caller.
    pub async fn run_command<C>(&self, step_name: &str, input: Option<String>, command: C) -> Result<C::Output>
    where
        C: StepCommand,
    {
        let mut step = ExecutionStep::running(&self.execution_id, step_name, input, Utc::now());
        self.store.insert_step(&step).await?;
        tracing::debug!(execution_id = %self.execution_id, step = step_name, "▶️ Step started");

        let timer = Instant::now();
        let outcome = command
            .execute()
            .map_err(SchedulerError::from)
            .and_then(|output| {
                let payload = render_payload(&output)?;
                Ok((output, payload))
            });

        step.completed = Some(Utc::now());
        step.duration = elapsed_ms(timer);

        match outcome {
            Ok((output, payload)) => {
                step.status = ExecutionStatus::Completed;
                step.output_data = Some(payload);
                self.store.update_step(&step).await?;
                tracing::info!(
                    execution_id = %self.execution_id,
                    step = step_name,
                    duration_ms = step.duration,
                    "✅ Step completed"
                );
                Ok(output)
            }
            Err(err) => {
                step.status = ExecutionStatus::Failed;
                step.output_data = Some(err.to_string());
                self.store.update_step(&step).await?;
                tracing::warn!(
                    execution_id = %self.execution_id,
                    step = step_name,
                    duration_ms = step.duration,
                    error = %err,
                    "❌ Step failed"
                );
                Err(err)
            }
        }
    }
}

/// Strings are stored verbatim, everything else as JSON text.
fn render_payload<T: Serialize>(output: &T) -> Result<String> {
    Ok(match serde_json::to_value(output)? {
        Value::String(text) => text,
        other => other.to_string(),
    })
}

pub(crate) fn elapsed_ms(timer: Instant) -> i64 {
    i64::try_from(timer.elapsed().as_millis()).unwrap_or(i64::MAX)
}
