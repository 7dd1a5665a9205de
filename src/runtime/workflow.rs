//! The contract every workflow implementation fulfills.

use async_trait::async_trait;

use crate::error::Result;
use crate::runtime::step::StepRunner;
use crate::workflow::types::{WorkflowDefinition, WorkflowStatus};

/// Schedule applied when an implementation does not choose one: hourly at minute 0.
pub const DEFAULT_SCHEDULE: &str = "0 * * * *";

/// Business logic of one workflow plus the metadata used at registration.
///
/// `process` runs once per execution. It records its work through
/// [`StepRunner::run_step`] and passes data between steps as ordinary values.
/// Returning an error fails the execution with the error text as its log.
///
/// ```ignore
/// #[derive(Default)]
/// struct InvoiceReminderWorkflow;
///
/// #[async_trait]
/// impl WorkflowRuntime for InvoiceReminderWorkflow {
///     async fn process(&self, steps: &StepRunner) -> Result<()> {
///         let overdue = steps.run_step("Find overdue invoices", None, || Ok(vec![17, 42])).await?;
///         let input = serde_json::to_string(&overdue)?;
///         steps.run_step("Send reminders", Some(input), move || Ok(overdue.len())).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait WorkflowRuntime: Send + Sync {
    /// Registry key. Defaults to the type name without a `Workflow` suffix.
    fn name(&self) -> String {
        display_name(std::any::type_name::<Self>())
    }

    fn description(&self) -> String {
        "Auto-discovered workflow".to_string()
    }

    fn schedule(&self) -> Option<String> {
        Some(DEFAULT_SCHEDULE.to_string())
    }

    /// Status given to the workflow row the first time it is registered.
    fn default_status(&self) -> WorkflowStatus {
        WorkflowStatus::Inactive
    }

    async fn process(&self, steps: &StepRunner) -> Result<()>;

    fn definition(&self) -> WorkflowDefinition {
        WorkflowDefinition {
            name: self.name(),
            description: self.description(),
            schedule: self.schedule(),
            default_status: self.default_status(),
        }
    }
}

/// `my_app::jobs::NightlyReportWorkflow` -> `NightlyReport`.
pub(crate) fn display_name(type_name: &str) -> String {
    let without_generics = type_name.split('<').next().unwrap_or(type_name);
    let short = without_generics.rsplit("::").next().unwrap_or(without_generics);
    match short.strip_suffix("Workflow") {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => short.to_string(),
    }
}
