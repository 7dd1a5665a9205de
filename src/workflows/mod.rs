//! Built-in workflows
//!
//! Registered by the binary so a fresh database has something to run.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::runtime::step::StepRunner;
use crate::runtime::workflow::WorkflowRuntime;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::types::WorkflowStatus;

/// Register every built-in workflow.
pub fn register_builtin(registry: &WorkflowRegistry) {
    registry.register::<SampleWorkflow>();
    registry.register::<HeartbeatWorkflow>();
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub sensor: String,
    pub celsius: f64,
}

/// Two dependent steps: gather readings, then summarize them.
#[derive(Debug, Default)]
pub struct SampleWorkflow;

#[async_trait]
impl WorkflowRuntime for SampleWorkflow {
    fn description(&self) -> String {
        "Collects sample readings and summarizes them".to_string()
    }

    fn schedule(&self) -> Option<String> {
        Some("*/15 * * * *".to_string())
    }

    async fn process(&self, steps: &StepRunner) -> Result<()> {
        let readings = steps
            .run_step("Collect readings", None, || {
                Ok(vec![
                    Reading { sensor: "north".to_string(), celsius: 18.5 },
                    Reading { sensor: "south".to_string(), celsius: 21.0 },
                    Reading { sensor: "east".to_string(), celsius: 19.5 },
                ])
            })
            .await?;

        let input = serde_json::to_string(&readings)?;
        steps
            .run_step("Summarize readings", Some(input), move || {
                let count = readings.len();
                let mean = readings.iter().map(|r| r.celsius).sum::<f64>() / count.max(1) as f64;
                Ok(serde_json::json!({ "count": count, "mean_celsius": mean }))
            })
            .await?;

        Ok(())
    }
}

/// Single step recording that the scheduler is alive.
#[derive(Debug, Default)]
pub struct HeartbeatWorkflow;

#[async_trait]
impl WorkflowRuntime for HeartbeatWorkflow {
    fn description(&self) -> String {
        "Records a liveness timestamp every minute".to_string()
    }

    fn schedule(&self) -> Option<String> {
        Some("* * * * *".to_string())
    }

    fn default_status(&self) -> WorkflowStatus {
        WorkflowStatus::Active
    }

    async fn process(&self, steps: &StepRunner) -> Result<()> {
        steps
            .run_step("Beat", None, || Ok(format!("alive at {}", Utc::now().to_rfc3339())))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_under_short_names() {
        let registry = WorkflowRegistry::new();
        register_builtin(&registry);
        assert_eq!(registry.names(), ["Heartbeat", "Sample"]);

        let sample = registry.create("Sample").unwrap();
        assert_eq!(sample.default_status(), WorkflowStatus::Inactive);
        assert!(crate::cron::is_valid(&sample.schedule().unwrap()));
    }
}
