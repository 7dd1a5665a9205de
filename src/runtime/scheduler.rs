//! Background cron trigger
//!
//! Decides which Active workflows are due and enqueues a Pending execution
//! for each. Running the work is left to the dispatcher; this side only ever
//! inserts rows.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cron;
use crate::error::Result;
use crate::workflow::storage::ExecutionStore;
use crate::workflow::types::{Workflow, WorkflowStatus};

/// Enqueues executions for workflows whose schedule has come due.
#[derive(Clone)]
pub struct CronTrigger {
    store: Arc<dyn ExecutionStore>,
}

impl CronTrigger {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Create a Pending execution for every workflow due at `now`.
    ///
    /// A workflow is due when it is Active, has a non-blank schedule, has
    /// nothing Pending or Running, and the next occurrence after its latest
    /// execution (or its creation, if it never ran) is not in the future.
    /// The search never starts more than one window before `now`, so rare
    /// schedules such as `0 0 29 2 *` still fire on long-idle workflows.
    /// Returns the ids of the executions created.
    pub async fn enqueue_due(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut created = Vec::new();

        for workflow in self.store.list_workflows().await? {
            if workflow.status != WorkflowStatus::Active {
                continue;
            }
            let Some(schedule) = workflow.active_schedule() else {
                continue;
            };
            if self.store.has_in_flight_execution(&workflow.id).await? {
                tracing::debug!("⏭️ {} already has work in flight", workflow.name);
                continue;
            }

            let lookback = ChronoDuration::minutes(i64::from(cron::SEARCH_WINDOW_MINUTES));
            let reference = self.reference_instant(&workflow).await?.max(now - lookback);
            let Some(next) = cron::next_run_after(schedule, reference) else {
                tracing::debug!(
                    "⏭️ Schedule '{}' of workflow {} has no occurrence within a year of {}",
                    schedule,
                    workflow.name,
                    reference
                );
                continue;
            };

            if next <= now {
                let execution = self.store.create_execution(&workflow.id, now).await?;
                tracing::info!(
                    execution_id = %execution.id,
                    workflow = %workflow.name,
                    due = %next,
                    "🔔 Enqueued scheduled execution"
                );
                created.push(execution.id);
            }
        }

        Ok(created)
    }

    async fn reference_instant(&self, workflow: &Workflow) -> Result<DateTime<Utc>> {
        let latest = self.store.latest_execution(&workflow.id).await?;
        Ok(latest.and_then(|e| e.started).unwrap_or(workflow.created))
    }

    /// Call `enqueue_due` every `interval` until `shutdown` resolves.
    /// Failures are logged and the next tick proceeds.
    pub async fn run_until<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!("⏰ Cron trigger started (every {}s)", interval.as_secs());
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("⏹️ Cron trigger stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.enqueue_due(Utc::now()).await {
                        Ok(created) if !created.is_empty() => {
                            tracing::info!("📊 Enqueued {} scheduled executions", created.len());
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("❌ Cron trigger pass failed: {}", e),
                    }
                }
            }
        }
    }
}
