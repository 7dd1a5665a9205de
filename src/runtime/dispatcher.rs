//! Admission loop
//!
//! Polls the store for Pending executions and hands them to the supervisor,
//! oldest first, without exceeding the concurrency ceiling. The dispatcher
//! never evaluates cron; something else enqueues the work.

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SchedulerError};
use crate::runtime::supervisor::{Supervisor, WorkerHandle, WorkerState};
use crate::workflow::storage::ExecutionStore;

/// Knobs for the admission loop.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Upper bound on concurrently running workers. Must be positive.
    pub max_concurrent: usize,
    /// Exit once nothing is Pending and every admitted worker has finished.
    pub run_once: bool,
    pub idle_poll_interval: Duration,
    pub reap_interval: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            run_once: false,
            idle_poll_interval: Duration::from_secs(5),
            reap_interval: Duration::from_secs(2),
        }
    }
}

/// What one admission pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub reaped: usize,
    /// Execution ids started this cycle, in admission order.
    pub admitted: Vec<String>,
    /// Pending executions left waiting because the ceiling was reached.
    pub deferred: usize,
    /// Pending executions seen at the start of the cycle.
    pub pending: usize,
}

/// Admits Pending executions under a concurrency ceiling.
///
/// The dispatcher owns the table of workers it started, keyed by execution
/// id. That table, not the store, is what the ceiling counts: a row stays
/// Pending until its worker flips it to Running, and the table keeps the
/// same row from being started twice in the meantime.
pub struct Dispatcher {
    store: Arc<dyn ExecutionStore>,
    /// Starts workers and answers whether they are still alive
    supervisor: Box<dyn Supervisor>,
    settings: DispatchSettings,
    /// Workers started and not yet reaped
    running: HashMap<String, WorkerHandle>,
}

impl Dispatcher {
    /// Fails with a config error when the ceiling is zero.
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        supervisor: Box<dyn Supervisor>,
        settings: DispatchSettings,
    ) -> Result<Self> {
        if settings.max_concurrent == 0 {
            return Err(SchedulerError::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            store,
            supervisor,
            settings,
            running: HashMap::new(),
        })
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Number of workers currently tracked.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_tracking(&self, execution_id: &str) -> bool {
        self.running.contains_key(execution_id)
    }

    /// Drop handles whose worker has finished. Returns how many were reaped.
    ///
    /// A handle whose liveness cannot be determined stays tracked: it keeps
    /// its slot under the ceiling and its execution is not started again.
    /// The next pass polls it again.
    pub async fn reap_finished(&mut self) -> usize {
        let mut finished = Vec::new();
        for (execution_id, handle) in self.running.iter_mut() {
            match self.supervisor.poll(handle).await {
                Ok(WorkerState::Running) => {}
                Ok(WorkerState::Finished) => finished.push(execution_id.clone()),
                Err(e) => {
                    tracing::warn!(%execution_id, error = %e, "⚠️ Could not poll worker; keeping its slot");
                }
            }
        }

        for execution_id in &finished {
            if let Some(handle) = self.running.remove(execution_id) {
                let elapsed = Utc::now() - handle.started_at;
                tracing::info!(
                    %execution_id,
                    elapsed_ms = elapsed.num_milliseconds(),
                    "🧹 Worker finished"
                );
                self.supervisor.reap(handle).await;
            }
        }
        finished.len()
    }

    /// One pass: reap, then admit Pending executions oldest first while
    /// there is room under the ceiling.
    ///
    /// A worker that fails to start is logged and its execution stays
    /// Pending for the next pass.
    pub async fn poll_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport {
            reaped: self.reap_finished().await,
            ..CycleReport::default()
        };

        let pending = self.store.pending_executions().await?;
        report.pending = pending.len();

        for execution in pending {
            // Its worker has not flipped the row to Running yet.
            if self.running.contains_key(&execution.id) {
                continue;
            }
            if self.running.len() >= self.settings.max_concurrent {
                report.deferred += 1;
                continue;
            }

            match self.supervisor.start(&execution.id).await {
                Ok(handle) => {
                    self.running.insert(execution.id.clone(), handle);
                    report.admitted.push(execution.id);
                }
                Err(e) => {
                    tracing::error!(execution_id = %execution.id, error = %e, "❌ Failed to start worker");
                }
            }
        }

        if report.deferred > 0 {
            tracing::debug!(
                running = self.running.len(),
                deferred = report.deferred,
                "⏳ Concurrency ceiling reached"
            );
        }
        Ok(report)
    }

    /// Start the named workflow's oldest Pending execution, creating one if
    /// there is none. Returns the execution id once its worker is started.
    pub async fn dispatch_workflow(&mut self, name: &str) -> Result<String> {
        let workflow = self
            .store
            .find_workflow_by_name(name)
            .await?
            .ok_or_else(|| SchedulerError::WorkflowNotFound(name.to_string()))?;

        let execution = match self.store.oldest_pending_for_workflow(&workflow.id).await? {
            Some(execution) => execution,
            None => {
                let execution = self.store.create_execution(&workflow.id, Utc::now()).await?;
                tracing::info!(execution_id = %execution.id, workflow = name, "🆕 Created execution");
                execution
            }
        };

        let handle = self.supervisor.start(&execution.id).await?;
        self.running.insert(execution.id.clone(), handle);
        tracing::info!(execution_id = %execution.id, workflow = name, "🎯 Dispatched workflow");
        Ok(execution.id)
    }

    /// Wait until every tracked worker has finished.
    pub async fn drain(&mut self) {
        if self.running.is_empty() {
            return;
        }
        tracing::info!(running = self.running.len(), "⏳ Draining running workers");
        while !self.running.is_empty() {
            self.reap_finished().await;
            if !self.running.is_empty() {
                tokio::time::sleep(self.settings.reap_interval).await;
            }
        }
        tracing::info!("✅ All workers finished");
    }

    /// Run the loop until run-once completes or Ctrl-C arrives.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the loop until run-once completes or `shutdown` resolves.
    ///
    /// On shutdown, workers already started keep running; their rows are
    /// finished by the workers themselves.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            max_concurrent = self.settings.max_concurrent,
            run_once = self.settings.run_once,
            "⏰ Dispatcher started"
        );
        tokio::pin!(shutdown);

        loop {
            let pause = match self.poll_cycle().await {
                Ok(report) if report.pending == 0 => {
                    if self.settings.run_once {
                        self.drain().await;
                        tracing::info!("🏁 Nothing pending; run-once finished");
                        return Ok(());
                    }
                    self.settings.idle_poll_interval
                }
                Ok(report) => {
                    if !report.admitted.is_empty() {
                        tracing::info!(
                            admitted = report.admitted.len(),
                            running = self.running.len(),
                            "📥 Admitted executions"
                        );
                    }
                    self.settings.reap_interval
                }
                Err(e) => {
                    tracing::error!("❌ Dispatch cycle failed: {}", e);
                    self.settings.idle_poll_interval
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(running = self.running.len(), "⏹️ Dispatcher stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::storage::SqliteExecutionStore;
    use crate::workflow::types::{ExecutionStatus, Workflow, WorkflowDefinition, WorkflowStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Starts nothing; records what it was asked to start and reports
    /// workers finished once their id is marked done.
    #[derive(Clone, Default)]
    struct RecordingSupervisor {
        started: Arc<Mutex<Vec<String>>>,
        done: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
        /// While set, every poll errors as if the store were locked
        fail_poll: Arc<AtomicBool>,
    }

    impl RecordingSupervisor {
        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }

        fn finish(&self, execution_id: &str) {
            self.done.lock().unwrap().push(execution_id.to_string());
        }

        fn set_fail_poll(&self, failing: bool) {
            self.fail_poll.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Supervisor for RecordingSupervisor {
        async fn start(&self, execution_id: &str) -> Result<WorkerHandle> {
            if self.fail_on.as_deref() == Some(execution_id) {
                return Err(SchedulerError::Spawn {
                    execution_id: execution_id.to_string(),
                    reason: "no such binary".to_string(),
                });
            }
            self.started.lock().unwrap().push(execution_id.to_string());
            Ok(WorkerHandle::detached(execution_id, None))
        }

        async fn poll(&self, handle: &mut WorkerHandle) -> Result<WorkerState> {
            if self.fail_poll.load(Ordering::SeqCst) {
                return Err(SchedulerError::Io(std::io::Error::other("database is locked")));
            }
            if self.done.lock().unwrap().contains(&handle.execution_id) {
                Ok(WorkerState::Finished)
            } else {
                Ok(WorkerState::Running)
            }
        }
    }

    async fn store_with(names: &[&str]) -> (Arc<SqliteExecutionStore>, Vec<Workflow>) {
        let store = Arc::new(SqliteExecutionStore::in_memory().await.unwrap());
        let mut workflows = Vec::new();
        for name in names {
            store
                .upsert_workflow(&WorkflowDefinition {
                    name: name.to_string(),
                    description: String::new(),
                    schedule: None,
                    default_status: WorkflowStatus::Active,
                })
                .await
                .unwrap();
            workflows.push(store.find_workflow_by_name(name).await.unwrap().unwrap());
        }
        (store, workflows)
    }

    fn dispatcher(store: &Arc<SqliteExecutionStore>, supervisor: &RecordingSupervisor, max: usize) -> Dispatcher {
        Dispatcher::new(
            store.clone(),
            Box::new(supervisor.clone()),
            DispatchSettings {
                max_concurrent: max,
                run_once: true,
                idle_poll_interval: Duration::from_millis(10),
                reap_interval: Duration::from_millis(10),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn zero_ceiling_is_rejected() {
        let (store, _) = store_with(&[]).await;
        let result = Dispatcher::new(
            store,
            Box::new(RecordingSupervisor::default()),
            DispatchSettings {
                max_concurrent: 0,
                ..DispatchSettings::default()
            },
        );
        assert!(matches!(result, Err(SchedulerError::Config(_))));
    }

    #[tokio::test]
    async fn ceiling_bounds_admission_oldest_first() {
        let (store, workflows) = store_with(&["Alpha"]).await;
        let base = Utc::now() - chrono::Duration::minutes(10);
        let mut ids = Vec::new();
        for offset in [3, 1, 4, 2] {
            let execution = store
                .create_execution(&workflows[0].id, base + chrono::Duration::seconds(offset))
                .await
                .unwrap();
            ids.push((offset, execution.id));
        }
        ids.sort();

        let supervisor = RecordingSupervisor::default();
        let mut dispatcher = dispatcher(&store, &supervisor, 3);
        let report = dispatcher.poll_cycle().await.unwrap();

        let expected: Vec<String> = ids.iter().take(3).map(|(_, id)| id.clone()).collect();
        assert_eq!(report.admitted, expected);
        assert_eq!(report.deferred, 1);
        assert_eq!(supervisor.started(), expected);
        assert_eq!(dispatcher.running_count(), 3);
        // The supervisor never touched the rows, so all four remain Pending.
        assert_eq!(store.pending_executions().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn pooled_admission_across_workflows() {
        let (store, workflows) = store_with(&["Alpha", "Beta"]).await;
        let base = Utc::now() - chrono::Duration::minutes(10);
        let mut created = Vec::new();
        for i in 0..3 {
            for (w, workflow) in workflows.iter().enumerate() {
                let at = base + chrono::Duration::seconds(i * 10 + w as i64);
                let execution = store.create_execution(&workflow.id, at).await.unwrap();
                created.push(execution.id);
            }
        }

        let supervisor = RecordingSupervisor::default();
        let mut dispatcher = dispatcher(&store, &supervisor, 2);
        let report = dispatcher.poll_cycle().await.unwrap();

        assert_eq!(report.admitted, created[..2].to_vec());
        assert_eq!(report.pending, 6);
        assert_eq!(report.deferred, 4);

        // Simulate the two admitted workers flipping their rows to Running.
        for id in &report.admitted {
            let mut execution = store.get_execution(id).await.unwrap().unwrap();
            execution.mark_running(Utc::now());
            store.save_execution(&execution).await.unwrap();
        }
        assert_eq!(store.pending_executions().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn idle_cycles_change_nothing() {
        let (store, workflows) = store_with(&["Alpha"]).await;
        let mut execution = store.create_execution(&workflows[0].id, Utc::now()).await.unwrap();
        execution.mark_running(Utc::now());
        execution.finish(ExecutionStatus::Completed, Utc::now(), 3, None);
        store.save_execution(&execution).await.unwrap();
        let before = store.get_execution(&execution.id).await.unwrap().unwrap();

        let supervisor = RecordingSupervisor::default();
        let mut dispatcher = dispatcher(&store, &supervisor, 5);
        for _ in 0..2 {
            let report = dispatcher.poll_cycle().await.unwrap();
            assert_eq!(report, CycleReport::default());
        }

        assert!(supervisor.started().is_empty());
        assert_eq!(store.get_execution(&execution.id).await.unwrap().unwrap(), before);
        assert_eq!(store.latest_execution(&workflows[0].id).await.unwrap().unwrap().id, execution.id);
    }

    #[tokio::test]
    async fn tracked_pending_rows_are_not_readmitted() {
        let (store, workflows) = store_with(&["Alpha"]).await;
        let execution = store.create_execution(&workflows[0].id, Utc::now()).await.unwrap();

        let supervisor = RecordingSupervisor::default();
        let mut dispatcher = dispatcher(&store, &supervisor, 5);
        dispatcher.poll_cycle().await.unwrap();
        let second = dispatcher.poll_cycle().await.unwrap();

        assert!(second.admitted.is_empty());
        assert_eq!(supervisor.started(), [execution.id.clone()]);

        supervisor.finish(&execution.id);
        assert_eq!(dispatcher.reap_finished().await, 1);
        assert!(!dispatcher.is_tracking(&execution.id));
    }

    #[tokio::test]
    async fn failed_poll_keeps_the_slot_and_never_restarts() {
        let (store, workflows) = store_with(&["Alpha"]).await;
        let execution = store.create_execution(&workflows[0].id, Utc::now()).await.unwrap();

        let supervisor = RecordingSupervisor::default();
        supervisor.set_fail_poll(true);
        let mut dispatcher = dispatcher(&store, &supervisor, 1);

        let first = dispatcher.poll_cycle().await.unwrap();
        assert_eq!(first.admitted, [execution.id.clone()]);

        let second = dispatcher.poll_cycle().await.unwrap();
        assert_eq!(second.reaped, 0);
        assert!(second.admitted.is_empty());
        assert_eq!(supervisor.started(), [execution.id.clone()]);
        assert_eq!(dispatcher.running_count(), 1);
        assert!(dispatcher.is_tracking(&execution.id));

        // A second Pending row still waits behind the held slot.
        let waiting = store.create_execution(&workflows[0].id, Utc::now()).await.unwrap();
        let third = dispatcher.poll_cycle().await.unwrap();
        assert!(third.admitted.is_empty());
        assert_eq!(third.deferred, 1);

        // Once polling works again the worker is reaped and the slot frees up.
        let mut finished = store.get_execution(&execution.id).await.unwrap().unwrap();
        finished.mark_running(Utc::now());
        finished.finish(ExecutionStatus::Completed, Utc::now(), 5, None);
        store.save_execution(&finished).await.unwrap();
        supervisor.finish(&execution.id);
        supervisor.set_fail_poll(false);

        let fourth = dispatcher.poll_cycle().await.unwrap();
        assert_eq!(fourth.reaped, 1);
        assert_eq!(fourth.admitted, [waiting.id.clone()]);
        assert_eq!(supervisor.started(), [execution.id, waiting.id]);
    }

    #[tokio::test]
    async fn spawn_failure_leaves_execution_pending() {
        let (store, workflows) = store_with(&["Alpha"]).await;
        let execution = store.create_execution(&workflows[0].id, Utc::now()).await.unwrap();

        let supervisor = RecordingSupervisor {
            fail_on: Some(execution.id.clone()),
            ..RecordingSupervisor::default()
        };
        let mut dispatcher = dispatcher(&store, &supervisor, 5);
        let report = dispatcher.poll_cycle().await.unwrap();

        assert!(report.admitted.is_empty());
        assert_eq!(dispatcher.running_count(), 0);
        let saved = store.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(saved.status, ExecutionStatus::Pending);
    }

    #[tokio::test]
    async fn targeted_dispatch_reuses_or_creates() {
        let (store, workflows) = store_with(&["Alpha"]).await;
        let supervisor = RecordingSupervisor::default();
        let mut dispatcher = dispatcher(&store, &supervisor, 5);

        let err = dispatcher.dispatch_workflow("Missing").await.unwrap_err();
        assert!(matches!(err, SchedulerError::WorkflowNotFound(_)));
        assert!(supervisor.started().is_empty());

        let created = dispatcher.dispatch_workflow("Alpha").await.unwrap();
        assert_eq!(store.pending_executions().await.unwrap().len(), 1);

        let waiting = store
            .create_execution(&workflows[0].id, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        let reused = dispatcher.dispatch_workflow("Alpha").await.unwrap();
        assert_eq!(reused, waiting.id);
        assert_eq!(supervisor.started(), [created, waiting.id]);
    }

    #[tokio::test]
    async fn run_once_exits_after_draining() {
        let (store, workflows) = store_with(&["Alpha"]).await;
        let execution = store.create_execution(&workflows[0].id, Utc::now()).await.unwrap();

        let supervisor = RecordingSupervisor::default();
        let mut dispatcher = dispatcher(&store, &supervisor, 5);
        dispatcher.poll_cycle().await.unwrap();

        // The worker finishes its row and exits.
        let mut saved = store.get_execution(&execution.id).await.unwrap().unwrap();
        saved.mark_running(Utc::now());
        saved.finish(ExecutionStatus::Completed, Utc::now(), 1, None);
        store.save_execution(&saved).await.unwrap();
        supervisor.finish(&execution.id);

        tokio::time::timeout(Duration::from_secs(5), dispatcher.run_until(std::future::pending()))
            .await
            .expect("run-once should finish")
            .unwrap();
        assert_eq!(dispatcher.running_count(), 0);
    }
}
