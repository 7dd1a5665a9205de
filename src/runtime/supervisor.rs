//! Worker supervision
//!
//! A `Supervisor` starts one worker per admitted execution and reports when
//! it has finished. Which strategy runs is decided once at startup through
//! `SupervisorKind`; the dispatcher only ever sees the trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{Result, SchedulerError};
use crate::runtime::executor::run_execution;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::storage::ExecutionStore;

/// Environment variable carrying the database path to worker processes.
pub const DATABASE_ENV: &str = "TICKFLOW_DATABASE";

/// Liveness of a worker as seen by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Still working, or not yet known to have stopped
    Running,
    /// Exited or reached a terminal status; the slot can be released
    Finished,
}

/// What a handle holds to observe its worker.
enum WorkerToken {
    /// Child process spawned by this dispatcher
    Process(Child),
    /// Nothing local; liveness comes from the execution row
    Detached,
    /// In-process tokio task
    Task(JoinHandle<()>),
}

/// A started worker, owned by whoever admitted it.
///
/// The dispatcher keeps one per admitted execution until the supervisor
/// reports it finished, then hands it back to `Supervisor::reap`.
pub struct WorkerHandle {
    /// Execution the worker was started for
    pub execution_id: String,
    /// When the supervisor started the worker, used for elapsed-time logs
    pub started_at: DateTime<Utc>,
    /// OS process id, when the worker is a child process
    pid: Option<u32>,
    token: WorkerToken,
}

impl WorkerHandle {
    /// Handle for a worker this process cannot observe directly.
    pub fn detached(execution_id: impl Into<String>, pid: Option<u32>) -> Self {
        Self {
            execution_id: execution_id.into(),
            started_at: Utc::now(),
            pid,
            token: WorkerToken::Detached,
        }
    }

    fn process(execution_id: &str, child: Child) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            started_at: Utc::now(),
            pid: child.id(),
            token: WorkerToken::Process(child),
        }
    }

    fn task(execution_id: &str, task: JoinHandle<()>) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            started_at: Utc::now(),
            pid: None,
            token: WorkerToken::Task(task),
        }
    }

    /// OS process id, for process-backed workers.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking check using only what the handle holds. `None` when the
    /// handle carries nothing to check.
    fn poll_local(&mut self) -> Result<Option<WorkerState>> {
        match &mut self.token {
            WorkerToken::Process(child) => match child.try_wait()? {
                Some(status) => {
                    tracing::debug!(
                        execution_id = %self.execution_id,
                        pid = ?self.pid,
                        %status,
                        "🏁 Worker process exited"
                    );
                    Ok(Some(WorkerState::Finished))
                }
                None => Ok(Some(WorkerState::Running)),
            },
            WorkerToken::Task(task) if task.is_finished() => Ok(Some(WorkerState::Finished)),
            WorkerToken::Task(_) => Ok(Some(WorkerState::Running)),
            WorkerToken::Detached => Ok(None),
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.token {
            WorkerToken::Process(_) => "process",
            WorkerToken::Detached => "detached",
            WorkerToken::Task(_) => "task",
        };
        f.debug_struct("WorkerHandle")
            .field("execution_id", &self.execution_id)
            .field("started_at", &self.started_at)
            .field("pid", &self.pid)
            .field("kind", &kind)
            .finish()
    }
}

/// Starts and watches workers.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Launch a worker for the execution and return without waiting for it.
    async fn start(&self, execution_id: &str) -> Result<WorkerHandle>;

    /// Non-blocking liveness check.
    async fn poll(&self, handle: &mut WorkerHandle) -> Result<WorkerState>;

    /// Release whatever the handle holds. Called once it reports Finished.
    async fn reap(&self, handle: WorkerHandle) {
        drop(handle);
    }
}

/// Command line used to launch a worker: `<program> <args..> <execution_id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl WorkerCommand {
    /// Re-invoke the running binary as `<exe> execute <id>` against `database`.
    pub fn current_exe(database: &Path) -> Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec!["execute".to_string()],
            envs: vec![(DATABASE_ENV.to_string(), database.display().to_string())],
        })
    }

    fn spawn(&self, execution_id: &str) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(execution_id)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        command.spawn().map_err(|e| SchedulerError::Spawn {
            execution_id: execution_id.to_string(),
            reason: format!("{}: {}", self.program.display(), e),
        })
    }
}

/// One OS process per execution, watched through its exit status.
pub struct ProcessSupervisor {
    command: WorkerCommand,
}

impl ProcessSupervisor {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn start(&self, execution_id: &str) -> Result<WorkerHandle> {
        let child = self.command.spawn(execution_id)?;
        let handle = WorkerHandle::process(execution_id, child);
        tracing::info!(execution_id, pid = ?handle.pid(), "🚀 Started worker process");
        Ok(handle)
    }

    async fn poll(&self, handle: &mut WorkerHandle) -> Result<WorkerState> {
        Ok(handle.poll_local()?.unwrap_or(WorkerState::Finished))
    }
}

/// Detached OS processes, watched through the execution row.
///
/// Pending or Running rows count as a live worker; a terminal or missing row
/// means the worker is done. A worker that dies without finishing its row is
/// never seen as done.
pub struct StatusPollingSupervisor {
    command: WorkerCommand,
    store: Arc<dyn ExecutionStore>,
}

impl StatusPollingSupervisor {
    pub fn new(command: WorkerCommand, store: Arc<dyn ExecutionStore>) -> Self {
        Self { command, store }
    }
}

#[async_trait]
impl Supervisor for StatusPollingSupervisor {
    async fn start(&self, execution_id: &str) -> Result<WorkerHandle> {
        // tokio reaps the dropped child in the background.
        let child = self.command.spawn(execution_id)?;
        let handle = WorkerHandle::detached(execution_id, child.id());
        tracing::info!(execution_id, pid = ?handle.pid(), "🚀 Started detached worker");
        Ok(handle)
    }

    async fn poll(&self, handle: &mut WorkerHandle) -> Result<WorkerState> {
        let state = match self.store.get_execution(&handle.execution_id).await? {
            Some(execution) if execution.status.is_in_flight() => WorkerState::Running,
            _ => WorkerState::Finished,
        };
        Ok(state)
    }
}

/// Workers as tokio tasks inside the current process.
pub struct EmbeddedSupervisor {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<WorkflowRegistry>,
}

impl EmbeddedSupervisor {
    pub fn new(store: Arc<dyn ExecutionStore>, registry: Arc<WorkflowRegistry>) -> Self {
        Self { store, registry }
    }
}

#[async_trait]
impl Supervisor for EmbeddedSupervisor {
    async fn start(&self, execution_id: &str) -> Result<WorkerHandle> {
        let store = self.store.clone();
        let registry = self.registry.clone();
        let id = execution_id.to_string();

        let task = tokio::spawn(async move {
            // Failures are already recorded on the execution row.
            if let Err(e) = run_execution(store, &registry, &id).await {
                tracing::debug!(execution_id = %id, error = %e, "Embedded worker ended with error");
            }
        });

        tracing::info!(execution_id, "🚀 Started embedded worker");
        Ok(WorkerHandle::task(execution_id, task))
    }

    async fn poll(&self, handle: &mut WorkerHandle) -> Result<WorkerState> {
        Ok(handle.poll_local()?.unwrap_or(WorkerState::Finished))
    }

    async fn reap(&self, handle: WorkerHandle) {
        if let WorkerToken::Task(task) = handle.token {
            if let Err(e) = task.await {
                tracing::error!(execution_id = %handle.execution_id, error = %e, "💥 Embedded worker panicked");
            }
        }
    }
}

/// Worker strategy chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorKind {
    #[serde(rename = "process")]
    Process,
    #[serde(rename = "status")]
    StatusPolling,
    #[serde(rename = "embedded")]
    Embedded,
}

impl SupervisorKind {
    /// Exit-status watching where the OS gives us child handles we trust,
    /// row polling elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(unix) {
            SupervisorKind::Process
        } else {
            SupervisorKind::StatusPolling
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SupervisorKind::Process => "process",
            SupervisorKind::StatusPolling => "status",
            SupervisorKind::Embedded => "embedded",
        }
    }
}

impl Default for SupervisorKind {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl fmt::Display for SupervisorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupervisorKind {
    type Err = SchedulerError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(SupervisorKind::Process),
            "status" | "status-polling" => Ok(SupervisorKind::StatusPolling),
            "embedded" => Ok(SupervisorKind::Embedded),
            other => Err(SchedulerError::Config(format!(
                "unknown supervisor '{other}' (expected process, status or embedded)"
            ))),
        }
    }
}

/// Build the supervisor for `kind`. Process-backed kinds re-invoke the
/// current binary against `database`.
pub fn build_supervisor(
    kind: SupervisorKind,
    store: Arc<dyn ExecutionStore>,
    registry: Arc<WorkflowRegistry>,
    database: &Path,
) -> Result<Box<dyn Supervisor>> {
    let supervisor: Box<dyn Supervisor> = match kind {
        SupervisorKind::Process => Box::new(ProcessSupervisor::new(WorkerCommand::current_exe(database)?)),
        SupervisorKind::StatusPolling => Box::new(StatusPollingSupervisor::new(
            WorkerCommand::current_exe(database)?,
            store,
        )),
        SupervisorKind::Embedded => Box::new(EmbeddedSupervisor::new(store, registry)),
    };
    tracing::info!("🧭 Using {} supervisor", kind);
    Ok(supervisor)
}
