//! Runtime
//!
//! Everything that moves an execution from Pending to a terminal state:
//! - `workflow`: the contract implementations fulfill
//! - `step`: per-step logging around business logic
//! - `executor`: the worker entry point driving one execution
//! - `supervisor`: how workers are launched and watched
//! - `dispatcher`: the admission loop with its concurrency ceiling
//! - `scheduler`: the cron trigger that enqueues due executions

pub mod workflow;

pub mod step;

pub mod executor;

pub mod supervisor;

pub mod dispatcher;

pub mod scheduler;

pub use dispatcher::{CycleReport, DispatchSettings, Dispatcher};
pub use executor::{run_execution, ExecutionRunner};
pub use scheduler::CronTrigger;
pub use step::{StepCommand, StepRunner};
pub use supervisor::{
    build_supervisor, EmbeddedSupervisor, ProcessSupervisor, StatusPollingSupervisor, Supervisor,
    SupervisorKind, WorkerCommand, WorkerHandle, WorkerState,
};
pub use workflow::WorkflowRuntime;
