//! tickflow command line
//!
//! `tickflow scheduler` runs the dispatcher (daemon, run-once or targeted);
//! `tickflow execute <id>` is the worker entry point the dispatcher spawns.
//! The remaining subcommands inspect and adjust stored workflows.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use tickflow::app::{init_tracing, App};
use tickflow::config::Config;
use tickflow::cron;
use tickflow::runtime::{CronTrigger, SupervisorKind};
use tickflow::workflow::{ExecutionStore, WorkflowStatus};

#[derive(Debug, Parser)]
#[command(name = "tickflow", version, about = "Cron-scheduled workflow runner")]
struct Cli {
    /// SQLite database shared by the scheduler and its workers
    #[arg(long, global = true, env = "TICKFLOW_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Admit Pending executions under the concurrency ceiling
    Scheduler {
        /// Start only this workflow, creating an execution if none is Pending
        workflow: Option<String>,
        /// Exit once nothing is Pending and all workers have finished
        #[arg(long)]
        once: bool,
        #[arg(long, value_name = "N")]
        max_concurrent: Option<usize>,
        /// Do not enqueue executions for due schedules
        #[arg(long)]
        no_trigger: bool,
        /// process, status or embedded
        #[arg(long, value_name = "KIND")]
        supervisor: Option<SupervisorKind>,
    },
    /// Run one execution to completion (worker entry point)
    Execute { execution_id: String },
    /// Register built-in workflows, resetting their stored descriptions and schedules
    Discover,
    /// Show every workflow with its schedule and latest execution
    List,
    /// Enqueue executions for every workflow that is due now
    Trigger,
    /// Create a Pending execution for a workflow
    Enqueue { workflow: String },
    /// Let the cron trigger fire a workflow
    Enable { workflow: String },
    /// Stop the cron trigger from firing a workflow
    Disable { workflow: String },
    /// Set a workflow's cron schedule, or clear it when omitted
    Schedule {
        workflow: String,
        expression: Option<String>,
    },
    /// Show an execution and its steps
    Status { execution_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::default();
    if let Some(path) = cli.database {
        config.database.path = path;
    }

    if let Command::Scheduler {
        workflow,
        once,
        max_concurrent,
        no_trigger,
        supervisor,
    } = &cli.command
    {
        config.scheduler.workflow = workflow.clone();
        config.scheduler.run_once = *once;
        config.scheduler.trigger_enabled = !*no_trigger;
        if let Some(max) = max_concurrent {
            config.scheduler.max_concurrent = *max;
        }
        if let Some(kind) = supervisor {
            config.scheduler.supervisor = *kind;
        }
    }

    let app = App::bootstrap(config).await?;

    match cli.command {
        Command::Scheduler { .. } => app.run_scheduler().await,
        Command::Execute { execution_id } => app.execute(&execution_id).await,
        Command::Discover => {
            let report = app.discover().await?;
            println!(
                "Registered {} workflows ({} new, {} updated)",
                app.registry.len(),
                report.discovered,
                report.updated
            );
            Ok(())
        }
        Command::List => list(&app).await,
        Command::Trigger => {
            let created = CronTrigger::new(app.store.clone()).enqueue_due(Utc::now()).await?;
            println!("Enqueued {} executions", created.len());
            for id in created {
                println!("  {id}");
            }
            Ok(())
        }
        Command::Enqueue { workflow } => {
            let record = find_workflow(&app, &workflow).await?;
            let execution = app.store.create_execution(&record.id, Utc::now()).await?;
            println!("Created execution {}", execution.id);
            Ok(())
        }
        Command::Enable { workflow } => set_status(&app, &workflow, WorkflowStatus::Active).await,
        Command::Disable { workflow } => set_status(&app, &workflow, WorkflowStatus::Inactive).await,
        Command::Schedule { workflow, expression } => {
            let record = find_workflow(&app, &workflow).await?;
            app.store
                .update_schedule(&record.id, expression.as_deref())
                .await
                .with_context(|| format!("Failed to update schedule of {workflow}"))?;
            match expression {
                Some(expr) => println!("{workflow}: {}", cron::describe(&expr)),
                None => println!("{workflow}: schedule cleared"),
            }
            Ok(())
        }
        Command::Status { execution_id } => status(&app, &execution_id).await,
    }
}

async fn find_workflow(app: &App, name: &str) -> Result<tickflow::workflow::Workflow> {
    match app.store.find_workflow_by_name(name).await? {
        Some(workflow) => Ok(workflow),
        None => bail!("Workflow not found: {name}"),
    }
}

async fn set_status(app: &App, name: &str, status: WorkflowStatus) -> Result<()> {
    let workflow = find_workflow(app, name).await?;
    app.store.set_workflow_status(&workflow.id, status).await?;
    println!("{name}: {status}");
    Ok(())
}

async fn list(app: &App) -> Result<()> {
    let summaries = app.store.workflow_statuses().await?;
    if summaries.is_empty() {
        println!("No workflows registered");
        return Ok(());
    }

    let now = Utc::now();
    for summary in summaries {
        let workflow = &summary.workflow;
        let schedule = workflow
            .active_schedule()
            .map(|s| format!("{s} ({})", cron::describe(s)))
            .unwrap_or_else(|| "unscheduled".to_string());
        let next = workflow
            .active_schedule()
            .and_then(|s| cron::next_run_after(s, now))
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let last = summary
            .last_execution
            .as_ref()
            .map(|e| e.status.to_string())
            .unwrap_or_else(|| "never".to_string());

        println!("{}", workflow.name);
        println!("  status:    {}{}", workflow.status, if summary.is_running { " (running)" } else { "" });
        println!("  schedule:  {schedule}");
        println!("  next run:  {next}");
        println!("  last run:  {last}");
    }
    Ok(())
}

async fn status(app: &App, execution_id: &str) -> Result<()> {
    let Some(detail) = app.store.execution_with_steps(execution_id).await? else {
        bail!("Execution not found: {execution_id}");
    };

    let execution = &detail.execution;
    println!("Execution {} [{}]", execution.id, execution.status);
    if let Some(duration) = execution.duration {
        println!("  duration: {duration} ms");
    }
    if let Some(log) = &execution.log {
        println!("  log:      {log}");
    }
    for step in &detail.steps {
        println!(
            "  - {} [{}] {} ms: {}",
            step.step_name,
            step.status,
            step.duration,
            step.output_data.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
