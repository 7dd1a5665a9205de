//! Application wiring
//!
//! Connects storage, registers workflows, and assembles the dispatcher and
//! cron trigger from a `Config`. The binary is a thin layer over this.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::runtime::{build_supervisor, run_execution, CronTrigger, Dispatcher, SupervisorKind};
use crate::workflow::{ExecutionStore, SqliteExecutionStore, SyncReport, WorkflowRegistry};
use crate::workflows::register_builtin;

/// Install the global fmt subscriber. `RUST_LOG` overrides the `info` default.
/// Output goes to stderr so worker processes share the parent's log stream.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// A connected store plus the registered workflows.
pub struct App {
    pub config: Config,
    pub store: Arc<SqliteExecutionStore>,
    pub registry: Arc<WorkflowRegistry>,
}

impl App {
    /// Open the database and register the built-in workflows in memory.
    ///
    /// Stored workflow rows are not touched here: every command and every
    /// worker process bootstraps, and an operator's schedule or status edits
    /// must survive them.
    pub async fn bootstrap(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        tracing::info!("📋 Opening database: {}", config.database.path.display());
        let store = SqliteExecutionStore::connect(&config.database.path)
            .await
            .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;

        let registry = WorkflowRegistry::new();
        register_builtin(&registry);

        Ok(Self {
            config,
            store: Arc::new(store),
            registry: Arc::new(registry),
        })
    }

    /// Write every registered workflow to the store, refreshing description
    /// and schedule of existing rows.
    pub async fn discover(&self) -> Result<SyncReport> {
        self.registry
            .sync_to_store(self.store.as_ref())
            .await
            .context("Failed to sync registered workflows")
    }

    fn store(&self) -> Arc<dyn ExecutionStore> {
        self.store.clone()
    }

    fn dispatcher(&self) -> Result<Dispatcher> {
        let supervisor = build_supervisor(
            self.config.scheduler.supervisor,
            self.store(),
            self.registry.clone(),
            &self.config.database.path,
        )?;
        Ok(Dispatcher::new(self.store(), supervisor, self.config.dispatch_settings())?)
    }

    /// Targeted mode when a workflow filter is set, daemon mode otherwise.
    ///
    /// Registered workflows missing from the store are inserted first;
    /// existing rows are left as they are.
    pub async fn run_scheduler(&self) -> Result<()> {
        self.registry
            .register_missing(self.store.as_ref())
            .await
            .context("Failed to register workflows")?;

        match self.config.scheduler.workflow.clone() {
            Some(name) => self.run_targeted(&name).await,
            None => self.run_daemon().await,
        }
    }

    /// Start the named workflow once. Embedded workers live in this process,
    /// so the run waits for them; process workers are left to finish alone.
    pub async fn run_targeted(&self, name: &str) -> Result<()> {
        let mut dispatcher = self.dispatcher()?;
        let execution_id = dispatcher
            .dispatch_workflow(name)
            .await
            .with_context(|| format!("Failed to dispatch workflow '{name}'"))?;
        tracing::info!("🎯 Started execution {} for {}", execution_id, name);

        if self.config.scheduler.supervisor == SupervisorKind::Embedded {
            dispatcher.drain().await;
        }
        Ok(())
    }

    /// Admission loop, plus the cron trigger when enabled.
    ///
    /// In run-once mode the trigger makes a single pass up front instead of
    /// running alongside.
    pub async fn run_daemon(&self) -> Result<()> {
        let mut dispatcher = self.dispatcher()?;
        let trigger = CronTrigger::new(self.store());
        let scheduler = &self.config.scheduler;

        if !scheduler.trigger_enabled {
            return dispatcher.run().await.map_err(Into::into);
        }

        if scheduler.run_once {
            let created = trigger.enqueue_due(Utc::now()).await?;
            tracing::info!("📊 Enqueued {} due executions", created.len());
            return dispatcher.run().await.map_err(Into::into);
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let interval = self.config.trigger_interval();
        let trigger_task = tokio::spawn(async move {
            trigger
                .run_until(interval, async move {
                    let _ = stop_rx.changed().await;
                })
                .await;
        });

        let outcome = dispatcher.run().await;

        let _ = stop_tx.send(true);
        if let Err(e) = trigger_task.await {
            tracing::error!("❌ Cron trigger task failed: {}", e);
        }
        outcome.map_err(Into::into)
    }

    /// Worker entry point for `tickflow execute <id>`.
    pub async fn execute(&self, execution_id: &str) -> Result<()> {
        run_execution(self.store(), &self.registry, execution_id)
            .await
            .with_context(|| format!("Execution {execution_id} failed"))
    }
}
