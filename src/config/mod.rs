//! Configuration for the tickflow scheduler
//!
//! Defaults come from `TICKFLOW_*` environment variables; command line flags
//! override individual fields afterwards.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SchedulerError};
use crate::runtime::dispatcher::DispatchSettings;
use crate::runtime::supervisor::SupervisorKind;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
}

/// Dispatcher and trigger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrency ceiling (default 5)
    pub max_concurrent: usize,
    /// Exit once nothing is Pending and all workers have finished
    pub run_once: bool,
    /// Restrict the run to one workflow by name
    pub workflow: Option<String>,
    /// Sleep between polls when nothing is Pending, in seconds
    pub idle_poll_secs: u64,
    /// Sleep between polls while work is being admitted, in seconds
    pub reap_interval_secs: u64,
    /// How often the cron trigger looks for due workflows, in seconds
    pub trigger_interval_secs: u64,
    /// Run the cron trigger alongside the dispatcher
    pub trigger_enabled: bool,
    pub supervisor: SupervisorKind,
}

/// SQLite database location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file shared by the dispatcher and its workers (default: "data/tickflow.db")
    pub path: PathBuf,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig {
                max_concurrent: env_or("TICKFLOW_MAX_CONCURRENT", 5),
                run_once: false,
                workflow: None,
                idle_poll_secs: env_or("TICKFLOW_IDLE_POLL_SECS", 5),
                reap_interval_secs: env_or("TICKFLOW_REAP_INTERVAL_SECS", 2),
                trigger_interval_secs: env_or("TICKFLOW_TRIGGER_INTERVAL_SECS", 30),
                trigger_enabled: true,
                supervisor: std::env::var("TICKFLOW_SUPERVISOR")
                    .ok()
                    .and_then(|raw| match raw.parse() {
                        Ok(kind) => Some(kind),
                        Err(e) => {
                            tracing::warn!("⚠️ Ignoring TICKFLOW_SUPERVISOR: {}", e);
                            None
                        }
                    })
                    .unwrap_or_else(SupervisorKind::platform_default),
            },
            database: DatabaseConfig {
                path: std::env::var("TICKFLOW_DATABASE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("data/tickflow.db")),
            },
        }
    }
}

impl Config {
    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;
        if scheduler.max_concurrent == 0 {
            return Err(SchedulerError::Config("max_concurrent must be at least 1".to_string()));
        }
        for (name, value) in [
            ("idle_poll_secs", scheduler.idle_poll_secs),
            ("reap_interval_secs", scheduler.reap_interval_secs),
            ("trigger_interval_secs", scheduler.trigger_interval_secs),
        ] {
            if value == 0 {
                return Err(SchedulerError::Config(format!("{name} must be positive")));
            }
        }
        if scheduler.workflow.as_deref().is_some_and(|w| w.trim().is_empty()) {
            return Err(SchedulerError::Config("workflow filter must not be blank".to_string()));
        }
        Ok(())
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_concurrent: self.scheduler.max_concurrent,
            run_once: self.scheduler.run_once,
            idle_poll_interval: Duration::from_secs(self.scheduler.idle_poll_secs),
            reap_interval: Duration::from_secs(self.scheduler.reap_interval_secs),
        }
    }

    pub fn trigger_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.trigger_interval_secs)
    }
}

/// Parse an env var, falling back to `default` when unset or malformed.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
