//! Workflow implementation registry
//!
//! Maps workflow names to factories for their `WorkflowRuntime`
//! implementations. Populated explicitly at process start; lookups are
//! lock-free through an `ArcSwap`ed map, so a registration never blocks a
//! worker resolving its implementation.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cron;
use crate::error::{Result, SchedulerError};
use crate::runtime::workflow::WorkflowRuntime;
use crate::workflow::storage::ExecutionStore;
use crate::workflow::types::{UpsertOutcome, WorkflowDefinition};

/// Builds a fresh implementation instance for one execution.
pub type WorkflowFactory = Arc<dyn Fn() -> Box<dyn WorkflowRuntime> + Send + Sync>;

/// One registered implementation.
#[derive(Clone)]
pub struct RegisteredWorkflow {
    /// Metadata captured from the implementation at registration time
    pub definition: WorkflowDefinition,
    factory: WorkflowFactory,
}

impl RegisteredWorkflow {
    pub fn instantiate(&self) -> Box<dyn WorkflowRuntime> {
        (self.factory)()
    }
}

impl fmt::Debug for RegisteredWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredWorkflow")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Counts from pushing registered definitions into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub discovered: usize,
    pub updated: usize,
}

/// Name-keyed registry of workflow implementations.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: ArcSwap<HashMap<String, RegisteredWorkflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a default-constructible implementation under its own name.
    pub fn register<W>(&self)
    where
        W: WorkflowRuntime + Default + 'static,
    {
        self.register_with(Arc::new(|| Box::new(W::default()) as Box<dyn WorkflowRuntime>));
    }

    /// Register a factory. The name comes from the instance it produces; a
    /// later registration under the same name replaces the earlier one.
    pub fn register_with(&self, factory: WorkflowFactory) {
        let definition = factory().definition();
        let name = definition.name.clone();

        let mut next = (**self.workflows.load()).clone();
        let replaced = next
            .insert(name.clone(), RegisteredWorkflow { definition, factory })
            .is_some();
        self.workflows.store(Arc::new(next));

        if replaced {
            tracing::warn!("⚠️ Workflow '{}' registered twice; keeping the latest", name);
        } else {
            tracing::debug!("📝 Registered workflow: {}", name);
        }
    }

    /// Fresh instance for `name` (exact, case-sensitive match).
    pub fn create(&self, name: &str) -> Result<Box<dyn WorkflowRuntime>> {
        self.workflows
            .load()
            .get(name)
            .map(RegisteredWorkflow::instantiate)
            .ok_or_else(|| SchedulerError::UnknownWorkflow(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.load().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn definitions(&self) -> Vec<WorkflowDefinition> {
        let mut definitions: Vec<WorkflowDefinition> = self
            .workflows
            .load()
            .values()
            .map(|registered| registered.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn len(&self) -> usize {
        self.workflows.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.load().is_empty()
    }

    /// Make sure every registered workflow has a row in the store.
    ///
    /// New rows get the implementation's default status; existing rows get a
    /// refreshed description and schedule but keep the status an operator set.
    /// A definition with an invalid schedule is skipped with an error log.
    ///
    /// This is the explicit `discover` operation. It resets schedules an
    /// operator edited, so nothing runs it implicitly.
    pub async fn sync_to_store(&self, store: &dyn ExecutionStore) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for definition in self.storable_definitions() {
            match store.upsert_workflow(&definition).await? {
                UpsertOutcome::Created => {
                    tracing::info!(
                        "🆕 Discovered workflow: {} (schedule: {})",
                        definition.name,
                        definition.schedule.as_deref().unwrap_or("none")
                    );
                    report.discovered += 1;
                }
                UpsertOutcome::Updated => {
                    tracing::debug!("🔄 Updated workflow: {}", definition.name);
                    report.updated += 1;
                }
            }
        }

        tracing::info!(
            "📊 Workflow sync: {} discovered, {} updated",
            report.discovered,
            report.updated
        );
        Ok(report)
    }

    /// Insert rows only for registered workflows the store does not know yet.
    ///
    /// Existing rows are left exactly as stored, including any schedule or
    /// status an operator changed. Run at scheduler start so a fresh database
    /// can dispatch the built-ins without an explicit `discover`.
    pub async fn register_missing(&self, store: &dyn ExecutionStore) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for definition in self.storable_definitions() {
            if store.find_workflow_by_name(&definition.name).await?.is_some() {
                continue;
            }
            if store.upsert_workflow(&definition).await? == UpsertOutcome::Created {
                tracing::info!("🆕 Discovered workflow: {}", definition.name);
                report.discovered += 1;
            }
        }

        Ok(report)
    }

    fn storable_definitions(&self) -> Vec<WorkflowDefinition> {
        self.definitions()
            .into_iter()
            .filter(|definition| {
                let Some(schedule) = definition.schedule.as_deref().filter(|s| !s.trim().is_empty()) else {
                    return true;
                };
                match cron::parse(schedule) {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::error!("❌ Skipping workflow '{}': {}", definition.name, e);
                        false
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::step::StepRunner;
    use crate::workflow::storage::SqliteExecutionStore;
    use crate::workflow::types::WorkflowStatus;
    use async_trait::async_trait;

    #[derive(Default)]
    struct CleanupWorkflow;

    #[async_trait]
    impl WorkflowRuntime for CleanupWorkflow {
        fn schedule(&self) -> Option<String> {
            Some("*/10 * * * *".to_string())
        }

        fn default_status(&self) -> WorkflowStatus {
            WorkflowStatus::Active
        }

        async fn process(&self, _steps: &StepRunner) -> Result<()> {
            Ok(())
        }
    }

    struct Named {
        name: &'static str,
        schedule: &'static str,
    }

    #[async_trait]
    impl WorkflowRuntime for Named {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn schedule(&self) -> Option<String> {
            Some(self.schedule.to_string())
        }

        async fn process(&self, _steps: &StepRunner) -> Result<()> {
            Ok(())
        }
    }

    fn named(name: &'static str, schedule: &'static str) -> WorkflowFactory {
        Arc::new(move || Box::new(Named { name, schedule }) as Box<dyn WorkflowRuntime>)
    }

    #[test]
    fn lookup_is_exact_and_fails_fast() {
        let registry = WorkflowRegistry::new();
        registry.register::<CleanupWorkflow>();

        assert!(registry.contains("Cleanup"));
        assert_eq!(registry.create("Cleanup").unwrap().name(), "Cleanup");
        assert!(matches!(
            registry.create("cleanup"),
            Err(SchedulerError::UnknownWorkflow(name)) if name == "cleanup"
        ));
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let registry = WorkflowRegistry::new();
        registry.register_with(named("Report", "0 * * * *"));
        registry.register_with(named("Report", "0 0 * * *"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.definitions()[0].schedule.as_deref(), Some("0 0 * * *"));
    }

    #[tokio::test]
    async fn sync_creates_updates_and_skips_invalid() {
        let store = SqliteExecutionStore::in_memory().await.unwrap();
        let registry = WorkflowRegistry::new();
        registry.register::<CleanupWorkflow>();
        registry.register_with(named("Broken", "every tuesday"));

        let report = registry.sync_to_store(&store).await.unwrap();
        assert_eq!(report, SyncReport { discovered: 1, updated: 0 });
        assert!(store.find_workflow_by_name("Broken").await.unwrap().is_none());

        let cleanup = store.find_workflow_by_name("Cleanup").await.unwrap().unwrap();
        assert_eq!(cleanup.status, WorkflowStatus::Active);
        store
            .set_workflow_status(&cleanup.id, WorkflowStatus::Inactive)
            .await
            .unwrap();

        let report = registry.sync_to_store(&store).await.unwrap();
        assert_eq!(report, SyncReport { discovered: 0, updated: 1 });
        let cleanup = store.find_workflow_by_name("Cleanup").await.unwrap().unwrap();
        assert_eq!(cleanup.status, WorkflowStatus::Inactive);
    }

    #[tokio::test]
    async fn register_missing_keeps_operator_edits() {
        let store = SqliteExecutionStore::in_memory().await.unwrap();
        let registry = WorkflowRegistry::new();
        registry.register::<CleanupWorkflow>();

        let report = registry.register_missing(&store).await.unwrap();
        assert_eq!(report, SyncReport { discovered: 1, updated: 0 });

        let cleanup = store.find_workflow_by_name("Cleanup").await.unwrap().unwrap();
        store.update_schedule(&cleanup.id, Some("0 3 * * *")).await.unwrap();

        registry.register_with(named("Report", "0 * * * *"));
        let report = registry.register_missing(&store).await.unwrap();
        assert_eq!(report, SyncReport { discovered: 1, updated: 0 });

        let cleanup = store.find_workflow_by_name("Cleanup").await.unwrap().unwrap();
        assert_eq!(cleanup.schedule.as_deref(), Some("0 3 * * *"));
        assert!(store.find_workflow_by_name("Report").await.unwrap().is_some());
    }
}
