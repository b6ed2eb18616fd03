use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::info;

use windlass_core::config::WorkflowConfig;
use windlass_core::error::{Result, WindlassError};
use windlass_core::event::EventBus;
use windlass_core::traits::{Oracle, TaskScheduler};
use windlass_tools::ToolRegistry;

use crate::prompts::Prompts;
use crate::runner::WorkflowRunner;
use crate::scheduler::{TaskExecutor, TaskQueue, TaskStore};

struct NamespaceEntry {
    runner: Arc<WorkflowRunner>,
    queue: Arc<TaskQueue>,
    executor: Option<tokio::task::JoinHandle<()>>,
}

/// Process-owned map of namespaces to their runner, task queue, and
/// executor. One runtime per process; namespaces run concurrently while
/// each namespace's runs stay serialized by its runner.
pub struct WorkflowRuntime {
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
    namespaces: Mutex<HashMap<String, NamespaceEntry>>,
}

impl WorkflowRuntime {
    pub fn new() -> Self {
        Self {
            event_bus: Arc::new(EventBus::default()),
            cancel: CancellationToken::new(),
            namespaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Register a namespace with an in-memory task queue.
    pub fn register_namespace(
        &self,
        config: WorkflowConfig,
        oracle: Arc<dyn Oracle>,
        registry: Arc<ToolRegistry>,
    ) -> Result<Arc<WorkflowRunner>> {
        self.register(config, Prompts::default(), oracle, registry, None)
    }

    /// Register a namespace whose task queue persists through `store`.
    pub fn register_namespace_with_store(
        &self,
        config: WorkflowConfig,
        oracle: Arc<dyn Oracle>,
        registry: Arc<ToolRegistry>,
        store: Arc<TaskStore>,
    ) -> Result<Arc<WorkflowRunner>> {
        self.register(config, Prompts::default(), oracle, registry, Some(store))
    }

    /// Register a namespace with custom prompts and optional persistence.
    pub fn register(
        &self,
        config: WorkflowConfig,
        prompts: Prompts,
        oracle: Arc<dyn Oracle>,
        registry: Arc<ToolRegistry>,
        store: Option<Arc<TaskStore>>,
    ) -> Result<Arc<WorkflowRunner>> {
        let namespace = config.namespace.clone();
        let mut namespaces = self.namespaces.lock().unwrap();
        if namespaces.contains_key(&namespace) {
            return Err(WindlassError::Config(format!(
                "namespace {} is already registered",
                namespace
            )));
        }

        let queue = Arc::new(match store {
            Some(store) => TaskQueue::with_store(&namespace, self.event_bus.clone(), store)?,
            None => TaskQueue::new(&namespace, self.event_bus.clone()),
        });
        let runner = Arc::new(
            WorkflowRunner::new(config, oracle, registry, self.event_bus.clone())?
                .with_prompts(prompts)
                .with_scheduler(queue.clone() as Arc<dyn TaskScheduler>),
        );

        namespaces.insert(
            namespace.clone(),
            NamespaceEntry {
                runner: runner.clone(),
                queue,
                executor: None,
            },
        );
        info!(namespace = %namespace, "namespace registered");
        Ok(runner)
    }

    pub fn runner(&self, namespace: &str) -> Option<Arc<WorkflowRunner>> {
        self.namespaces
            .lock()
            .unwrap()
            .get(namespace)
            .map(|e| e.runner.clone())
    }

    pub fn queue(&self, namespace: &str) -> Option<Arc<TaskQueue>> {
        self.namespaces
            .lock()
            .unwrap()
            .get(namespace)
            .map(|e| e.queue.clone())
    }

    /// Spawn the namespace's polling executor.
    pub fn start_scheduler(&self, namespace: &str) -> Result<()> {
        let mut namespaces = self.namespaces.lock().unwrap();
        let entry = namespaces
            .get_mut(namespace)
            .ok_or_else(|| WindlassError::Scheduler(format!("unknown namespace {}", namespace)))?;
        if entry.executor.is_some() {
            return Err(WindlassError::Scheduler(format!(
                "scheduler for {} is already running",
                namespace
            )));
        }

        let executor = TaskExecutor::new(
            entry.queue.clone(),
            entry.runner.clone(),
            entry.runner.config().scheduler.clone(),
            self.cancel.child_token(),
        );
        entry.executor = Some(tokio::spawn(async move { executor.run().await }));
        Ok(())
    }

    /// Stop every executor and wait for in-flight tasks to settle.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = {
            let mut namespaces = self.namespaces.lock().unwrap();
            namespaces
                .values_mut()
                .filter_map(|e| e.executor.take())
                .collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("workflow runtime shut down");
    }
}

impl Default for WorkflowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windlass_test_utils::ScriptedOracle;
    use windlass_tools::StopWorkflowTool;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(StopWorkflowTool);
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_duplicate_namespace_rejected() {
        let runtime = WorkflowRuntime::new();
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        runtime
            .register_namespace(
                WorkflowConfig::for_namespace("dup"),
                oracle.clone(),
                registry(),
            )
            .unwrap();
        let err = runtime
            .register_namespace(WorkflowConfig::for_namespace("dup"), oracle, registry())
            .err()
            .unwrap();
        assert!(matches!(err, WindlassError::Config(_)));
    }

    #[tokio::test]
    async fn test_lookup_by_namespace() {
        let runtime = WorkflowRuntime::new();
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        runtime
            .register_namespace(WorkflowConfig::for_namespace("a"), oracle, registry())
            .unwrap();

        assert!(runtime.runner("a").is_some());
        assert!(runtime.queue("a").is_some());
        assert!(runtime.runner("b").is_none());
    }

    #[tokio::test]
    async fn test_start_scheduler_unknown_namespace() {
        let runtime = WorkflowRuntime::new();
        assert!(runtime.start_scheduler("nope").is_err());
    }

    #[tokio::test]
    async fn test_scheduler_start_and_shutdown() {
        let runtime = WorkflowRuntime::new();
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        runtime
            .register_namespace(WorkflowConfig::for_namespace("a"), oracle, registry())
            .unwrap();

        runtime.start_scheduler("a").unwrap();
        assert!(runtime.start_scheduler("a").is_err());
        runtime.shutdown().await;
    }
}
