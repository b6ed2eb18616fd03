use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use windlass_core::config::WorkflowConfig;
use windlass_core::error::{Result, WindlassError};
use windlass_core::event::EventBus;
use windlass_core::traits::{Oracle, TaskScheduler};
use windlass_core::types::{
    FinishedWorkflow, ThreadId, ToolContext, WorkflowEvent, WorkflowMessage,
};
use windlass_tools::{ToolRegistry, STOP_WORKFLOW};

use crate::nodes;
use crate::nodes::message_summary::window_exceeded;
use crate::nodes::PassOutcome;
use crate::prompts::Prompts;
use crate::state::WorkflowState;

/// Explicit state machine phases. `Finish` is the only terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Decision,
    ToolExecution,
    Summary,
    Finish,
}

/// Drives one namespace's workflow runs.
///
/// Runs of the same namespace are serialized through an internal guard;
/// distinct namespaces (separate runners) execute concurrently. Message
/// history is checkpointed per thread id, so later invocations of the
/// same thread continue its conversation.
pub struct WorkflowRunner {
    config: WorkflowConfig,
    prompts: Prompts,
    oracle: Arc<dyn Oracle>,
    registry: Arc<ToolRegistry>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    event_bus: Arc<EventBus>,
    run_guard: tokio::sync::Mutex<()>,
    threads: Mutex<HashMap<ThreadId, Vec<WorkflowMessage>>>,
}

impl WorkflowRunner {
    /// Construct a runner. Fails fast on an invalid config or a registry
    /// missing the stop tool declaration; nothing else in the run path
    /// propagates errors.
    pub fn new(
        config: WorkflowConfig,
        oracle: Arc<dyn Oracle>,
        registry: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        config.validate()?;
        if !registry.contains(STOP_WORKFLOW) {
            return Err(WindlassError::Config(format!(
                "tool registry must declare the {} tool",
                STOP_WORKFLOW
            )));
        }
        Ok(Self {
            config,
            prompts: Prompts::default(),
            oracle,
            registry,
            scheduler: None,
            event_bus,
            run_guard: tokio::sync::Mutex::new(()),
            threads: Mutex::new(HashMap::new()),
        })
    }

    /// Attach the namespace's task schedule so scheduling tools can reach it.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Checkpointed message history for a thread, if any.
    pub fn thread_history(&self, thread_id: &ThreadId) -> Option<Vec<WorkflowMessage>> {
        self.threads.lock().unwrap().get(thread_id).cloned()
    }

    /// Run one workflow to completion and return its terminal report.
    ///
    /// Always reaches the finish node: oracle failures degrade to no
    /// action, tool failures become result messages, and the recursion
    /// ceiling forces finish under a pathological oracle.
    pub async fn run_workflow(
        &self,
        initial_messages: Vec<WorkflowMessage>,
        thread_id: &ThreadId,
    ) -> Result<FinishedWorkflow> {
        self.run(initial_messages, thread_id, true).await
    }

    /// Like [`run_workflow`](Self::run_workflow), but without
    /// checkpointing the thread. For one-shot threads that are never
    /// revisited, such as scheduled tasks, where a retained transcript
    /// would only accumulate.
    pub async fn run_detached(
        &self,
        initial_messages: Vec<WorkflowMessage>,
        thread_id: &ThreadId,
    ) -> Result<FinishedWorkflow> {
        self.run(initial_messages, thread_id, false).await
    }

    async fn run(
        &self,
        initial_messages: Vec<WorkflowMessage>,
        thread_id: &ThreadId,
        checkpoint: bool,
    ) -> Result<FinishedWorkflow> {
        let _guard = self.run_guard.lock().await;

        let namespace = self.config.namespace.clone();
        let mut messages = {
            let threads = self.threads.lock().unwrap();
            threads.get(thread_id).cloned().unwrap_or_default()
        };
        messages.extend(initial_messages);
        let mut state = WorkflowState::new(messages);

        info!(namespace = %namespace, thread_id = %thread_id, "workflow run started");
        self.event_bus.publish(WorkflowEvent::RunStarted {
            namespace: namespace.clone(),
            thread_id: thread_id.clone(),
        });

        let tool_defs = self.registry.definitions();
        let mut ctx = ToolContext::new(&namespace, thread_id.clone());
        if let Some(scheduler) = &self.scheduler {
            ctx = ctx.with_scheduler(scheduler.clone());
        }

        let mut phase = Phase::Decision;
        let mut cycles: u32 = 0;

        let report = loop {
            match phase {
                Phase::Decision => {
                    if cycles >= self.config.recursion_limit {
                        warn!(
                            namespace = %namespace,
                            cycles,
                            "recursion limit reached, forcing finish"
                        );
                        state.messages.push(WorkflowMessage::assistant(format!(
                            "Recursion limit of {} cycles reached; the run was \
                             stopped before the oracle chose to finish.",
                            self.config.recursion_limit
                        )));
                        self.event_bus.publish(WorkflowEvent::ForcedFinish {
                            namespace: namespace.clone(),
                            steps: cycles,
                        });
                        phase = Phase::Finish;
                        continue;
                    }
                    cycles += 1;
                    debug!(namespace = %namespace, cycle = cycles, "decision cycle");
                    nodes::decision::run_decision(
                        self.oracle.as_ref(),
                        &self.config.models.decision,
                        &self.prompts,
                        &tool_defs,
                        &mut state,
                        &self.event_bus,
                        &namespace,
                    )
                    .await;
                    phase = if state.tool_calls.is_empty() {
                        Phase::Finish
                    } else {
                        Phase::ToolExecution
                    };
                }
                Phase::ToolExecution => {
                    let outcome = nodes::tool_execution::run_tool_execution(
                        &self.registry,
                        &self.config,
                        &mut state,
                        &ctx,
                        &self.event_bus,
                    )
                    .await;
                    phase = match outcome {
                        PassOutcome::Terminate => Phase::Finish,
                        PassOutcome::Continue
                            if window_exceeded(&state, &self.config.pruning) =>
                        {
                            Phase::Summary
                        }
                        PassOutcome::Continue => Phase::Decision,
                    };
                }
                Phase::Summary => {
                    nodes::message_summary::run_message_summary(
                        self.oracle.as_ref(),
                        &self.config.models.summary,
                        &self.prompts,
                        &self.config.pruning,
                        &mut state,
                        &self.event_bus,
                        &namespace,
                    )
                    .await;
                    phase = Phase::Decision;
                }
                Phase::Finish => {
                    break nodes::finish::run_finish(
                        self.oracle.as_ref(),
                        &self.config.models.finish,
                        &self.prompts,
                        &state,
                        &namespace,
                    )
                    .await;
                }
            }
        };

        state.finished = Some(report.clone());
        if checkpoint {
            let mut threads = self.threads.lock().unwrap();
            threads.insert(thread_id.clone(), state.messages.clone());
        }

        info!(
            namespace = %namespace,
            thread_id = %thread_id,
            cycles,
            "workflow run finished"
        );
        self.event_bus.publish(WorkflowEvent::RunFinished {
            namespace,
            thread_id: thread_id.clone(),
            summary: report.summary.clone(),
        });

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windlass_test_utils::{finish_reply, tool_call_reply, ScriptedOracle};
    use windlass_tools::StopWorkflowTool;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(StopWorkflowTool);
        registry.register(windlass_test_utils::EchoTool::new());
        Arc::new(registry)
    }

    #[test]
    fn test_construction_requires_stop_tool() {
        let empty = Arc::new(ToolRegistry::new());
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let err = WorkflowRunner::new(
            WorkflowConfig::for_namespace("test"),
            oracle,
            empty,
            Arc::new(EventBus::default()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, WindlassError::Config(_)));
    }

    #[test]
    fn test_construction_validates_config() {
        let mut config = WorkflowConfig::for_namespace("test");
        config.recursion_limit = 0;
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        assert!(WorkflowRunner::new(
            config,
            oracle,
            registry(),
            Arc::new(EventBus::default())
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_thread_history_continues_across_runs() {
        // Empty decision reply routes straight to finish
        let oracle = Arc::new(ScriptedOracle::new(vec![
            finish_reply("first"),
            finish_reply("first report"),
            finish_reply("second"),
            finish_reply("second report"),
        ]));
        let runner = WorkflowRunner::new(
            WorkflowConfig::for_namespace("test"),
            oracle,
            registry(),
            Arc::new(EventBus::default()),
        )
        .unwrap();

        let thread = ThreadId::from_string("chat-1");
        runner
            .run_workflow(vec![WorkflowMessage::human("one")], &thread)
            .await
            .unwrap();
        runner
            .run_workflow(vec![WorkflowMessage::human("two")], &thread)
            .await
            .unwrap();

        let threads = runner.threads.lock().unwrap();
        let history = threads.get(&thread).unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.contains(&"one"));
        assert!(contents.contains(&"two"));
    }

    #[tokio::test]
    async fn test_detached_run_leaves_no_checkpoint() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            finish_reply("detached"),
            finish_reply("detached report"),
        ]));
        let runner = WorkflowRunner::new(
            WorkflowConfig::for_namespace("test"),
            oracle,
            registry(),
            Arc::new(EventBus::default()),
        )
        .unwrap();

        let thread = ThreadId::from_string("one-shot");
        runner
            .run_detached(vec![WorkflowMessage::human("go")], &thread)
            .await
            .unwrap();

        assert!(runner.thread_history(&thread).is_none());
        assert!(runner.threads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recursion_limit_forces_finish() {
        // Five decision cycles are allowed; the sixth oracle call is the
        // finish node's.
        let mut replies = Vec::new();
        for _ in 0..5 {
            replies.push(tool_call_reply("echo", serde_json::json!({})));
        }
        replies.push(finish_reply("forced"));
        let oracle = Arc::new(ScriptedOracle::new(replies));

        let mut config = WorkflowConfig::for_namespace("test");
        config.recursion_limit = 5;
        let runner = WorkflowRunner::new(
            config,
            oracle.clone(),
            registry(),
            Arc::new(EventBus::default()),
        )
        .unwrap();

        let report = runner
            .run_workflow(vec![WorkflowMessage::human("go")], &ThreadId::new())
            .await
            .unwrap();

        // 5 decision calls + 1 finish call, never a 6th decision
        assert_eq!(oracle.calls(), 6);
        assert_eq!(report.summary, "forced");
        let threads = runner.threads.lock().unwrap();
        let history = threads.values().next().unwrap();
        assert!(history
            .iter()
            .any(|m| m.content.contains("Recursion limit of 5 cycles reached")));
    }
}
