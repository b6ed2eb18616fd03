use tracing::{debug, warn};

use windlass_core::config::ModelConfig;
use windlass_core::event::EventBus;
use windlass_core::traits::Oracle;
use windlass_core::types::{ToolDefinition, WorkflowEvent, WorkflowMessage};

use crate::prompts::Prompts;
use crate::state::WorkflowState;

/// Asks the decision oracle what to do next and records the requested
/// tool calls in state.
///
/// Oracle failures degrade to "no action": the tool-call set stays empty
/// and a diagnostic assistant message is appended, so the runner routes
/// to finish instead of aborting the run.
pub async fn run_decision(
    oracle: &dyn Oracle,
    model: &ModelConfig,
    prompts: &Prompts,
    tool_defs: &[ToolDefinition],
    state: &mut WorkflowState,
    bus: &EventBus,
    namespace: &str,
) {
    let tools = tool_defs
        .iter()
        .map(|d| d.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let executed = if state.executed_tools.is_empty() {
        "none".to_string()
    } else {
        state.executed_tools.join(", ")
    };

    let prompt = prompts.decision.render(&[
        ("messages", &state.transcript()),
        ("tools", &tools),
        ("executed_tools", &executed),
        (
            "custom_instructions",
            prompts.custom_instructions.as_deref().unwrap_or(""),
        ),
    ]);

    match oracle
        .invoke(model, vec![WorkflowMessage::system(prompt)], tool_defs)
        .await
    {
        Ok(reply) => {
            debug!(
                namespace = %namespace,
                tool_calls = reply.tool_calls.len(),
                "decision received"
            );
            if !reply.content.is_empty() {
                state.messages.push(WorkflowMessage::assistant(reply.content));
            }
            state.tool_calls = reply.tool_calls;
        }
        Err(e) => {
            warn!(namespace = %namespace, error = %e, "decision oracle failed, taking no action");
            state.error = Some(e.to_string());
            state.messages.push(WorkflowMessage::assistant(format!(
                "Decision step failed ({}); no action taken.",
                e
            )));
            state.tool_calls.clear();
        }
    }

    bus.publish(WorkflowEvent::Decision {
        namespace: namespace.to_string(),
        tool_calls: state.tool_calls.len(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use windlass_core::types::ToolCall;
    use windlass_test_utils::{tool_call_reply, FailingOracle, ScriptedOracle};

    fn defs() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "echo".to_string(),
            description: "echo".to_string(),
            input_schema: serde_json::json!({}),
        }]
    }

    #[tokio::test]
    async fn test_decision_records_tool_calls() {
        let oracle = ScriptedOracle::new(vec![tool_call_reply(
            "echo",
            serde_json::json!({ "text": "hi" }),
        )]);
        let bus = Arc::new(EventBus::default());
        let mut state = WorkflowState::new(vec![WorkflowMessage::human("go")]);

        run_decision(
            &oracle,
            &ModelConfig::default(),
            &Prompts::default(),
            &defs(),
            &mut state,
            &bus,
            "test",
        )
        .await;

        assert_eq!(
            state.tool_calls,
            vec![ToolCall::new("echo", serde_json::json!({ "text": "hi" }))]
        );
    }

    #[tokio::test]
    async fn test_oracle_failure_degrades_to_no_action() {
        let bus = Arc::new(EventBus::default());
        let mut state = WorkflowState::new(vec![WorkflowMessage::human("go")]);
        state.tool_calls.push(ToolCall::new("stale", serde_json::json!({})));

        run_decision(
            &FailingOracle,
            &ModelConfig::default(),
            &Prompts::default(),
            &defs(),
            &mut state,
            &bus,
            "test",
        )
        .await;

        assert!(state.tool_calls.is_empty());
        assert!(state.error.is_some());
        assert!(state
            .messages
            .last()
            .unwrap()
            .content
            .contains("no action taken"));
    }
}
