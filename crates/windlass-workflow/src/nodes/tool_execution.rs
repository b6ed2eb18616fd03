use tracing::{error, info};

use windlass_core::config::WorkflowConfig;
use windlass_core::event::EventBus;
use windlass_core::types::{ToolCall, ToolContext, ToolResult, WorkflowEvent, WorkflowMessage};
use windlass_tools::{ToolRegistry, STOP_WORKFLOW};

use crate::state::WorkflowState;

/// Routing verdict of one tool execution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Continue,
    Terminate,
}

/// Executes the tool calls requested by the last decision step.
///
/// Terminate requests are intercepted rather than dispatched: the top
/// namespace honors them unconditionally, every other namespace only once
/// the stop budget is spent. Non-terminate calls all execute first, so an
/// honored stop takes effect at the pass boundary. Per-call failures and
/// registry misses become error-result messages the oracle sees on the
/// next decision step; they never abort the pass.
pub async fn run_tool_execution(
    registry: &ToolRegistry,
    config: &WorkflowConfig,
    state: &mut WorkflowState,
    ctx: &ToolContext,
    bus: &EventBus,
) -> PassOutcome {
    let calls = std::mem::take(&mut state.tool_calls);
    state.begin_pass();

    let (stops, actions): (Vec<ToolCall>, Vec<ToolCall>) =
        calls.into_iter().partition(|c| c.name == STOP_WORKFLOW);

    let results: Vec<ToolResult> = if config.parallel_tools && actions.len() > 1 {
        // Concurrent dispatch; join_all preserves request order.
        for call in &actions {
            bus.publish(WorkflowEvent::ToolStart {
                namespace: config.namespace.clone(),
                name: call.name.clone(),
            });
        }
        let futs: Vec<_> = actions
            .iter()
            .map(|call| {
                let ctx = ctx.clone();
                async move { registry.execute(&call.name, call.arguments.clone(), ctx).await }
            })
            .collect();
        futures::future::join_all(futs)
            .await
            .into_iter()
            .zip(actions.iter())
            .map(|(result, call)| flatten_result(result, &call.name))
            .collect()
    } else {
        let mut results = Vec::with_capacity(actions.len());
        for call in &actions {
            bus.publish(WorkflowEvent::ToolStart {
                namespace: config.namespace.clone(),
                name: call.name.clone(),
            });
            let result = registry
                .execute(&call.name, call.arguments.clone(), ctx.clone())
                .await;
            results.push(flatten_result(result, &call.name));
        }
        results
    };

    for (call, result) in actions.iter().zip(results) {
        bus.publish(WorkflowEvent::ToolEnd {
            namespace: config.namespace.clone(),
            name: call.name.clone(),
            is_error: result.is_error,
        });
        // Only successful invocations count as executed; misses and
        // failures are visible through their error-result messages.
        if !result.is_error {
            state.executed_tools.push(call.name.clone());
        }
        state
            .messages
            .push(WorkflowMessage::tool_result(&call.name, result.content));
    }

    let mut outcome = PassOutcome::Continue;
    for _ in &stops {
        if outcome == PassOutcome::Terminate {
            break;
        }
        if config.is_top_namespace() || state.stop_counter >= config.stop_counter_limit {
            info!(
                namespace = %config.namespace,
                stop_counter = state.stop_counter,
                "stop request honored"
            );
            bus.publish(WorkflowEvent::StopHonored {
                namespace: config.namespace.clone(),
            });
            state
                .messages
                .push(WorkflowMessage::tool_result(STOP_WORKFLOW, "Stop request accepted."));
            outcome = PassOutcome::Terminate;
        } else {
            state.stop_counter += 1;
            info!(
                namespace = %config.namespace,
                stop_counter = state.stop_counter,
                limit = config.stop_counter_limit,
                "stop request rejected"
            );
            bus.publish(WorkflowEvent::StopRejected {
                namespace: config.namespace.clone(),
                stop_counter: state.stop_counter,
            });
            state.messages.push(WorkflowMessage::tool_result(
                STOP_WORKFLOW,
                format!(
                    "Stop request rejected ({} of {}). Premature termination is \
                     discouraged; keep working and stop only when the goal is \
                     genuinely complete or no further progress is possible.",
                    state.stop_counter, config.stop_counter_limit
                ),
            ));
        }
    }

    outcome
}

fn flatten_result(result: windlass_core::error::Result<ToolResult>, name: &str) -> ToolResult {
    match result {
        Ok(r) => r,
        Err(e) => {
            error!(tool = %name, error = %e, "tool execution failed");
            ToolResult::error(e.to_string())
        }
    }
}
