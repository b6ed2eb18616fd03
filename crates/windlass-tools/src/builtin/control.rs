use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use windlass_core::error::Result;
use windlass_core::traits::Tool;
use windlass_core::types::{ToolContext, ToolResult};

/// Name of the terminate tool. The workflow runner intercepts calls to
/// this name instead of dispatching them through the registry.
pub const STOP_WORKFLOW: &str = "stop_workflow";

#[derive(Debug, Deserialize)]
struct StopWorkflowInput {
    #[serde(default)]
    reason: Option<String>,
}

/// Requests that the current workflow run terminate.
///
/// The runner decides whether to honor the request; this tool only exists
/// so the oracle has a definition to call. Its `execute` runs when the
/// runner acknowledges a rejected request and wants a tool-result entry
/// in the history.
pub struct StopWorkflowTool;

impl Tool for StopWorkflowTool {
    fn name(&self) -> &str {
        STOP_WORKFLOW
    }

    fn description(&self) -> &str {
        "Stop the current workflow when the goal is reached or no further progress is possible. \
         Provide a short reason."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Why the workflow should stop"
                }
            },
            "required": []
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let input: StopWorkflowInput = serde_json::from_value(input).unwrap_or(
                StopWorkflowInput { reason: None },
            );
            let reason = input.reason.unwrap_or_else(|| "no reason given".to_string());
            debug!(namespace = %ctx.namespace, reason = %reason, "stop requested");
            Ok(ToolResult::success(format!(
                "Stop requested: {}",
                reason
            )))
        })
    }
}
