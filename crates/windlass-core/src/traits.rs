use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Decision/summary/finish oracle — an opaque LLM capability.
///
/// One implementation serves all three node roles; the caller selects the
/// role through the `ModelConfig` it passes. The core attaches no retry
/// contract: retries, if desired, belong to the adapter.
pub trait Oracle: Send + Sync + 'static {
    /// Send the prompt context and receive a structured reply.
    fn invoke(
        &self,
        config: &ModelConfig,
        messages: Vec<WorkflowMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<OracleReply>>;
}

/// Tool — extensible capability invocable by name.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in oracle tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Handle to a namespace's task schedule, given to tools that manage
/// deferred work. All methods take a single critical section internally.
pub trait TaskScheduler: Send + Sync + 'static {
    /// Add a pending task due at `scheduled_for`.
    fn schedule(&self, message: &str, scheduled_for: DateTime<Utc>) -> Result<ScheduledTask>;

    /// Cancel a pending task by id. Returns false if no pending task
    /// with that id exists.
    fn cancel(&self, id: &str) -> Result<bool>;

    /// Snapshot of all known tasks (pending, processing, and finished).
    fn list(&self) -> Vec<ScheduledTask>;
}
