use windlass_core::types::{FinishedWorkflow, ToolCall, WorkflowMessage};

/// Mutable record threaded through one workflow run.
///
/// Owned exclusively by its run; runs of the same namespace are serialized
/// by the runner, so this is never shared.
#[derive(Debug, Default)]
pub struct WorkflowState {
    /// Ordered message history. Append-only except for summary steps,
    /// which replace a contiguous slice with one compressed entry.
    pub messages: Vec<WorkflowMessage>,
    /// Tool invocations requested by the most recent decision step.
    pub tool_calls: Vec<ToolCall>,
    /// Names of tools actually invoked during the current pass.
    pub executed_tools: Vec<String>,
    /// Terminate requests rejected so far in this run.
    pub stop_counter: u32,
    /// Last unrecoverable error observed, if any.
    pub error: Option<String>,
    /// Present only once the finish node has produced the terminal report.
    pub finished: Option<FinishedWorkflow>,
}

impl WorkflowState {
    pub fn new(messages: Vec<WorkflowMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Reset per-pass fields before a tool execution pass.
    pub fn begin_pass(&mut self) {
        self.tool_calls.clear();
        self.executed_tools.clear();
    }

    /// Message history formatted one entry per line for oracle prompts.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.describe())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
