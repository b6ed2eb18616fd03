use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one conversation thread within a namespace.
///
/// Interactive runs and scheduled runs of the same namespace use distinct
/// thread ids so their histories never interleave.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a workflow message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::Human => write!(f, "human"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// One entry of a workflow's message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMessage {
    pub role: Role,
    pub content: String,
    /// Tool name for tool-result entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl WorkflowMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            name: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
            name: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn tool_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            name: Some(name.into()),
            timestamp: Some(Utc::now()),
        }
    }

    /// `role: content` line used when formatting history for the oracle.
    pub fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({}): {}", self.role, name, self.content),
            None => format!("{}: {}", self.role, self.content),
        }
    }
}

/// A structured request to invoke a named tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Tool definition advertised to the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Structured output of one oracle invocation: free text plus any tool
/// calls the oracle requested.
#[derive(Debug, Clone, Default)]
pub struct OracleReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl OracleReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Scheduling recommendation inside a finish report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSchedule {
    #[serde(alias = "nextWorkflowPrompt")]
    pub next_workflow_prompt: String,
    #[serde(alias = "secondsUntilNextWorkflow")]
    pub seconds_until_next_workflow: u64,
}

/// Terminal report of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinishedWorkflow {
    pub summary: String,
    #[serde(default, alias = "nextRecommendedAction")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_recommended_action: Option<String>,
    #[serde(default, alias = "secondsUntilNextWorkflow")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_until_next_workflow: Option<u64>,
    /// Nested schedule object as some oracles emit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<WorkflowSchedule>,
}

impl FinishedWorkflow {
    /// Fallback report used when the finish oracle's output is unparseable.
    pub fn fallback() -> Self {
        Self {
            summary: "Failed to parse workflow content".to_string(),
            next_recommended_action: None,
            seconds_until_next_workflow: None,
            schedule: None,
        }
    }

    pub fn summary_only(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            next_recommended_action: None,
            seconds_until_next_workflow: None,
            schedule: None,
        }
    }

    /// Next-invocation recommendation, whichever shape the oracle used.
    pub fn recommendation(&self) -> Option<(&str, u64)> {
        if let (Some(action), Some(secs)) = (
            self.next_recommended_action.as_deref(),
            self.seconds_until_next_workflow,
        ) {
            return Some((action, secs));
        }
        self.schedule
            .as_ref()
            .map(|s| (s.next_workflow_prompt.as_str(), s.seconds_until_next_workflow))
    }
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// A terminal task never changes status again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A deferred workflow invocation owned by a namespace's scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub namespace: String,
    pub message: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScheduledTask {
    pub fn new(
        namespace: impl Into<String>,
        message: impl Into<String>,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            namespace: namespace.into(),
            message: message.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            scheduled_for,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// Context passed to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    pub namespace: String,
    pub thread_id: ThreadId,
    pub scheduler: Option<Arc<dyn crate::traits::TaskScheduler>>,
}

impl ToolContext {
    pub fn new(namespace: impl Into<String>, thread_id: ThreadId) -> Self {
        Self {
            namespace: namespace.into(),
            thread_id,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn crate::traits::TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("namespace", &self.namespace)
            .field("thread_id", &self.thread_id)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

/// Workflow event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A workflow run started.
    RunStarted { namespace: String, thread_id: ThreadId },
    /// The decision oracle produced tool calls (possibly none).
    Decision { namespace: String, tool_calls: usize },
    /// Tool execution started.
    ToolStart { namespace: String, name: String },
    /// Tool execution completed.
    ToolEnd {
        namespace: String,
        name: String,
        is_error: bool,
    },
    /// A terminate request was rejected under the stop budget.
    StopRejected { namespace: String, stop_counter: u32 },
    /// A terminate request was honored.
    StopHonored { namespace: String },
    /// The message summary node compacted history.
    SummaryCompacted {
        namespace: String,
        before: usize,
        after: usize,
    },
    /// The recursion ceiling forced the run to finish.
    ForcedFinish { namespace: String, steps: u32 },
    /// A workflow run finished with a report.
    RunFinished {
        namespace: String,
        thread_id: ThreadId,
        summary: String,
    },
    /// A task was added to the schedule.
    TaskScheduled { namespace: String, task_id: String },
    /// A due task began executing.
    TaskStarted { namespace: String, task_id: String },
    /// A task's workflow run completed.
    TaskCompleted { namespace: String, task_id: String },
    /// A task's workflow run failed.
    TaskFailed {
        namespace: String,
        task_id: String,
        error: String,
    },
    /// A pending task was cancelled.
    TaskCancelled { namespace: String, task_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_describe() {
        let msg = WorkflowMessage::human("hello");
        assert_eq!(msg.describe(), "human: hello");

        let tool = WorkflowMessage::tool_result("search", "3 results");
        assert_eq!(tool.describe(), "tool (search): 3 results");
    }

    #[test]
    fn test_finished_workflow_aliases() {
        let json = r#"{
            "summary": "done",
            "nextRecommendedAction": "check mentions",
            "secondsUntilNextWorkflow": 600
        }"#;
        let parsed: FinishedWorkflow = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.summary, "done");
        assert_eq!(parsed.recommendation(), Some(("check mentions", 600)));
    }

    #[test]
    fn test_finished_workflow_nested_schedule() {
        let json = r#"{
            "summary": "posted update",
            "schedule": {
                "nextWorkflowPrompt": "review replies",
                "secondsUntilNextWorkflow": 1800
            }
        }"#;
        let parsed: FinishedWorkflow = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.recommendation(), Some(("review replies", 1800)));
    }

    #[test]
    fn test_finished_workflow_no_recommendation() {
        let parsed: FinishedWorkflow =
            serde_json::from_str(r#"{ "summary": "done" }"#).unwrap();
        assert_eq!(parsed.recommendation(), None);
    }

    #[test]
    fn test_task_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("unknown"), None);
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_scheduled_task_new() {
        let due = Utc::now() + chrono::Duration::seconds(60);
        let task = ScheduledTask::new("research", "check feeds", due);
        assert_eq!(task.namespace, "research");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.scheduled_for, due);
        assert!(task.started_at.is_none());
    }
}
