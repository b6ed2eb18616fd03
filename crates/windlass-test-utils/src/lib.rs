//! Mocks and fixtures shared by Windlass crate tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use windlass_core::config::ModelConfig;
use windlass_core::error::{Result, WindlassError};
use windlass_core::traits::{Oracle, Tool};
use windlass_core::types::{
    OracleReply, ToolContext, ToolDefinition, ToolResult, WorkflowMessage,
};

/// Oracle that replays a fixed sequence of replies, one per invocation.
///
/// Once the script is exhausted it keeps returning the final reply, so a
/// runner that calls the summary or finish oracle more often than the
/// test anticipated still gets a well-formed answer.
pub struct ScriptedOracle {
    replies: Mutex<Vec<OracleReply>>,
    last: Mutex<Option<OracleReply>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<OracleReply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Oracle for ScriptedOracle {
    fn invoke(
        &self,
        _config: &ModelConfig,
        _messages: Vec<WorkflowMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<OracleReply>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.is_empty() {
                self.last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| OracleReply::text("{}"))
            } else {
                let reply = replies.remove(0);
                *self.last.lock().unwrap() = Some(reply.clone());
                reply
            };
            Ok(reply)
        })
    }
}

/// Oracle that always answers with the same text.
pub struct StaticOracle {
    content: String,
}

impl StaticOracle {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Oracle for StaticOracle {
    fn invoke(
        &self,
        _config: &ModelConfig,
        _messages: Vec<WorkflowMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<OracleReply>> {
        Box::pin(async move { Ok(OracleReply::text(self.content.clone())) })
    }
}

/// Oracle that fails every invocation.
pub struct FailingOracle;

impl Oracle for FailingOracle {
    fn invoke(
        &self,
        _config: &ModelConfig,
        _messages: Vec<WorkflowMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<OracleReply>> {
        Box::pin(async move { Err(WindlassError::Oracle("scripted failure".into())) })
    }
}

/// Tool that echoes its input back, recording every call.
pub struct EchoTool {
    calls: Mutex<Vec<serde_json::Value>>,
}

impl EchoTool {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes its input back"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(input.clone());
            Ok(ToolResult::success(input.to_string()))
        })
    }
}

/// Tool that always errors inside its result.
pub struct FailingTool;

impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            Err(WindlassError::ToolExecution {
                tool: "failing".to_string(),
                message: "scripted failure".to_string(),
            })
        })
    }
}

/// Tool that sleeps longer than its declared timeout.
pub struct SlowTool {
    pub sleep: Duration,
    pub timeout_secs: u64,
}

impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps before answering"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            tokio::time::sleep(self.sleep).await;
            Ok(ToolResult::success("finally"))
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

/// Decision reply that calls one tool.
pub fn tool_call_reply(name: &str, arguments: serde_json::Value) -> OracleReply {
    OracleReply {
        content: String::new(),
        tool_calls: vec![windlass_core::types::ToolCall::new(name, arguments)],
    }
}

/// Finish reply carrying a well-formed report JSON.
pub fn finish_reply(summary: &str) -> OracleReply {
    OracleReply::text(
        serde_json::json!({ "summary": summary }).to_string(),
    )
}
