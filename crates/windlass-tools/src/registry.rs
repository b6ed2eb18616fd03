use std::collections::HashMap;
use std::sync::Arc;

use windlass_core::error::{Result, WindlassError};
use windlass_core::traits::Tool;
use windlass_core::types::{ToolContext, ToolDefinition, ToolResult};

/// Registry of available tools. Built by the caller and handed to the
/// workflow runner; the core never constructs tools of its own beyond
/// the control/scheduling built-ins.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tool names.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get tool definitions for sending to the oracle.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name, bounded by the tool's own timeout.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| WindlassError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(WindlassError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::control::StopWorkflowTool;
    use windlass_core::types::ThreadId;

    #[tokio::test]
    async fn test_register_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(StopWorkflowTool);

        assert!(registry.contains("stop_workflow"));
        assert_eq!(registry.list(), vec!["stop_workflow"]);
        assert_eq!(registry.definitions().len(), 1);

        let ctx = ToolContext::new("orchestrator", ThreadId::new());
        let result = registry
            .execute(
                "stop_workflow",
                serde_json::json!({ "reason": "done" }),
                ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext::new("orchestrator", ThreadId::new());
        let err = registry
            .execute("nope", serde_json::json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WindlassError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_tool_error_propagates() {
        let mut registry = ToolRegistry::new();
        registry.register(windlass_test_utils::FailingTool);
        let ctx = ToolContext::new("orchestrator", ThreadId::new());
        let err = registry
            .execute("failing", serde_json::json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WindlassError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_tool_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(windlass_test_utils::SlowTool {
            sleep: std::time::Duration::from_millis(200),
            timeout_secs: 0,
        });
        let ctx = ToolContext::new("orchestrator", ThreadId::new());
        let err = registry
            .execute("slow", serde_json::json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WindlassError::ToolTimeout { .. }));
    }

    #[test]
    fn test_unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(StopWorkflowTool);
        assert!(registry.unregister("stop_workflow"));
        assert!(!registry.unregister("stop_workflow"));
        assert!(!registry.contains("stop_workflow"));
    }
}
