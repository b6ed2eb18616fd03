use chrono::{Duration, Utc};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use windlass_core::error::{Result, WindlassError};
use windlass_core::traits::Tool;
use windlass_core::types::{ToolContext, ToolResult};

fn scheduler_of(
    ctx: &ToolContext,
) -> Result<std::sync::Arc<dyn windlass_core::traits::TaskScheduler>> {
    ctx.scheduler
        .clone()
        .ok_or_else(|| WindlassError::Scheduler("no scheduler attached to tool context".into()))
}

#[derive(Debug, Deserialize)]
struct ScheduleTaskInput {
    message: String,
    /// Seconds from now until the task is due. Zero means immediately.
    #[serde(default)]
    delay_seconds: u64,
}

/// Adds a deferred workflow invocation to the namespace's schedule.
pub struct ScheduleTaskTool;

impl Tool for ScheduleTaskTool {
    fn name(&self) -> &str {
        "schedule_task"
    }

    fn description(&self) -> &str {
        "Schedule a future workflow run with the given message. \
         delay_seconds is the offset from now; 0 runs as soon as possible."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Prompt for the scheduled workflow run"
                },
                "delay_seconds": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Seconds from now until the task is due"
                }
            },
            "required": ["message"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let input: ScheduleTaskInput = serde_json::from_value(input)
                .map_err(|e| WindlassError::ToolValidation(e.to_string()))?;

            let scheduler = scheduler_of(&ctx)?;
            let due = Utc::now() + Duration::seconds(input.delay_seconds as i64);
            let task = scheduler.schedule(&input.message, due)?;

            info!(
                namespace = %ctx.namespace,
                task_id = %task.id,
                delay_seconds = input.delay_seconds,
                "task scheduled"
            );
            Ok(ToolResult::success(format!(
                "Scheduled task {} for {}",
                task.id, task.scheduled_for
            )))
        })
    }
}

/// Lists the namespace's known tasks.
pub struct ListTasksTool;

impl Tool for ListTasksTool {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "List scheduled tasks for this namespace with their status and due time."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let scheduler = scheduler_of(&ctx)?;
            let tasks = scheduler.list();
            if tasks.is_empty() {
                return Ok(ToolResult::success("No scheduled tasks"));
            }
            let lines: Vec<String> = tasks
                .iter()
                .map(|t| {
                    format!(
                        "{} [{}] due {}: {}",
                        t.id, t.status, t.scheduled_for, t.message
                    )
                })
                .collect();
            Ok(ToolResult::success(lines.join("\n")))
        })
    }
}

#[derive(Debug, Deserialize)]
struct DeleteTaskInput {
    task_id: String,
}

/// Cancels a pending task by id.
pub struct DeleteTaskTool;

impl Tool for DeleteTaskTool {
    fn name(&self) -> &str {
        "delete_task"
    }

    fn description(&self) -> &str {
        "Cancel a pending scheduled task by its id. Tasks that already \
         started or finished cannot be cancelled."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "Id of the pending task to cancel"
                }
            },
            "required": ["task_id"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let input: DeleteTaskInput = serde_json::from_value(input)
                .map_err(|e| WindlassError::ToolValidation(e.to_string()))?;

            let scheduler = scheduler_of(&ctx)?;
            if scheduler.cancel(&input.task_id)? {
                info!(namespace = %ctx.namespace, task_id = %input.task_id, "task cancelled");
                Ok(ToolResult::success(format!(
                    "Cancelled task {}",
                    input.task_id
                )))
            } else {
                Ok(ToolResult::error(format!(
                    "No pending task with id {}",
                    input.task_id
                )))
            }
        })
    }
}
