use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use windlass_core::config::SchedulerConfig;
use windlass_core::types::{TaskStatus, ThreadId, WorkflowMessage};

use super::queue::TaskQueue;
use crate::runner::WorkflowRunner;

/// Polling loop that replays due tasks through the workflow runner.
///
/// Sleep between scheduling decisions is the time until the next task is
/// due, clamped to `[poll_floor_ms, check_interval_ms]`. A task failure
/// never stops the loop; cancellation stops polling without preempting a
/// task already in flight.
pub struct TaskExecutor {
    queue: Arc<TaskQueue>,
    runner: Arc<WorkflowRunner>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl TaskExecutor {
    pub fn new(
        queue: Arc<TaskQueue>,
        runner: Arc<WorkflowRunner>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            runner,
            config,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the polling loop. Blocks until cancelled.
    pub async fn run(&self) {
        let namespace = self.queue.namespace().to_string();
        info!(namespace = %namespace, "task executor started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if let Some(task) = self.queue.get_next_due_task() {
                self.execute(&task.id, &task.message, &namespace).await;
                // Short breather before the next scheduling decision
                if self.sleep_or_cancel(self.config.poll_floor_ms).await {
                    break;
                }
                continue;
            }

            let sleep_ms = match self.queue.get_time_until_next_task() {
                Some((_, ms)) => (ms.max(0) as u64)
                    .clamp(self.config.poll_floor_ms, self.config.check_interval_ms),
                None => self.config.check_interval_ms,
            };
            if self.sleep_or_cancel(sleep_ms).await {
                break;
            }
        }

        info!(namespace = %namespace, "task executor stopped");
    }

    /// Returns true when cancelled during the sleep.
    async fn sleep_or_cancel(&self, ms: u64) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => false,
            _ = self.cancel.cancelled() => true,
        }
    }

    async fn execute(&self, task_id: &str, message: &str, namespace: &str) {
        info!(namespace = %namespace, task_id = %task_id, "executing scheduled task");
        let thread_id = ThreadId::from_string(&format!("scheduled-{}", task_id));

        // Detached: the thread id is unique to this task, so keeping its
        // transcript around after the run would just leak.
        match self
            .runner
            .run_detached(vec![WorkflowMessage::human(message)], &thread_id)
            .await
        {
            Ok(report) => match self.queue.complete_with_report(task_id, &report) {
                Ok(Some(follow_up)) => {
                    info!(
                        namespace = %namespace,
                        task_id = %task_id,
                        follow_up = %follow_up.id,
                        "scheduled task completed"
                    );
                }
                Ok(None) => {
                    info!(namespace = %namespace, task_id = %task_id, "scheduled task completed");
                }
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        task_id = %task_id,
                        error = %e,
                        "failed to record task completion"
                    );
                }
            },
            Err(e) => {
                error!(namespace = %namespace, task_id = %task_id, error = %e, "scheduled task failed");
                if let Err(e) = self
                    .queue
                    .update_task_status(task_id, TaskStatus::Failed, Some(&e.to_string()))
                {
                    warn!(task_id = %task_id, error = %e, "failed to record task failure");
                }
            }
        }
    }
}
