use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use windlass_core::error::{Result, WindlassError};
use windlass_core::event::EventBus;
use windlass_core::traits::TaskScheduler;
use windlass_core::types::{FinishedWorkflow, ScheduledTask, TaskStatus, WorkflowEvent};

use super::store::TaskStore;

/// Terminal tasks kept in memory for listing; older ones are dropped
/// (the store, when attached, retains everything).
const MAX_TERMINAL_HISTORY: usize = 100;

struct Inner {
    tasks: Vec<ScheduledTask>,
    /// Id of the task currently processing, if any. At most one per
    /// namespace; `get_next_due_task` returns `None` while set.
    processing: Option<String>,
}

/// One namespace's scheduled-task state.
///
/// Mutated from two logical actors (a running workflow's scheduling tool
/// calls and the executor's polling loop), so every read-modify-write
/// takes the single internal lock.
pub struct TaskQueue {
    namespace: String,
    inner: Mutex<Inner>,
    store: Option<Arc<TaskStore>>,
    event_bus: Arc<EventBus>,
}

impl TaskQueue {
    pub fn new(namespace: impl Into<String>, event_bus: Arc<EventBus>) -> Self {
        Self {
            namespace: namespace.into(),
            inner: Mutex::new(Inner {
                tasks: Vec::new(),
                processing: None,
            }),
            store: None,
            event_bus,
        }
    }

    /// Create a queue backed by a persistent store, restoring the
    /// namespace's tasks. Tasks left processing by a crash come back as
    /// pending.
    pub fn with_store(
        namespace: impl Into<String>,
        event_bus: Arc<EventBus>,
        store: Arc<TaskStore>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let tasks = store.load_namespace(&namespace)?;
        if !tasks.is_empty() {
            info!(namespace = %namespace, count = tasks.len(), "restored scheduled tasks");
        }
        Ok(Self {
            namespace,
            inner: Mutex::new(Inner {
                tasks,
                processing: None,
            }),
            store: Some(store),
            event_bus,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn persist(&self, task: &ScheduledTask) -> Result<()> {
        if let Some(store) = &self.store {
            store.save(task)?;
        }
        Ok(())
    }

    /// Add a pending task due at `scheduled_for`.
    pub fn schedule_task(
        &self,
        message: &str,
        scheduled_for: DateTime<Utc>,
    ) -> Result<ScheduledTask> {
        let task = ScheduledTask::new(&self.namespace, message, scheduled_for);
        self.persist(&task)?;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.tasks.push(task.clone());
            inner
                .tasks
                .sort_by_key(|t| (t.status.is_terminal(), t.scheduled_for));
        }

        info!(
            namespace = %self.namespace,
            task_id = %task.id,
            scheduled_for = %task.scheduled_for,
            "task scheduled"
        );
        self.event_bus.publish(WorkflowEvent::TaskScheduled {
            namespace: self.namespace.clone(),
            task_id: task.id.clone(),
        });
        Ok(task)
    }

    /// Atomically select the earliest due pending task and mark it
    /// processing. Returns `None` while another task is processing, and
    /// never returns a task whose due time is in the future.
    pub fn get_next_due_task(&self) -> Option<ScheduledTask> {
        let task = {
            let mut inner = self.inner.lock().unwrap();
            if inner.processing.is_some() {
                return None;
            }
            let now = Utc::now();
            let due = inner
                .tasks
                .iter_mut()
                .filter(|t| t.status == TaskStatus::Pending && t.scheduled_for <= now)
                .min_by_key(|t| t.scheduled_for)?;
            due.status = TaskStatus::Processing;
            due.started_at = Some(now);
            let task = due.clone();
            inner.processing = Some(task.id.clone());
            task
        };

        if let Err(e) = self.persist(&task) {
            warn!(task_id = %task.id, error = %e, "failed to persist processing transition");
        }
        self.event_bus.publish(WorkflowEvent::TaskStarted {
            namespace: self.namespace.clone(),
            task_id: task.id.clone(),
        });
        Some(task)
    }

    /// The next pending task and milliseconds until it is due (negative
    /// when already due), or `None` when nothing is pending.
    pub fn get_time_until_next_task(&self) -> Option<(ScheduledTask, i64)> {
        let inner = self.inner.lock().unwrap();
        let next = inner
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| t.scheduled_for)?;
        let ms = (next.scheduled_for - Utc::now()).num_milliseconds();
        Some((next.clone(), ms))
    }

    /// Transition a task to `status`. For `Failed` the reason is kept as
    /// the task's error text; for `Completed` it is kept as the result.
    ///
    /// Only forward transitions are accepted: a terminal task never
    /// changes again, and nothing moves back to `Pending` or into
    /// `Processing` from here (`get_next_due_task` is the sole owner of
    /// the processing slot).
    pub fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let task = {
            let mut inner = self.inner.lock().unwrap();
            let task = inner
                .tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| WindlassError::TaskNotFound(id.to_string()))?;
            if task.status.is_terminal()
                || matches!(status, TaskStatus::Pending | TaskStatus::Processing)
            {
                return Err(WindlassError::Scheduler(format!(
                    "invalid status transition for task {}: {} -> {}",
                    id,
                    task.status.as_str(),
                    status.as_str()
                )));
            }
            task.status = status;
            if status.is_terminal() {
                task.completed_at = Some(Utc::now());
            }
            match status {
                TaskStatus::Completed => task.result = reason.map(str::to_string),
                TaskStatus::Failed => task.error = reason.map(str::to_string),
                _ => {}
            }
            let task = task.clone();
            if status.is_terminal() && inner.processing.as_deref() == Some(id) {
                inner.processing = None;
            }
            prune_terminal(&mut inner.tasks);
            task
        };

        self.persist(&task)?;
        match status {
            TaskStatus::Completed => {
                self.event_bus.publish(WorkflowEvent::TaskCompleted {
                    namespace: self.namespace.clone(),
                    task_id: task.id,
                });
            }
            TaskStatus::Failed => {
                self.event_bus.publish(WorkflowEvent::TaskFailed {
                    namespace: self.namespace.clone(),
                    task_id: task.id,
                    error: task.error.unwrap_or_default(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Mark a task completed with its run's report, and schedule the
    /// follow-up task the report recommends, if any. Returns the
    /// follow-up.
    pub fn complete_with_report(
        &self,
        id: &str,
        report: &FinishedWorkflow,
    ) -> Result<Option<ScheduledTask>> {
        self.update_task_status(id, TaskStatus::Completed, Some(&report.summary))?;

        if let Some((action, secs)) = report.recommendation() {
            let due = Utc::now() + Duration::seconds(secs as i64);
            let follow_up = self.schedule_task(action, due)?;
            info!(
                namespace = %self.namespace,
                task_id = %id,
                follow_up = %follow_up.id,
                delay_seconds = secs,
                "follow-up task scheduled from finish report"
            );
            return Ok(Some(follow_up));
        }
        Ok(None)
    }

    /// Cancel a pending task. Processing and terminal tasks are left
    /// alone.
    pub fn delete_task(&self, id: &str) -> Result<bool> {
        let task = {
            let mut inner = self.inner.lock().unwrap();
            match inner
                .tasks
                .iter_mut()
                .find(|t| t.id == id && t.status == TaskStatus::Pending)
            {
                Some(task) => {
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(Utc::now());
                    task.clone()
                }
                None => return Ok(false),
            }
        };

        self.persist(&task)?;
        info!(namespace = %self.namespace, task_id = %id, "task cancelled");
        self.event_bus.publish(WorkflowEvent::TaskCancelled {
            namespace: self.namespace.clone(),
            task_id: task.id,
        });
        Ok(true)
    }

    /// Snapshot of all known tasks.
    pub fn get_all_tasks(&self) -> Vec<ScheduledTask> {
        self.inner.lock().unwrap().tasks.clone()
    }
}

fn prune_terminal(tasks: &mut Vec<ScheduledTask>) {
    let terminal = tasks.iter().filter(|t| t.status.is_terminal()).count();
    if terminal <= MAX_TERMINAL_HISTORY {
        return;
    }
    let mut finished: Vec<(DateTime<Utc>, String)> = tasks
        .iter()
        .filter(|t| t.status.is_terminal())
        .map(|t| (t.completed_at.unwrap_or(t.scheduled_for), t.id.clone()))
        .collect();
    finished.sort_by_key(|(at, _)| *at);
    let drop_ids: std::collections::HashSet<String> = finished
        .into_iter()
        .take(terminal - MAX_TERMINAL_HISTORY)
        .map(|(_, id)| id)
        .collect();
    tasks.retain(|t| !drop_ids.contains(&t.id));
}

impl TaskScheduler for TaskQueue {
    fn schedule(&self, message: &str, scheduled_for: DateTime<Utc>) -> Result<ScheduledTask> {
        self.schedule_task(message, scheduled_for)
    }

    fn cancel(&self, id: &str) -> Result<bool> {
        self.delete_task(id)
    }

    fn list(&self) -> Vec<ScheduledTask> {
        self.get_all_tasks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> TaskQueue {
        TaskQueue::new("test", Arc::new(EventBus::default()))
    }

    #[test]
    fn test_due_task_selection_is_exclusive() {
        let q = queue();
        let past = Utc::now() - Duration::seconds(5);
        q.schedule_task("a", past).unwrap();
        q.schedule_task("b", past).unwrap();

        let first = q.get_next_due_task().unwrap();
        // Second poll sees a processing task and yields nothing
        assert!(q.get_next_due_task().is_none());

        q.update_task_status(&first.id, TaskStatus::Completed, None)
            .unwrap();
        let second = q.get_next_due_task().unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_never_returns_future_task() {
        let q = queue();
        q.schedule_task("later", Utc::now() + Duration::seconds(3600))
            .unwrap();
        assert!(q.get_next_due_task().is_none());

        let (next, ms) = q.get_time_until_next_task().unwrap();
        assert_eq!(next.message, "later");
        assert!(ms > 0);
    }

    #[test]
    fn test_earliest_due_wins() {
        let q = queue();
        q.schedule_task("newer", Utc::now() - Duration::seconds(1))
            .unwrap();
        q.schedule_task("older", Utc::now() - Duration::seconds(60))
            .unwrap();

        let task = q.get_next_due_task().unwrap();
        assert_eq!(task.message, "older");
        assert_eq!(task.status, TaskStatus::Processing);
        assert!(task.started_at.is_some());
    }

    #[test]
    fn test_update_unknown_task() {
        let q = queue();
        let err = q
            .update_task_status("missing", TaskStatus::Failed, Some("boom"))
            .unwrap_err();
        assert!(matches!(err, WindlassError::TaskNotFound(_)));
    }

    #[test]
    fn test_failed_keeps_error_text() {
        let q = queue();
        let task = q.schedule_task("x", Utc::now()).unwrap();
        q.get_next_due_task().unwrap();
        q.update_task_status(&task.id, TaskStatus::Failed, Some("oracle unavailable"))
            .unwrap();

        let tasks = q.get_all_tasks();
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert_eq!(tasks[0].error.as_deref(), Some("oracle unavailable"));
        // Processing slot is released
        q.schedule_task("y", Utc::now()).unwrap();
        assert!(q.get_next_due_task().is_some());
    }

    #[test]
    fn test_terminal_task_never_reenters_pending() {
        let q = queue();
        let task = q.schedule_task("once", Utc::now()).unwrap();
        q.get_next_due_task().unwrap();
        q.update_task_status(&task.id, TaskStatus::Completed, Some("done"))
            .unwrap();

        let err = q
            .update_task_status(&task.id, TaskStatus::Pending, None)
            .unwrap_err();
        assert!(matches!(err, WindlassError::Scheduler(_)));
        // The finished task is never handed out again
        assert!(q.get_next_due_task().is_none());
        assert_eq!(q.get_all_tasks()[0].status, TaskStatus::Completed);
    }

    #[test]
    fn test_terminal_task_stays_terminal() {
        let q = queue();
        let task = q.schedule_task("x", Utc::now()).unwrap();
        q.get_next_due_task().unwrap();
        q.update_task_status(&task.id, TaskStatus::Failed, Some("boom"))
            .unwrap();

        assert!(q
            .update_task_status(&task.id, TaskStatus::Completed, None)
            .is_err());
        assert_eq!(q.get_all_tasks()[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_processing_cannot_be_set_externally() {
        let q = queue();
        let a = q.schedule_task("a", Utc::now()).unwrap();
        q.schedule_task("b", Utc::now()).unwrap();

        // Only get_next_due_task claims the processing slot
        let err = q
            .update_task_status(&a.id, TaskStatus::Processing, None)
            .unwrap_err();
        assert!(matches!(err, WindlassError::Scheduler(_)));

        let first = q.get_next_due_task().unwrap();
        assert!(q.get_next_due_task().is_none());
        q.update_task_status(&first.id, TaskStatus::Completed, None)
            .unwrap();
        assert!(q.get_next_due_task().is_some());
    }

    #[test]
    fn test_complete_with_report_schedules_follow_up() {
        let q = queue();
        let task = q.schedule_task("first", Utc::now()).unwrap();
        q.get_next_due_task().unwrap();

        let report: FinishedWorkflow = serde_json::from_str(
            r#"{ "summary": "done", "nextRecommendedAction": "do it again", "secondsUntilNextWorkflow": 120 }"#,
        )
        .unwrap();
        let follow_up = q.complete_with_report(&task.id, &report).unwrap().unwrap();
        assert_eq!(follow_up.message, "do it again");
        assert_eq!(follow_up.status, TaskStatus::Pending);
        assert!(follow_up.scheduled_for > Utc::now() + Duration::seconds(100));
    }

    #[test]
    fn test_complete_without_recommendation() {
        let q = queue();
        let task = q.schedule_task("only", Utc::now()).unwrap();
        q.get_next_due_task().unwrap();

        let report = FinishedWorkflow::summary_only("done");
        assert!(q.complete_with_report(&task.id, &report).unwrap().is_none());
        assert_eq!(q.get_all_tasks().len(), 1);
    }

    #[test]
    fn test_delete_only_cancels_pending() {
        let q = queue();
        let pending = q
            .schedule_task("p", Utc::now() + Duration::seconds(60))
            .unwrap();
        let processing = q.schedule_task("r", Utc::now()).unwrap();
        q.get_next_due_task().unwrap();

        assert!(q.delete_task(&pending.id).unwrap());
        assert!(!q.delete_task(&processing.id).unwrap());
        assert!(!q.delete_task("missing").unwrap());

        let tasks = q.get_all_tasks();
        let cancelled = tasks.iter().find(|t| t.id == pending.id).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
    }
}
