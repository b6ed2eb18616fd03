use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use windlass_core::error::{Result, WindlassError};
use windlass_core::types::{ScheduledTask, TaskStatus};

/// Persistent scheduled-task store backed by SQLite.
///
/// Write-through: the queue persists every task mutation as it happens.
/// On load, tasks a crash left processing are reset to pending so they
/// run again.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open or create the task database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WindlassError::Database(format!("failed to create task store directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| WindlassError::Database(format!("failed to open task store: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS tasks (
                 id TEXT PRIMARY KEY,
                 namespace TEXT NOT NULL,
                 message TEXT NOT NULL,
                 status TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 scheduled_for TEXT NOT NULL,
                 started_at TEXT,
                 completed_at TEXT,
                 result TEXT,
                 error TEXT
             );

             CREATE INDEX IF NOT EXISTS idx_tasks_namespace_due
                 ON tasks(namespace, status, scheduled_for);",
        )
        .map_err(|e| WindlassError::Database(format!("failed to initialize task schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Save a task (upserts by id).
    pub fn save(&self, task: &ScheduledTask) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| WindlassError::Database(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO tasks
                 (id, namespace, message, status, created_at, scheduled_for,
                  started_at, completed_at, result, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                task.id,
                task.namespace,
                task.message,
                task.status.as_str(),
                task.created_at.to_rfc3339(),
                task.scheduled_for.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.result,
                task.error,
            ],
        )
        .map_err(|e| WindlassError::Database(format!("failed to save task: {}", e)))?;
        Ok(())
    }

    /// Load all of a namespace's tasks, resetting interrupted processing
    /// tasks back to pending first.
    pub fn load_namespace(&self, namespace: &str) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn.lock().map_err(|e| WindlassError::Database(e.to_string()))?;

        conn.execute(
            "UPDATE tasks SET status = 'pending', started_at = NULL
             WHERE namespace = ?1 AND status = 'processing'",
            params![namespace],
        )
        .map_err(|e| WindlassError::Database(format!("failed to reset interrupted tasks: {}", e)))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, namespace, message, status, created_at, scheduled_for,
                        started_at, completed_at, result, error
                 FROM tasks
                 WHERE namespace = ?1
                 ORDER BY scheduled_for ASC",
            )
            .map_err(|e| WindlassError::Database(format!("failed to prepare query: {}", e)))?;

        let tasks = stmt
            .query_map(params![namespace], row_to_task)
            .map_err(|e| WindlassError::Database(format!("failed to query tasks: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| WindlassError::Database(format!("failed to read task row: {}", e)))?;

        Ok(tasks)
    }

    /// Remove a task.
    pub fn delete(&self, id: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| WindlassError::Database(e.to_string()))?;
        let deleted = conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .map_err(|e| WindlassError::Database(format!("failed to delete task: {}", e)))?;
        Ok(deleted)
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let status_str: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let scheduled_for: String = row.get(5)?;
    let started_at: Option<String> = row.get(6)?;
    let completed_at: Option<String> = row.get(7)?;

    Ok(ScheduledTask {
        id: row.get(0)?,
        namespace: row.get(1)?,
        message: row.get(2)?,
        status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Failed),
        created_at: parse_timestamp(&created_at),
        scheduled_for: parse_timestamp(&scheduled_for),
        started_at: started_at.as_deref().map(parse_timestamp),
        completed_at: completed_at.as_deref().map(parse_timestamp),
        result: row.get(8)?,
        error: row.get(9)?,
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
