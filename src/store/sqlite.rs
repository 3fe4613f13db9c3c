//! SQLite-backed task store.
//!
//! Reads the `tasks` table shared with the task manager. The schema is
//! created on open so a fresh database file is usable, but rows are only
//! ever written by the task manager itself (or by tests).

use super::{StoreError, Task, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    task_name TEXT NOT NULL,
    category TEXT,
    due_date TEXT,
    reminder INTEGER,
    completed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id);
CREATE INDEX IF NOT EXISTS idx_tasks_reminder ON tasks(completed, reminder);
"#;

const SELECT_CANDIDATES: &str = "SELECT id, user_id, task_name, category, due_date, reminder, completed
     FROM tasks
     WHERE completed = 0 AND reminder IS NOT NULL
     ORDER BY id";

const SELECT_CANDIDATES_FOR_USER: &str = "SELECT id, user_id, task_name, category, due_date, reminder, completed
     FROM tasks
     WHERE completed = 0 AND reminder IS NOT NULL AND user_id = ?1
     ORDER BY id";

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    pub async fn open(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StoreError::Unavailable(format!("Failed to create task db dir: {}", e))
                })?;
            }
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(|e| {
                StoreError::Unavailable(format!("Failed to open SQLite database: {}", e))
            })?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, StoreError>(conn)
        })
        .await??;

        tracing::info!("Task store opened (sqlite)");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a row. Used by tests and local tooling.
    pub async fn upsert(&self, task: &Task) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn).lock_owned().await;
        let task = task.clone();
        tokio::task::spawn_blocking(move || {
            conn.execute(
                "INSERT OR REPLACE INTO tasks (id, user_id, task_name, category, due_date, reminder, completed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    task.id,
                    task.user_id,
                    task.name,
                    task.category,
                    task.due_at.map(|d| d.to_rfc3339()),
                    task.reminder_minutes,
                    task.completed as i64,
                ],
            )?;
            Ok::<_, StoreError>(())
        })
        .await?
    }

    /// The connection lock is awaited before entering the blocking pool, so
    /// a caller that times out stops waiting instead of parking a blocking
    /// thread behind a hung query.
    async fn query(&self, user_id: Option<String>) -> Result<Vec<Task>, StoreError> {
        let conn = Arc::clone(&self.conn).lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let tasks = match user_id {
                Some(user_id) => conn
                    .prepare(SELECT_CANDIDATES_FOR_USER)?
                    .query_map(params![user_id], row_to_task)?
                    .collect::<Result<Vec<_>, _>>()?,
                None => conn
                    .prepare(SELECT_CANDIDATES)?
                    .query_map([], row_to_task)?
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok::<_, StoreError>(tasks)
        })
        .await?
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let due_raw: Option<String> = row.get(4)?;
    let completed: i64 = row.get(6)?;
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        category: row.get(3)?,
        due_at: due_raw.as_deref().and_then(parse_due_date),
        reminder_minutes: row.get(5)?,
        completed: completed != 0,
    })
}

/// Unparseable dates read as `None` so the task is excluded, not fatal.
fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!("Ignoring unparseable due_date {:?}: {}", raw, e);
            None
        }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn list_active_reminder_candidates(&self) -> Result<Vec<Task>, StoreError> {
        self.query(None).await
    }

    async fn list_active_reminder_candidates_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Task>, StoreError> {
        self.query(Some(user_id.to_string())).await
    }
}
