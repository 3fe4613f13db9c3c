//! Task Store boundary with pluggable read backends.
//!
//! The reminder core never writes tasks. It only asks the store for the
//! tasks that could still produce a reminder.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for tests and demos)
//! - `sqlite`: SQLite database shared with the task manager

mod memory;
mod sqlite;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// A task as owned by the task manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Display name shown in the reminder
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Absolute due instant. `None` means the record is malformed for reminders.
    pub due_at: Option<DateTime<Utc>>,
    /// Minutes before `due_at` at which the reminder opens. `None` means no reminder.
    pub reminder_minutes: Option<i64>,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    /// Whether the task should be returned by candidate queries.
    pub fn is_reminder_candidate(&self) -> bool {
        !self.completed && self.reminder_minutes.is_some()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task store query failed: {0}")]
    Query(String),

    #[error("Task store unavailable: {0}")]
    Unavailable(String),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Join(e.to_string())
    }
}

/// Read-only view of the task manager's storage.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Non-completed tasks with a reminder offset set.
    async fn list_active_reminder_candidates(&self) -> Result<Vec<Task>, StoreError>;

    /// Same as [`TaskStore::list_active_reminder_candidates`], scoped to one user.
    async fn list_active_reminder_candidates_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Task>, StoreError>;
}

/// Task store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStoreType {
    Memory,
    #[default]
    Sqlite,
}

impl TaskStoreType {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "memory" => Self::Memory,
            "sqlite" | "db" => Self::Sqlite,
            _ => Self::default(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Create a task store based on type and configuration.
pub async fn create_task_store(
    store_type: TaskStoreType,
    db_path: PathBuf,
) -> Result<std::sync::Arc<dyn TaskStore>, StoreError> {
    match store_type {
        TaskStoreType::Memory => Ok(std::sync::Arc::new(InMemoryTaskStore::new())),
        TaskStoreType::Sqlite => {
            let store = SqliteTaskStore::open(db_path).await?;
            Ok(std::sync::Arc::new(store))
        }
    }
}
