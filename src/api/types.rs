//! API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reminder::ReminderPayload;

/// Message pushed to a connected client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Reminder {
        task_id: String,
        task_name: String,
        due_at: DateTime<Utc>,
        open_at: DateTime<Utc>,
    },
}

impl From<ReminderPayload> for ServerMessage {
    fn from(p: ReminderPayload) -> Self {
        ServerMessage::Reminder {
            task_id: p.task_id,
            task_name: p.task_name,
            due_at: p.due_at,
            open_at: p.open_at,
        }
    }
}

/// Query parameters for the notification socket.
#[derive(Debug, Deserialize)]
pub struct SocketParams {
    /// Caller identity, honoured only in dev mode
    pub user_id: Option<String>,
}

/// Mutation reported by the task manager.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Completed { task_id: String },
    Deleted { task_id: String },
    Updated { task_id: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEventResponse {
    /// Whether a ledger entry was removed
    pub evicted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Statistics response.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Users with a live notification socket
    pub connected_users: usize,

    /// Reminder windows currently recorded as delivered
    pub ledger_entries: usize,
}
