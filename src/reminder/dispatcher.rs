//! Notification dispatch to a user's live connection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::registry::ConnectionRegistry;
use super::window::ReminderWindow;
use crate::store::Task;

/// Reminder sent to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub task_id: String,
    /// Display name of the task
    pub task_name: String,
    pub due_at: DateTime<Utc>,
    /// When the reminder window opened
    pub open_at: DateTime<Utc>,
}

impl ReminderPayload {
    pub fn for_window(task: &Task, window: &ReminderWindow) -> Self {
        Self {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            due_at: window.close_at,
            open_at: window.open_at,
        }
    }
}

/// Result of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the user's live channel
    Delivered,
    /// No live channel registered for the user
    Offline,
    /// A handle was registered but its receiver is gone
    Closed,
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Delivers payloads through the connection registry. Undeliverable
/// payloads are dropped, never queued.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, user_id: &str, payload: ReminderPayload) -> DispatchOutcome {
        let Some(handle) = self.registry.lookup(user_id).await else {
            tracing::debug!(
                user_id = %user_id,
                task_id = %payload.task_id,
                "User offline, dropping reminder"
            );
            return DispatchOutcome::Offline;
        };

        match handle.send(payload) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(payload) => {
                tracing::debug!(
                    user_id = %user_id,
                    task_id = %payload.task_id,
                    connection_id = %handle.id,
                    "Connection closed before delivery, unregistering"
                );
                self.registry.unregister(user_id, handle.id).await;
                DispatchOutcome::Closed
            }
        }
    }
}
