//! Reminder window computation.
//!
//! A window opens `reminder_minutes` before a task's due instant and closes
//! at the due instant itself. Windows are never cached; they are recomputed
//! from the current task record on every pass so edits show up on the next
//! evaluation.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::store::Task;

/// Time span during which a task's reminder may fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderWindow {
    pub task_id: String,
    pub open_at: DateTime<Utc>,
    pub close_at: DateTime<Utc>,
}

/// Where `now` falls relative to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    /// `now < open_at`
    Pending,
    /// `open_at <= now <= close_at`
    Open,
    /// `now > close_at`
    Closed,
}

impl ReminderWindow {
    pub fn phase(&self, now: DateTime<Utc>) -> WindowPhase {
        if now < self.open_at {
            WindowPhase::Pending
        } else if now > self.close_at {
            WindowPhase::Closed
        } else {
            WindowPhase::Open
        }
    }
}

/// Compute the reminder window for a task.
///
/// Returns `None` for tasks that cannot be evaluated: no reminder offset,
/// a negative offset, a missing due instant, or an offset so large the
/// subtraction leaves the representable range.
pub fn window(task: &Task) -> Option<ReminderWindow> {
    let minutes = task.reminder_minutes?;
    if minutes < 0 {
        return None;
    }
    let close_at = task.due_at?;
    let offset = Duration::try_minutes(minutes)?;
    let open_at = close_at.checked_sub_signed(offset)?;
    Some(ReminderWindow {
        task_id: task.id.clone(),
        open_at,
        close_at,
    })
}
