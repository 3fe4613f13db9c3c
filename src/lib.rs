//! # Task Reminders
//!
//! Reminder scheduling and live notification delivery for the task manager.
//!
//! This library provides:
//! - A periodic evaluator that fires "due soon" reminders at most once per window
//! - A per-user connection registry with last-connect-wins semantics
//! - Catch-up delivery when a user (re)connects mid-window
//! - A WebSocket transport and a task-event hook for the task manager
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────┐  tick   ┌──────────────────┐  candidates  ┌────────────┐
//!   │  Scheduler   │────────▶│ ReminderEvaluator │◀────────────│ TaskStore  │
//!   └──────────────┘         └─────────┬─────────┘             └────────────┘
//!   ┌──────────────┐ catch-up          │ window → ledger gate
//!   │  on_connect  │───────────────────┤
//!   └──────┬───────┘                   ▼
//!          │ register          ┌──────────────┐  lookup  ┌────────────────────┐
//!          └──────────────────▶│  Dispatcher  │─────────▶│ ConnectionRegistry │
//!                              └──────────────┘          └────────────────────┘
//! ```
//!
//! ## Modules
//! - `reminder`: window calculation, trigger ledger, registry, dispatch, evaluation
//! - `store`: read-only Task Store boundary (in-memory and SQLite backends)
//! - `api`: HTTP/WebSocket adapter

pub mod api;
pub mod config;
pub mod reminder;
pub mod store;
pub mod util;

pub use config::Config;
pub use reminder::ReminderHub;
pub use store::{Task, TaskStore};
