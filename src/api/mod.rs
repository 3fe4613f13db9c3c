//! HTTP API for the reminder service.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/stats` - Connected users and ledger size
//! - `POST /api/task-events` - Task manager reports a completion, deletion or edit
//! - `GET /api/notifications/ws` - WebSocket that receives reminders for one user

pub mod auth;
mod notifications;
mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
