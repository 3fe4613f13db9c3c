//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::reminder::ReminderHub;
use crate::store::create_task_store;

use super::notifications;
use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Reminder scheduling and delivery core
    pub reminders: ReminderHub,
}

/// Build the router for the given state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(get_stats))
        .route("/api/task-events", post(post_task_event))
        // Identity comes from the subprotocol JWT (or `?user_id=` in dev mode)
        .route("/api/notifications/ws", get(notifications::notifications_ws))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and the reminder scheduler.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = create_task_store(config.task_store, config.task_db_path.clone()).await?;
    let reminders = ReminderHub::new(store, config.tick_interval, config.store_timeout);
    let scheduler = reminders.spawn_scheduler();

    let state = Arc::new(AppState {
        config: config.clone(),
        reminders,
    });
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    tracing::info!("Reminder scheduler stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connected_users: state.reminders.registry().len().await,
        ledger_entries: state.reminders.ledger().len().await,
    })
}

/// Task manager hook for completions, deletions and edits.
async fn post_task_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<TaskEvent>,
) -> Json<TaskEventResponse> {
    let evicted = match &event {
        TaskEvent::Completed { task_id } => state.reminders.on_task_completed(task_id).await,
        TaskEvent::Deleted { task_id } => state.reminders.on_task_deleted(task_id).await,
        TaskEvent::Updated { task_id } => {
            state.reminders.on_task_updated(task_id).await;
            false
        }
    };
    Json(TaskEventResponse { evicted })
}
