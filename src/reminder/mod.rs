//! Reminder scheduling and notification delivery.
//!
//! [`ReminderHub`] owns the shared state (trigger ledger, connection
//! registry) and exposes the lifecycle hooks the transport and the task
//! manager call into. The periodic evaluator runs as a background tokio
//! task started with [`ReminderHub::spawn_scheduler`].

pub mod dispatcher;
pub mod evaluator;
pub mod ledger;
pub mod registry;
pub mod window;

pub use dispatcher::{DispatchOutcome, Dispatcher, ReminderPayload};
pub use evaluator::{PassReport, ReminderEvaluator, TickOutcome};
pub use ledger::TriggerLedger;
pub use registry::{ConnectionHandle, ConnectionId, ConnectionKey, ConnectionRegistry};
pub use window::{window, ReminderWindow, WindowPhase};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::TaskStore;

/// Reference evaluation period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on a single Task Store query.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Entry point for the reminder core.
#[derive(Clone)]
pub struct ReminderHub {
    registry: Arc<ConnectionRegistry>,
    ledger: Arc<TriggerLedger>,
    evaluator: ReminderEvaluator,
    tick_interval: Duration,
}

impl ReminderHub {
    pub fn new(store: Arc<dyn TaskStore>, tick_interval: Duration, store_timeout: Duration) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let ledger = Arc::new(TriggerLedger::new());
        let evaluator = ReminderEvaluator::new(
            store,
            Arc::clone(&ledger),
            Dispatcher::new(Arc::clone(&registry)),
            store_timeout,
        );
        Self {
            registry,
            ledger,
            evaluator,
            tick_interval,
        }
    }

    pub fn evaluator(&self) -> &ReminderEvaluator {
        &self.evaluator
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &TriggerLedger {
        &self.ledger
    }

    /// Register a new live connection for `user_id` and run catch-up for it.
    ///
    /// Any previous connection for the user is superseded and its channel
    /// closes. The returned receiver already holds whatever the catch-up
    /// pass delivered.
    pub async fn on_connect(
        &self,
        user_id: &str,
    ) -> (ConnectionKey, mpsc::UnboundedReceiver<ReminderPayload>) {
        let (handle, rx) = ConnectionHandle::new(user_id);
        let key = handle.key();
        drop(self.registry.register(handle).await);
        tracing::info!(
            user_id = %user_id,
            connection_id = %key.id,
            "Client connected"
        );

        if let Err(e) = self.evaluator.catch_up(user_id).await {
            tracing::warn!(user_id = %user_id, "Catch-up pass failed: {}", e);
        }
        (key, rx)
    }

    /// Unregister a connection if it is still the user's active one.
    pub async fn on_disconnect(&self, key: &ConnectionKey) -> bool {
        let removed = self.registry.unregister(&key.user_id, key.id).await;
        if removed {
            tracing::info!(
                user_id = %key.user_id,
                connection_id = %key.id,
                "Client disconnected"
            );
        } else {
            tracing::debug!(
                user_id = %key.user_id,
                connection_id = %key.id,
                "Ignoring disconnect of superseded connection"
            );
        }
        removed
    }

    pub async fn on_task_completed(&self, task_id: &str) -> bool {
        let evicted = self.ledger.retire(task_id).await;
        tracing::debug!(task_id = %task_id, evicted, "Task completed");
        evicted
    }

    pub async fn on_task_deleted(&self, task_id: &str) -> bool {
        let evicted = self.ledger.retire(task_id).await;
        tracing::debug!(task_id = %task_id, evicted, "Task deleted");
        evicted
    }

    /// Edits need no action: the window is recomputed on the next pass.
    pub async fn on_task_updated(&self, task_id: &str) {
        tracing::debug!(task_id = %task_id, "Task updated");
    }

    /// Start the periodic evaluator. Runs until the handle is aborted.
    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        let evaluator = self.evaluator.clone();
        let period = self.tick_interval;
        tokio::spawn(async move {
            tracing::info!("Reminder scheduler started (every {:?})", period);
            let mut interval = tokio::time::interval(period);
            // A slow tick must not cause a burst of catch-up ticks.
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                evaluator.evaluate_all().await;
            }
        })
    }
}
