//! Reminder evaluation passes.
//!
//! A full pass runs on every scheduler tick over all candidate tasks. A
//! catch-up pass runs the same window/ledger logic over one user's tasks
//! right after that user connects. Both go through [`ReminderEvaluator::evaluate_task`],
//! which holds the ledger guard across probe, dispatch and record.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::dispatcher::{DispatchOutcome, Dispatcher, ReminderPayload};
use super::ledger::{LedgerMark, TriggerLedger};
use super::window::{self, WindowPhase};
use crate::store::{StoreError, Task, TaskStore};

/// Counters for one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Tasks returned by the store
    pub candidates: usize,
    /// Reminders handed to a live connection
    pub delivered: usize,
    /// Reminders that found no live connection
    pub dropped: usize,
    /// Ledger entries removed (closed windows and vanished tasks)
    pub evicted: usize,
}

/// Result of a scheduled tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(PassReport),
    /// The store failed or timed out; nothing was evaluated.
    Skipped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskVerdict {
    Excluded,
    Pending,
    Closed { evicted: bool },
    AlreadyFired,
    Fired(DispatchOutcome),
}

#[derive(Clone)]
pub struct ReminderEvaluator {
    store: Arc<dyn TaskStore>,
    ledger: Arc<TriggerLedger>,
    dispatcher: Dispatcher,
    store_timeout: Duration,
}

impl ReminderEvaluator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        ledger: Arc<TriggerLedger>,
        dispatcher: Dispatcher,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            dispatcher,
            store_timeout,
        }
    }

    /// Full pass over every candidate task at the current time.
    pub async fn evaluate_all(&self) -> TickOutcome {
        self.evaluate_all_at(Utc::now()).await
    }

    /// Full pass at an explicit instant.
    pub async fn evaluate_all_at(&self, now: DateTime<Utc>) -> TickOutcome {
        let mark = self.ledger.mark().await;
        let tasks = match self
            .fetch(self.store.list_active_reminder_candidates())
            .await
        {
            Ok(tasks) => tasks,
            Err(reason) => {
                tracing::warn!("Skipping reminder tick: {}", reason);
                return TickOutcome::Skipped(reason);
            }
        };

        let mut report = self.evaluate_tasks(&tasks, now, mark).await;

        // Tasks that stopped being candidates were completed, deleted, or
        // lost their reminder.
        let live: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
        report.evicted += self.ledger.retain_live(&live, mark).await;

        tracing::debug!(
            candidates = report.candidates,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "Reminder tick complete"
        );
        TickOutcome::Completed(report)
    }

    /// Catch-up pass for one user at the current time.
    pub async fn catch_up(&self, user_id: &str) -> Result<PassReport, String> {
        self.catch_up_at(user_id, Utc::now()).await
    }

    /// Catch-up pass for one user at an explicit instant.
    pub async fn catch_up_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PassReport, String> {
        let mark = self.ledger.mark().await;
        let tasks = self
            .fetch(self.store.list_active_reminder_candidates_for_user(user_id))
            .await?;
        // The store is trusted to scope by user, but a delivery to the wrong
        // owner must never happen.
        let tasks: Vec<Task> = tasks.into_iter().filter(|t| t.user_id == user_id).collect();
        let report = self.evaluate_tasks(&tasks, now, mark).await;
        tracing::debug!(
            user_id = %user_id,
            candidates = report.candidates,
            delivered = report.delivered,
            "Catch-up pass complete"
        );
        Ok(report)
    }

    /// Timing out drops the query future. Blocking work a backend already
    /// started keeps running, so backends must not start it while waiting.
    async fn fetch<F>(&self, query: F) -> Result<Vec<Task>, String>
    where
        F: std::future::Future<Output = Result<Vec<Task>, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, query).await {
            Ok(Ok(tasks)) => Ok(tasks),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "task store query timed out after {:?}",
                self.store_timeout
            )),
        }
    }

    async fn evaluate_tasks(
        &self,
        tasks: &[Task],
        now: DateTime<Utc>,
        mark: LedgerMark,
    ) -> PassReport {
        let mut report = PassReport {
            candidates: tasks.len(),
            ..PassReport::default()
        };
        for task in tasks {
            match self.evaluate_task(task, now, mark).await {
                TaskVerdict::Closed { evicted: true } => report.evicted += 1,
                TaskVerdict::Fired(DispatchOutcome::Delivered) => report.delivered += 1,
                TaskVerdict::Fired(_) => report.dropped += 1,
                _ => {}
            }
        }
        report
    }

    async fn evaluate_task(&self, task: &Task, now: DateTime<Utc>, mark: LedgerMark) -> TaskVerdict {
        if task.completed {
            return TaskVerdict::Excluded;
        }
        let Some(window) = window::window(task) else {
            tracing::trace!(task_id = %task.id, "Task excluded from reminder evaluation");
            return TaskVerdict::Excluded;
        };

        match window.phase(now) {
            WindowPhase::Pending => TaskVerdict::Pending,
            WindowPhase::Closed => TaskVerdict::Closed {
                evicted: self.ledger.evict(&task.id).await,
            },
            WindowPhase::Open => {
                let mut guard = self.ledger.lock().await;
                guard.revive(&task.id, mark);
                if !guard.should_fire(&task.id, window.open_at) {
                    return TaskVerdict::AlreadyFired;
                }
                let payload = ReminderPayload::for_window(task, &window);
                let outcome = self.dispatcher.dispatch(&task.user_id, payload).await;
                // Only a delivery counts as fired, so a user who was offline
                // still gets the reminder from catch-up on connect.
                if outcome.is_delivered() {
                    guard.record(&task.id, window.open_at);
                    tracing::info!(
                        task_id = %task.id,
                        user_id = %task.user_id,
                        open_at = %window.open_at,
                        "Reminder delivered"
                    );
                }
                TaskVerdict::Fired(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::registry::{ConnectionHandle, ConnectionRegistry};
    use crate::store::InMemoryTaskStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    fn task(id: &str, user: &str, due: DateTime<Utc>, reminder: i64) -> Task {
        Task {
            id: id.to_string(),
            user_id: user.to_string(),
            name: format!("task {}", id),
            category: None,
            due_at: Some(due),
            reminder_minutes: Some(reminder),
            completed: false,
        }
    }

    struct Fixture {
        store: InMemoryTaskStore,
        registry: Arc<ConnectionRegistry>,
        ledger: Arc<TriggerLedger>,
        evaluator: ReminderEvaluator,
    }

    fn fixture() -> Fixture {
        let store = InMemoryTaskStore::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let ledger = Arc::new(TriggerLedger::new());
        let evaluator = ReminderEvaluator::new(
            Arc::new(store.clone()),
            Arc::clone(&ledger),
            Dispatcher::new(Arc::clone(&registry)),
            Duration::from_secs(5),
        );
        Fixture {
            store,
            registry,
            ledger,
            evaluator,
        }
    }

    async fn connect(f: &Fixture, user: &str) -> UnboundedReceiver<ReminderPayload> {
        let (handle, rx) = ConnectionHandle::new(user);
        f.registry.register(handle).await;
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<ReminderPayload>) -> Vec<ReminderPayload> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            out.push(p);
        }
        out
    }

    fn completed(outcome: TickOutcome) -> PassReport {
        match outcome {
            TickOutcome::Completed(report) => report,
            TickOutcome::Skipped(reason) => panic!("tick skipped: {}", reason),
        }
    }

    #[tokio::test]
    async fn test_reference_scenario() {
        let f = fixture();
        let mut rx = connect(&f, "alice").await;
        f.store.upsert(task("T", "alice", at(10, 0), 15)).await;

        // Before the window.
        let report = completed(f.evaluator.evaluate_all_at(at(9, 44)).await);
        assert_eq!(report.delivered, 0);
        assert!(drain(&mut rx).is_empty());

        // Inside the window: fires once.
        let report = completed(f.evaluator.evaluate_all_at(at(9, 46)).await);
        assert_eq!(report.delivered, 1);
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].open_at, at(9, 45));
        assert_eq!(sent[0].due_at, at(10, 0));
        assert_eq!(f.ledger.recorded_open_at("T").await, Some(at(9, 45)));

        // Same window: no duplicate.
        let report = completed(f.evaluator.evaluate_all_at(at(9, 47)).await);
        assert_eq!(report.delivered, 0);
        assert!(drain(&mut rx).is_empty());

        // Offset edited to 5 minutes: new window fires again.
        f.store.upsert(task("T", "alice", at(10, 0), 5)).await;
        let report = completed(f.evaluator.evaluate_all_at(at(9, 56)).await);
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx)[0].open_at, at(9, 55));

        // Past close_at: entry evicted, nothing fires.
        let report = completed(f.evaluator.evaluate_all_at(at(10, 1)).await);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.evicted, 1);
        assert!(f.ledger.is_empty().await);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_one_dispatch_per_task_per_pass() {
        let f = fixture();
        let mut rx = connect(&f, "alice").await;
        f.store.upsert(task("a", "alice", at(10, 0), 30)).await;
        f.store.upsert(task("b", "alice", at(10, 30), 60)).await;
        f.store.upsert(task("c", "alice", at(12, 0), 10)).await;

        let report = completed(f.evaluator.evaluate_all_at(at(9, 50)).await);
        assert_eq!(report.candidates, 3);
        assert_eq!(report.delivered, 2);

        let mut ids: Vec<String> = drain(&mut rx).into_iter().map(|p| p.task_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_offline_user_gets_catch_up_once() {
        let f = fixture();
        f.store.upsert(task("T", "bob", at(10, 0), 15)).await;

        // Tick while offline: dropped, not recorded.
        let report = completed(f.evaluator.evaluate_all_at(at(9, 46)).await);
        assert_eq!(report.dropped, 1);
        assert!(f.ledger.is_empty().await);

        // Connect and catch up: one delivery.
        let mut rx = connect(&f, "bob").await;
        let report = f.evaluator.catch_up_at("bob", at(9, 50)).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx).len(), 1);

        // Later tick sees the ledger entry.
        let report = completed(f.evaluator.evaluate_all_at(at(9, 51)).await);
        assert_eq!(report.delivered, 0);
        assert!(drain(&mut rx).is_empty());

        // A second catch-up (reconnect) does not repeat it either.
        let report = f.evaluator.catch_up_at("bob", at(9, 52)).await.unwrap();
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_catch_up_is_scoped_to_user() {
        let f = fixture();
        let mut alice = connect(&f, "alice").await;
        let mut bob = connect(&f, "bob").await;
        f.store.upsert(task("a", "alice", at(10, 0), 15)).await;
        f.store.upsert(task("b", "bob", at(10, 0), 15)).await;

        let report = f.evaluator.catch_up_at("bob", at(9, 50)).await.unwrap();
        assert_eq!(report.candidates, 1);
        assert_eq!(drain(&mut bob).len(), 1);
        assert!(drain(&mut alice).is_empty());
        assert!(f.ledger.recorded_open_at("a").await.is_none());
    }

    #[tokio::test]
    async fn test_completed_and_deleted_tasks_are_evicted() {
        let f = fixture();
        let _rx = connect(&f, "alice").await;
        f.store.upsert(task("done", "alice", at(10, 0), 15)).await;
        f.store.upsert(task("gone", "alice", at(10, 0), 15)).await;

        completed(f.evaluator.evaluate_all_at(at(9, 46)).await);
        assert_eq!(f.ledger.len().await, 2);

        f.store.set_completed("done", true).await;
        f.store.delete("gone").await;

        let report = completed(f.evaluator.evaluate_all_at(at(9, 47)).await);
        assert_eq!(report.candidates, 0);
        assert_eq!(report.evicted, 2);
        assert!(f.ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_tasks_do_not_halt_tick() {
        let f = fixture();
        let mut rx = connect(&f, "alice").await;
        let mut no_due = task("no-due", "alice", at(10, 0), 15);
        no_due.due_at = None;
        f.store.upsert(no_due).await;
        f.store.upsert(task("negative", "alice", at(10, 0), -5)).await;
        f.store.upsert(task("ok", "alice", at(10, 0), 15)).await;

        let report = completed(f.evaluator.evaluate_all_at(at(9, 50)).await);
        assert_eq!(report.candidates, 3);
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx)[0].task_id, "ok");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tick_and_catch_up_deliver_once() {
        for _ in 0..50 {
            let f = fixture();
            let mut rx = connect(&f, "alice").await;
            for i in 0..200 {
                f.store
                    .upsert(task(&format!("t{:03}", i), "alice", at(10, 0), 15))
                    .await;
            }

            let tick = {
                let evaluator = f.evaluator.clone();
                tokio::spawn(async move { evaluator.evaluate_all_at(at(9, 50)).await })
            };
            let catch_up = {
                let evaluator = f.evaluator.clone();
                tokio::spawn(async move { evaluator.catch_up_at("alice", at(9, 50)).await })
            };
            let tick_report = completed(tick.await.unwrap());
            let catch_up_report = catch_up.await.unwrap().unwrap();

            assert_eq!(tick_report.delivered + catch_up_report.delivered, 200);
            let mut ids: Vec<String> = drain(&mut rx).into_iter().map(|p| p.task_id).collect();
            assert_eq!(ids.len(), 200);
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), 200);
        }
    }

    /// Returns its snapshot, then completes the task before the pass
    /// evaluates it, as the task manager would while a tick is running.
    struct CompletesDuringQuery {
        inner: InMemoryTaskStore,
        ledger: Arc<TriggerLedger>,
        task_id: String,
    }

    #[async_trait]
    impl TaskStore for CompletesDuringQuery {
        async fn list_active_reminder_candidates(&self) -> Result<Vec<Task>, StoreError> {
            let snapshot = self.inner.list_active_reminder_candidates().await?;
            self.inner.set_completed(&self.task_id, true).await;
            self.ledger.retire(&self.task_id).await;
            Ok(snapshot)
        }

        async fn list_active_reminder_candidates_for_user(
            &self,
            user_id: &str,
        ) -> Result<Vec<Task>, StoreError> {
            self.inner
                .list_active_reminder_candidates_for_user(user_id)
                .await
        }
    }

    #[tokio::test]
    async fn test_task_completed_mid_tick_is_not_redelivered() {
        let f = fixture();
        let mut rx = connect(&f, "alice").await;
        f.store.upsert(task("T", "alice", at(10, 0), 15)).await;

        let report = f.evaluator.catch_up_at("alice", at(9, 46)).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx).len(), 1);

        let racing = ReminderEvaluator::new(
            Arc::new(CompletesDuringQuery {
                inner: f.store.clone(),
                ledger: Arc::clone(&f.ledger),
                task_id: "T".to_string(),
            }),
            Arc::clone(&f.ledger),
            Dispatcher::new(Arc::clone(&f.registry)),
            Duration::from_secs(5),
        );
        let report = completed(racing.evaluate_all_at(at(9, 47)).await);
        assert_eq!(report.candidates, 1);
        assert_eq!(report.delivered, 0);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(f.store.get("T").await.map(|t| t.completed), Some(true));

        // The next tick no longer sees the task and clears the retirement.
        let report = completed(f.evaluator.evaluate_all_at(at(9, 48)).await);
        assert_eq!(report.candidates, 0);
        assert_eq!(report.evicted, 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_reopened_task_fires_after_retirement() {
        let f = fixture();
        let mut rx = connect(&f, "alice").await;
        f.store.upsert(task("T", "alice", at(10, 0), 15)).await;
        f.ledger.retire("T").await;

        // Snapshot taken after the retirement still lists the task.
        let report = completed(f.evaluator.evaluate_all_at(at(9, 50)).await);
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(f.ledger.recorded_open_at("T").await, Some(at(9, 45)));
    }

    struct FailingStore;

    #[async_trait]
    impl TaskStore for FailingStore {
        async fn list_active_reminder_candidates(&self) -> Result<Vec<Task>, StoreError> {
            Err(StoreError::Unavailable("database is locked".to_string()))
        }

        async fn list_active_reminder_candidates_for_user(
            &self,
            _user_id: &str,
        ) -> Result<Vec<Task>, StoreError> {
            Err(StoreError::Unavailable("database is locked".to_string()))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl TaskStore for SlowStore {
        async fn list_active_reminder_candidates(&self) -> Result<Vec<Task>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }

        async fn list_active_reminder_candidates_for_user(
            &self,
            _user_id: &str,
        ) -> Result<Vec<Task>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    fn evaluator_with(store: Arc<dyn TaskStore>, ledger: Arc<TriggerLedger>) -> ReminderEvaluator {
        ReminderEvaluator::new(
            store,
            ledger,
            Dispatcher::new(Arc::new(ConnectionRegistry::new())),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn test_store_failure_skips_tick_and_keeps_ledger() {
        let ledger = Arc::new(TriggerLedger::new());
        ledger.record("T", at(9, 45)).await;
        let evaluator = evaluator_with(Arc::new(FailingStore), Arc::clone(&ledger));

        let outcome = evaluator.evaluate_all_at(at(9, 50)).await;
        assert!(matches!(outcome, TickOutcome::Skipped(ref r) if r.contains("database is locked")));
        assert_eq!(ledger.recorded_open_at("T").await, Some(at(9, 45)));
        assert!(evaluator.catch_up_at("alice", at(9, 50)).await.is_err());
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let evaluator = evaluator_with(Arc::new(SlowStore), Arc::new(TriggerLedger::new()));
        let outcome = evaluator.evaluate_all_at(at(9, 50)).await;
        assert!(matches!(outcome, TickOutcome::Skipped(ref r) if r.contains("timed out")));
    }
}
