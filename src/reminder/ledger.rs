//! Trigger ledger: which reminder windows have already been delivered.
//!
//! One entry per task, holding the `open_at` of the window that last fired.
//! A task fires when it has no entry or when its freshly computed `open_at`
//! differs from the recorded one (the task was edited since).
//!
//! The probe-then-record sequence must be atomic per task, otherwise a
//! scheduled tick and a catch-up pass can both deliver the same window.
//! Callers take a [`LedgerGuard`] with [`TriggerLedger::lock`] and keep it
//! across `should_fire`, the dispatch, and `record`.
//!
//! Completing or deleting a task retires its entry instead of removing it.
//! A pass whose candidate snapshot was taken before the retirement may
//! still list the task, and a retired entry never fires for it. Once a
//! pass starts after the retirement, the entry is stale and is dropped.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Window that was delivered, identified by its `open_at`.
    Fired(DateTime<Utc>),
    /// Task was completed or deleted.
    Retired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LedgerEntry {
    slot: Slot,
    /// Write sequence number, compared against a [`LedgerMark`].
    seq: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: HashMap<String, LedgerEntry>,
    next_seq: u64,
}

impl LedgerState {
    fn write(&mut self, task_id: &str, slot: Slot) -> Option<LedgerEntry> {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries
            .insert(task_id.to_string(), LedgerEntry { slot, seq })
    }
}

/// Point in the ledger's write history, taken before a pass queries the
/// store. Entries written after the mark may describe changes the pass's
/// snapshot has not seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LedgerMark(u64);

/// Process-wide record of delivered reminder windows.
#[derive(Debug, Default)]
pub struct TriggerLedger {
    state: Mutex<LedgerState>,
}

/// Exclusive access to the ledger for one read-modify-write sequence.
pub struct LedgerGuard<'a> {
    state: MutexGuard<'a, LedgerState>,
}

impl LedgerGuard<'_> {
    /// True iff no entry exists for `task_id` or the recorded `open_at`
    /// differs. A retired task never fires.
    pub fn should_fire(&self, task_id: &str, open_at: DateTime<Utc>) -> bool {
        match self.state.entries.get(task_id).map(|e| e.slot) {
            Some(Slot::Fired(recorded)) => recorded != open_at,
            Some(Slot::Retired) => false,
            None => true,
        }
    }

    /// Record a delivered window, overwriting any earlier one for the task.
    pub fn record(&mut self, task_id: &str, open_at: DateTime<Utc>) {
        self.state.write(task_id, Slot::Fired(open_at));
    }

    /// Remove the entry for a task. Returns whether one existed.
    pub fn evict(&mut self, task_id: &str) -> bool {
        self.state.entries.remove(task_id).is_some()
    }

    /// Drop a retirement written at or before `mark`. A snapshot queried
    /// after the mark still lists the task, so it is active again.
    pub fn revive(&mut self, task_id: &str, mark: LedgerMark) -> bool {
        let stale = matches!(
            self.state.entries.get(task_id),
            Some(LedgerEntry { slot: Slot::Retired, seq }) if *seq <= mark.0
        );
        if stale {
            self.state.entries.remove(task_id);
        }
        stale
    }
}

impl TriggerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> LedgerGuard<'_> {
        LedgerGuard {
            state: self.state.lock().await,
        }
    }

    pub async fn should_fire(&self, task_id: &str, open_at: DateTime<Utc>) -> bool {
        self.lock().await.should_fire(task_id, open_at)
    }

    pub async fn record(&self, task_id: &str, open_at: DateTime<Utc>) {
        self.lock().await.record(task_id, open_at);
    }

    pub async fn evict(&self, task_id: &str) -> bool {
        self.lock().await.evict(task_id)
    }

    /// Mark a task completed or deleted. Returns whether a delivered
    /// window was recorded for it.
    pub async fn retire(&self, task_id: &str) -> bool {
        let previous = self.state.lock().await.write(task_id, Slot::Retired);
        matches!(previous.map(|e| e.slot), Some(Slot::Fired(_)))
    }

    /// Current position in the write history.
    pub async fn mark(&self) -> LedgerMark {
        LedgerMark(self.state.lock().await.next_seq)
    }

    /// Drop entries for tasks missing from `live`, and retirements the
    /// snapshot behind `live` has already seen. Anything written after
    /// `mark` is kept. Returns the number of entries removed.
    pub async fn retain_live(&self, live: &HashSet<String>, mark: LedgerMark) -> usize {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|task_id, entry| {
            if entry.seq > mark.0 {
                return true;
            }
            match entry.slot {
                Slot::Fired(_) => live.contains(task_id),
                Slot::Retired => false,
            }
        });
        before - state.entries.len()
    }

    /// Recorded `open_at` for a task, if a window was delivered.
    pub async fn recorded_open_at(&self, task_id: &str) -> Option<DateTime<Utc>> {
        match self.state.lock().await.entries.get(task_id)?.slot {
            Slot::Fired(open_at) => Some(open_at),
            Slot::Retired => None,
        }
    }

    /// Number of delivered windows on record.
    pub async fn len(&self) -> usize {
        self.state
            .lock()
            .await
            .entries
            .values()
            .filter(|e| matches!(e.slot, Slot::Fired(_)))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
