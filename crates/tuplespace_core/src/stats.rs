//! Space statistics and telemetry.
//!
//! Counters are atomic and can be read while requests are running.
//!
//! ```rust,ignore
//! let stats = space.stats();
//! println!("blocked: {}", stats.tasks_blocked);
//! println!("deadlocks: {}", stats.deadlocks_detected);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Space-wide counters.
#[derive(Debug, Default)]
pub struct SpaceStats {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    tasks_blocked: AtomicU64,
    tasks_rescheduled: AtomicU64,
    timeouts: AtomicU64,
    deadlocks_detected: AtomicU64,
}

impl SpaceStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self, ok: bool) {
        if ok {
            self.requests_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_block(&self) {
        self.tasks_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reschedule(&self) {
        self.tasks_rescheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deadlocks(&self, cycles: usize) {
        self.deadlocks_detected
            .fetch_add(cycles as u64, Ordering::Relaxed);
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            tasks_blocked: self.tasks_blocked.load(Ordering::Relaxed),
            tasks_rescheduled: self.tasks_rescheduled.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            deadlocks_detected: self.deadlocks_detected.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of [`SpaceStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Transactions created, explicit and implicit.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back.
    pub transactions_aborted: u64,
    /// Requests that completed successfully.
    pub requests_completed: u64,
    /// Requests that completed with an error.
    pub requests_failed: u64,
    /// Times a request was parked in the wait manager.
    pub tasks_blocked: u64,
    /// Times a parked request was woken.
    pub tasks_rescheduled: u64,
    /// Requests that failed on their deadline.
    pub timeouts: u64,
    /// Wait-for cycles reported.
    pub deadlocks_detected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(SpaceStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_and_snapshot() {
        let stats = SpaceStats::new();
        stats.record_transaction_start();
        stats.record_transaction_start();
        stats.record_transaction_commit();
        stats.record_transaction_abort();
        stats.record_request(true);
        stats.record_request(false);
        stats.record_block();
        stats.record_deadlocks(2);

        let snap = stats.snapshot();
        assert_eq!(snap.transactions_started, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_aborted, 1);
        assert_eq!(snap.requests_completed, 1);
        assert_eq!(snap.requests_failed, 1);
        assert_eq!(snap.tasks_blocked, 1);
        assert_eq!(snap.deadlocks_detected, 2);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(SpaceStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_reschedule();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().tasks_rescheduled, 800);
    }
}
