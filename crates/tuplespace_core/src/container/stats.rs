//! Per-container operation counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation kinds counted per container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counted {
    Write,
    Read,
    Take,
}

#[derive(Debug, Default)]
struct Counter {
    total: AtomicU64,
    ok: AtomicU64,
}

impl Counter {
    fn record(&self, ok: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.ok.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Counters of one container.
#[derive(Debug, Default)]
pub struct ContainerStats {
    writes: Counter,
    reads: Counter,
    takes: Counter,
}

impl ContainerStats {
    pub(crate) fn record(&self, op: Counted, ok: bool) {
        match op {
            Counted::Write => self.writes.record(ok),
            Counted::Read => self.reads.record(ok),
            Counted::Take => self.takes.record(ok),
        }
    }

    pub(crate) fn snapshot(&self, entries: usize) -> ContainerStatsSnapshot {
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);
        ContainerStatsSnapshot {
            writes: load(&self.writes.total),
            writes_ok: load(&self.writes.ok),
            reads: load(&self.reads.total),
            reads_ok: load(&self.reads.ok),
            takes: load(&self.takes.total),
            takes_ok: load(&self.takes.ok),
            entries,
        }
    }
}

/// Point-in-time copy of a container's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerStatsSnapshot {
    /// Write attempts.
    pub writes: u64,
    /// Successful writes.
    pub writes_ok: u64,
    /// Read and test attempts.
    pub reads: u64,
    /// Successful reads and tests.
    pub reads_ok: u64,
    /// Take and delete attempts.
    pub takes: u64,
    /// Successful takes and deletes.
    pub takes_ok: u64,
    /// Entries currently stored, including uncommitted ones.
    pub entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_attempts_and_successes() {
        let stats = ContainerStats::default();
        stats.record(Counted::Write, true);
        stats.record(Counted::Write, false);
        stats.record(Counted::Take, true);
        let snap = stats.snapshot(7);
        assert_eq!((snap.writes, snap.writes_ok), (2, 1));
        assert_eq!((snap.takes, snap.takes_ok), (1, 1));
        assert_eq!(snap.reads, 0);
        assert_eq!(snap.entries, 7);
    }
}
