use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative execution counters
#[derive(Debug, Default)]
pub struct ExecutionStats {
    statements: AtomicU64,
    units: AtomicU64,
    failures: AtomicU64,
    cancellations: AtomicU64,
}

/// Point-in-time copy of [`ExecutionStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExecutionStatsSnapshot {
    pub statements: u64,
    pub units: u64,
    pub failures: u64,
    pub cancellations: u64,
}

impl ExecutionStats {
    pub(crate) fn record_statement(&self, units: usize) {
        self.statements.fetch_add(1, Ordering::Relaxed);
        self.units.fetch_add(units as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExecutionStatsSnapshot {
        ExecutionStatsSnapshot {
            statements: self.statements.load(Ordering::Relaxed),
            units: self.units.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }
}
