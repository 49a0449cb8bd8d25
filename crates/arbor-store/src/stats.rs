//! Contention statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of store contention counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Write traversals restarted after failed re-validation.
    pub traversal_retries: u64,
    /// Address lookups restarted after a failed non-blocking level lock.
    pub fast_path_restarts: u64,
    /// Operations that backed off because an exclusive section was active.
    pub exclusive_backoffs: u64,
    /// Exclusive sections entered.
    pub exclusive_sections: u64,
    /// Sleep rounds spent waiting for the store to quiesce.
    pub exclusive_wait_spins: u64,
    /// Expired nodes removed.
    pub evictions: u64,
}

impl StoreStats {
    /// Total number of restarts of any kind.
    #[must_use]
    pub fn total_restarts(&self) -> u64 {
        self.traversal_retries + self.fast_path_restarts + self.exclusive_backoffs
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) traversal_retries: AtomicU64,
    pub(crate) fast_path_restarts: AtomicU64,
    pub(crate) exclusive_backoffs: AtomicU64,
    pub(crate) exclusive_sections: AtomicU64,
    pub(crate) exclusive_wait_spins: AtomicU64,
    pub(crate) evictions: AtomicU64,
}

impl StatsCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            traversal_retries: self.traversal_retries.load(Ordering::Relaxed),
            fast_path_restarts: self.fast_path_restarts.load(Ordering::Relaxed),
            exclusive_backoffs: self.exclusive_backoffs.load(Ordering::Relaxed),
            exclusive_sections: self.exclusive_sections.load(Ordering::Relaxed),
            exclusive_wait_spins: self.exclusive_wait_spins.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let counters = StatsCounters::default();
        StatsCounters::bump(&counters.traversal_retries);
        StatsCounters::add(&counters.fast_path_restarts, 3);
        let stats = counters.snapshot();
        assert_eq!(stats.traversal_retries, 1);
        assert_eq!(stats.fast_path_restarts, 3);
        assert_eq!(stats.total_restarts(), 4);
    }
}
