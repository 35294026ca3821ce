//! Global atomic counters for c2rs runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    builds_executed: AtomicU64,
    oracle_invocations: AtomicU64,
    rollbacks: AtomicU64,
    denylist_overrides: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            builds_executed: AtomicU64::new(0),
            oracle_invocations: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            denylist_overrides: AtomicU64::new(0),
        }
    }

    pub fn inc_builds(&self) {
        self.builds_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "builds_executed", "counter incremented");
    }

    pub fn inc_oracle_invocations(&self) {
        self.oracle_invocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "oracle_invocations", "counter incremented");
    }

    pub fn inc_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rollbacks", "counter incremented");
    }

    pub fn inc_denylist_overrides(&self) {
        self.denylist_overrides.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "denylist_overrides", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            builds_executed = self.builds_executed(),
            oracle_invocations = self.oracle_invocations(),
            rollbacks = self.rollbacks(),
            denylist_overrides = self.denylist_overrides(),
        );
    }

    pub fn builds_executed(&self) -> u64 {
        self.builds_executed.load(Ordering::Relaxed)
    }

    pub fn oracle_invocations(&self) -> u64 {
        self.oracle_invocations.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn denylist_overrides(&self) -> u64 {
        self.denylist_overrides.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.builds_executed.store(0, Ordering::Relaxed);
        self.oracle_invocations.store(0, Ordering::Relaxed);
        self.rollbacks.store(0, Ordering::Relaxed);
        self.denylist_overrides.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_builds();
        m.inc_builds();
        assert_eq!(m.builds_executed(), 2);

        m.inc_oracle_invocations();
        assert_eq!(m.oracle_invocations(), 1);

        m.inc_rollbacks();
        m.inc_denylist_overrides();
        m.inc_denylist_overrides();
        assert_eq!(m.rollbacks(), 1);
        assert_eq!(m.denylist_overrides(), 2);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_builds();
        m.inc_oracle_invocations();
        m.inc_rollbacks();
        m.inc_denylist_overrides();
        m.reset();
        assert_eq!(m.builds_executed(), 0);
        assert_eq!(m.oracle_invocations(), 0);
        assert_eq!(m.rollbacks(), 0);
        assert_eq!(m.denylist_overrides(), 0);
    }
}
