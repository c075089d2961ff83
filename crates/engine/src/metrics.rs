use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking engine evaluation outcomes.
///
/// All counters use relaxed ordering for maximum throughput. For a
/// consistent point-in-time view, call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Requests evaluated against the rule set.
    pub evaluated: AtomicU64,
    /// Requests skipped because a whitelist entry matched.
    pub whitelisted: AtomicU64,
    /// Rule results that reported exceeded.
    pub exceeded: AtomicU64,
    /// Requests admitted after waiting inside the delay budget.
    pub delayed_admissions: AtomicU64,
    /// Downstream throttle signals fused into result lists.
    pub egress_throttled: AtomicU64,
}

impl EngineMetrics {
    /// Increment the evaluated counter.
    pub fn increment_evaluated(&self) {
        self.evaluated.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the whitelisted counter.
    pub fn increment_whitelisted(&self) {
        self.whitelisted.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the exceeded counter.
    pub fn increment_exceeded(&self) {
        self.exceeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the delayed-admissions counter.
    pub fn increment_delayed_admissions(&self) {
        self.delayed_admissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the egress-throttled counter.
    pub fn increment_egress_throttled(&self) {
        self.egress_throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            evaluated: self.evaluated.load(Ordering::Relaxed),
            whitelisted: self.whitelisted.load(Ordering::Relaxed),
            exceeded: self.exceeded.load(Ordering::Relaxed),
            delayed_admissions: self.delayed_admissions.load(Ordering::Relaxed),
            egress_throttled: self.egress_throttled.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`EngineMetrics`] at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub evaluated: u64,
    pub whitelisted: u64,
    pub exceeded: u64,
    pub delayed_admissions: u64,
    pub egress_throttled: u64,
}
