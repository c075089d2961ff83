use chrono::{DateTime, Utc};

use quell_core::{RetryAfter, RuleId};
use quell_store::CounterKey;

/// Identifies the counter cell a limit decision was made against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterId {
    pub key: CounterKey,
    /// Start of the active window, when the cell is windowed.
    pub window_start: Option<DateTime<Utc>>,
}

impl CounterId {
    /// Create a counter id without window metadata.
    #[must_use]
    pub fn new(key: CounterKey) -> Self {
        Self {
            key,
            window_start: None,
        }
    }

    /// Attach the active window start.
    #[must_use]
    pub fn with_window_start(mut self, window_start: DateTime<Utc>) -> Self {
        self.window_start = Some(window_start);
        self
    }
}

/// Outcome of checking one limit for one request.
#[derive(Debug, Clone)]
pub struct LimitCheckResult {
    /// Whether the request exceeded this limit.
    pub exceeded: bool,
    /// The counter cell the decision was made against. `None` for results
    /// synthesized from a propagated downstream throttle signal.
    pub counter: Option<CounterId>,
    /// When the caller may retry. Zero for admitted requests.
    pub retry_after: RetryAfter,
    /// The rule that produced this result. `None` for results synthesized
    /// from a propagated downstream throttle signal.
    pub rule: Option<RuleId>,
}

impl LimitCheckResult {
    /// An admitted (not exceeded) result.
    #[must_use]
    pub fn admitted(counter: CounterId, rule: RuleId) -> Self {
        Self {
            exceeded: false,
            counter: Some(counter),
            retry_after: RetryAfter::Seconds(0),
            rule: Some(rule),
        }
    }

    /// An exceeded result with its retry hint.
    #[must_use]
    pub fn exceeded(counter: CounterId, retry_after: RetryAfter, rule: RuleId) -> Self {
        Self {
            exceeded: true,
            counter: Some(counter),
            retry_after,
            rule: Some(rule),
        }
    }

    /// A result synthesized from a downstream throttle signal. The retry
    /// hint is carried verbatim; there is no rule and no counter.
    #[must_use]
    pub fn propagated(retry_after: RetryAfter) -> Self {
        Self {
            exceeded: true,
            counter: None,
            retry_after,
            rule: None,
        }
    }
}
