//! Limit algorithms.
//!
//! [`LimitMethod`] is a closed sum over the supported strategies so the
//! engine can enumerate variants for serialization and for outcome-specific
//! hooks. Each variant computes its own counter keys, performs the
//! store-side test, and knows how to settle when request processing
//! finishes.

mod circuit_breaker;
mod fixed_window;
mod semaphore;
mod sliding_window;

pub use circuit_breaker::CircuitBreaker;
pub use fixed_window::FixedWindow;
pub use semaphore::Semaphore;
pub use sliding_window::SlidingWindow;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quell_core::{RuleId, ServiceName};
use quell_store::{CounterStore, StoreError};

use crate::error::ConfigError;
use crate::result::{CounterId, LimitCheckResult};

/// Slack added to every windowed cell's TTL so a cell outlives its window
/// long enough for late readers.
pub(crate) const WINDOW_TTL_GRACE: Duration = Duration::from_secs(1);

/// Everything a limit method needs to evaluate one request against one rule.
#[derive(Clone, Copy)]
pub struct LimitContext<'a> {
    pub store: &'a dyn CounterStore,
    pub service: &'a ServiceName,
    pub rule: &'a RuleId,
    /// Extracted caller identity; `None` means the counter key carries no
    /// identity segment.
    pub identity: Option<&'a str>,
    /// Weight this request contributes to the counter.
    pub cost: u64,
    pub now: DateTime<Utc>,
}

/// The cell segment identifying what is being counted: the rule, plus the
/// extracted identity when one is present.
pub(crate) fn subject_cell(rule: &RuleId, identity: Option<&str>) -> String {
    match identity {
        Some(id) => format!("{rule}:{id}"),
        None => rule.to_string(),
    }
}

/// Whole seconds until `deadline_ms` (milliseconds since epoch), rounded up,
/// never less than one.
pub(crate) fn seconds_until(deadline_ms: i64, now: DateTime<Utc>) -> u64 {
    let remaining_ms = deadline_ms - now.timestamp_millis();
    let remaining_s = (i128::from(remaining_ms) + 999).div_euclid(1000);
    u64::try_from(remaining_s).unwrap_or(0).max(1)
}

/// A throttling strategy and its parameters.
///
/// Serialized with an `Algorithm` tag, matching the wire configuration
/// schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Algorithm")]
pub enum LimitMethod {
    FixedWindow(FixedWindow),
    SlidingWindow(SlidingWindow),
    Semaphore(Semaphore),
    CircuitBreaker(CircuitBreaker),
}

impl LimitMethod {
    /// Whether a store failure while evaluating this method should abort the
    /// request instead of being logged and skipped.
    #[must_use]
    pub fn should_throw_on_failures(&self) -> bool {
        match self {
            Self::FixedWindow(m) => m.should_throw_on_failures,
            Self::SlidingWindow(m) => m.should_throw_on_failures,
            Self::Semaphore(m) => m.should_throw_on_failures,
            Self::CircuitBreaker(m) => m.should_throw_on_failures,
        }
    }

    /// Validate parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::FixedWindow(m) => m.validate(),
            Self::SlidingWindow(m) => m.validate(),
            Self::Semaphore(m) => m.validate(),
            Self::CircuitBreaker(m) => m.validate(),
        }
    }

    /// Evaluate this limit for one request, recording its cost.
    pub async fn is_exceeded(
        &self,
        cx: &LimitContext<'_>,
    ) -> Result<LimitCheckResult, StoreError> {
        match self {
            Self::FixedWindow(m) => m.is_exceeded(cx).await,
            Self::SlidingWindow(m) => m.is_exceeded(cx).await,
            Self::Semaphore(m) => m.is_exceeded(cx).await,
            Self::CircuitBreaker(m) => m.is_exceeded(cx).await,
        }
    }

    /// Cheap re-check used by the admission-delay loop: is the counter the
    /// earlier exceeded result was made against still out of capacity?
    ///
    /// A `false` answer is a hint to re-run [`is_exceeded`](Self::is_exceeded)
    /// in full, not an admission by itself.
    pub async fn is_still_exceeded(
        &self,
        store: &dyn CounterStore,
        counter: &CounterId,
    ) -> Result<bool, StoreError> {
        match self {
            Self::FixedWindow(m) => m.is_still_exceeded(store, counter).await,
            Self::SlidingWindow(m) => m.is_still_exceeded(store, counter).await,
            Self::Semaphore(m) => m.is_still_exceeded(store, counter).await,
            Self::CircuitBreaker(m) => m.is_still_exceeded(store, counter).await,
        }
    }

    /// Settle the counter once request processing finished.
    ///
    /// `succeeded` reports whether the request completed normally; only the
    /// circuit breaker distinguishes outcomes.
    pub async fn on_request_processing_finished(
        &self,
        store: &dyn CounterStore,
        counter: &CounterId,
        cost: u64,
        succeeded: bool,
    ) -> Result<(), StoreError> {
        match self {
            Self::FixedWindow(_) | Self::SlidingWindow(_) => Ok(()),
            Self::Semaphore(m) => m.on_request_processing_finished(store, counter, cost).await,
            Self::CircuitBreaker(m) => {
                m.on_request_processing_finished(store, counter, succeeded)
                    .await
            }
        }
    }
}
