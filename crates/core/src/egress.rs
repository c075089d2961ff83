//! The downstream throttle signal and how it is recognized.
//!
//! A continuation invoked after ingress evaluation may fail because a
//! downstream dependency throttled the call. That failure is a
//! [`TooManyRequests`] value, possibly buried in an error's `source()` chain
//! or inside a [`CompositeError`]. [`find_throttle_signal`] is the single
//! place that understands both wrappings.

use thiserror::Error;

use crate::retry::RetryAfter;

/// Boxed error type accepted from request continuations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Typed failure raised when a downstream dependency throttles a call.
#[derive(Debug, Clone, Error)]
#[error("too many requests, retry after {retry_after}")]
pub struct TooManyRequests {
    /// The `Retry-After` value reported by the downstream, kept verbatim.
    pub retry_after: RetryAfter,
}

impl TooManyRequests {
    /// Create a signal with an explicit retry-after value.
    #[must_use]
    pub fn new(retry_after: RetryAfter) -> Self {
        Self { retry_after }
    }

    /// Build a signal from a raw `Retry-After` header value.
    ///
    /// Returns `None` when the value is neither numeric seconds nor an HTTP
    /// date.
    #[must_use]
    pub fn from_header_value(value: &str) -> Option<Self> {
        RetryAfter::from_header_value(value).map(Self::new)
    }
}

/// A failure aggregating several independent errors.
///
/// Continuations that fan out to multiple downstreams report all failures at
/// once; the engine only cares whether any of them is a throttle signal.
#[derive(Debug)]
pub struct CompositeError {
    /// The aggregated failures, in no particular order.
    pub errors: Vec<BoxError>,
}

impl CompositeError {
    /// Aggregate a set of failures into one.
    #[must_use]
    pub fn new(errors: Vec<BoxError>) -> Self {
        Self { errors }
    }
}

impl std::fmt::Display for CompositeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failures:", self.errors.len())?;
        for err in &self.errors {
            write!(f, " [{err}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositeError {}

/// Search a failure for a [`TooManyRequests`] signal.
///
/// Checks the error itself, every inner failure of a [`CompositeError`]
/// (recursively), and the `source()` chain.
#[must_use]
pub fn find_throttle_signal<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a TooManyRequests> {
    if let Some(signal) = err.downcast_ref::<TooManyRequests>() {
        return Some(signal);
    }
    if let Some(composite) = err.downcast_ref::<CompositeError>() {
        for inner in &composite.errors {
            if let Some(signal) = find_throttle_signal(inner.as_ref()) {
                return Some(signal);
            }
        }
    }
    err.source().and_then(find_throttle_signal)
}
