use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::key::CounterKey;

/// Value and window metadata of one counter cell after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSlot {
    /// Current counter value.
    pub value: u64,
    /// When the active window started.
    pub window_start: DateTime<Utc>,
}

/// Identifies held semaphore permits so they can be released later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaphoreToken {
    pub key: CounterKey,
    pub permits: u64,
}

impl SemaphoreToken {
    /// Create a token for `permits` permits held against `key`.
    #[must_use]
    pub fn new(key: CounterKey, permits: u64) -> Self {
        Self { key, permits }
    }
}

/// Shared counter state behind the throttling engine.
///
/// Implementations must be `Send + Sync`, safe for concurrent access, and
/// must serialize increments per key (per-key linearizability). Backends may
/// be process-local or distributed; the engine only relies on this contract.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add `cost` to the counter at `key`.
    ///
    /// If the counter is absent or its window has expired, the cell is reset
    /// to `cost` with `window_start = now`. Subsequent increments within a
    /// live window must not move its expiry. Returns the post-increment
    /// value and the active window start.
    async fn increment(
        &self,
        key: &CounterKey,
        cost: u64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<CounterSlot, StoreError>;

    /// Best-effort subtraction. The value never goes below zero; decrementing
    /// a missing cell is a no-op.
    async fn decrement(&self, key: &CounterKey, cost: u64) -> Result<(), StoreError>;

    /// Read a cell without mutating it. Returns `None` for missing or
    /// expired cells.
    async fn get(&self, key: &CounterKey) -> Result<Option<CounterSlot>, StoreError>;

    /// Acquire `permits` permits against the bounded resource at `key`,
    /// waiting up to `timeout` for capacity.
    ///
    /// Returns `None` when capacity is exhausted within the timeout. A
    /// multi-permit acquire is atomic: it either obtains all `permits` as a
    /// single unit or fails without holding any.
    async fn acquire_semaphore(
        &self,
        key: &CounterKey,
        permit_limit: u64,
        permits: u64,
        timeout: Duration,
    ) -> Result<Option<SemaphoreToken>, StoreError>;

    /// Release permits previously acquired via
    /// [`acquire_semaphore`](Self::acquire_semaphore).
    async fn release_semaphore(&self, token: SemaphoreToken) -> Result<(), StoreError>;
}
