use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::Instant;

use quell_store::error::StoreError;
use quell_store::key::CounterKey;
use quell_store::store::{CounterSlot, CounterStore, SemaphoreToken};

/// How often a blocking semaphore acquire re-checks capacity.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A single counter cell in the in-memory store.
#[derive(Debug, Clone)]
struct CounterCell {
    value: u64,
    window_start: DateTime<Utc>,
    expires_at: Instant,
}

impl CounterCell {
    /// Returns `true` if this cell's window has passed its deadline.
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn slot(&self) -> CounterSlot {
        CounterSlot {
            value: self.value,
            window_start: self.window_start,
        }
    }
}

/// In-memory [`CounterStore`] backed by [`DashMap`]s.
///
/// Counter cells are lazily evicted on access once their window TTL has
/// elapsed. The window deadline is anchored at the first increment; later
/// increments within a live window do not move it. Semaphore occupancy is a
/// per-key permit ledger; blocking acquisition polls for capacity until the
/// caller's deadline.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterCell>,
    semaphores: DashMap<String, u64>,
}

impl MemoryCounterStore {
    /// Create a new, empty in-memory counter store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of counter cells currently resident (live or not yet evicted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns `true` if no counter cells are resident and no semaphore
    /// permits are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.semaphores.iter().all(|held| *held.value() == 0)
    }

    /// Render a [`CounterKey`] into the string used as the map key.
    fn render_key(key: &CounterKey) -> String {
        key.canonical()
    }

    /// Try to take `permits` permits in one atomic step.
    fn try_acquire(&self, rendered: &str, permit_limit: u64, permits: u64) -> bool {
        let mut held = self.semaphores.entry(rendered.to_owned()).or_insert(0);
        if *held + permits <= permit_limit {
            *held += permits;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        key: &CounterKey,
        cost: u64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<CounterSlot, StoreError> {
        let rendered = Self::render_key(key);
        let fresh = CounterCell {
            value: cost,
            window_start: now,
            expires_at: Instant::now() + ttl,
        };

        let slot = match self.counters.entry(rendered) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let cell = occupied.get_mut();
                if cell.is_expired() {
                    *cell = fresh;
                } else {
                    cell.value += cost;
                }
                cell.slot()
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => vacant.insert(fresh).slot(),
        };

        Ok(slot)
    }

    async fn decrement(&self, key: &CounterKey, cost: u64) -> Result<(), StoreError> {
        let rendered = Self::render_key(key);

        // Expired cells count as missing; drop them instead of mutating.
        self.counters
            .remove_if(&rendered, |_, cell| cell.is_expired());

        if let Some(mut cell) = self.counters.get_mut(&rendered) {
            cell.value = cell.value.saturating_sub(cost);
        }
        Ok(())
    }

    async fn get(&self, key: &CounterKey) -> Result<Option<CounterSlot>, StoreError> {
        let rendered = Self::render_key(key);

        // Lazy TTL eviction: check and remove if expired.
        if let Some(cell) = self.counters.get(&rendered) {
            if cell.is_expired() {
                drop(cell);
                self.counters.remove(&rendered);
                return Ok(None);
            }
            return Ok(Some(cell.slot()));
        }

        Ok(None)
    }

    async fn acquire_semaphore(
        &self,
        key: &CounterKey,
        permit_limit: u64,
        permits: u64,
        timeout: Duration,
    ) -> Result<Option<SemaphoreToken>, StoreError> {
        // A request for more permits than the limit can never be satisfied;
        // fail as a single unit instead of waiting out the timeout.
        if permits > permit_limit {
            return Ok(None);
        }

        let rendered = Self::render_key(key);
        let deadline = Instant::now() + timeout;

        loop {
            if self.try_acquire(&rendered, permit_limit, permits) {
                return Ok(Some(SemaphoreToken::new(key.clone(), permits)));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(ACQUIRE_POLL_INTERVAL.min(timeout)).await;
        }
    }

    async fn release_semaphore(&self, token: SemaphoreToken) -> Result<(), StoreError> {
        let rendered = Self::render_key(&token.key);
        if let Some(mut held) = self.semaphores.get_mut(&rendered) {
            *held = held.saturating_sub(token.permits);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use quell_store::key::{CounterKey, CounterKind};
    use quell_store::testing::run_counter_store_conformance_tests;

    use super::*;

    fn test_key(kind: CounterKind, cell: &str) -> CounterKey {
        CounterKey::new("test-svc", kind, cell)
    }

    #[tokio::test]
    async fn conformance() {
        let store = MemoryCounterStore::new();
        run_counter_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test(start_paused = true)]
    async fn window_expires_via_get() {
        let store = MemoryCounterStore::new();
        let key = test_key(CounterKind::Window, "expire");

        store
            .increment(&key, 3, Duration::from_secs(5), Utc::now())
            .await
            .unwrap();

        // Cell should be present before the window ends.
        let slot = store.get(&key).await.unwrap();
        assert_eq!(slot.map(|s| s.value), Some(3));

        // Advance time past the TTL.
        tokio::time::advance(Duration::from_secs(6)).await;

        // Lazy eviction: get should return None.
        let slot = store.get(&key).await.unwrap();
        assert!(slot.is_none(), "cell should be expired");
    }

    #[tokio::test(start_paused = true)]
    async fn increment_resets_after_window_expiry() {
        let store = MemoryCounterStore::new();
        let key = test_key(CounterKind::Window, "reset");

        let opened = Utc::now();
        store
            .increment(&key, 10, Duration::from_secs(2), opened)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;

        // After expiry the counter restarts from the new cost with a fresh
        // window start.
        let later = opened + chrono::Duration::seconds(3);
        let slot = store
            .increment(&key, 1, Duration::from_secs(2), later)
            .await
            .unwrap();
        assert_eq!(slot.value, 1, "counter should reset after expiry");
        assert_eq!(slot.window_start, later);
    }

    #[tokio::test(start_paused = true)]
    async fn increment_does_not_extend_live_window() {
        let store = MemoryCounterStore::new();
        let key = test_key(CounterKind::Window, "no-extend");

        store
            .increment(&key, 1, Duration::from_secs(4), Utc::now())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        store
            .increment(&key, 1, Duration::from_secs(4), Utc::now())
            .await
            .unwrap();

        // The second increment must not push the deadline out; one more
        // second crosses the original window end.
        tokio::time::advance(Duration::from_secs(2)).await;
        let slot = store.get(&key).await.unwrap();
        assert!(slot.is_none(), "window deadline is anchored at the first increment");
    }

    #[tokio::test(start_paused = true)]
    async fn semaphore_acquire_waits_until_released() {
        let store = Arc::new(MemoryCounterStore::new());
        let key = test_key(CounterKind::Semaphore, "wait");

        let held = store
            .acquire_semaphore(&key, 1, 1, Duration::ZERO)
            .await
            .unwrap()
            .expect("should acquire");

        // Release the permit from another task after a short delay.
        let releaser = Arc::clone(&store);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            releaser.release_semaphore(held).await.unwrap();
        });

        let token = store
            .acquire_semaphore(&key, 1, 1, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(token.is_some(), "acquire should succeed once released");

        handle.await.expect("releaser should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn semaphore_acquire_times_out() {
        let store = MemoryCounterStore::new();
        let key = test_key(CounterKind::Semaphore, "timeout");

        let _held = store
            .acquire_semaphore(&key, 1, 1, Duration::ZERO)
            .await
            .unwrap()
            .expect("should acquire");

        let token = store
            .acquire_semaphore(&key, 1, 1, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(token.is_none(), "acquire should give up at the deadline");
    }

    #[tokio::test]
    async fn concurrent_increments_are_atomic() {
        let store = Arc::new(MemoryCounterStore::new());
        let key = test_key(CounterKind::Window, "parallel");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store
                        .increment(&key, 1, Duration::from_secs(3600), Utc::now())
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task should not panic");
        }

        let slot = store.get(&key).await.unwrap();
        assert_eq!(slot.map(|s| s.value), Some(800));
    }

    #[tokio::test]
    async fn is_empty_reflects_state() {
        let store = MemoryCounterStore::new();
        assert!(store.is_empty());

        let key = test_key(CounterKind::Window, "occupied");
        store
            .increment(&key, 1, Duration::from_secs(60), Utc::now())
            .await
            .unwrap();
        assert!(!store.is_empty());
        assert_eq!(store.len(), 1);
    }
}
