use std::time::Duration;

use chrono::Utc;

use crate::error::StoreError;
use crate::key::{CounterKey, CounterKind};
use crate::store::CounterStore;

fn test_key(kind: CounterKind, cell: &str) -> CounterKey {
    CounterKey::new("test-svc", kind, cell)
}

const TTL: Duration = Duration::from_secs(3600);

/// Run the full counter store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_counter_store_conformance_tests(
    store: &dyn CounterStore,
) -> Result<(), StoreError> {
    test_get_missing(store).await?;
    test_increment_from_zero(store).await?;
    test_increment_accumulates(store).await?;
    test_increment_keeps_window_start(store).await?;
    test_decrement_floors_at_zero(store).await?;
    test_decrement_missing_is_noop(store).await?;
    test_semaphore_acquire_and_release(store).await?;
    test_semaphore_exhausted_with_zero_timeout(store).await?;
    test_semaphore_multi_permit_is_all_or_nothing(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key(CounterKind::Window, "missing");
    let slot = store.get(&key).await?;
    assert!(slot.is_none(), "get on missing key should return None");
    Ok(())
}

async fn test_increment_from_zero(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key(CounterKind::Window, "from-zero");
    let now = Utc::now();
    let slot = store.increment(&key, 1, TTL, now).await?;
    assert_eq!(slot.value, 1, "first increment should yield the cost");
    assert_eq!(slot.window_start, now, "fresh cell stamps window start");
    Ok(())
}

async fn test_increment_accumulates(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key(CounterKind::Window, "accumulate");
    store.increment(&key, 2, TTL, Utc::now()).await?;
    let slot = store.increment(&key, 3, TTL, Utc::now()).await?;
    assert_eq!(slot.value, 5, "increments should accumulate");
    Ok(())
}

async fn test_increment_keeps_window_start(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key(CounterKind::Window, "window-start");
    let first = Utc::now();
    let opened = store.increment(&key, 1, TTL, first).await?;
    let later = first + chrono::Duration::seconds(5);
    let slot = store.increment(&key, 1, TTL, later).await?;
    assert_eq!(
        slot.window_start, opened.window_start,
        "live window keeps its original start"
    );
    Ok(())
}

async fn test_decrement_floors_at_zero(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key(CounterKind::Window, "floor");
    store.increment(&key, 2, TTL, Utc::now()).await?;
    store.decrement(&key, 10).await?;
    let slot = store.get(&key).await?;
    assert_eq!(
        slot.map(|s| s.value),
        Some(0),
        "decrement should floor at zero"
    );
    Ok(())
}

async fn test_decrement_missing_is_noop(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key(CounterKind::Window, "dec-missing");
    store.decrement(&key, 1).await?;
    let slot = store.get(&key).await?;
    assert!(slot.is_none(), "decrement must not create cells");
    Ok(())
}

async fn test_semaphore_acquire_and_release(store: &dyn CounterStore) -> Result<(), StoreError> {
    let key = test_key(CounterKind::Semaphore, "acquire-release");
    let token = store
        .acquire_semaphore(&key, 2, 1, Duration::ZERO)
        .await?
        .expect("should acquire with free capacity");
    assert_eq!(token.permits, 1);
    store.release_semaphore(token).await?;

    // Full capacity should be available again.
    let token = store
        .acquire_semaphore(&key, 2, 2, Duration::ZERO)
        .await?
        .expect("all permits should be free after release");
    store.release_semaphore(token).await?;
    Ok(())
}

async fn test_semaphore_exhausted_with_zero_timeout(
    store: &dyn CounterStore,
) -> Result<(), StoreError> {
    let key = test_key(CounterKind::Semaphore, "exhausted");
    let held = store
        .acquire_semaphore(&key, 1, 1, Duration::ZERO)
        .await?
        .expect("first acquire should succeed");

    let second = store.acquire_semaphore(&key, 1, 1, Duration::ZERO).await?;
    assert!(
        second.is_none(),
        "zero-timeout acquire should fail while exhausted"
    );

    store.release_semaphore(held).await?;
    Ok(())
}

async fn test_semaphore_multi_permit_is_all_or_nothing(
    store: &dyn CounterStore,
) -> Result<(), StoreError> {
    let key = test_key(CounterKind::Semaphore, "multi-permit");
    let held = store
        .acquire_semaphore(&key, 3, 2, Duration::ZERO)
        .await?
        .expect("two of three permits should be available");

    // Two more permits do not fit; the acquire must not hold the single
    // remaining permit.
    let rejected = store.acquire_semaphore(&key, 3, 2, Duration::ZERO).await?;
    assert!(rejected.is_none(), "partial acquisition must not happen");

    let last = store
        .acquire_semaphore(&key, 3, 1, Duration::ZERO)
        .await?
        .expect("the remaining permit should still be free");

    store.release_semaphore(last).await?;
    store.release_semaphore(held).await?;

    // Never-satisfiable requests fail as a single unit.
    let oversized = store.acquire_semaphore(&key, 3, 4, Duration::ZERO).await?;
    assert!(oversized.is_none(), "permits above the limit cannot succeed");
    Ok(())
}
