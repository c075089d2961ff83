use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use quell_rules::{CounterId, LimitMethod};
use quell_store::CounterStore;

/// Shared success flag for one request.
///
/// Cleanup routines are nullary, but the circuit breaker needs to know how
/// the request ended; the engine flips this flag when the continuation
/// fails, and every routine of the request reads it when it runs.
#[derive(Debug, Default)]
pub struct RequestOutcome {
    failed: AtomicBool,
}

impl RequestOutcome {
    /// A fresh outcome, assumed successful until marked otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the request did not complete normally.
    pub fn mark_failure(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    /// Whether the request is (still) considered successful.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.failed.load(Ordering::Relaxed)
    }
}

/// Deferred settlement of one admitted rule: decrements or releases the
/// counter cell the admission was recorded against.
///
/// Created by the engine during evaluation, owned by the request's scope,
/// and run exactly once when the request completes.
pub struct CleanupRoutine {
    store: Arc<dyn CounterStore>,
    limit: LimitMethod,
    counter: CounterId,
    cost: u64,
    outcome: Arc<RequestOutcome>,
}

impl std::fmt::Debug for CleanupRoutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRoutine")
            .field("counter", &self.counter)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

impl CleanupRoutine {
    pub(crate) fn new(
        store: Arc<dyn CounterStore>,
        limit: LimitMethod,
        counter: CounterId,
        cost: u64,
        outcome: Arc<RequestOutcome>,
    ) -> Self {
        Self {
            store,
            limit,
            counter,
            cost,
            outcome,
        }
    }

    /// The counter cell this routine settles.
    #[must_use]
    pub fn counter(&self) -> &CounterId {
        &self.counter
    }

    /// Run the routine. Failures are logged and swallowed; a broken cleanup
    /// never poisons the request.
    pub async fn run(self) {
        let succeeded = self.outcome.is_success();
        if let Err(e) = self
            .limit
            .on_request_processing_finished(self.store.as_ref(), &self.counter, self.cost, succeeded)
            .await
        {
            warn!(counter = %self.counter.key, error = %e, "cleanup routine failed");
        }
    }
}

/// Run a request's cleanup routines in the reverse of their registration
/// order.
pub async fn run_cleanup(routines: Vec<CleanupRoutine>) {
    for routine in routines.into_iter().rev() {
        routine.run().await;
    }
}
