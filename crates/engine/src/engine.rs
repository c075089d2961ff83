use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use quell_core::{BoxError, RequestProxy, find_throttle_signal};
use quell_rules::{
    Config, CostExtractor, IdentityExtractor, LimitCheckResult, LimitContext, Rule,
};
use quell_store::{CounterStore, StoreError};

use crate::cleanup::{CleanupRoutine, RequestOutcome};
use crate::metrics::EngineMetrics;

/// The throttling evaluator.
///
/// Per request, the engine walks the current config snapshot in declared
/// rule order, evaluates every matching rule against the counter store,
/// waits out admission delays where a rule allows it, registers cleanup
/// routines for admitted matches, and fuses downstream throttle signals
/// surfaced by the request continuation.
///
/// The config snapshot is read by atomic pointer load and captured once per
/// evaluation, so a reload never tears a request.
pub struct Engine {
    pub(crate) store: Arc<dyn CounterStore>,
    pub(crate) snapshot: Arc<ArcSwap<Config>>,
    pub(crate) identity_extractor: Option<IdentityExtractor>,
    pub(crate) cost_extractor: Option<CostExtractor>,
    pub(crate) poll_interval: Duration,
    pub(crate) metrics: Arc<EngineMetrics>,
    pub(crate) shutdown: CancellationToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("poll_interval", &self.poll_interval)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// The currently published configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        self.snapshot.load_full()
    }

    /// Return a reference to the engine metrics.
    #[must_use]
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Stop scheduling config reloads. In-flight evaluations complete
    /// normally; a reload already in flight completes and is discarded.
    pub fn dispose(&self) {
        self.shutdown.cancel();
    }

    /// Evaluate the ingress rules for one request.
    ///
    /// Returns one result per matching rule, in declared rule order. Every
    /// matching rule is evaluated even when an earlier one reports exceeded,
    /// so each counter reflects the true request volume. For every admitted
    /// match a [`CleanupRoutine`] is appended to `cleanup`; the caller runs
    /// them (see [`run_cleanup`](crate::cleanup::run_cleanup)) when the
    /// request completes.
    pub async fn evaluate(
        &self,
        request: &dyn RequestProxy,
        cleanup: &mut Vec<CleanupRoutine>,
    ) -> Result<Vec<LimitCheckResult>, crate::EngineError> {
        let outcome = Arc::new(RequestOutcome::new());
        self.evaluate_inner(request, cleanup, &outcome).await
    }

    /// Evaluate ingress rules, then drive the request continuation and fuse
    /// any downstream throttle signal it surfaces.
    ///
    /// When any ingress rule reports exceeded, `next` is not invoked. When
    /// `next` fails with a [`TooManyRequests`](quell_core::TooManyRequests)
    /// signal (directly, in its source chain, or inside a composite
    /// failure), a synthetic exceeded result carrying the propagated
    /// retry-after is appended instead of an error. Any other failure
    /// propagates unchanged.
    pub async fn evaluate_with_next<F, Fut>(
        &self,
        request: &dyn RequestProxy,
        cleanup: &mut Vec<CleanupRoutine>,
        next: F,
    ) -> Result<Vec<LimitCheckResult>, crate::EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        let outcome = Arc::new(RequestOutcome::new());
        let mut results = self.evaluate_inner(request, cleanup, &outcome).await?;

        if results.iter().any(|r| r.exceeded) {
            return Ok(results);
        }

        match next().await {
            Ok(()) => Ok(results),
            Err(err) => {
                outcome.mark_failure();
                if let Some(signal) = find_throttle_signal(err.as_ref()) {
                    debug!(retry_after = %signal.retry_after, "downstream throttle signal fused into results");
                    self.metrics.increment_egress_throttled();
                    results.push(LimitCheckResult::propagated(signal.retry_after.clone()));
                    Ok(results)
                } else {
                    Err(crate::EngineError::NextAction(err))
                }
            }
        }
    }

    async fn evaluate_inner(
        &self,
        request: &dyn RequestProxy,
        cleanup: &mut Vec<CleanupRoutine>,
        outcome: &Arc<RequestOutcome>,
    ) -> Result<Vec<LimitCheckResult>, crate::EngineError> {
        // Capture the snapshot once; a concurrent reload must not tear this
        // request.
        let config = self.snapshot.load_full();
        self.metrics.increment_evaluated();

        if config.whitelist.iter().any(|m| m.matches(request)) {
            info!(
                uri = request.uri_without_query(),
                "request whitelisted, skipping throttle evaluation"
            );
            self.metrics.increment_whitelisted();
            return Ok(Vec::new());
        }

        let started = tokio::time::Instant::now();
        let mut results = Vec::new();

        for rule in &config.rules {
            if !rule.matcher().matches(request) {
                continue;
            }

            let cost = rule.request_cost(request, self.cost_extractor.as_ref());
            let identity = rule.identity(request, self.identity_extractor.as_ref());

            let checked = self
                .check_rule_with_delay(rule, &config, identity.as_deref(), cost, started)
                .await;

            let result = match checked {
                Ok(result) => result,
                Err(e) => {
                    if e.is_corrupt() {
                        error!(rule = %rule.id(), error = %e, "counter store returned corrupt state");
                    }
                    error!(rule = %rule.id(), error = %e, "rule evaluation failed");
                    if rule.limit().should_throw_on_failures() {
                        return Err(crate::EngineError::Store(e));
                    }
                    // Evaluation of one rule failing must not prevent the
                    // remaining rules from being evaluated.
                    continue;
                }
            };

            if result.exceeded {
                debug!(rule = %rule.id(), retry_after = %result.retry_after, "limit exceeded");
                self.metrics.increment_exceeded();
            } else if let Some(counter) = result.counter.clone() {
                cleanup.push(CleanupRoutine::new(
                    Arc::clone(&self.store),
                    rule.limit().clone(),
                    counter,
                    cost,
                    Arc::clone(outcome),
                ));
            }

            results.push(result);
        }

        Ok(results)
    }

    /// Check one rule. If it exceeded and the rule carries a delay budget,
    /// poll for admission until the budget runs out.
    async fn check_rule_with_delay(
        &self,
        rule: &Rule,
        config: &Config,
        identity: Option<&str>,
        cost: u64,
        started: tokio::time::Instant,
    ) -> Result<LimitCheckResult, StoreError> {
        let mut result = rule
            .limit()
            .is_exceeded(&LimitContext {
                store: self.store.as_ref(),
                service: &config.unique_name,
                rule: rule.id(),
                identity,
                cost,
                now: Utc::now(),
            })
            .await?;

        if !result.exceeded || rule.max_delay().is_zero() {
            return Ok(result);
        }

        // The budget is measured from evaluation start, not from this rule's
        // first check.
        while started.elapsed() <= rule.max_delay() {
            let still_exceeded = match &result.counter {
                Some(counter) => {
                    rule.limit()
                        .is_still_exceeded(self.store.as_ref(), counter)
                        .await?
                }
                None => false,
            };

            if !still_exceeded {
                // Capacity may have freed up, but other waiters compete for
                // it; only the full path decides.
                let fresh = rule
                    .limit()
                    .is_exceeded(&LimitContext {
                        store: self.store.as_ref(),
                        service: &config.unique_name,
                        rule: rule.id(),
                        identity,
                        cost,
                        now: Utc::now(),
                    })
                    .await?;
                if !fresh.exceeded {
                    debug!(rule = %rule.id(), waited = ?started.elapsed(), "admitted after delay");
                    self.metrics.increment_delayed_admissions();
                    return Ok(fresh);
                }
                result = fresh;
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        Ok(result)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
