use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use quell_core::RetryAfter;
use quell_store::{CounterKey, CounterKind, CounterStore, StoreError};

use crate::error::ConfigError;
use crate::result::{CounterId, LimitCheckResult};

use super::{LimitContext, WINDOW_TTL_GRACE, seconds_until, subject_cell};

/// Rejects requests once `permit_limit` downstream failures are recorded
/// within `interval_seconds`.
///
/// While open, a single trial request is admitted every
/// `trial_interval_seconds`; a successful trial clears the failure counter
/// and closes the breaker. Failures are reported through the
/// request-finished hook, so breaker state lives entirely in the counter
/// store and is shared by every node using it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CircuitBreaker {
    pub permit_limit: u64,
    pub interval_seconds: u64,
    pub trial_interval_seconds: u64,
    #[serde(default)]
    pub should_throw_on_failures: bool,
}

impl CircuitBreaker {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.permit_limit < 1 {
            return Err(ConfigError::InvalidLimitMethod(
                "circuit breaker failure limit must be >= 1".into(),
            ));
        }
        if self.interval_seconds < 1 {
            return Err(ConfigError::InvalidLimitMethod(
                "circuit breaker interval must be >= 1 second".into(),
            ));
        }
        if self.trial_interval_seconds < 1 {
            return Err(ConfigError::InvalidLimitMethod(
                "circuit breaker trial interval must be >= 1 second".into(),
            ));
        }
        Ok(())
    }

    fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.interval_seconds) + WINDOW_TTL_GRACE
    }

    fn failures_key(&self, cx: &LimitContext<'_>) -> CounterKey {
        CounterKey::new(
            cx.service.clone(),
            CounterKind::Failures,
            subject_cell(cx.rule, cx.identity),
        )
    }

    pub(crate) async fn is_exceeded(
        &self,
        cx: &LimitContext<'_>,
    ) -> Result<LimitCheckResult, StoreError> {
        let failures_key = self.failures_key(cx);
        let failures = cx.store.get(&failures_key).await?;

        let mut counter = CounterId::new(failures_key);
        if let Some(slot) = failures {
            counter = counter.with_window_start(slot.window_start);
        }

        // Closed: requests flow through; failures are only observed via the
        // request-finished hook.
        if failures.map_or(0, |slot| slot.value) < self.permit_limit {
            return Ok(LimitCheckResult::admitted(counter, cx.rule.clone()));
        }

        // Open: one trial request per trial interval. The first increment of
        // the trial gate wins the slot.
        let trial_interval = i64::try_from(self.trial_interval_seconds)
            .unwrap_or(i64::MAX)
            .max(1);
        let trial_index = cx.now.timestamp().div_euclid(trial_interval);
        let trial_key = CounterKey::new(
            cx.service.clone(),
            CounterKind::Trial,
            format!("{}:{trial_index}", subject_cell(cx.rule, cx.identity)),
        );
        let trial_ttl = Duration::from_secs(self.trial_interval_seconds) + WINDOW_TTL_GRACE;
        let slot = cx.store.increment(&trial_key, 1, trial_ttl, cx.now).await?;

        if slot.value == 1 {
            debug!(rule = %cx.rule, "circuit open, admitting trial request");
            Ok(LimitCheckResult::admitted(counter, cx.rule.clone()))
        } else {
            let next_trial_ms = (trial_index + 1) * trial_interval * 1000;
            let retry_after = RetryAfter::Seconds(seconds_until(next_trial_ms, cx.now));
            Ok(LimitCheckResult::exceeded(
                counter,
                retry_after,
                cx.rule.clone(),
            ))
        }
    }

    pub(crate) async fn is_still_exceeded(
        &self,
        store: &dyn CounterStore,
        counter: &CounterId,
    ) -> Result<bool, StoreError> {
        Ok(store
            .get(&counter.key)
            .await?
            .is_some_and(|slot| slot.value >= self.permit_limit))
    }

    /// Observe the request outcome against the failure counter the decision
    /// was made on.
    pub(crate) async fn on_request_processing_finished(
        &self,
        store: &dyn CounterStore,
        counter: &CounterId,
        succeeded: bool,
    ) -> Result<(), StoreError> {
        if succeeded {
            if let Some(slot) = store.get(&counter.key).await?
                && slot.value > 0
            {
                if slot.value >= self.permit_limit {
                    info!(key = %counter.key, "circuit closing after successful trial");
                }
                store.decrement(&counter.key, slot.value).await?;
            }
            Ok(())
        } else {
            let slot = store
                .increment(&counter.key, 1, self.failure_ttl(), Utc::now())
                .await?;
            if slot.value == self.permit_limit {
                info!(
                    key = %counter.key,
                    failures = slot.value,
                    "circuit opening after repeated failures"
                );
            }
            Ok(())
        }
    }
}
