use std::time::Duration;

use serde::{Deserialize, Serialize};

use quell_core::RetryAfter;
use quell_store::{CounterKey, CounterKind, CounterStore, SemaphoreToken, StoreError};

use crate::error::ConfigError;
use crate::result::{CounterId, LimitCheckResult};

use super::{LimitContext, subject_cell};

/// At most `permit_limit` requests concurrently inside the guarded section.
///
/// Admission takes `cost` permits with a zero timeout; the permits are
/// released when request processing finishes. `timeout_seconds` is the retry
/// hint handed to rejected callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Semaphore {
    pub permit_limit: u64,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub should_throw_on_failures: bool,
}

impl Semaphore {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.permit_limit < 1 {
            return Err(ConfigError::InvalidLimitMethod(
                "semaphore permit limit must be >= 1".into(),
            ));
        }
        Ok(())
    }

    fn counter_key(&self, cx: &LimitContext<'_>) -> CounterKey {
        CounterKey::new(
            cx.service.clone(),
            CounterKind::Semaphore,
            subject_cell(cx.rule, cx.identity),
        )
    }

    pub(crate) async fn is_exceeded(
        &self,
        cx: &LimitContext<'_>,
    ) -> Result<LimitCheckResult, StoreError> {
        let key = self.counter_key(cx);
        let acquired = cx
            .store
            .acquire_semaphore(&key, self.permit_limit, cx.cost, Duration::ZERO)
            .await?;

        match acquired {
            Some(token) => Ok(LimitCheckResult::admitted(
                CounterId::new(token.key),
                cx.rule.clone(),
            )),
            None => Ok(LimitCheckResult::exceeded(
                CounterId::new(key),
                RetryAfter::Seconds(self.timeout_seconds),
                cx.rule.clone(),
            )),
        }
    }

    /// Semaphore occupancy has no cheap read-only probe; report "capacity
    /// may be free" so the delay loop retries the acquire itself.
    pub(crate) async fn is_still_exceeded(
        &self,
        _store: &dyn CounterStore,
        _counter: &CounterId,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }

    pub(crate) async fn on_request_processing_finished(
        &self,
        store: &dyn CounterStore,
        counter: &CounterId,
        cost: u64,
    ) -> Result<(), StoreError> {
        store
            .release_semaphore(SemaphoreToken::new(counter.key.clone(), cost))
            .await
    }
}
