use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use quell_core::RetryAfter;
use quell_store::{CounterKey, CounterKind, CounterStore, StoreError};

use crate::error::ConfigError;
use crate::result::{CounterId, LimitCheckResult};

use super::{LimitContext, WINDOW_TTL_GRACE, seconds_until, subject_cell};

/// At most `permit_limit` cost units per `interval_seconds`-long window,
/// with windows aligned to multiples of the interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FixedWindow {
    pub permit_limit: u64,
    pub interval_seconds: u64,
    #[serde(default)]
    pub should_throw_on_failures: bool,
}

impl FixedWindow {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.permit_limit < 1 {
            return Err(ConfigError::InvalidLimitMethod(
                "fixed window permit limit must be >= 1".into(),
            ));
        }
        if self.interval_seconds < 1 {
            return Err(ConfigError::InvalidLimitMethod(
                "fixed window interval must be >= 1 second".into(),
            ));
        }
        Ok(())
    }

    fn window_ttl(&self) -> Duration {
        Duration::from_secs(self.interval_seconds) + WINDOW_TTL_GRACE
    }

    /// Key of the window cell active at `cx.now`.
    fn counter_key(&self, cx: &LimitContext<'_>) -> CounterKey {
        let bucket = cx
            .now
            .timestamp()
            .div_euclid(i64::try_from(self.interval_seconds).unwrap_or(i64::MAX).max(1));
        CounterKey::new(
            cx.service.clone(),
            CounterKind::Window,
            format!("{}:{bucket}", subject_cell(cx.rule, cx.identity)),
        )
    }

    pub(crate) async fn is_exceeded(
        &self,
        cx: &LimitContext<'_>,
    ) -> Result<LimitCheckResult, StoreError> {
        let key = self.counter_key(cx);
        let slot = cx
            .store
            .increment(&key, cx.cost, self.window_ttl(), cx.now)
            .await?;
        let counter = CounterId::new(key).with_window_start(slot.window_start);

        if slot.value > self.permit_limit {
            let window_end_ms = slot.window_start.timestamp_millis()
                + i64::try_from(self.interval_seconds * 1000).unwrap_or(i64::MAX);
            let retry_after = RetryAfter::Seconds(seconds_until(window_end_ms, cx.now));
            Ok(LimitCheckResult::exceeded(
                counter,
                retry_after,
                cx.rule.clone(),
            ))
        } else {
            Ok(LimitCheckResult::admitted(counter, cx.rule.clone()))
        }
    }

    pub(crate) async fn is_still_exceeded(
        &self,
        store: &dyn CounterStore,
        counter: &CounterId,
    ) -> Result<bool, StoreError> {
        // The window the decision was made in may simply be over.
        if let Some(start) = counter.window_start
            && Utc::now()
                >= start + chrono::Duration::seconds(i64::try_from(self.interval_seconds).unwrap_or(i64::MAX))
        {
            return Ok(false);
        }

        Ok(store
            .get(&counter.key)
            .await?
            .is_some_and(|slot| slot.value >= self.permit_limit))
    }
}
