use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use quell_core::RetryAfter;
use quell_store::{CounterKey, CounterKind, CounterStore, StoreError};

use crate::error::ConfigError;
use crate::result::{CounterId, LimitCheckResult};

use super::{LimitContext, WINDOW_TTL_GRACE, seconds_until, subject_cell};

fn default_buckets() -> u32 {
    1
}

/// At most `permit_limit` cost units over a window that slides in
/// `number_of_buckets` sub-bucket steps.
///
/// Each request increments the bucket active at its arrival time; the
/// decision reads the sum of the last N buckets. With one bucket this
/// degenerates to a fixed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SlidingWindow {
    pub permit_limit: u64,
    pub interval_seconds: u64,
    #[serde(default = "default_buckets")]
    pub number_of_buckets: u32,
    #[serde(default)]
    pub should_throw_on_failures: bool,
}

impl SlidingWindow {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.permit_limit < 1 {
            return Err(ConfigError::InvalidLimitMethod(
                "sliding window permit limit must be >= 1".into(),
            ));
        }
        if self.interval_seconds < 1 {
            return Err(ConfigError::InvalidLimitMethod(
                "sliding window interval must be >= 1 second".into(),
            ));
        }
        if self.number_of_buckets < 1 {
            return Err(ConfigError::InvalidLimitMethod(
                "sliding window needs at least one bucket".into(),
            ));
        }
        Ok(())
    }

    /// Length of one sub-bucket in milliseconds, never zero.
    fn bucket_len_ms(&self) -> i64 {
        let interval_ms = i64::try_from(self.interval_seconds * 1000).unwrap_or(i64::MAX);
        (interval_ms / i64::from(self.number_of_buckets)).max(1)
    }

    fn bucket_key(&self, cx: &LimitContext<'_>, index: i64) -> CounterKey {
        CounterKey::new(
            cx.service.clone(),
            CounterKind::Bucket,
            format!("{}:{index}", subject_cell(cx.rule, cx.identity)),
        )
    }

    /// Sum the bucket at `index` and the `number_of_buckets - 1` buckets
    /// before it.
    async fn view_total(
        &self,
        cx: &LimitContext<'_>,
        index: i64,
        current_value: u64,
    ) -> Result<u64, StoreError> {
        let mut total = current_value;
        for offset in 1..i64::from(self.number_of_buckets) {
            if let Some(older) = cx.store.get(&self.bucket_key(cx, index - offset)).await? {
                total += older.value;
            }
        }
        Ok(total)
    }

    pub(crate) async fn is_exceeded(
        &self,
        cx: &LimitContext<'_>,
    ) -> Result<LimitCheckResult, StoreError> {
        let bucket_ms = self.bucket_len_ms();
        let index = cx.now.timestamp_millis().div_euclid(bucket_ms);

        // Buckets live for the whole interval so every sliding view that
        // includes them can still read them.
        let ttl = Duration::from_secs(self.interval_seconds) + WINDOW_TTL_GRACE;
        let current = self.bucket_key(cx, index);
        let slot = cx.store.increment(&current, cx.cost, ttl, cx.now).await?;

        let total = self.view_total(cx, index, slot.value).await?;
        let counter = CounterId::new(current).with_window_start(slot.window_start);

        if total > self.permit_limit {
            // The oldest bucket drops out of the view when the next bucket
            // opens.
            let next_bucket_ms = (index + 1) * bucket_ms;
            let retry_after = RetryAfter::Seconds(seconds_until(next_bucket_ms, cx.now));
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
        // Bucket cells are named `subject:index`; strip the index to rebuild
        // the view at the current time.
        let Some((subject, _)) = counter.key.cell.rsplit_once(':') else {
            return Ok(false);
        };

        let bucket_ms = self.bucket_len_ms();
        let index = Utc::now().timestamp_millis().div_euclid(bucket_ms);

        let mut total = 0;
        for offset in 0..i64::from(self.number_of_buckets) {
            let key = CounterKey::new(
                counter.key.service.clone(),
                CounterKind::Bucket,
                format!("{subject}:{}", index - offset),
            );
            if let Some(slot) = store.get(&key).await? {
                total += slot.value;
            }
        }
        Ok(total >= self.permit_limit)
    }
}
