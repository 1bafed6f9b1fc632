//! Rolling usage-window accounting.
//!
//! Tracks, per account key, token counts over five windows in parallel: a
//! monotone `total` that never expires, and four TTL buckets (3h, 12h, 24h,
//! 1w) that approximate a sliding window by resetting their TTL on first
//! write after expiry rather than true time-bucketed rotation. This is the
//! same "lazily created, TTL-refreshed" shape for all four limited windows,
//! which is why a single counter type handles them instead of one type per
//! period.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::config::Period;
use crate::kv::KvStore;

/// Usage totals across all tracked windows for a single account key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub total: i64,
    pub last_3_hours: i64,
    pub last_12_hours: i64,
    pub last_24_hours: i64,
    pub last_week: i64,
}

/// Rolling-window token counter, keyed by account key.
pub struct WindowCounter {
    store: Arc<dyn KvStore>,
}

impl WindowCounter {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key(token: &str, period: Period) -> String {
        format!("token:{token}:{}", period.suffix())
    }

    /// Add `amount` tokens to every tracked window for `token`.
    ///
    /// The total counter is incremented unconditionally. Each TTL-bounded
    /// window is lazily created (set with its TTL) the first time it is
    /// touched after not existing, and otherwise incremented with its TTL
    /// refreshed — so a window's expiry always measures "time since last
    /// write", not "time since window start".
    pub async fn increment(&self, token: &str, amount: i64) -> Result<()> {
        self.store.incrby(&Self::key(token, Period::Total), amount).await?;

        for period in [Period::ThreeHours, Period::TwelveHours, Period::Day, Period::Week] {
            let key = Self::key(token, period);
            let ttl = period.ttl().expect("limited periods always carry a ttl");
            if self.store.exists(&key).await? {
                self.store.incrby(&key, amount).await?;
                self.store.expire(&key, ttl).await?;
            } else {
                self.store.set(&key, &amount.to_string(), Some(ttl)).await?;
            }
        }
        Ok(())
    }

    /// Remaining TTL, in seconds, on the 3-hour window for `token`. `None`
    /// if the window is not currently active (no usage recorded, or it
    /// already expired).
    pub async fn ttl_3h(&self, token: &str) -> Result<Option<i64>> {
        self.store.ttl(&Self::key(token, Period::ThreeHours)).await
    }

    /// Fetch usage totals for a single account key. All five windows are
    /// read in a single pipelined round trip rather than five sequential
    /// ones.
    pub async fn get(&self, token: &str) -> Result<UsageStats> {
        let keys = [
            Self::key(token, Period::Total),
            Self::key(token, Period::ThreeHours),
            Self::key(token, Period::TwelveHours),
            Self::key(token, Period::Day),
            Self::key(token, Period::Week),
        ];
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let values = self.store.get_many(&refs).await?;

        let parsed = |value: &Option<String>| value.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0);
        Ok(UsageStats {
            total: parsed(&values[0]),
            last_3_hours: parsed(&values[1]),
            last_12_hours: parsed(&values[2]),
            last_24_hours: parsed(&values[3]),
            last_week: parsed(&values[4]),
        })
    }

    /// Fetch usage totals for every account key that has ever recorded
    /// usage. Admin/aggregate use only.
    pub async fn get_all(&self) -> Result<HashMap<String, UsageStats>> {
        let keys = self.store.keys("token:*:total").await?;
        let mut result = HashMap::with_capacity(keys.len());
        for key in keys {
            let Some(token) = key.strip_prefix("token:").and_then(|s| s.strip_suffix(":total"))
            else {
                continue;
            };
            let stats = self.get(token).await?;
            result.insert(token.to_string(), stats);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn total_is_monotone_across_increments() {
        let counter = WindowCounter::new(Arc::new(MemoryStore::new()));
        counter.increment("tok", 10).await.unwrap();
        counter.increment("tok", 5).await.unwrap();
        let stats = counter.get("tok").await.unwrap();
        assert_eq!(stats.total, 15);
        assert_eq!(stats.last_3_hours, 15);
    }

    #[tokio::test]
    async fn window_resets_after_ttl_expiry() {
        let store = Arc::new(MemoryStore::new());
        let clock = store.clock();
        let counter = WindowCounter::new(store);
        counter.increment("tok", 10).await.unwrap();
        clock.advance(Duration::from_secs(3 * 60 * 60 + 1));
        counter.increment("tok", 4).await.unwrap();
        let stats = counter.get("tok").await.unwrap();
        assert_eq!(stats.last_3_hours, 4);
        assert_eq!(stats.total, 14);
    }

    #[tokio::test]
    async fn unused_window_reads_zero() {
        let counter = WindowCounter::new(Arc::new(MemoryStore::new()));
        let stats = counter.get("never-used").await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.last_week, 0);
    }

    #[tokio::test]
    async fn get_all_covers_every_seen_token() {
        let counter = WindowCounter::new(Arc::new(MemoryStore::new()));
        counter.increment("tok-a", 3).await.unwrap();
        counter.increment("tok-b", 7).await.unwrap();
        let all = counter.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["tok-a"].total, 3);
        assert_eq!(all["tok-b"].total, 7);
    }
}
