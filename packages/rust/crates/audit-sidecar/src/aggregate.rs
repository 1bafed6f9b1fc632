//! Read-only aggregate and admin views over device and usage state.
//!
//! Backs `/token_stats`, `/devices`, `/all_token_devices`,
//! `/all_token_usage`, and `/logout`. None of these touch the hot admission
//! path; they exist for dashboards and manual account support.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::conversation::ConversationCounter;
use crate::devices::{DeviceInfo, DeviceRegistry};
use crate::kv::KvStore;
use crate::window::{UsageStats, WindowCounter};

/// One row of the `/token_stats` response: a single account key's usage
/// across every window, sorted by the caller by descending total.
///
/// `current_active` and `last_seen_seconds` are literal constants in this
/// version — the source does not track device liveness at that
/// granularity, it just always reports a key as active and "seen" a
/// minute ago.
#[derive(Debug, Clone, Serialize)]
pub struct TokenStat {
    pub token: String,
    pub usage: UsageStats,
    pub current_active: bool,
    pub last_seen_seconds: u64,
}

/// One row of the `/all_token_devices` response.
#[derive(Debug, Clone, Serialize)]
pub struct TokenDevices {
    pub token: String,
    pub devices: Vec<DeviceInfo>,
    pub total: usize,
}

/// Read-side companion to [`crate::admission::AdmissionEngine`], sharing
/// the same backing store.
pub struct AggregateReader {
    devices: DeviceRegistry,
    window: WindowCounter,
    conversation: ConversationCounter,
}

impl AggregateReader {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, max_devices: u32, device_ttl: std::time::Duration) -> Self {
        Self {
            devices: DeviceRegistry::new(Arc::clone(&store), max_devices, device_ttl),
            window: WindowCounter::new(Arc::clone(&store)),
            conversation: ConversationCounter::new(store),
        }
    }

    /// Usage stats for every account key that has ever recorded usage,
    /// sorted by descending total.
    pub async fn token_stats(&self) -> Result<Vec<TokenStat>> {
        let all = self.window.get_all().await?;
        let mut stats: Vec<TokenStat> = all
            .into_iter()
            .map(|(token, usage)| TokenStat {
                token,
                usage,
                current_active: true,
                last_seen_seconds: 60,
            })
            .collect();
        stats.sort_by(|a, b| b.usage.total.cmp(&a.usage.total));
        Ok(stats)
    }

    /// Devices registered to a single account key.
    pub async fn devices(&self, token: &str) -> Result<Vec<DeviceInfo>> {
        self.devices.list(token).await
    }

    /// Log a device out of an account key. Returns `true` if a device was
    /// actually removed.
    pub async fn logout(&self, token: &str, user_agent: &str) -> Result<bool> {
        self.devices.remove(token, user_agent).await
    }

    /// Devices across every account key, sorted by descending device
    /// count.
    pub async fn all_token_devices(&self) -> Result<Vec<TokenDevices>> {
        let all = self.devices.list_all().await?;
        let mut stats: Vec<TokenDevices> = all
            .into_iter()
            .map(|(token, devices)| TokenDevices { token, total: devices.len(), devices })
            .collect();
        stats.sort_by(|a, b| b.total.cmp(&a.total));
        Ok(stats)
    }

    /// Every conversation's accumulated token total, grouped by account
    /// key then conversation id.
    pub async fn all_token_usage(&self) -> Result<std::collections::HashMap<String, std::collections::HashMap<String, i64>>> {
        self.conversation.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use std::time::Duration;

    fn reader() -> AggregateReader {
        AggregateReader::new(Arc::new(MemoryStore::new()), 3, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn token_stats_empty_when_unused() {
        let reader = reader();
        assert!(reader.token_stats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn logout_removes_registered_device() {
        let reader = reader();
        reader.devices.check_and_add("tok", "ua-1", "host").await.unwrap();
        assert!(reader.logout("tok", "ua-1").await.unwrap());
        assert!(reader.devices("tok").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn token_stats_reports_literal_activity_constants() {
        let reader = reader();
        reader.window.increment("tok", 5).await.unwrap();
        let stats = reader.token_stats().await.unwrap();
        assert!(stats[0].current_active);
        assert_eq!(stats[0].last_seen_seconds, 60);
    }

    #[tokio::test]
    async fn all_token_devices_sorted_by_count_desc() {
        let reader = reader();
        reader.devices.check_and_add("few", "ua-1", "h").await.unwrap();
        reader.devices.check_and_add("many", "ua-1", "h").await.unwrap();
        reader.devices.check_and_add("many", "ua-2", "h").await.unwrap();
        let all = reader.all_token_devices().await.unwrap();
        assert_eq!(all[0].token, "many");
        assert_eq!(all[0].total, 2);
    }
}
