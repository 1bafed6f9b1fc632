//! Per-account device registry.
//!
//! Tracks, per account key, the set of distinct devices (identified by
//! hashing their `User-Agent` string) that have been granted access, capped
//! at a configured maximum. Registration is race-tolerant: two concurrent
//! requests for the same new device may both decide to add it, but the
//! underlying set add is idempotent so the cap can only be exceeded by at
//! most the number of concurrent racers, never silently lost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::kv::KvStore;

/// Metadata recorded for a single registered device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub user_agent: String,
    pub host: String,
}

/// Registers and enumerates devices per account key, backed by a
/// [`KvStore`].
pub struct DeviceRegistry {
    store: Arc<dyn KvStore>,
    max_devices: u32,
    ttl: Duration,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, max_devices: u32, ttl: Duration) -> Self {
        Self { store, max_devices, ttl }
    }

    fn devices_key(token: &str) -> String {
        format!("devices:{token}")
    }

    fn device_info_key(token: &str, device_hash: &str) -> String {
        format!("device_info:{token}:{device_hash}")
    }

    fn hash_device(identifier: &str) -> String {
        let digest = Sha256::digest(identifier.as_bytes());
        hex::encode(digest)
    }

    /// Register `user_agent` as a device for `token` if it is either
    /// already known or the account is under its device cap. Returns
    /// `true` if the device is (now) allowed, `false` if the cap was
    /// reached and this is a new device.
    pub async fn check_and_add(&self, token: &str, user_agent: &str, host: &str) -> Result<bool> {
        let device_hash = Self::hash_device(user_agent);
        let key = Self::devices_key(token);

        if self.store.sismember(&key, &device_hash).await? {
            return Ok(true);
        }

        let count = self.store.scard(&key).await?;
        if count >= u64::from(self.max_devices) {
            return Ok(false);
        }

        self.store.sadd(&key, &device_hash).await?;
        self.store_device_info(token, &device_hash, user_agent, host).await?;
        self.store.expire(&key, self.ttl).await?;
        Ok(true)
    }

    async fn store_device_info(
        &self,
        token: &str,
        device_hash: &str,
        user_agent: &str,
        host: &str,
    ) -> Result<()> {
        let key = Self::device_info_key(token, device_hash);
        self.store.hset(&key, "user_agent", user_agent).await?;
        self.store.hset(&key, "host", host).await?;
        self.store.expire(&key, self.ttl).await?;
        Ok(())
    }

    /// List all devices currently registered for `token`.
    pub async fn list(&self, token: &str) -> Result<Vec<DeviceInfo>> {
        let key = Self::devices_key(token);
        let device_hashes = self.store.smembers(&key).await?;
        let mut devices = Vec::with_capacity(device_hashes.len());
        for device_hash in device_hashes {
            let info_key = Self::device_info_key(token, &device_hash);
            let fields = self.store.hgetall(&info_key).await?;
            if fields.is_empty() {
                continue;
            }
            let map: HashMap<String, String> = fields.into_iter().collect();
            devices.push(DeviceInfo {
                user_agent: map.get("user_agent").cloned().unwrap_or_default(),
                host: map.get("host").cloned().unwrap_or_default(),
            });
        }
        Ok(devices)
    }

    /// Remove `user_agent`'s device registration for `token`. Returns
    /// `true` if a device was actually removed.
    pub async fn remove(&self, token: &str, user_agent: &str) -> Result<bool> {
        let device_hash = Self::hash_device(user_agent);
        let key = Self::devices_key(token);
        let info_key = Self::device_info_key(token, &device_hash);

        self.store.del(&info_key).await?;
        let was_member = self.store.sismember(&key, &device_hash).await?;
        self.store.srem(&key, &device_hash).await?;
        Ok(was_member)
    }

    /// Enumerate every account key with at least one registered device,
    /// along with its device list. Admin/aggregate use only.
    pub async fn list_all(&self) -> Result<HashMap<String, Vec<DeviceInfo>>> {
        let keys = self.store.keys("devices:*").await?;
        let mut result = HashMap::with_capacity(keys.len());
        for key in keys {
            let Some(token) = key.strip_prefix("devices:") else { continue };
            let devices = self.list(token).await?;
            result.insert(token.to_string(), devices);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn registry(max_devices: u32) -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(MemoryStore::new()), max_devices, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn first_device_is_allowed() {
        let registry = registry(3);
        assert!(registry.check_and_add("tok", "ua-1", "host-1").await.unwrap());
    }

    #[tokio::test]
    async fn same_device_is_idempotent() {
        let registry = registry(1);
        assert!(registry.check_and_add("tok", "ua-1", "host-1").await.unwrap());
        assert!(registry.check_and_add("tok", "ua-1", "host-1").await.unwrap());
    }

    #[tokio::test]
    async fn cap_rejects_new_device() {
        let registry = registry(1);
        assert!(registry.check_and_add("tok", "ua-1", "host-1").await.unwrap());
        assert!(!registry.check_and_add("tok", "ua-2", "host-2").await.unwrap());
    }

    #[tokio::test]
    async fn remove_then_readd_is_allowed() {
        let registry = registry(1);
        assert!(registry.check_and_add("tok", "ua-1", "host-1").await.unwrap());
        assert!(registry.remove("tok", "ua-1").await.unwrap());
        assert!(registry.check_and_add("tok", "ua-2", "host-2").await.unwrap());
    }

    #[tokio::test]
    async fn remove_missing_device_is_idempotent() {
        let registry = registry(3);
        assert!(!registry.remove("tok", "never-added").await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_stored_info() {
        let registry = registry(3);
        registry.check_and_add("tok", "ua-1", "host-1").await.unwrap();
        let devices = registry.list("tok").await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].user_agent, "ua-1");
        assert_eq!(devices[0].host, "host-1");
    }

    #[tokio::test]
    async fn list_all_groups_by_token() {
        let registry = registry(3);
        registry.check_and_add("tok-a", "ua-1", "host-1").await.unwrap();
        registry.check_and_add("tok-b", "ua-2", "host-2").await.unwrap();
        let all = registry.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("tok-a"));
        assert!(all.contains_key("tok-b"));
    }
}
