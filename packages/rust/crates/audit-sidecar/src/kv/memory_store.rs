//! In-process [`super::KvStore`] fake, backed by a manually advanceable
//! clock so tests can exercise TTL expiry and window rollover without
//! sleeping.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::KvStore;

/// A clock whose "now" is a millisecond counter the test harness advances
/// explicitly, rather than wall-clock time.
#[derive(Clone, Default)]
pub struct FakeClock(Arc<AtomicU64>);

impl FakeClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.0.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

struct Entry<T> {
    value: T,
    expires_at_ms: Option<u64>,
}

impl<T> Entry<T> {
    fn fresh(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_none_or(|expires| now_ms < expires)
    }
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, Entry<String>>,
    sets: HashMap<String, Entry<HashSet<String>>>,
    hashes: HashMap<String, Entry<HashMap<String, String>>>,
}

/// In-memory store for unit and integration tests. Not shared across
/// processes; only useful within a single test binary.
pub struct MemoryStore {
    clock: FakeClock,
    inner: StdMutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store driven by its own fresh clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(FakeClock::new())
    }

    /// Create an empty store driven by a clock the caller also holds a
    /// handle to, so it can advance time and observe expiry.
    #[must_use]
    pub fn with_clock(clock: FakeClock) -> Self {
        Self {
            clock,
            inner: StdMutex::new(Inner::default()),
        }
    }

    /// Handle to this store's clock, for advancing time in tests.
    #[must_use]
    pub fn clock(&self) -> FakeClock {
        self.clock.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if let Some(entry) = inner.strings.get(key)
            && !entry.fresh(now)
        {
            inner.strings.remove(key);
        }
        Ok(inner.strings.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now_ms();
        let expires_at_ms = ttl.map(|d| now + d.as_millis() as u64);
        self.lock().strings.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at_ms },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if let Some(entry) = inner.strings.get_mut(key) {
            entry.expires_at_ms = Some(now + ttl.as_millis() as u64);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        let now = self.clock.now_ms();
        let inner = self.lock();
        Ok(inner.strings.get(key).and_then(|entry| {
            entry
                .expires_at_ms
                .map(|expires| ((expires.saturating_sub(now)) / 1000) as i64)
        }))
    }

    async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if let Some(entry) = inner.strings.get(key)
            && !entry.fresh(now)
        {
            inner.strings.remove(key);
        }
        let entry = inner.strings.entry(key.to_string()).or_insert(Entry {
            value: "0".to_string(),
            expires_at_ms: None,
        });
        let current: i64 = entry.value.parse().unwrap_or(0);
        let updated = current + delta;
        entry.value = updated.to_string();
        Ok(updated)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.strings.remove(key);
        inner.sets.remove(key);
        inner.hashes.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if let Some(entry) = inner.sets.get(key)
            && !entry.fresh(now)
        {
            inner.sets.remove(key);
        }
        let entry = inner.sets.entry(key.to_string()).or_insert(Entry {
            value: HashSet::new(),
            expires_at_ms: None,
        });
        entry.value.insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut inner = self.lock();
        if let Some(entry) = inner.sets.get_mut(key) {
            entry.value.remove(member);
        }
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let now = self.clock.now_ms();
        let inner = self.lock();
        Ok(inner
            .sets
            .get(key)
            .filter(|entry| entry.fresh(now))
            .is_some_and(|entry| entry.value.contains(member)))
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        let now = self.clock.now_ms();
        let inner = self.lock();
        Ok(inner
            .sets
            .get(key)
            .filter(|entry| entry.fresh(now))
            .map_or(0, |entry| entry.value.len() as u64))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let now = self.clock.now_ms();
        let inner = self.lock();
        Ok(inner
            .sets
            .get(key)
            .filter(|entry| entry.fresh(now))
            .map(|entry| entry.value.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner.hashes.entry(key.to_string()).or_insert(Entry {
            value: HashMap::new(),
            expires_at_ms: None,
        });
        entry.value.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        let inner = self.lock();
        Ok(inner
            .hashes
            .get(key)
            .map(|entry| entry.value.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = self.clock.now_ms();
        let inner = self.lock();
        let regex = glob_to_regex(pattern);
        Ok(inner
            .strings
            .iter()
            .filter(|(_, entry)| entry.fresh(now))
            .map(|(k, _)| k.clone())
            .chain(
                inner
                    .sets
                    .iter()
                    .filter(|(_, entry)| entry.fresh(now))
                    .map(|(k, _)| k.clone()),
            )
            .chain(inner.hashes.keys().cloned())
            .filter(|k| regex.is_match(k))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect())
    }
}

fn glob_to_regex(pattern: &str) -> regex::Regex {
    let segments: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let body = segments.join(".*");
    let anchored = format!("^{body}$");
    regex::Regex::new(&anchored).unwrap_or_else(|_| regex::Regex::new("$^").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expiry_via_fake_clock() {
        let store = MemoryStore::new();
        let clock = store.clock();
        store.set("a", "1", Some(Duration::from_secs(10))).await.unwrap();
        assert!(store.exists("a").await.unwrap());
        clock.advance(Duration::from_secs(11));
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn incrby_creates_and_accumulates() {
        let store = MemoryStore::new();
        assert_eq!(store.incrby("count", 5).await.unwrap(), 5);
        assert_eq!(store.incrby("count", 3).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn set_membership_operations() {
        let store = MemoryStore::new();
        store.sadd("devices", "d1").await.unwrap();
        store.sadd("devices", "d2").await.unwrap();
        assert!(store.sismember("devices", "d1").await.unwrap());
        assert_eq!(store.scard("devices").await.unwrap(), 2);
        store.srem("devices", "d1").await.unwrap();
        assert!(!store.sismember("devices", "d1").await.unwrap());
        assert_eq!(store.scard("devices").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_many_preserves_order_and_missing_slots() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();
        store.set("c", "3", None).await.unwrap();
        let values = store.get_many(&["a", "b", "c"]).await.unwrap();
        assert_eq!(values, vec![Some("1".to_string()), None, Some("3".to_string())]);
    }

    #[tokio::test]
    async fn keys_glob_matches_prefix() {
        let store = MemoryStore::new();
        store.set("usage:abc:3h", "1", None).await.unwrap();
        store.set("usage:abc:24h", "1", None).await.unwrap();
        store.set("devices:abc", "x", None).await.unwrap();
        let matched = store.keys("usage:abc:*").await.unwrap();
        assert_eq!(matched.len(), 2);
    }
}
