//! Key-value store abstraction the admission engine runs on top of.
//!
//! The admission engine never talks to Redis directly; it talks to
//! [`KvStore`], which is implemented once for real Redis
//! ([`redis_store::RedisStore`]) and once as a fake with an advanceable
//! clock for tests ([`memory_store::MemoryStore`]).

mod memory_store;
mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Minimal Redis-shaped key-value contract the admission engine is written
/// against. A missing key is never an error: integer reads return `0`,
/// string reads return `None`, set reads return an empty set.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a string value, or `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string value, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Whether `key` currently exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Apply a TTL to an existing key. No-op if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Remaining TTL in seconds, `None` if the key has no TTL or does not
    /// exist.
    async fn ttl(&self, key: &str) -> Result<Option<i64>>;

    /// Atomically add `delta` to the integer stored at `key`, creating it at
    /// `delta` if absent, and return the new value.
    async fn incrby(&self, key: &str, delta: i64) -> Result<i64>;

    /// Delete `key`. No-op if it does not exist.
    async fn del(&self, key: &str) -> Result<()>;

    /// Add `member` to the set at `key`.
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// Remove `member` from the set at `key`.
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// Whether `member` is in the set at `key`.
    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    /// Number of members in the set at `key`.
    async fn scard(&self, key: &str) -> Result<u64>;

    /// All members of the set at `key`.
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Set a single field in the hash at `key`.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// All field/value pairs of the hash at `key`.
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>>;

    /// All keys matching a glob-style `pattern` (as Redis `KEYS` would
    /// return). Intended for admin/aggregate reads only, never the hot path.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Fetch `keys.len()` string values in a single round trip, in the same
    /// order as `keys`. A missing key comes back as `None` in its slot,
    /// same as [`KvStore::get`].
    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>>;
}
