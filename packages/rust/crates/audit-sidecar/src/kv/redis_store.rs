//! Redis-backed [`super::KvStore`] implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::FromRedisValue;
use tokio::sync::Mutex;

use super::KvStore;

/// Talks to a single Redis instance, reconnecting transparently if the
/// connection drops. A command that fails drops the cached connection so
/// the next call reconnects; the failed command itself is surfaced as an
/// error rather than retried in place.
pub struct RedisStore {
    client: redis::Client,
    connection: Arc<Mutex<Option<redis::aio::MultiplexedConnection>>>,
}

impl RedisStore {
    /// Open a store against `redis_url` (e.g. `redis://localhost:6379/`).
    /// Does not connect eagerly; the first command establishes the
    /// connection lazily.
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("invalid redis url: {redis_url}"))?;
        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(None)),
        })
    }

    async fn ensure_connection(
        &self,
        connection: &mut Option<redis::aio::MultiplexedConnection>,
    ) -> Result<()> {
        if connection.is_some() {
            return Ok(());
        }
        *connection = Some(
            self.client
                .get_multiplexed_async_connection()
                .await
                .context("failed to open redis connection")?,
        );
        tracing::debug!("redis store connected");
        Ok(())
    }

    async fn run_command<T, F>(&self, operation: &'static str, build: F) -> Result<T>
    where
        T: FromRedisValue + Send,
        F: FnOnce() -> redis::Cmd,
    {
        let mut conn_guard = self.connection.lock().await;
        self.ensure_connection(&mut conn_guard).await?;
        let conn = conn_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("redis connection unavailable"))?;
        match build().query_async::<T>(conn).await {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(operation, error = %err, "redis command failed; will reconnect next call");
                *conn_guard = None;
                Err(anyhow::anyhow!(err).context("redis command failed"))
            }
        }
    }

    /// Run a pipeline of `GET`s built over `keys`, returning one slot per
    /// key in order. A single round trip regardless of `keys.len()`.
    async fn run_get_pipeline(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let mut conn_guard = self.connection.lock().await;
        self.ensure_connection(&mut conn_guard).await?;
        let conn = conn_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("redis connection unavailable"))?;

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("GET").arg(*key);
        }

        match pipe.query_async::<Vec<Option<String>>>(conn).await {
            Ok(values) => Ok(values),
            Err(err) => {
                tracing::warn!(error = %err, "redis pipeline failed; will reconnect next call");
                *conn_guard = None;
                Err(anyhow::anyhow!(err).context("redis pipeline failed"))
            }
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run_command("get", || {
            let mut cmd = redis::cmd("GET");
            cmd.arg(key);
            cmd
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.run_command::<(), _>("set", || {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("EX").arg(ttl.as_secs().max(1));
            }
            cmd
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let count: i64 = self
            .run_command("exists", || {
                let mut cmd = redis::cmd("EXISTS");
                cmd.arg(key);
                cmd
            })
            .await?;
        Ok(count > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.run_command::<(), _>("expire", || {
            let mut cmd = redis::cmd("EXPIRE");
            cmd.arg(key).arg(ttl.as_secs().max(1));
            cmd
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        let seconds: i64 = self
            .run_command("ttl", || {
                let mut cmd = redis::cmd("TTL");
                cmd.arg(key);
                cmd
            })
            .await?;
        Ok(if seconds < 0 { None } else { Some(seconds) })
    }

    async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        self.run_command("incrby", || {
            let mut cmd = redis::cmd("INCRBY");
            cmd.arg(key).arg(delta);
            cmd
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.run_command::<(), _>("del", || {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(key);
            cmd
        })
        .await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.run_command::<(), _>("sadd", || {
            let mut cmd = redis::cmd("SADD");
            cmd.arg(key).arg(member);
            cmd
        })
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.run_command::<(), _>("srem", || {
            let mut cmd = redis::cmd("SREM");
            cmd.arg(key).arg(member);
            cmd
        })
        .await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let is_member: i64 = self
            .run_command("sismember", || {
                let mut cmd = redis::cmd("SISMEMBER");
                cmd.arg(key).arg(member);
                cmd
            })
            .await?;
        Ok(is_member == 1)
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        self.run_command("scard", || {
            let mut cmd = redis::cmd("SCARD");
            cmd.arg(key);
            cmd
        })
        .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.run_command("smembers", || {
            let mut cmd = redis::cmd("SMEMBERS");
            cmd.arg(key);
            cmd
        })
        .await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.run_command::<(), _>("hset", || {
            let mut cmd = redis::cmd("HSET");
            cmd.arg(key).arg(field).arg(value);
            cmd
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        self.run_command("hgetall", || {
            let mut cmd = redis::cmd("HGETALL");
            cmd.arg(key);
            cmd
        })
        .await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.run_command("keys", || {
            let mut cmd = redis::cmd("KEYS");
            cmd.arg(pattern);
            cmd
        })
        .await
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.run_get_pipeline(keys).await
    }
}
