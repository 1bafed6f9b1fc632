//! Runtime settings for the admission sidecar.
//!
//! Everything here is either a compiled-in constant matching the values the
//! upstream service shipped with, or an environment-variable override read
//! once at startup. There is no YAML/file-based layer: this process has a
//! handful of knobs, not a settings tree.

use std::time::Duration;

/// One of the accounting windows a usage counter tracks in parallel.
///
/// `Total` never expires; the others are rolling TTL buckets that
/// approximate a sliding window by resetting on first touch after expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    ThreeHours,
    TwelveHours,
    Day,
    Week,
    Total,
}

impl Period {
    /// All periods a single accounting key is tracked under, in the order
    /// they are reported back to callers.
    pub const ALL: [Period; 5] = [
        Period::ThreeHours,
        Period::TwelveHours,
        Period::Day,
        Period::Week,
        Period::Total,
    ];

    /// Key suffix used when composing the backing store key for this period.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Period::ThreeHours => "3h",
            Period::TwelveHours => "12h",
            Period::Day => "24h",
            Period::Week => "1w",
            Period::Total => "total",
        }
    }

    /// TTL applied to the bucket on first write in the window, or `None` for
    /// the unbounded total counter.
    #[must_use]
    pub fn ttl(self) -> Option<Duration> {
        match self {
            Period::ThreeHours => Some(Duration::from_secs(3 * 60 * 60)),
            Period::TwelveHours => Some(Duration::from_secs(12 * 60 * 60)),
            Period::Day => Some(Duration::from_secs(24 * 60 * 60)),
            Period::Week => Some(Duration::from_secs(7 * 24 * 60 * 60)),
            Period::Total => None,
        }
    }
}

/// Process-wide configuration, assembled once at startup from compiled-in
/// defaults plus environment overrides.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum number of distinct devices (user-agent fingerprints) a single
    /// account key may register before being rejected with a device-cap
    /// error.
    pub max_devices: u32,
    /// Maximum tokens (prompt + response, folded into the conversation
    /// accumulator) an account key may consume within the tightest window
    /// before `/audit_limit` starts returning quota-exceeded.
    pub rate_limit: u64,
    /// TTL applied to a registered device fingerprint; re-touched on every
    /// successful admission so active devices never expire mid-use.
    pub device_ttl: Duration,
    /// Encoding name used by the token counter when a request does not pin
    /// one explicitly.
    pub default_tokenizer: String,
    /// Redis connection host.
    pub redis_host: String,
    /// Redis connection port.
    pub redis_port: u16,
    /// HTTP Basic Auth username guarding `/docs`, `/redoc`, `/openapi.json`.
    pub docs_username: String,
    /// HTTP Basic Auth password guarding `/docs`, `/redoc`, `/openapi.json`.
    pub docs_password: String,
}

impl Settings {
    /// Build settings from compiled-in defaults overridden by environment
    /// variables. Never fails: an unparsable override is logged and the
    /// default is kept, matching the upstream service's forgiving startup.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_devices: env_u32("AUDIT_MAX_DEVICES", 3),
            rate_limit: env_u64("AUDIT_RATE_LIMIT", 1_000_000),
            device_ttl: Duration::from_secs(2 * 24 * 60 * 60),
            default_tokenizer: std::env::var("AUDIT_DEFAULT_TOKENIZER")
                .unwrap_or_else(|_| audit_tokenizer::DEFAULT_ENCODING.to_string()),
            redis_host: std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
            redis_port: env_u16("REDIS_PORT", 6379),
            docs_username: std::env::var("DOCS_USERNAME")
                .unwrap_or_else(|_| "claude-backend".to_string()),
            docs_password: std::env::var("DOCS_PASSWORD")
                .unwrap_or_else(|_| "20Wd!!!!".to_string()),
        }
    }

    /// `redis://host:port/` connection string built from the configured host
    /// and port.
    #[must_use]
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    parse_env(key, default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    parse_env(key, default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    parse_env(key, default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "failed to parse env override; using default");
            default
        }),
        Err(_) => default,
    }
}
