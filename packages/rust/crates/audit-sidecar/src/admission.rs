//! The admission engine: `/audit_limit` and `/response_notify` semantics.

use std::sync::{Arc, OnceLock};

use axum::http::HeaderMap;
use regex::Regex;
use serde_json::Value;

use crate::conversation::ConversationCounter;
use crate::devices::DeviceRegistry;
use crate::error::AppError;
use crate::kv::KvStore;
use crate::window::WindowCounter;

/// Extracts the account key, device identity, and conversation id from a
/// request's headers, then runs the device-cap and token-quota checks that
/// gate access to the proxied chat API.
pub struct AdmissionEngine {
    devices: DeviceRegistry,
    window: WindowCounter,
    conversation: ConversationCounter,
    rate_limit: u64,
    max_devices: u32,
}

impl AdmissionEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        max_devices: u32,
        device_ttl: std::time::Duration,
        rate_limit: u64,
    ) -> Self {
        Self {
            devices: DeviceRegistry::new(Arc::clone(&store), max_devices, device_ttl),
            window: WindowCounter::new(Arc::clone(&store)),
            conversation: ConversationCounter::new(store),
            rate_limit,
            max_devices,
        }
    }

    /// Gate a single chat-completion request.
    ///
    /// 1. Extract the account key, host, and user-agent from headers;
    ///    `400` if host or user-agent is missing.
    /// 2. Register/verify the requesting device; `403` if the account's
    ///    device cap is already saturated, `500` if the store failed.
    /// 3. Parse the JSON body; `400` if it is malformed. This happens only
    ///    after the device gate, so a saturated device cap always wins over
    ///    a malformed body, matching the documented step order.
    /// 4. If the requested model is not a Claude model, allow the request
    ///    without touching any counters.
    /// 5. Otherwise check the account's 3-hour window against the
    ///    configured rate limit; `429` if it is already exhausted.
    /// 6. Extract the prompt and attachment text, count its tokens, fold it
    ///    into the conversation accumulator, and debit the rolling windows
    ///    by the conversation's new *accumulated* total (not the
    ///    per-request delta).
    pub async fn audit_limit(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
        let api_key = bearer_key(headers);
        let host = host_header(headers)
            .ok_or_else(|| AppError::InvalidInput("Host and User-Agent are required".into()))?;
        let user_agent = user_agent_header(headers)
            .ok_or_else(|| AppError::InvalidInput("Host and User-Agent are required".into()))?;

        let allowed = self
            .devices
            .check_and_add(&api_key, &user_agent, &host)
            .await
            .map_err(AppError::DeviceVerificationFailed)?;
        if !allowed {
            return Err(AppError::DeviceCapReached { max_devices: self.max_devices });
        }

        let body = parse_strict_json(body)?;

        let model = body.get("model").and_then(Value::as_str).unwrap_or_default();
        if !model.to_lowercase().contains("claude") {
            return Ok(());
        }

        let stats = self.window.get(&api_key).await?;
        let remaining = self.rate_limit as i64 - stats.last_3_hours;
        if remaining <= 0 {
            let wait_seconds = self.window.ttl_3h(&api_key).await?.unwrap_or(0).max(0);
            return Err(AppError::QuotaExceeded { limit: self.rate_limit, wait_seconds });
        }

        let token_usage = prompt_token_count(&body);
        let conversation_id = conversation_id(headers);
        let accumulated =
            self.conversation.increment(&api_key, &conversation_id, token_usage as i64).await?;
        self.window.increment(&api_key, accumulated).await?;

        Ok(())
    }

    /// Account for tokens in a proxied response body.
    ///
    /// Best-effort: the response payload is not a documented schema here,
    /// just a `Data` string containing JSON-escaped `"text":"..."`
    /// fragments the upstream chat API streams back. All matches are
    /// concatenated and counted the same way a prompt would be, then folded
    /// into the same per-conversation accumulator as `audit_limit`. Unlike
    /// `audit_limit`, a malformed body is never a `400` here — per spec this
    /// endpoint only ever answers `200` or `500`, so parse failures are
    /// swallowed silently and contribute zero tokens.
    pub async fn response_notify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
        let api_key = bearer_key(headers);
        let body = parse_lenient_json(body);
        let data = body.get("Data").and_then(Value::as_str).unwrap_or_default();
        let extracted = extract_text_fragments(data);
        let token_usage = audit_tokenizer::count_tokens(&extracted);

        let conversation_id = conversation_id(headers);
        let accumulated =
            self.conversation.increment(&api_key, &conversation_id, token_usage as i64).await?;
        self.window.increment(&api_key, accumulated).await?;

        Ok(())
    }
}

/// Parse a request body as JSON, `400`-ing on malformed input. Used by
/// `audit_limit`, whose contract names `400` for this case.
fn parse_strict_json(body: &[u8]) -> Result<Value, AppError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|_| AppError::InvalidInput("Invalid JSON data".into()))
}

/// Parse a request body as JSON, treating malformed input as an empty
/// object rather than an error. Used by `response_notify`, whose contract
/// never surfaces `400` — a scrape that finds nothing just counts zero
/// tokens.
fn parse_lenient_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

/// Strip a single `Bearer `/`bearer ` prefix (and any whitespace
/// immediately following it) from the `Authorization` header. Only the
/// prefix is normalized away — trailing whitespace on the remainder is
/// significant, since keys are opaque and equal iff byte-equal.
pub(crate) fn bearer_key(headers: &HeaderMap) -> String {
    let raw = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map_or(raw, str::trim_start)
        .to_string()
}

fn host_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn user_agent_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn conversation_id(headers: &HeaderMap) -> String {
    headers
        .get("referer")
        .and_then(|v| v.to_str().ok())
        .and_then(|referer| referer.rsplit('/').next())
        .unwrap_or_default()
        .to_string()
}

fn prompt_token_count(body: &Value) -> usize {
    let prompt = body
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.first())
        .and_then(|first| first.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut total = audit_tokenizer::count_tokens(prompt);

    if let Some(attachments) =
        body.get("raw_message").and_then(|m| m.get("attachments")).and_then(Value::as_array)
    {
        let attachments_text: String = attachments
            .iter()
            .filter_map(|a| a.get("extracted_content").and_then(Value::as_str))
            .collect();
        total += audit_tokenizer::count_tokens(&attachments_text);
    }

    total
}

fn text_fragment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""text":"(.*?)""#).expect("static pattern is valid"))
}

fn extract_text_fragments(data: &str) -> String {
    text_fragment_regex()
        .captures_iter(data)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use axum::http::HeaderValue;
    use serde_json::json;
    use std::time::Duration;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        headers
    }

    fn engine(rate_limit: u64) -> AdmissionEngine {
        AdmissionEngine::new(Arc::new(MemoryStore::new()), 3, Duration::from_secs(60), rate_limit)
    }

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_host_and_user_agent() {
        let engine = engine(1000);
        let err = engine.audit_limit(&HeaderMap::new(), &body(json!({}))).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn non_claude_model_bypasses_accounting() {
        let engine = engine(1);
        let h = headers(&[("host", "h"), ("user-agent", "ua")]);
        let b = body(json!({"model": "gpt-4", "messages": [{"content": {"parts": ["hi"]}}]}));
        assert!(engine.audit_limit(&h, &b).await.is_ok());
    }

    #[tokio::test]
    async fn device_cap_rejects_extra_device() {
        let engine = engine(100000);
        let h1 = headers(&[("host", "h"), ("user-agent", "ua-1")]);
        engine.audit_limit(&h1, &body(json!({"model": "other"}))).await.unwrap();
        let limited = AdmissionEngine::new(
            Arc::new(MemoryStore::new()),
            1,
            Duration::from_secs(60),
            100000,
        );
        let a = headers(&[("host", "h"), ("user-agent", "ua-1")]);
        let b = headers(&[("host", "h"), ("user-agent", "ua-2")]);
        limited.audit_limit(&a, &body(json!({"model": "other"}))).await.unwrap();
        let err = limited.audit_limit(&b, &body(json!({"model": "other"}))).await.unwrap_err();
        assert!(matches!(err, AppError::DeviceCapReached { max_devices: 1 }));
    }

    #[tokio::test]
    async fn quota_exceeded_once_window_full() {
        let engine = engine(5);
        let h = headers(&[("host", "h"), ("user-agent", "ua"), ("referer", "https://x/conv-1")]);
        let b = body(json!({"model": "claude-3", "messages": [{"content": {"parts": ["word word word word word word"]}}]}));
        engine.audit_limit(&h, &b).await.unwrap();
        let err = engine.audit_limit(&h, &b).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let engine = engine(1000);
        let h = headers(&[("host", "h"), ("user-agent", "ua")]);
        let err = engine.audit_limit(&h, b"not json").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn device_cap_takes_precedence_over_malformed_body() {
        let engine = engine(1000);
        for ua in ["ua-1", "ua-2", "ua-3"] {
            let h = headers(&[("host", "h"), ("user-agent", ua)]);
            engine.audit_limit(&h, &body(json!({"model": "other"}))).await.unwrap();
        }
        let h4 = headers(&[("host", "h"), ("user-agent", "ua-4")]);
        let err = engine.audit_limit(&h4, b"not json").await.unwrap_err();
        assert!(matches!(err, AppError::DeviceCapReached { max_devices: 3 }));
    }

    #[tokio::test]
    async fn conversation_id_from_referer_last_segment() {
        let h = headers(&[("referer", "https://example.com/chat/abc-123")]);
        assert_eq!(conversation_id(&h), "abc-123");
    }

    #[tokio::test]
    async fn bearer_prefix_is_stripped() {
        let h = headers(&[("authorization", "Bearer sk-abc")]);
        assert_eq!(bearer_key(&h), "sk-abc");
    }

    #[tokio::test]
    async fn bare_key_without_bearer_prefix_is_kept() {
        let h = headers(&[("authorization", "sk-abc")]);
        assert_eq!(bearer_key(&h), "sk-abc");
    }

    #[tokio::test]
    async fn double_space_after_bearer_normalizes_like_bare_key() {
        let h = headers(&[("authorization", "Bearer  tok")]);
        assert_eq!(bearer_key(&h), "tok");
    }

    #[tokio::test]
    async fn trailing_whitespace_is_a_distinct_key() {
        let h = headers(&[("authorization", "sk-abc ")]);
        assert_eq!(bearer_key(&h), "sk-abc ");
        assert_ne!(bearer_key(&h), "sk-abc");
    }

    #[test]
    fn extracts_and_joins_text_fragments() {
        let data = r#"{"text":"Hello "}{"text":"world"}"#;
        assert_eq!(extract_text_fragments(data), "Hello world");
    }

    #[tokio::test]
    async fn response_notify_accumulates_into_window() {
        let engine = engine(100000);
        let h = headers(&[("authorization", "Bearer key"), ("referer", "https://x/conv-1")]);
        let b = body(json!({"Data": r#"{"text":"hello world"}"#}));
        engine.response_notify(&h, &b).await.unwrap();
        let stats = engine.window.get("key").await.unwrap();
        assert!(stats.total > 0);
    }

    #[tokio::test]
    async fn response_notify_malformed_body_is_ok_with_zero_tokens() {
        let engine = engine(100000);
        let h = headers(&[("authorization", "Bearer key"), ("referer", "https://x/conv-2")]);
        engine.response_notify(&h, b"not json").await.unwrap();
        let stats = engine.window.get("key").await.unwrap();
        assert_eq!(stats.total, 0);
    }
}
