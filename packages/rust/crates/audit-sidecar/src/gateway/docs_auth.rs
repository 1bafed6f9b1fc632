//! HTTP Basic Auth guard for the API documentation routes.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::AppState;

const BASIC_AUTH_HEADER: &str = "authorization";

/// Reject the request unless it carries `Authorization: Basic <...>`
/// credentials matching the configured docs username/password.
pub async fn require_docs_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if validate_basic_auth(&headers, &state.settings.docs_username, &state.settings.docs_password) {
        Ok(next.run(request).await)
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid docs credentials"))
    }
}

fn validate_basic_auth(headers: &HeaderMap, username: &str, password: &str) -> bool {
    let Some(header) = headers.get(BASIC_AUTH_HEADER).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, pass)) = decoded.split_once(':') else {
        return false;
    };
    user == username && pass == password
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_header(user: &str, pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = BASE64.encode(format!("{user}:{pass}"));
        headers.insert(
            "authorization",
            format!("Basic {encoded}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_matching_credentials() {
        let headers = basic_header("claude-backend", "secret");
        assert!(validate_basic_auth(&headers, "claude-backend", "secret"));
    }

    #[test]
    fn rejects_wrong_password() {
        let headers = basic_header("claude-backend", "wrong");
        assert!(!validate_basic_auth(&headers, "claude-backend", "secret"));
    }

    #[test]
    fn rejects_missing_header() {
        assert!(!validate_basic_auth(&HeaderMap::new(), "claude-backend", "secret"));
    }
}
