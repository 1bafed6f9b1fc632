//! HTTP surface: the admission/accounting endpoints plus docs routes.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::middleware;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::admission::{bearer_key, AdmissionEngine};
use crate::aggregate::AggregateReader;
use crate::config::Settings;
use crate::error::AppError;

use super::docs_auth::require_docs_auth;

/// Shared application state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionEngine>,
    pub aggregate: Arc<AggregateReader>,
    pub settings: Arc<Settings>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn crate::kv::KvStore>, settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let admission = Arc::new(AdmissionEngine::new(
            Arc::clone(&store),
            settings.max_devices,
            settings.device_ttl,
            settings.rate_limit,
        ));
        let aggregate = Arc::new(AggregateReader::new(
            store,
            settings.max_devices,
            settings.device_ttl,
        ));
        Self { admission, aggregate, settings }
    }
}

#[derive(Serialize)]
struct Envelope<T> {
    code: i32,
    msg: &'static str,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { code: 0, msg: "success", data })
}

async fn handle_root() -> &'static str {
    "Hi this is from the audit sidecar"
}

async fn handle_audit_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    state.admission.audit_limit(&headers, &body).await?;
    Ok(axum::http::StatusCode::OK)
}

async fn handle_response_notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    state.admission.response_notify(&headers, &body).await?;
    Ok(axum::http::StatusCode::OK)
}

/// Present in the original service but explicitly inert there too: it
/// receives extracted-content notifications for a non-Claude document
/// pipeline this sidecar never accounts against.
async fn handle_document_notify() -> impl IntoResponse {
    axum::http::StatusCode::OK
}

async fn handle_token_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let stats = state.aggregate.token_stats().await?;
    Ok(ok(stats))
}

async fn handle_devices(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_key(&headers);
    let devices = state.aggregate.devices(&token).await?;
    let total = devices.len();
    Ok(ok(json!({ "devices": devices, "total": total })))
}

async fn handle_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_key(&headers);
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::InvalidInput("Host and User-Agent are required".into()))?;
    state.aggregate.logout(&token, user_agent).await?;
    Ok(ok(Value::Null))
}

async fn handle_all_token_devices(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let all = state.aggregate.all_token_devices().await?;
    Ok(ok(all))
}

async fn handle_all_token_usage(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let all = state.aggregate.all_token_usage().await?;
    Ok(Json(all))
}

async fn handle_swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>docs</title>
<link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/swagger-ui-dist/swagger-ui.css">
</head>
<body>
<div id="swagger-ui"></div>
<script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist/swagger-ui-bundle.js"></script>
<script>
  window.onload = () => SwaggerUIBundle({ url: "/openapi.json", dom_id: "#swagger-ui" });
</script>
</body>
</html>"#,
    )
}

async fn handle_redoc() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>docs</title></head>
<body>
<redoc spec-url="/openapi.json"></redoc>
<script src="https://cdn.jsdelivr.net/npm/redoc/bundles/redoc.standalone.js"></script>
</body>
</html>"#,
    )
}

async fn handle_openapi_json() -> Json<Value> {
    Json(json!({
        "openapi": "3.0.0",
        "info": { "title": "audit-sidecar", "version": env!("CARGO_PKG_VERSION") },
        "paths": {
            "/audit_limit": {"post": {"summary": "Admit a chat request and debit its usage windows"}},
            "/response_notify": {"post": {"summary": "Account for tokens in a proxied response"}},
            "/token_stats": {"get": {"summary": "Usage totals across all known account keys"}},
            "/devices": {"get": {"summary": "Devices registered to the caller's account key"}},
            "/logout": {"get": {"summary": "Remove the caller's device registration"}},
            "/all_token_devices": {"get": {"summary": "Devices across every account key"}},
            "/all_token_usage": {"get": {"summary": "Conversation usage across every account key"}}
        }
    }))
}

/// Build the full router: admission/accounting routes plus docs routes
/// behind HTTP Basic Auth, with a permissive CORS layer matching the
/// upstream service's wide-open `allow_origins=["*"]` policy.
pub fn router(state: AppState) -> Router {
    let docs = Router::new()
        .route("/docs", get(handle_swagger_ui))
        .route("/redoc", get(handle_redoc))
        .route("/openapi.json", get(handle_openapi_json))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_docs_auth));

    Router::new()
        .route("/", get(handle_root))
        .route("/audit_limit", get(handle_audit_limit).post(handle_audit_limit))
        .route("/response_notify", post(handle_response_notify))
        .route("/document_notify", post(handle_document_notify))
        .route("/token_stats", get(handle_token_stats))
        .route("/devices", get(handle_devices))
        .route("/logout", get(handle_logout))
        .route("/all_token_devices", get(handle_all_token_devices))
        .route("/all_token_usage", get(handle_all_token_usage))
        .merge(docs)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server; binds to `bind_addr` (e.g. `0.0.0.0:8000`).
/// Graceful shutdown on Ctrl+C (SIGINT) and SIGTERM (Unix); in-flight
/// requests complete before exit.
pub async fn run_http(state: AppState, bind_addr: &str) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(bind_addr, "audit sidecar listening (Ctrl+C/SIGTERM to stop)");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    tracing::info!("audit sidecar stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
    }
}

