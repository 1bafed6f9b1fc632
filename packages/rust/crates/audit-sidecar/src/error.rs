//! Error types for the admission sidecar's HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors returned by the admission engine, mapped to the exact status codes
/// and bilingual (English / Simplified Chinese) messages callers depend on.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or missing request fields. Maps to `400 Bad Request`.
    #[error("{0}")]
    InvalidInput(String),

    /// The account key has exhausted its quota for the current (tightest)
    /// accounting window. Maps to `429 Too Many Requests`.
    #[error("quota exceeded: {limit} tokens / 3h, retry in {wait_seconds}s")]
    QuotaExceeded { limit: u64, wait_seconds: i64 },

    /// The account key has already registered the maximum number of
    /// devices and this device is not among them. Maps to
    /// `403 Forbidden`.
    #[error("device cap reached: {max_devices}")]
    DeviceCapReached { max_devices: u32 },

    /// Device verification could not complete because the backing store
    /// failed. Maps to `500 Internal Server Error`.
    #[error("device verification failed: {0}")]
    DeviceVerificationFailed(anyhow::Error),

    /// The backing store could not be reached or returned an unexpected
    /// result while accounting usage. Maps to `500 Internal Server Error`.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorMessage,
}

#[derive(Serialize)]
struct ErrorMessage {
    message: String,
}

impl AppError {
    fn bilingual(en: String, zh: String) -> String {
        format!("{en}\n{zh}")
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::DeviceCapReached { .. } => StatusCode::FORBIDDEN,
            AppError::DeviceVerificationFailed(_) | AppError::StoreUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::QuotaExceeded { limit, wait_seconds } => Self::bilingual(
                format!(
                    "Usage limit exceeded. Current limit is {limit} tokens per 3 hours. \
                     Please wait {wait_seconds} seconds."
                ),
                format!(
                    "您已触发使用频率限制，当前限制为{limit}tokens/3小时，请等待{wait_seconds}秒后重试。"
                ),
            ),
            AppError::DeviceCapReached { max_devices } => Self::bilingual(
                format!(
                    "Maximum number of devices ({max_devices}) reached. \
                     Please logout from another device first."
                ),
                format!("已达到最大设备数 ({max_devices})。请先从另一台设备注销。"),
            ),
            AppError::DeviceVerificationFailed(_) => {
                Self::bilingual("Failed to verify device".to_string(), "无法验证设备".to_string())
            }
            AppError::StoreUnavailable(_) => Self::bilingual(
                "Internal server error, please try again later".to_string(),
                "服务器内部错误，请稍后再试".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::DeviceVerificationFailed(err) | AppError::StoreUnavailable(err) => {
                tracing::error!(error = %err, "admission engine store failure");
            }
            _ => {}
        }
        let status = self.status();
        let body = ErrorEnvelope { error: ErrorMessage { message: self.message() } };
        (status, axum::Json(body)).into_response()
    }
}
