//! Admission and token-accounting sidecar for a Claude-style chat API proxy.
//!
//! Sits in front of the proxy and decides, per request, whether the
//! calling account key may proceed: it caps the number of distinct devices
//! an account may use concurrently, and debits a set of rolling usage
//! windows every time a conversation grows, rejecting requests once the
//! account's short-window budget is exhausted.

mod admission;
mod aggregate;
pub mod config;
mod conversation;
mod devices;
mod error;
mod gateway;
pub mod kv;
mod window;

pub use admission::AdmissionEngine;
pub use aggregate::{AggregateReader, TokenDevices, TokenStat};
pub use config::Settings;
pub use conversation::ConversationCounter;
pub use devices::{DeviceInfo, DeviceRegistry};
pub use error::AppError;
pub use gateway::{router, run_http, AppState};
pub use window::{UsageStats, WindowCounter};
