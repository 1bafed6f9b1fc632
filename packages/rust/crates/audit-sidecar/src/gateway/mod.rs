//! HTTP gateway: the admission/accounting endpoints and the docs surface.

mod docs_auth;
mod http;

pub use http::{router, run_http, AppState};
