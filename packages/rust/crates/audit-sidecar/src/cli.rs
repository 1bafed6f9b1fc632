//! Command-line interface.

use clap::Parser;

/// Admission and token-accounting sidecar: sits in front of a Claude-style
/// chat API proxy and gates/accounts every request against per-account
/// device and usage limits.
#[derive(Parser)]
#[command(name = "audit-sidecar")]
#[command(about = "Admission and token-accounting sidecar for a Claude-style chat API proxy")]
pub(crate) struct Cli {
    /// Bind host.
    #[arg(long, default_value = "0.0.0.0")]
    pub(crate) host: String,

    /// Bind port.
    #[arg(long, default_value_t = 8000)]
    pub(crate) port: u16,

    /// Number of server worker threads.
    #[arg(long, default_value_t = 1)]
    pub(crate) workers: usize,
}

impl Cli {
    pub(crate) fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
