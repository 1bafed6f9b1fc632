//! audit-sidecar CLI entrypoint.
//!
//! Logging: set `RUST_LOG=audit_sidecar=info` (or `warn`, `debug`) to see
//! request logs on stderr.

mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use audit_sidecar::kv::RedisStore;
use audit_sidecar::{run_http, AppState, Settings};

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("audit_sidecar=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.workers.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_env();
    let store = Arc::new(RedisStore::new(&settings.redis_url())?);
    let state = AppState::new(store, settings);

    run_http(state, &cli.bind_addr()).await
}
