//! Entry point for the Payroll Engine binary.
//!
//! Running this binary starts the HTTP server.  Settings come from
//! flags or `PAYROLL_*` environment variables (see `config::Config`);
//! log verbosity follows `RUST_LOG` and defaults to `info`.

use clap::Parser;
use payroll_engine::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::parse();
    payroll_engine::api::serve(config).await
}
