// ABOUTME: Binary entry point: tracing setup and command dispatch
// ABOUTME: RUST_LOG controls verbosity, defaulting to info

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use postgres_env_cloner::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    run(Cli::parse()).await
}
