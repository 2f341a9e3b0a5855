//! keyrot CLI
//!
//! This is the main entry point for the CLI application.

use anyhow::Result;
use clap::Parser;
use keyrot::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if cli.dev_mode {
        subscriber.pretty().init();
    } else {
        subscriber.init();
    }

    cli::execute(cli).await
}
