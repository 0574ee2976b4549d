//! xsite-cache - developer CLI entrypoint.
//!
//! Usage:
//!   xsite-cache config validate --config config/xsite-cache.toml
//!   xsite-cache config show --config config/xsite-cache.toml [--format json]
//!   xsite-cache chain show --config config/xsite-cache.toml

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use xsite_cache::cli::commands::{run_chain, run_config};
use xsite_cache::cli::{Cli, Commands};
use xsite_cache::core::config::ConfigOverrides;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/xsite-cache.toml"));
    let overrides = ConfigOverrides {
        log_level: cli.log_level,
        ..ConfigOverrides::default()
    };

    match cli.command {
        Commands::Config(args) => run_config(args, &config_path, &overrides),
        Commands::Chain(args) => run_chain(args, &config_path, &overrides).await,
    }
}
