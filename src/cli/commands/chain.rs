//! Chain command implementation.

use super::config::load_config;
use crate::cli::init_tracing;
use crate::core::config::ConfigOverrides;
use crate::core::node::CacheNode;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::Path;
use tokio::runtime::Handle;

/// Interceptor chain operations.
#[derive(Args, Debug)]
pub struct ChainArgs {
    #[command(subcommand)]
    pub command: ChainCommand,
}

/// Chain subcommands.
#[derive(Subcommand, Debug)]
pub enum ChainCommand {
    /// Print the interceptors a node builds for the configuration, top to
    /// bottom.
    Show {
        /// Output format (text, json).
        #[arg(long, default_value = "text")]
        format: String,
    },
}

/// Run the chain command.
pub async fn run_chain(args: ChainArgs, path: &Path, overrides: &ConfigOverrides) -> Result<()> {
    match args.command {
        ChainCommand::Show { format } => show_chain(path, overrides, &format).await,
    }
}

async fn show_chain(path: &Path, overrides: &ConfigOverrides, format: &str) -> Result<()> {
    let config = load_config(path, overrides)?;
    init_tracing(&config.telemetry.log_level);

    let node = CacheNode::builder(config, Handle::current()).build().await?;
    let names = node.chain().interceptor_names();
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(names)?),
        "text" => {
            for (position, name) in names.iter().enumerate() {
                println!("{:>2}. {}", position + 1, name);
            }
        }
        other => anyhow::bail!("unknown format '{other}', expected text or json"),
    }
    Ok(())
}
