//! CLI command implementations.

mod chain;
mod config;

pub use chain::{run_chain, ChainArgs};
pub use config::{run_config, ConfigArgs};
