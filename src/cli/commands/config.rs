//! Config command implementation.

use crate::core::config::{Config, ConfigOverrides};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::Path;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file.
    Validate,
    /// Print the configuration with defaults filled in.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs, path: &Path, overrides: &ConfigOverrides) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => validate_config(path, overrides),
        ConfigCommand::Show { format } => show_config(path, overrides, &format),
    }
}

/// Load `path`, apply `overrides` and validate the result.
pub(crate) fn load_config(path: &Path, overrides: &ConfigOverrides) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    let mut config = Config::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

fn validate_config(path: &Path, overrides: &ConfigOverrides) -> Result<()> {
    let config = load_config(path, overrides)?;
    println!("✓ {} is valid", path.display());
    println!(
        "  node {} in site {}, {} mode",
        config.node.address, config.node.site, config.clustering.mode
    );
    if !config.xsite.enabled {
        println!("  ⚠ cross-site replication is disabled");
    }
    if config.persistence.preload && !config.persistence.enabled {
        println!("  ⚠ persistence.preload has no effect while persistence is disabled");
    }
    Ok(())
}

fn show_config(path: &Path, overrides: &ConfigOverrides, format: &str) -> Result<()> {
    let config = load_config(path, overrides)?;
    let rendered = render(&config, format)?;
    println!("{rendered}");
    Ok(())
}

/// Render `config` as TOML or JSON.
pub(crate) fn render(config: &Config, format: &str) -> Result<String> {
    match format {
        "json" => Ok(serde_json::to_string_pretty(config)?),
        "toml" => Ok(toml::to_string_pretty(config)?),
        other => anyhow::bail!("unknown format '{other}', expected toml or json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_toml_parses_back() {
        let config = Config::default();
        let rendered = render(&config, "toml").unwrap();
        let parsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(parsed.node.address, config.node.address);
        assert_eq!(parsed.clustering.segments, config.clustering.segments);
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(render(&Config::default(), "yaml").is_err());
    }
}
