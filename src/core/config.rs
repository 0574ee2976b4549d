//! Configuration parsing and validation.
//!
//! Node configuration is loaded from TOML files with CLI overrides. Every
//! value is resolved once at startup and handed to the chain factory; no
//! interceptor reads ambient global state.

use crate::commands::context::LockingMode;
use crate::xsite::policy::ConflictPolicyKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity of this node.
    #[serde(default)]
    pub node: NodeConfig,

    /// Cluster membership and data distribution.
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Cross-site replication.
    #[serde(default)]
    pub xsite: XSiteConfig,

    /// Transactional behavior.
    #[serde(default)]
    pub transactions: TransactionsConfig,

    /// Persistence store.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Retry of commands after topology changes.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Identity of this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Cluster address of this node.
    #[serde(default = "default_address")]
    pub address: String,

    /// Site (datacenter) this node belongs to.
    #[serde(default = "default_site")]
    pub site: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            site: default_site(),
        }
    }
}

/// Cluster membership and data distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Mode: "local" or "distributed".
    #[serde(default = "default_cluster_mode")]
    pub mode: String,

    /// Addresses of the cluster members, this node included.
    /// Empty means a single-node cluster.
    #[serde(default)]
    pub members: Vec<String>,

    /// Owners per segment, primary included.
    #[serde(default = "default_num_owners")]
    pub num_owners: usize,

    /// Number of hash segments.
    #[serde(default = "default_segments")]
    pub segments: u32,

    /// Routing hash seed; must match on every member.
    #[serde(default)]
    pub hash_seed: u64,
}

impl ClusteringConfig {
    /// Check if data is distributed over several owners.
    pub fn is_distributed(&self) -> bool {
        self.mode == "distributed"
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            mode: default_cluster_mode(),
            members: Vec::new(),
            num_owners: default_num_owners(),
            segments: default_segments(),
            hash_seed: 0,
        }
    }
}

/// Cross-site replication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XSiteConfig {
    /// Enable asynchronous cross-site replication.
    #[serde(default)]
    pub enabled: bool,

    /// Resolution of conflicting updates: "site-name", "prefer-local" or
    /// "prefer-remote".
    #[serde(default)]
    pub conflict_policy: ConflictPolicyKind,
}

/// Transactional behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Locking mode: "optimistic" or "pessimistic".
    #[serde(default)]
    pub locking: LockingMode,
}

/// Persistence store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Load every stored entry into memory at startup.
    #[serde(default)]
    pub preload: bool,
}

/// Retry of commands after topology changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries of one command; unset retries until the topology
    /// settles.
    #[serde(default)]
    pub max_topology_retries: Option<u32>,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_address() -> String {
    "node-1".to_string()
}

fn default_site() -> String {
    "site-1".to_string()
}

fn default_cluster_mode() -> String {
    "local".to_string()
}

fn default_num_owners() -> usize {
    2
}

fn default_segments() -> u32 {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref address) = overrides.address {
            self.node.address = address.clone();
        }
        if let Some(ref site) = overrides.site {
            self.node.site = site.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_node()?;
        self.validate_clustering()?;
        self.validate_transactions()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_node(&self) -> Result<()> {
        if self.node.address.trim().is_empty() {
            anyhow::bail!("node.address must not be empty");
        }
        if self.xsite.enabled && self.node.site.trim().is_empty() {
            anyhow::bail!("node.site required when xsite is enabled");
        }
        Ok(())
    }

    fn validate_clustering(&self) -> Result<()> {
        let clustering = &self.clustering;
        if clustering.mode != "local" && clustering.mode != "distributed" {
            anyhow::bail!(
                "clustering.mode must be 'local' or 'distributed', got: {}",
                clustering.mode
            );
        }

        if clustering.num_owners == 0 {
            anyhow::bail!("clustering.num_owners must be > 0");
        }

        if clustering.segments == 0 {
            anyhow::bail!("clustering.segments must be > 0");
        }

        if !clustering.members.is_empty() && !clustering.members.contains(&self.node.address) {
            anyhow::bail!(
                "clustering.members must include this node's address ({})",
                self.node.address
            );
        }

        if !clustering.is_distributed() && clustering.members.len() > 1 {
            anyhow::bail!("clustering.members lists several nodes but clustering.mode is 'local'");
        }

        Ok(())
    }

    fn validate_transactions(&self) -> Result<()> {
        if !self.transactions.enabled && self.transactions.locking == LockingMode::Pessimistic {
            anyhow::bail!("transactions.locking is set but transactions are disabled");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override node address.
    pub address: Option<String>,
    /// Override site name.
    pub site: Option<String>,
}
