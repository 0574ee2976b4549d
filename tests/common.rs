//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use bytes::Bytes;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::runtime::{Handle, Runtime};
use xsite_cache::commands::context::InvocationContext;
use xsite_cache::commands::{Command, ReturnValue};
use xsite_cache::control::topology::OwnershipOracle;
use xsite_cache::core::config::Config;
use xsite_cache::core::error::CacheError;
use xsite_cache::core::node::CacheNode;
use xsite_cache::interceptors::{Interceptor, Next};
use xsite_cache::invocation::InvocationStage;
use xsite_cache::persistence::PersistenceStore;
use xsite_cache::transport::LocalNetwork;
use xsite_cache::xsite::{IracMetadata, SiteVersion, VersionVector};
use parking_lot::Mutex;

/// Multi-threaded runtime for tests that drive the chain from a plain
/// `#[test]` thread.
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

/// Write `content` to a temporary config file.
pub fn create_config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Configuration of a single local node.
pub fn local_config() -> Config {
    Config::default()
}

/// Configuration of a local node with cross-site replication enabled.
pub fn xsite_config(site: &str) -> Config {
    let mut config = Config::default();
    config.node.site = site.to_string();
    config.xsite.enabled = true;
    config
}

/// Configuration of `address`, one of `members`, in a distributed cache.
pub fn distributed_config(address: &str, members: &[&str], num_owners: usize) -> Config {
    let mut config = Config::default();
    config.node.address = address.to_string();
    config.clustering.mode = "distributed".to_string();
    config.clustering.members = members.iter().map(|m| m.to_string()).collect();
    config.clustering.num_owners = num_owners;
    config.clustering.segments = 16;
    config
}

/// Build a standalone node on `runtime`.
pub async fn start_node(config: Config, runtime: Handle) -> CacheNode {
    CacheNode::builder(config, runtime)
        .build()
        .await
        .expect("Failed to start node")
}

/// Build a standalone node backed by `store`.
pub async fn start_node_with_store(
    config: Config,
    store: Arc<dyn PersistenceStore>,
    runtime: Handle,
) -> CacheNode {
    CacheNode::builder(config, runtime)
        .store(store)
        .build()
        .await
        .expect("Failed to start node")
}

/// Nodes of one site connected by an in-process network.
pub struct Cluster {
    pub network: Arc<LocalNetwork>,
    pub nodes: Vec<CacheNode>,
}

impl Cluster {
    /// Start `members` with `num_owners` owners per segment; `customize`
    /// adjusts each node's configuration.
    pub async fn start(
        members: &[&str],
        num_owners: usize,
        customize: impl Fn(&mut Config),
    ) -> Self {
        let network = LocalNetwork::new();
        let mut nodes = Vec::new();
        for member in members {
            let mut config = distributed_config(member, members, num_owners);
            customize(&mut config);
            let node = CacheNode::builder(config, Handle::current())
                .network(&network)
                .build()
                .await
                .expect("Failed to start node");
            nodes.push(node);
        }
        Self { network, nodes }
    }

    pub fn node(&self, address: &str) -> &CacheNode {
        self.nodes
            .iter()
            .find(|node| node.address() == address)
            .expect("unknown node")
    }

    /// First key `key-N` whose primary owner is `primary`.
    pub fn key_owned_by(&self, primary: &str) -> Bytes {
        key_owned_by(self.node(primary), primary)
    }

    /// First `count` keys `key-N` whose primary owner is `primary`.
    pub fn keys_owned_by(&self, primary: &str, count: usize) -> Vec<Bytes> {
        let node = self.node(primary);
        let keys: Vec<Bytes> = (0..10_000)
            .map(|i| Bytes::from(format!("key-{i}")))
            .filter(|key| node.topology().key_distribution(key).primary.as_deref() == Some(primary))
            .take(count)
            .collect();
        assert_eq!(keys.len(), count, "not enough keys owned by {primary}");
        keys
    }

    /// First key `key-N` whose primary owner is not `node`.
    pub fn key_not_owned_by(&self, address: &str) -> Bytes {
        let node = self.node(address);
        (0..10_000)
            .map(|i| Bytes::from(format!("key-{i}")))
            .find(|key| node.topology().key_distribution(key).primary.as_deref() != Some(address))
            .expect("no key found")
    }
}

/// First key `key-N` whose primary owner, as seen by `node`, is `primary`.
pub fn key_owned_by(node: &CacheNode, primary: &str) -> Bytes {
    (0..10_000)
        .map(|i| Bytes::from(format!("key-{i}")))
        .find(|key| node.topology().key_distribution(key).primary.as_deref() == Some(primary))
        .expect("no key found")
}

/// Metadata produced by `site` with the given per-site versions, all in
/// topology 1.
pub fn metadata(site: &str, versions: &[(&str, u64)]) -> IracMetadata {
    let mut vector = VersionVector::new();
    for (s, v) in versions {
        vector.set(*s, SiteVersion::new(1, *v));
    }
    IracMetadata::new(site, vector)
}

/// Run `cmd` through `node`'s chain in a context received from `origin`.
pub async fn invoke_remote(node: &CacheNode, origin: &str, cmd: Command) -> Result<ReturnValue, CacheError> {
    let ctx = Arc::new(InvocationContext::remote(
        origin,
        xsite_cache::commands::context::Scope::NonTransactional,
    ));
    node.chain().invoke(&ctx, &Arc::new(cmd)).await
}

/// Interceptor that records the order in which commands reach it.
pub struct Recorder {
    pub name: &'static str,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: Arc::clone(log),
        })
    }
}

impl Interceptor for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        self.log
            .lock()
            .push(format!("{}:{}:{}", self.name, cmd.kind().name(), next.depth()));
        next.invoke(ctx, cmd)
    }
}
