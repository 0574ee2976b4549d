//! Node wiring and the public cache API.
//!
//! A [`CacheNode`] owns the collaborators of one cluster member, assembles
//! its interceptor chain from configuration and exposes the cache
//! operations. Component start order:
//!
//! topology → version generator → container → store (preload) → chain →
//! network registration

use crate::commands::context::{InvocationContext, Scope};
use crate::commands::{Command, CommandKind, ReturnValue};
use crate::container::DataContainer;
use crate::control::routing::SegmentMapper;
use crate::control::topology::{OwnershipOracle, TopologyManager};
use crate::core::config::Config;
use crate::core::error::{CacheError, CacheResult};
use crate::interceptors::{ChainFactory, Components, InterceptorChain};
use crate::invocation::{InvocationStage, Outcome};
use crate::notifications::RecordingNotifier;
use crate::persistence::{MemoryStore, PersistenceStore};
use crate::transport::{LocalNetwork, NoTransport, Transport};
use crate::xsite::{
    IracMetadata, IracUpdateQueue, SegmentVersionGenerator, VersionGenerator, VersionVector,
};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Builder for a [`CacheNode`].
pub struct NodeBuilder {
    config: Config,
    runtime: Handle,
    store: Option<Arc<dyn PersistenceStore>>,
    network: Option<Arc<LocalNetwork>>,
}

impl NodeBuilder {
    /// Use `store` instead of a fresh [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the node to an in-process network.
    pub fn network(mut self, network: &Arc<LocalNetwork>) -> Self {
        self.network = Some(Arc::clone(network));
        self
    }

    /// Validate the configuration, wire the components and preload the
    /// store if configured.
    pub async fn build(self) -> Result<CacheNode> {
        let config = self.config;
        config.validate()?;

        let clustering = &config.clustering;
        let address = config.node.address.clone();
        let mapper = SegmentMapper::new(clustering.segments, clustering.hash_seed);
        let topology = Arc::new(TopologyManager::new(
            address.clone(),
            &clustering.members,
            clustering.num_owners,
            mapper,
        ));
        let oracle: Arc<dyn OwnershipOracle> = topology.clone();
        let generator = Arc::new(SegmentVersionGenerator::new(
            config.node.site.clone(),
            Arc::clone(&oracle),
        ));
        let container = Arc::new(DataContainer::new());
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn PersistenceStore>);

        if config.persistence.enabled && config.persistence.preload {
            let entries = store
                .load_all()
                .await
                .context("failed to preload persistence store")?;
            tracing::info!(node = %address, entries = entries.len(), "preloaded store");
            for (key, entry) in entries {
                // New local versions must order after the restored ones.
                if let Some(irac) = &entry.irac {
                    generator.advance_watermark(oracle.segment_of(&key), &irac.version);
                }
                match entry.value {
                    Some(value) => container.put(key, value, entry.irac),
                    None => {
                        container.remove(&key, entry.irac);
                    }
                }
            }
        }

        let transport: Arc<dyn Transport> = match &self.network {
            Some(network) => Arc::new(network.transport(address.clone())),
            None => Arc::new(NoTransport),
        };
        let notifier = Arc::new(RecordingNotifier::new());
        let irac_queue = Arc::new(IracUpdateQueue::new());

        let components = Components {
            oracle,
            generator: generator.clone(),
            container: Arc::clone(&container),
            store: Arc::clone(&store),
            transport,
            notifier: notifier.clone(),
            irac_manager: irac_queue.clone(),
            conflict_policy: config.xsite.conflict_policy.build(),
            runtime: self.runtime.clone(),
        };
        let chain = Arc::new(ChainFactory::build(&config, &components));
        if let Some(network) = &self.network {
            network.register(address.clone(), &chain);
        }

        tracing::info!(
            node = %address,
            site = %config.node.site,
            mode = %config.clustering.mode,
            xsite = config.xsite.enabled,
            "cache node started"
        );

        Ok(CacheNode {
            config,
            topology,
            generator,
            container,
            store,
            notifier,
            irac_queue,
            chain,
            network: self.network,
        })
    }
}

/// One cluster member.
pub struct CacheNode {
    config: Config,
    topology: Arc<TopologyManager>,
    generator: Arc<SegmentVersionGenerator>,
    container: Arc<DataContainer>,
    store: Arc<dyn PersistenceStore>,
    notifier: Arc<RecordingNotifier>,
    irac_queue: Arc<IracUpdateQueue>,
    chain: Arc<InterceptorChain>,
    network: Option<Arc<LocalNetwork>>,
}

impl CacheNode {
    /// Start building a node; suspended stages run on `runtime`.
    pub fn builder(config: Config, runtime: Handle) -> NodeBuilder {
        NodeBuilder {
            config,
            runtime,
            store: None,
            network: None,
        }
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Run `cmd` through the chain in a non-transactional local context.
    pub fn invoke(&self, cmd: Command) -> InvocationStage {
        self.invoke_in(Scope::NonTransactional, cmd)
    }

    /// Run `cmd` through the chain in a local context with `scope`.
    pub fn invoke_in(&self, scope: Scope, cmd: Command) -> InvocationStage {
        let ctx = Arc::new(InvocationContext::local_with(scope));
        self.chain.invoke(&ctx, &Arc::new(cmd))
    }

    /// Run `cmd` and await its outcome.
    pub async fn execute(&self, cmd: Command) -> Outcome {
        self.invoke(cmd).await
    }

    /// Run `cmd` and block until it completes.
    ///
    /// For synchronous callers outside the runtime only.
    pub fn execute_blocking(&self, cmd: Command) -> Outcome {
        self.invoke(cmd).get_blocking()
    }

    // ------------------------------------------------------------------------
    // Cache operations
    // ------------------------------------------------------------------------

    pub async fn get(&self, key: impl Into<Bytes>) -> CacheResult<Option<Bytes>> {
        let value = self.execute(Command::get(key)).await?;
        Ok(value.value().cloned())
    }

    /// Store `value`, returning the previous value.
    pub async fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> CacheResult<Option<Bytes>> {
        previous(self.execute(Command::put(key, value)).await?)
    }

    /// Remove `key`, returning the removed value.
    pub async fn remove(&self, key: impl Into<Bytes>) -> CacheResult<Option<Bytes>> {
        previous(self.execute(Command::remove(key)).await?)
    }

    /// Expire `key` on this node. Expiration is not replicated to other sites.
    pub async fn remove_expired(&self, key: impl Into<Bytes>) -> CacheResult<bool> {
        match self.execute(Command::remove_expired(key)).await? {
            ReturnValue::Bool(removed) => Ok(removed),
            ReturnValue::Null => Ok(false),
            other => Err(unexpected("remove_expired", &other)),
        }
    }

    /// Store every entry, one key at a time. Returns the number stored.
    pub async fn put_all(&self, entries: Vec<(Bytes, Bytes)>) -> CacheResult<u64> {
        match self.execute(Command::new(CommandKind::PutMap { entries })).await? {
            ReturnValue::Count(count) => Ok(count),
            other => Err(unexpected("put_all", &other)),
        }
    }

    /// Values of `keys`, in key order.
    pub async fn get_all(&self, keys: Vec<Bytes>) -> CacheResult<Vec<(Bytes, Option<Bytes>)>> {
        match self.execute(Command::new(CommandKind::GetAll { keys })).await? {
            ReturnValue::Entries(entries) => Ok(entries),
            other => Err(unexpected("get_all", &other)),
        }
    }

    /// Apply an update received from a remote site.
    ///
    /// Returns `false` when the local version wins and the update is
    /// discarded.
    pub async fn apply_remote(
        &self,
        key: impl Into<Bytes>,
        value: Option<Bytes>,
        metadata: IracMetadata,
    ) -> CacheResult<bool> {
        let cmd = Arc::new(Command::irac_update(key, value, metadata));
        let ctx = Arc::new(InvocationContext::local());
        self.chain.invoke(&ctx, &cmd).await?;
        Ok(cmd.is_successful())
    }

    /// Prepare and commit `modifications` as one transaction.
    pub async fn commit(&self, modifications: Vec<Command>) -> CacheResult<()> {
        if !self.config.transactions.enabled {
            return Err(CacheError::illegal_state("transactions are not enabled"));
        }
        let scope = Scope::Transactional {
            locking: self.config.transactions.locking,
        };
        let prepare = Command::new(CommandKind::Prepare {
            modifications: modifications.into_iter().map(Arc::new).collect(),
            one_phase: true,
        });
        self.invoke_in(scope, prepare).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn address(&self) -> &str {
        &self.config.node.address
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.topology
    }

    pub fn generator(&self) -> &Arc<SegmentVersionGenerator> {
        &self.generator
    }

    pub fn container(&self) -> &Arc<DataContainer> {
        &self.container
    }

    pub fn store(&self) -> &Arc<dyn PersistenceStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<RecordingNotifier> {
        &self.notifier
    }

    /// Keys waiting to be sent to remote sites.
    pub fn irac_queue(&self) -> &Arc<IracUpdateQueue> {
        &self.irac_queue
    }

    pub fn chain(&self) -> &Arc<InterceptorChain> {
        &self.chain
    }

    /// Segment of `key` under this node's routing.
    pub fn segment_of(&self, key: &[u8]) -> u32 {
        self.topology.segment_of(key)
    }

    /// Current version of `segment` known to this node.
    pub fn segment_version(&self, segment: u32) -> VersionVector {
        self.generator.current_version(segment)
    }
}

impl Drop for CacheNode {
    fn drop(&mut self) {
        if let Some(network) = &self.network {
            network.unregister(self.address());
        }
    }
}

impl std::fmt::Debug for CacheNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNode")
            .field("address", &self.config.node.address)
            .field("site", &self.config.node.site)
            .field("chain", &self.chain)
            .finish()
    }
}

fn previous(value: ReturnValue) -> CacheResult<Option<Bytes>> {
    match value {
        ReturnValue::Previous(previous) => Ok(previous),
        ReturnValue::Null => Ok(None),
        other => Err(unexpected("write", &other)),
    }
}

fn unexpected(operation: &str, value: &ReturnValue) -> CacheError {
    CacheError::illegal_state(format!("{operation} returned {value:?}"))
}
