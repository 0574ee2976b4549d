//! Chain assembly.

use super::bulk::BulkSplitInterceptor;
use super::call::CallInterceptor;
use super::distribution::DistributionInterceptor;
use super::entry_wrapping::EntryWrappingInterceptor;
use super::loader::CacheLoaderInterceptor;
use super::notification::NotificationInterceptor;
use super::retry::TopologyRetryInterceptor;
use super::writer::CacheWriterInterceptor;
use super::{Interceptor, InterceptorChain};
use crate::container::DataContainer;
use crate::control::topology::OwnershipOracle;
use crate::core::config::Config;
use crate::notifications::CacheNotifier;
use crate::persistence::PersistenceStore;
use crate::transport::Transport;
use crate::xsite::{
    ConflictPolicy, IracLocalSiteInterceptor, IracManager, IracRemoteSiteInterceptor,
    VersionGenerator,
};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Collaborators injected into interceptors.
#[derive(Clone)]
pub struct Components {
    pub oracle: Arc<dyn OwnershipOracle>,
    pub generator: Arc<dyn VersionGenerator>,
    pub container: Arc<DataContainer>,
    pub store: Arc<dyn PersistenceStore>,
    pub transport: Arc<dyn Transport>,
    pub notifier: Arc<dyn CacheNotifier>,
    pub irac_manager: Arc<dyn IracManager>,
    pub conflict_policy: Arc<dyn ConflictPolicy>,
    /// Runtime that drives suspended stages.
    pub runtime: Handle,
}

/// Builds the interceptor chain for a configuration.
///
/// Order, top to bottom; bracketed positions depend on configuration:
///
/// 1. bulk split
/// 2. [distributed] topology retry
/// 3. notification
/// 4. entry wrapping
/// 5. [persistence] cache loader
/// 6. [xsite] remote site validation
/// 7. [xsite] local site versioning
/// 8. [distributed] distribution
/// 9. [persistence] cache writer
/// 10. call
pub struct ChainFactory;

impl ChainFactory {
    pub fn build(config: &Config, components: &Components) -> InterceptorChain {
        let distributed = config.clustering.is_distributed();
        let mut interceptors: Vec<Arc<dyn Interceptor>> = vec![Arc::new(BulkSplitInterceptor)];

        if distributed {
            interceptors.push(Arc::new(TopologyRetryInterceptor::new(
                Arc::clone(&components.oracle),
                config.retry.max_topology_retries,
            )));
        }
        interceptors.push(Arc::new(NotificationInterceptor::new(Arc::clone(
            &components.notifier,
        ))));
        interceptors.push(Arc::new(EntryWrappingInterceptor::new(Arc::clone(
            &components.container,
        ))));
        if config.persistence.enabled {
            interceptors.push(Arc::new(CacheLoaderInterceptor::new(
                Arc::clone(&components.store),
                components.runtime.clone(),
            )));
        }
        if config.xsite.enabled {
            interceptors.push(Arc::new(IracRemoteSiteInterceptor::new(
                Arc::clone(&components.oracle),
                Arc::clone(&components.generator),
                Arc::clone(&components.conflict_policy),
                Arc::clone(&components.notifier),
            )));
            interceptors.push(Arc::new(IracLocalSiteInterceptor::new(
                Arc::clone(&components.oracle),
                Arc::clone(&components.generator),
                Arc::clone(&components.irac_manager),
            )));
        }
        if distributed {
            interceptors.push(Arc::new(DistributionInterceptor::new(
                Arc::clone(&components.oracle),
                Arc::clone(&components.transport),
                components.runtime.clone(),
            )));
        }
        if config.persistence.enabled {
            interceptors.push(Arc::new(CacheWriterInterceptor::new(
                Arc::clone(&components.store),
                components.runtime.clone(),
            )));
        }
        interceptors.push(Arc::new(CallInterceptor::new(Arc::clone(
            &components.notifier,
        ))));

        let chain = InterceptorChain::new(interceptors);
        tracing::info!(
            node = %components.oracle.local_address(),
            interceptors = ?chain.interceptor_names(),
            "built interceptor chain"
        );
        chain
    }
}
