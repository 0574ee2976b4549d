//! Transport collaborator.
//!
//! [`Transport`] is everything the chain needs from the cluster transport:
//! running a command on another node and replicating a write to backups.
//! [`LocalNetwork`] wires several in-process nodes together, records every
//! message and can fail chosen sends.

use crate::commands::context::{InvocationContext, Scope};
use crate::commands::{Command, CommandFlags, ReturnValue};
use crate::core::error::{CacheError, CacheResult};
use crate::interceptors::InterceptorChain;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

/// Future returned by transport operations.
pub type RpcFuture<T> = BoxFuture<'static, CacheResult<T>>;

/// Sends commands to other nodes.
pub trait Transport: Send + Sync {
    /// Run `command` on `target` and return its result.
    fn invoke_on(&self, target: &str, scope: Scope, command: Command) -> RpcFuture<ReturnValue>;

    /// Apply `command` on every backup in `targets`.
    ///
    /// Completes once all backups applied it, or with the first failure.
    fn backup_to(&self, targets: &[String], scope: Scope, command: Command) -> RpcFuture<()>;
}

/// A message recorded by [`LocalNetwork`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub from: String,
    pub to: String,
    pub kind: &'static str,
    pub flags: CommandFlags,
    pub topology_id: u32,
}

/// In-process cluster network.
#[derive(Default)]
pub struct LocalNetwork {
    nodes: RwLock<HashMap<String, Weak<InterceptorChain>>>,
    sent: Mutex<Vec<SentCommand>>,
    failures: Mutex<HashMap<String, VecDeque<CacheError>>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach the chain of the node at `address`.
    pub fn register(&self, address: impl Into<String>, chain: &Arc<InterceptorChain>) {
        self.nodes.write().insert(address.into(), Arc::downgrade(chain));
    }

    /// Detach a node; later sends to it fail.
    pub fn unregister(&self, address: &str) {
        self.nodes.write().remove(address);
    }

    /// Transport used by the node at `address`.
    pub fn transport(self: &Arc<Self>, address: impl Into<String>) -> LocalTransport {
        LocalTransport {
            address: address.into(),
            network: Arc::clone(self),
        }
    }

    /// Fail the next send to `target` with `error`.
    pub fn fail_next(&self, target: impl Into<String>, error: CacheError) {
        self.failures
            .lock()
            .entry(target.into())
            .or_default()
            .push_back(error);
    }

    /// Messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    /// Messages sent to `target`.
    pub fn sent_to(&self, target: &str) -> Vec<SentCommand> {
        self.sent
            .lock()
            .iter()
            .filter(|message| message.to == target)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    fn deliver(&self, from: &str, to: &str, scope: Scope, command: Command) -> RpcFuture<ReturnValue> {
        self.sent.lock().push(SentCommand {
            from: from.to_string(),
            to: to.to_string(),
            kind: command.kind().name(),
            flags: command.flags(),
            topology_id: command.topology_id(),
        });

        let scripted = self.failures.lock().get_mut(to).and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            tracing::debug!(from, to, error = %error, "failing send");
            return Box::pin(futures::future::ready(Err(error)));
        }

        let chain = self.nodes.read().get(to).and_then(Weak::upgrade);
        let Some(chain) = chain else {
            let error = CacheError::transport(format!("node {to} is not reachable"));
            return Box::pin(futures::future::ready(Err(error)));
        };

        let ctx = Arc::new(InvocationContext::remote(from, scope));
        let command = Arc::new(command);
        Box::pin(async move { chain.invoke(&ctx, &command).await })
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("nodes", &self.nodes.read().len())
            .field("sent", &self.sent.lock().len())
            .finish()
    }
}

/// Transport of one node attached to a [`LocalNetwork`].
#[derive(Debug, Clone)]
pub struct LocalTransport {
    address: String,
    network: Arc<LocalNetwork>,
}

impl Transport for LocalTransport {
    fn invoke_on(&self, target: &str, scope: Scope, command: Command) -> RpcFuture<ReturnValue> {
        self.network.deliver(&self.address, target, scope, command)
    }

    fn backup_to(&self, targets: &[String], scope: Scope, command: Command) -> RpcFuture<()> {
        let sends: Vec<_> = targets
            .iter()
            .map(|target| {
                self.network
                    .deliver(&self.address, target, scope, command.backup_copy())
            })
            .collect();
        Box::pin(async move {
            futures::future::try_join_all(sends).await?;
            Ok(())
        })
    }
}

/// Transport of a node without peers; every send fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransport;

impl Transport for NoTransport {
    fn invoke_on(&self, target: &str, _scope: Scope, _command: Command) -> RpcFuture<ReturnValue> {
        let error = CacheError::transport(format!("no transport to reach {target}"));
        Box::pin(futures::future::ready(Err(error)))
    }

    fn backup_to(&self, targets: &[String], _scope: Scope, _command: Command) -> RpcFuture<()> {
        if targets.is_empty() {
            return Box::pin(futures::future::ready(Ok(())));
        }
        let error = CacheError::transport("no transport to reach backups");
        Box::pin(futures::future::ready(Err(error)))
    }
}
