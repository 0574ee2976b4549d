//! Ownership checks, forwarding and replication to backup owners.

use super::{Interceptor, Next};
use crate::commands::context::InvocationContext;
use crate::commands::{Command, CommandFlags, CommandKind, ReturnValue, NO_TOPOLOGY};
use crate::control::routing::validate_topology;
use crate::control::topology::OwnershipOracle;
use crate::core::error::CacheError;
use crate::invocation::InvocationStage;
use crate::transport::Transport;
use bytes::Bytes;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Routes commands to their owners.
///
/// - a command stamped with an older topology fails with `OutdatedTopology`
/// - a local command for a key this node does not own is forwarded to the
///   primary owner and its result returned without running the rest of the
///   chain here
/// - a successful write on the primary is replicated to the backup owners
/// - a prepare follows the same rules for the primary owner of its keys
pub struct DistributionInterceptor {
    oracle: Arc<dyn OwnershipOracle>,
    transport: Arc<dyn Transport>,
    runtime: Handle,
}

impl DistributionInterceptor {
    pub fn new(oracle: Arc<dyn OwnershipOracle>, transport: Arc<dyn Transport>, runtime: Handle) -> Self {
        Self {
            oracle,
            transport,
            runtime,
        }
    }

    fn forward(&self, ctx: &InvocationContext, cmd: &Command, primary: &str) -> InvocationStage {
        tracing::debug!(
            command = cmd.kind().name(),
            primary,
            topology_id = cmd.topology_id(),
            "forwarding to primary owner"
        );
        let reply = self
            .transport
            .invoke_on(primary, ctx.scope(), cmd.remote_copy());
        InvocationStage::from_future(reply, &self.runtime)
    }

    fn read(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, key: &Bytes, next: Next) -> InvocationStage {
        let info = self.oracle.key_distribution(key);
        if info.is_read_owner(self.oracle.local_address()) {
            return next.invoke(ctx, cmd);
        }
        match (&info.primary, ctx.is_origin_local()) {
            (Some(primary), true) => self.forward(ctx, cmd, primary),
            _ => self.outdated(cmd),
        }
    }

    fn write(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, key: &Bytes, next: Next) -> InvocationStage {
        if cmd.has_flag(CommandFlags::BACKUP_WRITE) {
            return next.invoke(ctx, cmd);
        }
        let info = self.oracle.key_distribution(key);
        let local = self.oracle.local_address();
        if !info.is_primary(local) {
            return match (&info.primary, ctx.is_origin_local()) {
                (Some(primary), true) => self.forward(ctx, cmd, primary),
                _ => self.outdated(cmd),
            };
        }
        let backups: Vec<String> = info.backups().into_iter().filter(|b| b != local).collect();
        self.replicate(ctx, cmd, backups, next)
    }

    /// A prepare runs on the primary owner of its keys, which replicates it
    /// to the other write owners. A prepare whose keys have different
    /// primaries fails with the retryable `NotPrimaryOwner`.
    fn prepare(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        if cmd.has_flag(CommandFlags::BACKUP_WRITE) {
            return next.invoke(ctx, cmd);
        }
        let local = self.oracle.local_address();
        let mut primary: Option<String> = None;
        let mut backups: Vec<String> = Vec::new();
        for key in cmd.affected_keys() {
            let info = self.oracle.key_distribution(&key);
            let Some(owner) = info.primary.clone() else {
                return self.outdated(cmd);
            };
            match &primary {
                Some(current) if *current != owner => {
                    tracing::debug!(
                        key = ?key,
                        primary = %current,
                        other = %owner,
                        "prepare spans several primary owners"
                    );
                    return InvocationStage::fail(CacheError::not_primary(local, info.segment));
                }
                Some(_) => {}
                None => primary = Some(owner),
            }
            for owner in info.write_owners {
                if owner != local && !backups.contains(&owner) {
                    backups.push(owner);
                }
            }
        }
        match primary {
            Some(primary) if primary != local => {
                if ctx.is_origin_local() {
                    self.forward(ctx, cmd, &primary)
                } else {
                    self.outdated(cmd)
                }
            }
            _ => self.replicate(ctx, cmd, backups, next),
        }
    }

    fn replicate(
        &self,
        ctx: &Arc<InvocationContext>,
        cmd: &Arc<Command>,
        backups: Vec<String>,
        next: Next,
    ) -> InvocationStage {
        let transport = Arc::clone(&self.transport);
        let runtime = self.runtime.clone();
        next.invoke(ctx, cmd)
            .then_compose_with(ctx, cmd, move |ctx, cmd, value| {
                if backups.is_empty() || !cmd.is_successful() {
                    return InvocationStage::wrap(value);
                }
                let copy = cmd.backup_copy();
                if copy.is_empty_prepare() {
                    tracing::trace!("no modification of the prepare took effect");
                    return InvocationStage::wrap(value);
                }
                tracing::trace!(
                    command = cmd.kind().name(),
                    backups = backups.len(),
                    "replicating to backups"
                );
                let sent = transport.backup_to(&backups, ctx.scope(), copy);
                InvocationStage::from_future(
                    async move {
                        sent.await?;
                        Ok::<ReturnValue, CacheError>(value)
                    },
                    &runtime,
                )
            })
    }

    fn outdated(&self, cmd: &Command) -> InvocationStage {
        InvocationStage::fail(CacheError::outdated_topology(
            cmd.topology_id(),
            self.oracle.topology_id(),
        ))
    }
}

impl Interceptor for DistributionInterceptor {
    fn name(&self) -> &'static str {
        "DistributionInterceptor"
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        if cmd.topology_id() != NO_TOPOLOGY {
            if let Err(error) = validate_topology(cmd.topology_id(), self.oracle.topology_id()) {
                tracing::debug!(command = cmd.kind().name(), error = %error, "rejecting command");
                return InvocationStage::fail(error);
            }
        }
        if cmd.has_flag(CommandFlags::CACHE_MODE_LOCAL) {
            return next.invoke(ctx, cmd);
        }

        match cmd.kind() {
            CommandKind::Get { key } => self.read(ctx, cmd, key, next),
            CommandKind::Put { key, .. }
            | CommandKind::Remove { key }
            | CommandKind::IracUpdate { key, .. } => self.write(ctx, cmd, key, next),
            CommandKind::Prepare { .. } => self.prepare(ctx, cmd, next),
            // Expiration is a local lifecycle event on every owner.
            CommandKind::RemoveExpired { .. } => next.invoke(ctx, cmd),
            CommandKind::GetAll { .. } | CommandKind::PutMap { .. } => next.invoke(ctx, cmd),
        }
    }
}
