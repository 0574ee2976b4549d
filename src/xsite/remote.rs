//! Validation of updates received from remote sites.
//!
//! Only the primary owner of a key compares versions. It first advances its
//! watermark with the remote version, so the next local write is ordered
//! after the remote one, then compares the remote version against the local
//! entry's (a tombstone when the key is absent):
//!
//! | remote vs local | decision                 |
//! |-----------------|--------------------------|
//! | before, equal   | discard                  |
//! | after           | accept                   |
//! | conflicting     | ask the conflict policy  |
//!
//! A discarded update marks the command failed, so it is never replicated
//! or stored, and the context entry skipped, so nothing is committed or
//! notified. An accepted update replaces the entry metadata as a whole.
//! Backup owners trust the primary and apply its metadata without comparing.

use super::generator::VersionGenerator;
use super::policy::{ConflictPolicy, Resolution};
use super::version::{IracMetadata, VersionOrdering};
use crate::commands::context::InvocationContext;
use crate::commands::{Command, CommandFlags, CommandKind};
use crate::control::topology::OwnershipOracle;
use crate::core::error::CacheError;
use crate::interceptors::{Interceptor, Next};
use crate::invocation::InvocationStage;
use crate::notifications::CacheNotifier;
use bytes::Bytes;
use std::sync::Arc;

/// What the primary owner does with a remote update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Discard,
}

/// Decide on a remote update given the local metadata.
pub fn decide(
    key: &[u8],
    local: &IracMetadata,
    remote: &IracMetadata,
    policy: &dyn ConflictPolicy,
) -> (VersionOrdering, Decision) {
    let ordering = remote.version.compare(&local.version);
    let decision = match ordering {
        VersionOrdering::Before | VersionOrdering::Equal => Decision::Discard,
        VersionOrdering::After => Decision::Accept,
        VersionOrdering::Conflicting => match policy.resolve(key, local, remote) {
            Resolution::AcceptRemote => Decision::Accept,
            Resolution::KeepLocal => Decision::Discard,
        },
    };
    (ordering, decision)
}

/// Applies the resolution procedure to `IracUpdate` commands and to the
/// remote updates carried by a transaction prepare.
pub struct IracRemoteSiteInterceptor {
    oracle: Arc<dyn OwnershipOracle>,
    generator: Arc<dyn VersionGenerator>,
    policy: Arc<dyn ConflictPolicy>,
    notifier: Arc<dyn CacheNotifier>,
}

impl IracRemoteSiteInterceptor {
    pub fn new(
        oracle: Arc<dyn OwnershipOracle>,
        generator: Arc<dyn VersionGenerator>,
        policy: Arc<dyn ConflictPolicy>,
        notifier: Arc<dyn CacheNotifier>,
    ) -> Self {
        Self {
            oracle,
            generator,
            policy,
            notifier,
        }
    }

    /// Validate one remote update on the primary owner.
    fn validate(
        &self,
        ctx: &InvocationContext,
        carrier: &Command,
        key: &Bytes,
        value: Option<&Bytes>,
        remote: &IracMetadata,
        segment: u32,
    ) {
        self.generator.advance_watermark(segment, &remote.version);

        let local = ctx
            .lookup(key)
            .and_then(|entry| entry.irac)
            .unwrap_or_else(IracMetadata::absent);
        let (ordering, decision) = decide(key, &local, remote, self.policy.as_ref());
        tracing::debug!(
            key = ?key,
            segment,
            ?ordering,
            ?decision,
            local_site = %local.site,
            remote_site = %remote.site,
            "resolved remote update"
        );

        match decision {
            Decision::Discard => {
                carrier.fail();
                ctx.update_or_absent(key, |entry| entry.discard());
            }
            Decision::Accept => {
                ctx.update_or_absent(key, |entry| entry.irac = Some(remote.clone()));
                self.notifier.notify_changed(key, value, true);
            }
        }
    }

    /// Apply the metadata resolved by the primary.
    fn apply_backup(&self, ctx: &InvocationContext, key: &Bytes, remote: &IracMetadata, segment: u32) {
        self.generator.advance_watermark(segment, &remote.version);
        ctx.update_or_absent(key, |entry| entry.irac = Some(remote.clone()));
    }

    fn update(
        &self,
        ctx: &Arc<InvocationContext>,
        cmd: &Arc<Command>,
        next: Next,
        key: &Bytes,
        value: Option<&Bytes>,
        remote: &IracMetadata,
    ) -> InvocationStage {
        let segment = self.oracle.segment_of(key);
        if cmd.has_flag(CommandFlags::BACKUP_WRITE) {
            self.apply_backup(ctx, key, remote, segment);
            return next.invoke(ctx, cmd);
        }
        if !self.oracle.is_primary(segment) {
            return self.not_primary(key, segment);
        }
        self.validate(ctx, cmd, key, value, remote, segment);
        next.invoke(ctx, cmd)
    }

    /// Replay the remote updates of a prepare before its locks are taken.
    ///
    /// Pessimistic transactions commit in one phase, so this node must be
    /// the primary of every key it replays; otherwise the sender retries.
    fn prepare(
        &self,
        ctx: &Arc<InvocationContext>,
        cmd: &Arc<Command>,
        next: Next,
        modifications: &[Arc<Command>],
    ) -> InvocationStage {
        let backup = cmd.has_flag(CommandFlags::BACKUP_WRITE);
        for modification in modifications {
            let CommandKind::IracUpdate {
                key,
                value,
                metadata,
            } = modification.kind()
            else {
                continue;
            };
            let segment = self.oracle.segment_of(key);
            if backup {
                self.apply_backup(ctx, key, metadata, segment);
            } else if self.oracle.is_primary(segment) {
                self.validate(ctx, modification, key, value.as_ref(), metadata, segment);
            } else if ctx.is_pessimistic() {
                return self.not_primary(key, segment);
            }
        }
        next.invoke(ctx, cmd)
    }

    fn not_primary(&self, key: &Bytes, segment: u32) -> InvocationStage {
        let node = self.oracle.local_address().to_string();
        tracing::debug!(key = ?key, segment, node = %node, "remote update reached a non-primary owner");
        InvocationStage::fail(CacheError::not_primary(node, segment))
    }
}

impl Interceptor for IracRemoteSiteInterceptor {
    fn name(&self) -> &'static str {
        "IracRemoteSiteInterceptor"
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        match cmd.kind() {
            CommandKind::IracUpdate {
                key,
                value,
                metadata,
            } => self.update(ctx, cmd, next, key, value.as_ref(), metadata),
            CommandKind::Prepare { modifications, .. } => self.prepare(ctx, cmd, next, modifications),
            _ => next.invoke(ctx, cmd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xsite::policy::SiteNameTieBreak;
    use crate::xsite::version::{SiteVersion, VersionVector};

    fn metadata(site: &str, entries: &[(&str, u64)]) -> IracMetadata {
        let mut version = VersionVector::new();
        for (s, v) in entries {
            version.set(*s, SiteVersion::new(1, *v));
        }
        IracMetadata::new(site, version)
    }

    #[test]
    fn absent_local_accepts_any_versioned_update() {
        let remote = metadata("siteB", &[("siteB", 1)]);
        let (ordering, decision) = decide(b"k", &IracMetadata::absent(), &remote, &SiteNameTieBreak);
        assert_eq!(ordering, VersionOrdering::After);
        assert_eq!(decision, Decision::Accept);
    }

    #[test]
    fn tombstone_orders_late_update() {
        let tombstone = IracMetadata::tombstone("siteA", VersionVector::single("siteA", SiteVersion::new(1, 3)));
        let stale = metadata("siteA", &[("siteA", 2)]);
        let (_, decision) = decide(b"k", &tombstone, &stale, &SiteNameTieBreak);
        assert_eq!(decision, Decision::Discard);
    }
}
