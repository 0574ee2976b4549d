//! Versioning of writes issued in this site.

use super::generator::VersionGenerator;
use super::manager::IracManager;
use crate::commands::context::InvocationContext;
use crate::commands::{Command, CommandFlags, CommandKind};
use crate::control::topology::OwnershipOracle;
use crate::core::error::CacheError;
use crate::interceptors::{Interceptor, Next};
use crate::invocation::InvocationStage;
use bytes::Bytes;
use std::sync::Arc;

/// Attaches cross-site metadata to local writes and tracks the written keys
/// for sending to remote sites.
///
/// The primary owner generates the metadata; backups must receive it with
/// the command. Expiration and updates that came from a remote site are
/// neither versioned nor tracked here.
pub struct IracLocalSiteInterceptor {
    oracle: Arc<dyn OwnershipOracle>,
    generator: Arc<dyn VersionGenerator>,
    manager: Arc<dyn IracManager>,
}

/// A write of one key and whether it removes it.
struct KeyWrite {
    key: Bytes,
    removal: bool,
}

impl IracLocalSiteInterceptor {
    pub fn new(
        oracle: Arc<dyn OwnershipOracle>,
        generator: Arc<dyn VersionGenerator>,
        manager: Arc<dyn IracManager>,
    ) -> Self {
        Self {
            oracle,
            generator,
            manager,
        }
    }

    fn version(&self, cmd: &Command, writes: &[KeyWrite]) -> Result<(), CacheError> {
        let backup = cmd.has_flag(CommandFlags::BACKUP_WRITE);
        for write in writes {
            if backup {
                if cmd.irac_metadata(&write.key).is_none() {
                    return Err(CacheError::missing_version(&write.key));
                }
                continue;
            }
            let segment = self.oracle.segment_of(&write.key);
            if !self.oracle.is_primary(segment) {
                continue;
            }
            let metadata = if write.removal {
                self.generator.generate_tombstone(&write.key)
            } else {
                self.generator.generate_new_metadata(segment)
            };
            cmd.set_irac_metadata(write.key.clone(), metadata);
        }
        Ok(())
    }
}

impl Interceptor for IracLocalSiteInterceptor {
    fn name(&self) -> &'static str {
        "IracLocalSiteInterceptor"
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        let writes = local_writes(cmd);
        if writes.is_empty() {
            return next.invoke(ctx, cmd);
        }
        if let Err(error) = self.version(cmd, &writes) {
            tracing::error!(command = cmd.kind().name(), error = %error, "rejecting unversioned backup write");
            return InvocationStage::fail(error);
        }

        let oracle = Arc::clone(&self.oracle);
        let manager = Arc::clone(&self.manager);
        next.invoke(ctx, cmd).then_accept_with(ctx, cmd, move |_, cmd, _| {
            if !cmd.is_successful() || cmd.has_flag(CommandFlags::SKIP_XSITE_BACKUP) {
                return Ok(());
            }
            for write in writes {
                if let Some(metadata) = cmd.irac_metadata(&write.key) {
                    let segment = oracle.segment_of(&write.key);
                    manager.track_updated_key(segment, write.key, metadata);
                }
            }
            Ok(())
        })
    }
}

/// Keys written by `cmd` that this site versions.
fn local_writes(cmd: &Command) -> Vec<KeyWrite> {
    match cmd.kind() {
        CommandKind::Put { key, .. } => vec![KeyWrite {
            key: key.clone(),
            removal: false,
        }],
        CommandKind::Remove { key } => vec![KeyWrite {
            key: key.clone(),
            removal: true,
        }],
        CommandKind::Prepare { modifications, .. } => modifications
            .iter()
            .flat_map(|modification| local_writes(modification))
            .collect(),
        CommandKind::Get { .. }
        | CommandKind::GetAll { .. }
        | CommandKind::PutMap { .. }
        | CommandKind::RemoveExpired { .. }
        | CommandKind::IracUpdate { .. } => Vec::new(),
    }
}
