//! Commands travelling through the interceptor chain.
//!
//! The set of command kinds is closed: interceptors match on [`CommandKind`]
//! and the compiler checks every kind is handled.

pub mod context;

use crate::xsite::version::IracMetadata;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Topology id of a command that has not been stamped yet.
pub const NO_TOPOLOGY: u32 = 0;

/// Value produced by a command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReturnValue {
    /// No value.
    #[default]
    Null,
    /// Boolean result.
    Bool(bool),
    /// Value read for a key.
    Value(Bytes),
    /// Previous value of a written key.
    Previous(Option<Bytes>),
    /// Per-key values of a bulk read, in request order.
    Entries(Vec<(Bytes, Option<Bytes>)>),
    /// Count of affected keys.
    Count(u64),
}

impl ReturnValue {
    /// The value of a read or the previous value of a write.
    pub fn value(&self) -> Option<&Bytes> {
        match self {
            Self::Value(value) => Some(value),
            Self::Previous(previous) => previous.as_ref(),
            _ => None,
        }
    }

    /// Check if this is [`ReturnValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

bitflags::bitflags! {
    /// Per-command flags altering how interceptors treat it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CommandFlags: u32 {
        /// Apply locally only; never replicate to other owners.
        const CACHE_MODE_LOCAL = 0b0000_0001;
        /// Do not consult the persistence store on a miss.
        const SKIP_CACHE_LOAD = 0b0000_0010;
        /// Do not write changes to the persistence store.
        const SKIP_CACHE_STORE = 0b0000_0100;
        /// Do not send the update to remote sites.
        const SKIP_XSITE_BACKUP = 0b0000_1000;
        /// Do not fire listener notifications.
        const SKIP_LISTENER_NOTIFICATION = 0b0001_0000;
        /// The command is being retried after a topology change.
        const COMMAND_RETRY = 0b0010_0000;
        /// The command is a replica sent by the primary owner.
        const BACKUP_WRITE = 0b0100_0000;
    }
}

impl Default for CommandFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Kinds of commands.
#[derive(Debug, Clone)]
pub enum CommandKind {
    /// Read one key.
    Get { key: Bytes },
    /// Read several keys.
    GetAll { keys: Vec<Bytes> },
    /// Write one key.
    Put { key: Bytes, value: Bytes },
    /// Remove one key.
    Remove { key: Bytes },
    /// Remove one key because it expired; a local lifecycle event.
    RemoveExpired { key: Bytes },
    /// Write several keys.
    PutMap { entries: Vec<(Bytes, Bytes)> },
    /// Update received from a remote site. `value` is `None` for a removal.
    IracUpdate {
        key: Bytes,
        value: Option<Bytes>,
        metadata: IracMetadata,
    },
    /// Transaction prepare carrying its modifications.
    Prepare {
        modifications: Vec<Arc<Command>>,
        one_phase: bool,
    },
}

impl CommandKind {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "Get",
            Self::GetAll { .. } => "GetAll",
            Self::Put { .. } => "Put",
            Self::Remove { .. } => "Remove",
            Self::RemoveExpired { .. } => "RemoveExpired",
            Self::PutMap { .. } => "PutMap",
            Self::IracUpdate { .. } => "IracUpdate",
            Self::Prepare { .. } => "Prepare",
        }
    }
}

/// A command plus the mutable state interceptors attach to it.
///
/// Shared behind an `Arc` by the continuations of one execution; the mutable
/// parts are atomics or short critical sections.
pub struct Command {
    kind: CommandKind,
    flags: AtomicU32,
    topology_id: AtomicU32,
    successful: AtomicBool,
    irac_metadata: Mutex<BTreeMap<Bytes, IracMetadata>>,
}

impl Command {
    /// Create a command with no flags.
    pub fn new(kind: CommandKind) -> Self {
        Self::with_flags(kind, CommandFlags::empty())
    }

    /// Create a command with flags.
    pub fn with_flags(kind: CommandKind, flags: CommandFlags) -> Self {
        Self {
            kind,
            flags: AtomicU32::new(flags.bits()),
            topology_id: AtomicU32::new(NO_TOPOLOGY),
            successful: AtomicBool::new(true),
            irac_metadata: Mutex::new(BTreeMap::new()),
        }
    }

    /// Read one key.
    pub fn get(key: impl Into<Bytes>) -> Self {
        Self::new(CommandKind::Get { key: key.into() })
    }

    /// Write one key.
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::new(CommandKind::Put {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Remove one key.
    pub fn remove(key: impl Into<Bytes>) -> Self {
        Self::new(CommandKind::Remove { key: key.into() })
    }

    /// Remove an expired key.
    pub fn remove_expired(key: impl Into<Bytes>) -> Self {
        Self::new(CommandKind::RemoveExpired { key: key.into() })
    }

    /// Apply an update received from a remote site.
    pub fn irac_update(key: impl Into<Bytes>, value: Option<Bytes>, metadata: IracMetadata) -> Self {
        Self::new(CommandKind::IracUpdate {
            key: key.into(),
            value,
            metadata,
        })
    }

    /// The command kind.
    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Current flags.
    pub fn flags(&self) -> CommandFlags {
        CommandFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Check if all of `flags` are set.
    pub fn has_flag(&self, flags: CommandFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Set `flags` in addition to the current ones.
    pub fn add_flags(&self, flags: CommandFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Topology id the command executes in, or [`NO_TOPOLOGY`].
    pub fn topology_id(&self) -> u32 {
        self.topology_id.load(Ordering::Acquire)
    }

    /// Stamp the topology id the command executes in.
    pub fn set_topology_id(&self, topology_id: u32) {
        self.topology_id.store(topology_id, Ordering::Release);
    }

    /// Check if the command is still expected to take effect.
    pub fn is_successful(&self) -> bool {
        self.successful.load(Ordering::Acquire)
    }

    /// Mark the command as not taking effect.
    ///
    /// Downstream interceptors skip replication and store writes for it.
    pub fn fail(&self) {
        self.successful.store(false, Ordering::Release);
    }

    /// Check if the command modifies data.
    pub fn is_write(&self) -> bool {
        match &self.kind {
            CommandKind::Get { .. } | CommandKind::GetAll { .. } => false,
            CommandKind::Put { .. }
            | CommandKind::Remove { .. }
            | CommandKind::RemoveExpired { .. }
            | CommandKind::PutMap { .. }
            | CommandKind::IracUpdate { .. } => true,
            CommandKind::Prepare { modifications, .. } => {
                modifications.iter().any(|m| m.is_write())
            }
        }
    }

    /// Check if the command carries an update from a remote site.
    pub fn is_irac_update(&self) -> bool {
        matches!(self.kind, CommandKind::IracUpdate { .. })
    }

    /// Check if the command is an expiration-triggered removal.
    pub fn is_expiration(&self) -> bool {
        matches!(self.kind, CommandKind::RemoveExpired { .. })
    }

    /// Keys the command reads or writes, in command order.
    pub fn affected_keys(&self) -> Vec<Bytes> {
        match &self.kind {
            CommandKind::Get { key }
            | CommandKind::Put { key, .. }
            | CommandKind::Remove { key }
            | CommandKind::RemoveExpired { key }
            | CommandKind::IracUpdate { key, .. } => vec![key.clone()],
            CommandKind::GetAll { keys } => keys.clone(),
            CommandKind::PutMap { entries } => entries.iter().map(|(k, _)| k.clone()).collect(),
            CommandKind::Prepare { modifications, .. } => {
                let mut keys = Vec::new();
                for modification in modifications {
                    for key in modification.affected_keys() {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                }
                keys
            }
        }
    }

    /// Cross-site metadata attached to `key` by the primary owner.
    pub fn irac_metadata(&self, key: &[u8]) -> Option<IracMetadata> {
        self.irac_metadata.lock().get(key).cloned()
    }

    /// Attach cross-site metadata for `key`, replacing any previous one.
    pub fn set_irac_metadata(&self, key: Bytes, metadata: IracMetadata) {
        self.irac_metadata.lock().insert(key, metadata);
    }

    /// Forget the state a previous attempt attached: the success flag and
    /// the cross-site metadata, of a prepare's modifications too.
    pub fn reset_attempt(&self) {
        self.successful.store(true, Ordering::Release);
        self.irac_metadata.lock().clear();
        if let CommandKind::Prepare { modifications, .. } = &self.kind {
            for modification in modifications {
                modification.reset_attempt();
            }
        }
    }

    /// Check if the command is a prepare with nothing left to apply.
    pub fn is_empty_prepare(&self) -> bool {
        matches!(&self.kind, CommandKind::Prepare { modifications, .. } if modifications.is_empty())
    }

    /// Copy of this command as sent to another node.
    ///
    /// Carries the flags, topology id and per-key cross-site metadata. The
    /// modifications of a prepare are copied too, so the receiver never
    /// shares their state with the sender.
    pub fn remote_copy(&self) -> Command {
        self.copy_with(|_| true)
    }

    /// Copy of this command as sent to backup owners.
    ///
    /// Modifications of a prepare that did not take effect, e.g. discarded
    /// remote updates, are left out.
    pub fn backup_copy(&self) -> Command {
        let copy = self.copy_with(|modification| modification.is_successful());
        copy.add_flags(CommandFlags::BACKUP_WRITE);
        copy
    }

    fn copy_with(&self, keep: impl Fn(&Command) -> bool) -> Command {
        let kind = match &self.kind {
            CommandKind::Prepare {
                modifications,
                one_phase,
            } => CommandKind::Prepare {
                modifications: modifications
                    .iter()
                    .filter(|modification| keep(modification))
                    .map(|modification| Arc::new(modification.remote_copy()))
                    .collect(),
                one_phase: *one_phase,
            },
            other => other.clone(),
        };
        let copy = Command::with_flags(kind, self.flags());
        copy.set_topology_id(self.topology_id());
        *copy.irac_metadata.lock() = self.irac_metadata.lock().clone();
        copy
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind)
            .field("flags", &self.flags())
            .field("topology_id", &self.topology_id())
            .field("successful", &self.is_successful())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xsite::version::VersionVector;

    fn update(key: &'static [u8]) -> Arc<Command> {
        Arc::new(Command::irac_update(
            Bytes::from_static(key),
            None,
            IracMetadata::new("siteB", VersionVector::new()),
        ))
    }

    fn prepare(modifications: Vec<Arc<Command>>) -> Command {
        Command::new(CommandKind::Prepare {
            modifications,
            one_phase: true,
        })
    }

    fn modifications(cmd: &Command) -> &[Arc<Command>] {
        match cmd.kind() {
            CommandKind::Prepare { modifications, .. } => modifications,
            other => panic!("not a prepare: {other:?}"),
        }
    }

    #[test]
    fn remote_copy_does_not_share_modifications() {
        let cmd = prepare(vec![update(b"a")]);
        let copy = cmd.remote_copy();
        modifications(&copy)[0].fail();
        assert!(modifications(&cmd)[0].is_successful());
    }

    #[test]
    fn backup_copy_leaves_out_failed_modifications() {
        let cmd = prepare(vec![update(b"a"), update(b"b")]);
        modifications(&cmd)[0].fail();

        let copy = cmd.backup_copy();
        assert!(copy.has_flag(CommandFlags::BACKUP_WRITE));
        assert_eq!(copy.affected_keys(), vec![Bytes::from_static(b"b")]);

        modifications(&cmd)[1].fail();
        assert!(cmd.backup_copy().is_empty_prepare());
    }

    #[test]
    fn reset_attempt_clears_previous_state() {
        let cmd = prepare(vec![update(b"a")]);
        cmd.fail();
        modifications(&cmd)[0].fail();
        cmd.set_irac_metadata(
            Bytes::from_static(b"a"),
            IracMetadata::new("siteA", VersionVector::new()),
        );

        cmd.reset_attempt();
        assert!(cmd.is_successful());
        assert!(modifications(&cmd)[0].is_successful());
        assert!(cmd.irac_metadata(b"a").is_none());
    }
}
