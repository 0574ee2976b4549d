//! Per-execution state threaded through the interceptor chain.

use crate::xsite::version::IracMetadata;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lock acquisition strategy of a transactional cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockingMode {
    /// Locks are acquired during prepare.
    #[default]
    Optimistic,
    /// Locks are acquired on first write; commits run in a single phase.
    Pessimistic,
}

/// Transactional scope of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    NonTransactional,
    Transactional { locking: LockingMode },
}

bitflags::bitflags! {
    /// State of an entry looked up into a context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u8 {
        /// The value changed and must be committed.
        const CHANGED = 0b0000_0001;
        /// The entry was removed.
        const REMOVED = 0b0000_0010;
        /// The entry did not exist before this execution.
        const CREATED = 0b0000_0100;
        /// The entry was loaded from the persistence store.
        const LOADED = 0b0000_1000;
        /// The update was discarded; commit nothing for this entry.
        const SKIP_COMMIT = 0b0001_0000;
    }
}

impl Default for EntryFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// An entry looked up into an invocation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: Bytes,

    /// Current value; `None` for an absent or removed key.
    pub value: Option<Bytes>,

    /// Value at lookup time.
    pub old_value: Option<Bytes>,

    /// Cross-site metadata; a tombstone when the key is absent.
    pub irac: Option<IracMetadata>,

    pub flags: EntryFlags,
}

impl CacheEntry {
    /// Entry for a key with no value.
    pub fn absent(key: Bytes) -> Self {
        Self {
            key,
            value: None,
            old_value: None,
            irac: None,
            flags: EntryFlags::CREATED,
        }
    }

    /// Entry wrapping a value read from the container or store.
    pub fn existing(key: Bytes, value: Bytes, irac: Option<IracMetadata>) -> Self {
        Self {
            key,
            old_value: Some(value.clone()),
            value: Some(value),
            irac,
            flags: EntryFlags::empty(),
        }
    }

    /// Set a new value.
    pub fn set_value(&mut self, value: Bytes) {
        self.value = Some(value);
        self.flags.remove(EntryFlags::REMOVED);
        self.flags.insert(EntryFlags::CHANGED);
    }

    /// Remove the value.
    pub fn remove(&mut self) {
        self.value = None;
        self.flags.insert(EntryFlags::CHANGED | EntryFlags::REMOVED);
    }

    /// Check if the entry must be committed.
    pub fn is_changed(&self) -> bool {
        self.flags.contains(EntryFlags::CHANGED) && !self.flags.contains(EntryFlags::SKIP_COMMIT)
    }

    /// Check if the entry holds no value.
    pub fn is_absent(&self) -> bool {
        self.value.is_none()
    }

    /// Mark the entry so nothing is committed, stored or notified for it.
    pub fn discard(&mut self) {
        self.flags.insert(EntryFlags::SKIP_COMMIT);
    }

    /// Check if the update carried by this entry was discarded.
    pub fn is_discarded(&self) -> bool {
        self.flags.contains(EntryFlags::SKIP_COMMIT)
    }
}

/// State of one command execution.
///
/// Owned by a single execution. Sub-commands forked from it share the same
/// context, so each command only commits the entries of its own keys.
#[derive(Debug)]
pub struct InvocationContext {
    /// Originating node; `None` for a command issued on this node.
    origin: Option<String>,

    scope: Scope,

    entries: Mutex<BTreeMap<Bytes, CacheEntry>>,
}

impl InvocationContext {
    /// Non-transactional context for a command issued on this node.
    pub fn local() -> Self {
        Self::new(None, Scope::NonTransactional)
    }

    /// Context for a command issued on this node with `scope`.
    pub fn local_with(scope: Scope) -> Self {
        Self::new(None, scope)
    }

    /// Context for a command received from `origin`.
    pub fn remote(origin: impl Into<String>, scope: Scope) -> Self {
        Self::new(Some(origin.into()), scope)
    }

    fn new(origin: Option<String>, scope: Scope) -> Self {
        Self {
            origin,
            scope,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Originating node, if remote.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Check if the command was issued on this node.
    pub fn is_origin_local(&self) -> bool {
        self.origin.is_none()
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Check if the execution runs inside a pessimistic transaction.
    pub fn is_pessimistic(&self) -> bool {
        matches!(
            self.scope,
            Scope::Transactional {
                locking: LockingMode::Pessimistic
            }
        )
    }

    /// Copy of the entry looked up for `key`.
    pub fn lookup(&self, key: &[u8]) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    /// Check if an entry was looked up for `key`.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Insert or replace the entry for its key.
    pub fn put_entry(&self, entry: CacheEntry) {
        self.entries.lock().insert(entry.key.clone(), entry);
    }

    /// Mutate the entry for `key` in place.
    pub fn update_entry<R>(&self, key: &[u8], f: impl FnOnce(&mut CacheEntry) -> R) -> Option<R> {
        self.entries.lock().get_mut(key).map(f)
    }

    /// Mutate the entry for `key`, looking it up as absent if missing.
    pub fn update_or_absent<R>(&self, key: &Bytes, f: impl FnOnce(&mut CacheEntry) -> R) -> R {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::absent(key.clone()));
        f(entry)
    }

    /// Drop the entries of `keys`, e.g. before retrying a command.
    pub fn remove_entries(&self, keys: &[Bytes]) {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(key);
        }
    }

    /// Copies of the entries of `keys` that were looked up, in key order.
    pub fn entries_for(&self, keys: &[Bytes]) -> Vec<CacheEntry> {
        let entries = self.entries.lock();
        keys.iter().filter_map(|key| entries.get(key).cloned()).collect()
    }

    /// Keys looked up so far.
    pub fn keys(&self) -> Vec<Bytes> {
        self.entries.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discarded_entry_is_not_changed() {
        let mut entry = CacheEntry::absent(Bytes::from_static(b"k"));
        entry.set_value(Bytes::from_static(b"v"));
        assert!(entry.is_changed());
        entry.discard();
        assert!(!entry.is_changed());
    }

    #[test]
    fn remove_entries_only_touches_given_keys() {
        let ctx = InvocationContext::local();
        ctx.put_entry(CacheEntry::absent(Bytes::from_static(b"a")));
        ctx.put_entry(CacheEntry::absent(Bytes::from_static(b"b")));
        ctx.remove_entries(&[Bytes::from_static(b"a")]);
        assert_eq!(ctx.keys(), vec![Bytes::from_static(b"b")]);
    }
}
