//! In-memory data container.
//!
//! Holds live entries plus the cross-site tombstones of removed keys, so a
//! late remote update can still be ordered against a removal.

use crate::xsite::version::IracMetadata;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A live value and its cross-site metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalEntry {
    pub value: Bytes,
    pub irac: Option<IracMetadata>,
}

/// Key/value storage of one node.
#[derive(Debug, Default)]
pub struct DataContainer {
    entries: RwLock<HashMap<Bytes, InternalEntry>>,
    tombstones: RwLock<HashMap<Bytes, IracMetadata>>,
}

impl DataContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<InternalEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Tombstone left by the last removal of `key`.
    pub fn tombstone(&self, key: &[u8]) -> Option<IracMetadata> {
        self.tombstones.read().get(key).cloned()
    }

    /// Store a value; clears any tombstone of the key.
    pub fn put(&self, key: Bytes, value: Bytes, irac: Option<IracMetadata>) {
        self.tombstones.write().remove(&key);
        self.entries.write().insert(key, InternalEntry { value, irac });
    }

    /// Remove a value, keeping `tombstone` for cross-site ordering.
    pub fn remove(&self, key: &[u8], tombstone: Option<IracMetadata>) -> Option<InternalEntry> {
        let removed = self.entries.write().remove(key);
        let mut tombstones = self.tombstones.write();
        match tombstone {
            Some(metadata) => {
                tombstones.insert(Bytes::copy_from_slice(key), metadata);
            }
            None => {
                tombstones.remove(key);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Live keys, unordered.
    pub fn keys(&self) -> Vec<Bytes> {
        self.entries.read().keys().cloned().collect()
    }
}
