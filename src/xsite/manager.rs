//! Tracking of keys that still have to be sent to remote sites.

use super::version::IracMetadata;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// A key waiting to be sent to remote sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub key: Bytes,
    pub segment: u32,
    pub metadata: IracMetadata,
}

/// Receives keys updated locally that must be replicated cross-site.
pub trait IracManager: Send + Sync {
    /// Track `key`, replacing any version tracked before for it.
    fn track_updated_key(&self, segment: u32, key: Bytes, metadata: IracMetadata);

    /// Keys currently tracked, in key order.
    fn pending_keys(&self) -> Vec<Bytes>;
}

/// In-memory queue of tracked keys.
///
/// Only the latest version of a key is kept; the sender drains the queue.
#[derive(Debug, Default)]
pub struct IracUpdateQueue {
    pending: Mutex<BTreeMap<Bytes, PendingUpdate>>,
}

impl IracUpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest tracked update of `key`.
    pub fn get(&self, key: &[u8]) -> Option<PendingUpdate> {
        self.pending.lock().get(key).cloned()
    }

    /// Take every tracked update.
    pub fn drain(&self) -> Vec<PendingUpdate> {
        std::mem::take(&mut *self.pending.lock())
            .into_values()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl IracManager for IracUpdateQueue {
    fn track_updated_key(&self, segment: u32, key: Bytes, metadata: IracMetadata) {
        tracing::debug!(key = ?key, segment, "tracking key for cross-site send");
        self.pending.lock().insert(
            key.clone(),
            PendingUpdate {
                key,
                segment,
                metadata,
            },
        );
    }

    fn pending_keys(&self) -> Vec<Bytes> {
        self.pending.lock().keys().cloned().collect()
    }
}
