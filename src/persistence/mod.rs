//! Persistence collaborator.
//!
//! The cache loader and writer interceptors only see the
//! [`PersistenceStore`] trait; retry and backoff of a real store live behind
//! it.

use crate::core::error::CacheResult;
use crate::xsite::version::IracMetadata;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Future returned by store operations.
pub type StoreFuture<T> = BoxFuture<'static, CacheResult<T>>;

/// A value as persisted, with its cross-site metadata.
///
/// A removal that carries cross-site metadata is persisted as a tombstone:
/// no value, the removal's metadata. It orders late remote updates after a
/// restart the same way the in-memory tombstone does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    #[serde(default)]
    pub value: Option<Bytes>,
    #[serde(default)]
    pub irac: Option<IracMetadata>,
}

impl StoredEntry {
    pub fn live(value: Bytes, irac: Option<IracMetadata>) -> Self {
        Self {
            value: Some(value),
            irac,
        }
    }

    pub fn tombstone(irac: IracMetadata) -> Self {
        Self {
            value: None,
            irac: Some(irac),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Asynchronous key/value store behind the cache.
pub trait PersistenceStore: Send + Sync {
    /// Load `key`, `None` if absent.
    fn load(&self, key: Bytes) -> StoreFuture<Option<StoredEntry>>;

    fn store(&self, key: Bytes, entry: StoredEntry) -> StoreFuture<()>;

    fn delete(&self, key: Bytes) -> StoreFuture<()>;

    /// Every stored entry; used for preloading.
    fn load_all(&self) -> StoreFuture<Vec<(Bytes, StoredEntry)>>;
}

/// Store keeping entries in memory.
///
/// An optional latency makes every operation complete asynchronously, which
/// exercises the suspended paths of the chain.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<Bytes, StoredEntry>>>,
    latency: Option<Duration>,
    loads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Read an entry without going through the async interface.
    pub fn get(&self, key: &[u8]) -> Option<StoredEntry> {
        self.entries.lock().get(key).cloned()
    }

    /// Seed an entry.
    pub fn insert(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.entries
            .lock()
            .insert(key.into(), StoredEntry::live(value.into(), None));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of `load` calls so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of `store` and `delete` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn delayed<T, F>(&self, op: F) -> StoreFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut HashMap<Bytes, StoredEntry>) -> T + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);
        let latency = self.latency;
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            Ok(op(&mut entries.lock()))
        })
    }
}

impl PersistenceStore for MemoryStore {
    fn load(&self, key: Bytes) -> StoreFuture<Option<StoredEntry>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.delayed(move |entries| entries.get(&key).cloned())
    }

    fn store(&self, key: Bytes, entry: StoredEntry) -> StoreFuture<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.delayed(move |entries| {
            entries.insert(key, entry);
        })
    }

    fn delete(&self, key: Bytes) -> StoreFuture<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.delayed(move |entries| {
            entries.remove(&key);
        })
    }

    fn load_all(&self) -> StoreFuture<Vec<(Bytes, StoredEntry)>> {
        self.delayed(|entries| {
            entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect()
        })
    }
}
