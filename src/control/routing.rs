//! Key to segment routing and topology id validation.
//!
//! Keys are routed to segments with a seeded hash:
//! `segment = xxhash64(key, hash_seed) % segments`
//!
//! The mapping never changes for the lifetime of a cluster; only the owners
//! of each segment move between topologies.

use crate::core::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Routes keys to segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMapper {
    /// Number of segments.
    pub segments: u32,
    /// Hash seed; all nodes of a cluster must agree on it.
    pub hash_seed: u64,
}

impl SegmentMapper {
    /// Create a mapper. A zero segment count is treated as one segment.
    pub fn new(segments: u32, hash_seed: u64) -> Self {
        Self {
            segments: segments.max(1),
            hash_seed,
        }
    }

    /// Route a key to its segment.
    pub fn segment_of(&self, key: &[u8]) -> u32 {
        compute_segment(key, self.hash_seed, self.segments)
    }
}

/// Validate that a command's topology id is not older than the current one.
///
/// A command stamped with an older topology may have been routed with stale
/// ownership and has to be retried.
pub fn validate_topology(command_topology: u32, current_topology: u32) -> CacheResult<()> {
    if command_topology < current_topology {
        return Err(CacheError::outdated_topology(command_topology, current_topology));
    }
    Ok(())
}

/// Compute the routing hash of a key.
pub fn compute_segment_hash(key: &[u8], hash_seed: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(hash_seed);
    hasher.write(key);
    hasher.finish()
}

/// Compute the segment of a key.
pub fn compute_segment(key: &[u8], hash_seed: u64, segments: u32) -> u32 {
    let hash = compute_segment_hash(key, hash_seed);
    (hash % u64::from(segments.max(1))) as u32
}
