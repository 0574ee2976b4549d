//! Per-segment version generation.

use super::version::{IracMetadata, SiteVersion, VersionVector};
use crate::control::topology::OwnershipOracle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Produces versions for local writes and tracks versions seen from remote
/// sites.
pub trait VersionGenerator: Send + Sync {
    /// Name of the local site.
    fn site(&self) -> &str;

    /// Metadata for a new local write in `segment`.
    ///
    /// Causally after every version generated or observed for the segment.
    fn generate_new_metadata(&self, segment: u32) -> IracMetadata;

    /// Tombstone metadata for a local removal of `key`.
    fn generate_tombstone(&self, key: &[u8]) -> IracMetadata;

    /// Record that `version` was observed for `segment`.
    fn advance_watermark(&self, segment: u32, version: &VersionVector);

    /// Latest version known for `segment`.
    fn current_version(&self, segment: u32) -> VersionVector;
}

/// Default generator: one version vector per segment.
///
/// The local site's entry is bumped on each generated version and restarts
/// at 1 with the new topology id after a topology change.
pub struct SegmentVersionGenerator {
    site: String,
    oracle: Arc<dyn OwnershipOracle>,
    segments: Mutex<HashMap<u32, VersionVector>>,
}

impl SegmentVersionGenerator {
    pub fn new(site: impl Into<String>, oracle: Arc<dyn OwnershipOracle>) -> Self {
        Self {
            site: site.into(),
            oracle,
            segments: Mutex::new(HashMap::new()),
        }
    }
}

impl VersionGenerator for SegmentVersionGenerator {
    fn site(&self) -> &str {
        &self.site
    }

    fn generate_new_metadata(&self, segment: u32) -> IracMetadata {
        let topology_id = self.oracle.topology_id();
        let mut segments = self.segments.lock();
        let vector = segments.entry(segment).or_default();
        let own = vector.get(&self.site);
        let next = if own.topology_id < topology_id {
            SiteVersion::new(topology_id, 1)
        } else {
            SiteVersion::new(own.topology_id, own.version + 1)
        };
        vector.set(self.site.clone(), next);
        tracing::trace!(segment, site = %self.site, version = ?next, "generated version");
        IracMetadata::new(self.site.clone(), vector.clone())
    }

    fn generate_tombstone(&self, key: &[u8]) -> IracMetadata {
        let segment = self.oracle.segment_of(key);
        IracMetadata {
            tombstone: true,
            ..self.generate_new_metadata(segment)
        }
    }

    fn advance_watermark(&self, segment: u32, version: &VersionVector) {
        self.segments
            .lock()
            .entry(segment)
            .or_default()
            .merge(version);
    }

    fn current_version(&self, segment: u32) -> VersionVector {
        self.segments
            .lock()
            .get(&segment)
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for SegmentVersionGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentVersionGenerator")
            .field("site", &self.site)
            .field("segments", &self.segments.lock().len())
            .finish()
    }
}
