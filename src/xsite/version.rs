//! Cross-site version vectors and the metadata attached to each entry.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Logical clock of one site for one segment.
///
/// Ordered by topology id first, so a version issued after a topology change
/// dominates every version of the previous topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SiteVersion {
    pub topology_id: u32,
    pub version: u64,
}

impl SiteVersion {
    pub fn new(topology_id: u32, version: u64) -> Self {
        Self {
            topology_id,
            version,
        }
    }
}

/// Causal relation of one version vector to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionOrdering {
    /// Causally precedes the other vector.
    Before,
    Equal,
    /// Causally follows the other vector.
    After,
    /// Neither vector dominates.
    Conflicting,
}

/// Per-site logical clocks of one key version.
///
/// A site missing from the vector counts as the zero version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector {
    entries: BTreeMap<String, SiteVersion>,
}

impl VersionVector {
    /// Empty vector; equal to any vector made only of zero versions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector with a single site entry.
    pub fn single(site: impl Into<String>, version: SiteVersion) -> Self {
        let mut vector = Self::new();
        vector.set(site, version);
        vector
    }

    /// Version of `site`, zero if absent.
    pub fn get(&self, site: &str) -> SiteVersion {
        self.entries.get(site).copied().unwrap_or_default()
    }

    pub fn set(&mut self, site: impl Into<String>, version: SiteVersion) {
        self.entries.insert(site.into(), version);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(site, version)` pairs in site order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, SiteVersion)> {
        self.entries.iter().map(|(site, version)| (site.as_str(), *version))
    }

    /// Compare `self` against `other`.
    pub fn compare(&self, other: &VersionVector) -> VersionOrdering {
        let mut before = false;
        let mut after = false;
        for site in self.entries.keys().chain(other.entries.keys()) {
            match self.get(site).cmp(&other.get(site)) {
                Ordering::Less => before = true,
                Ordering::Greater => after = true,
                Ordering::Equal => {}
            }
            if before && after {
                return VersionOrdering::Conflicting;
            }
        }
        match (before, after) {
            (false, false) => VersionOrdering::Equal,
            (true, false) => VersionOrdering::Before,
            (false, true) => VersionOrdering::After,
            (true, true) => VersionOrdering::Conflicting,
        }
    }

    /// Pointwise maximum of both vectors.
    pub fn merge(&mut self, other: &VersionVector) {
        for (site, version) in other.iter() {
            let current = self.entries.entry(site.to_string()).or_default();
            if version > *current {
                *current = version;
            }
        }
    }
}

/// Cross-site metadata of one key version.
///
/// Replaced as a whole on every accepted update; never merged field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IracMetadata {
    /// Site that produced this version.
    pub site: String,

    pub version: VersionVector,

    /// Set when the version records a removal.
    #[serde(default)]
    pub tombstone: bool,
}

impl IracMetadata {
    pub fn new(site: impl Into<String>, version: VersionVector) -> Self {
        Self {
            site: site.into(),
            version,
            tombstone: false,
        }
    }

    /// Metadata recording a removal.
    pub fn tombstone(site: impl Into<String>, version: VersionVector) -> Self {
        Self {
            site: site.into(),
            version,
            tombstone: true,
        }
    }

    /// Implicit tombstone of a key that was never written.
    pub fn absent() -> Self {
        Self::tombstone(String::new(), VersionVector::new())
    }
}
