//! Segment ownership and cache topologies.
//!
//! Every segment has an ordered owner list; the first owner is the primary,
//! the others are backups. While a rebalance is in flight the topology also
//! carries a pending hash, whose owners already receive writes but do not
//! serve reads yet.

use crate::control::routing::SegmentMapper;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Ownership of one segment, valid for one topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionInfo {
    pub segment: u32,

    /// Node that orders and validates writes.
    pub primary: Option<String>,

    /// Nodes that must reflect every write, primary included.
    pub write_owners: Vec<String>,

    /// Nodes allowed to serve reads.
    pub read_owners: Vec<String>,
}

impl DistributionInfo {
    /// Check if `node` is the primary owner.
    pub fn is_primary(&self, node: &str) -> bool {
        self.primary.as_deref() == Some(node)
    }

    /// Check if `node` is a write owner.
    pub fn is_write_owner(&self, node: &str) -> bool {
        self.write_owners.iter().any(|owner| owner == node)
    }

    /// Check if `node` is a read owner.
    pub fn is_read_owner(&self, node: &str) -> bool {
        self.read_owners.iter().any(|owner| owner == node)
    }

    /// Write owners other than the primary.
    pub fn backups(&self) -> Vec<String> {
        self.write_owners
            .iter()
            .filter(|owner| Some(owner.as_str()) != self.primary.as_deref())
            .cloned()
            .collect()
    }
}

/// Owner lists of all segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistentHash {
    pub members: Vec<String>,
    owners: Vec<Vec<String>>,
}

impl ConsistentHash {
    /// Assign owners round-robin: segment `s` is owned by members
    /// `s, s + 1, ..` modulo the member count.
    pub fn round_robin(members: &[String], num_owners: usize, segments: u32) -> Self {
        let replicas = num_owners.min(members.len());
        let owners = (0..segments as usize)
            .map(|segment| {
                (0..replicas)
                    .map(|i| members[(segment + i) % members.len()].clone())
                    .collect()
            })
            .collect();
        Self {
            members: members.to_vec(),
            owners,
        }
    }

    /// Owners of `segment`, primary first.
    pub fn owners(&self, segment: u32) -> &[String] {
        self.owners
            .get(segment as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn segments(&self) -> u32 {
        self.owners.len() as u32
    }
}

/// A numbered ownership snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTopology {
    /// Strictly increasing; starts at 1.
    pub topology_id: u32,
    pub current: ConsistentHash,
    /// Target hash of an in-flight rebalance.
    pub pending: Option<ConsistentHash>,
}

impl CacheTopology {
    /// Ownership of `segment` in this topology.
    pub fn distribution(&self, segment: u32) -> DistributionInfo {
        let owners = self.current.owners(segment);
        let mut write_owners = owners.to_vec();
        if let Some(pending) = &self.pending {
            for owner in pending.owners(segment) {
                if !write_owners.contains(owner) {
                    write_owners.push(owner.clone());
                }
            }
        }
        DistributionInfo {
            segment,
            primary: owners.first().cloned(),
            write_owners,
            read_owners: owners.to_vec(),
        }
    }
}

/// Answers ownership questions for the local node.
pub trait OwnershipOracle: Send + Sync {
    /// Address of the local node.
    fn local_address(&self) -> &str;

    /// Id of the installed topology.
    fn topology_id(&self) -> u32;

    fn segment_of(&self, key: &[u8]) -> u32;

    fn distribution(&self, segment: u32) -> DistributionInfo;

    fn key_distribution(&self, key: &[u8]) -> DistributionInfo {
        self.distribution(self.segment_of(key))
    }

    fn is_primary(&self, segment: u32) -> bool {
        self.distribution(segment).is_primary(self.local_address())
    }

    fn is_write_owner(&self, segment: u32) -> bool {
        self.distribution(segment).is_write_owner(self.local_address())
    }

    fn is_read_owner(&self, segment: u32) -> bool {
        self.distribution(segment).is_read_owner(self.local_address())
    }
}

/// Installs topologies and serves ownership lookups from the latest one.
pub struct TopologyManager {
    local_address: String,
    mapper: SegmentMapper,
    num_owners: usize,
    topology: RwLock<CacheTopology>,
}

impl TopologyManager {
    /// Create a manager with topology 1 built from `members`.
    ///
    /// An empty member list means a single-node cluster of the local node.
    pub fn new(
        local_address: impl Into<String>,
        members: &[String],
        num_owners: usize,
        mapper: SegmentMapper,
    ) -> Self {
        let local_address = local_address.into();
        let members = if members.is_empty() {
            vec![local_address.clone()]
        } else {
            members.to_vec()
        };
        let topology = CacheTopology {
            topology_id: 1,
            current: ConsistentHash::round_robin(&members, num_owners, mapper.segments),
            pending: None,
        };
        Self {
            local_address,
            mapper,
            num_owners,
            topology: RwLock::new(topology),
        }
    }

    /// Copy of the installed topology.
    pub fn current(&self) -> CacheTopology {
        self.topology.read().clone()
    }

    pub fn mapper(&self) -> SegmentMapper {
        self.mapper
    }

    /// Install a new topology with `members`, replacing the current hash.
    pub fn install_members(&self, members: &[String]) -> u32 {
        let hash = ConsistentHash::round_robin(members, self.num_owners, self.mapper.segments);
        let mut topology = self.topology.write();
        topology.topology_id += 1;
        topology.current = hash;
        topology.pending = None;
        tracing::info!(
            topology_id = topology.topology_id,
            members = members.len(),
            "installed topology"
        );
        topology.topology_id
    }

    /// Start a rebalance towards `members`; their owners become write owners.
    pub fn start_rebalance(&self, members: &[String]) -> u32 {
        let hash = ConsistentHash::round_robin(members, self.num_owners, self.mapper.segments);
        let mut topology = self.topology.write();
        topology.topology_id += 1;
        topology.pending = Some(hash);
        tracing::info!(
            topology_id = topology.topology_id,
            members = members.len(),
            "rebalance started"
        );
        topology.topology_id
    }

    /// Finish the in-flight rebalance, promoting the pending hash.
    ///
    /// Returns `None` when no rebalance is in flight.
    pub fn complete_rebalance(&self) -> Option<u32> {
        let mut topology = self.topology.write();
        let pending = topology.pending.take()?;
        topology.topology_id += 1;
        topology.current = pending;
        tracing::info!(topology_id = topology.topology_id, "rebalance completed");
        Some(topology.topology_id)
    }
}

impl OwnershipOracle for TopologyManager {
    fn local_address(&self) -> &str {
        &self.local_address
    }

    fn topology_id(&self) -> u32 {
        self.topology.read().topology_id
    }

    fn segment_of(&self, key: &[u8]) -> u32 {
        self.mapper.segment_of(key)
    }

    fn distribution(&self, segment: u32) -> DistributionInfo {
        self.topology.read().distribution(segment)
    }
}

impl std::fmt::Debug for TopologyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyManager")
            .field("local_address", &self.local_address)
            .field("topology_id", &self.topology_id())
            .finish()
    }
}
