//! Cluster membership and key ownership.
//!
//! - [`routing`] - key to segment hashing and topology id validation
//! - [`topology`] - consistent hash, cache topologies and the ownership oracle
//!
//! # Topology ids
//!
//! Every installed topology gets a new, strictly larger id. Commands are
//! stamped with the id they were routed with; an owner that sees a command
//! from an older topology rejects it with `OutdatedTopology` and the
//! originator retries with fresh ownership.

pub mod routing;
pub mod topology;
