//! Resolution of concurrent updates from different sites.

use super::version::IracMetadata;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of resolving two conflicting versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Apply the remote update.
    AcceptRemote,
    /// Keep the local version and discard the remote update.
    KeepLocal,
}

/// Decides between a local and a remote version when neither dominates.
pub trait ConflictPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, key: &[u8], local: &IracMetadata, remote: &IracMetadata) -> Resolution;
}

/// The update from the lexicographically larger site wins. Equal site names
/// keep the local version.
#[derive(Debug, Clone, Copy, Default)]
pub struct SiteNameTieBreak;

impl ConflictPolicy for SiteNameTieBreak {
    fn name(&self) -> &'static str {
        "site-name"
    }

    fn resolve(&self, _key: &[u8], local: &IracMetadata, remote: &IracMetadata) -> Resolution {
        if remote.site > local.site {
            Resolution::AcceptRemote
        } else {
            Resolution::KeepLocal
        }
    }
}

/// Conflicting remote updates are always discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferLocal;

impl ConflictPolicy for PreferLocal {
    fn name(&self) -> &'static str {
        "prefer-local"
    }

    fn resolve(&self, _key: &[u8], _local: &IracMetadata, _remote: &IracMetadata) -> Resolution {
        Resolution::KeepLocal
    }
}

/// Conflicting remote updates are always applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferRemote;

impl ConflictPolicy for PreferRemote {
    fn name(&self) -> &'static str {
        "prefer-remote"
    }

    fn resolve(&self, _key: &[u8], _local: &IracMetadata, _remote: &IracMetadata) -> Resolution {
        Resolution::AcceptRemote
    }
}

/// Configurable policy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicyKind {
    #[default]
    SiteName,
    PreferLocal,
    PreferRemote,
}

impl ConflictPolicyKind {
    /// Instantiate the policy.
    pub fn build(self) -> Arc<dyn ConflictPolicy> {
        match self {
            Self::SiteName => Arc::new(SiteNameTieBreak),
            Self::PreferLocal => Arc::new(PreferLocal),
            Self::PreferRemote => Arc::new(PreferRemote),
        }
    }
}
