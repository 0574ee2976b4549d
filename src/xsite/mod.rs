//! Cross-site replication (IRAC) and conflict resolution.
//!
//! - [`version`] - version vectors and per-entry metadata
//! - [`generator`] - per-segment version generation and watermarks
//! - [`policy`] - pluggable resolution of conflicting updates
//! - [`manager`] - keys waiting to be sent to remote sites
//! - [`remote`] - validation of updates received from remote sites
//! - [`local`] - versioning of writes issued in this site

pub mod generator;
pub mod local;
pub mod manager;
pub mod policy;
pub mod remote;
pub mod version;

pub use generator::{SegmentVersionGenerator, VersionGenerator};
pub use local::IracLocalSiteInterceptor;
pub use manager::{IracManager, IracUpdateQueue};
pub use policy::{ConflictPolicy, ConflictPolicyKind, Resolution, SiteNameTieBreak};
pub use remote::{decide, Decision, IracRemoteSiteInterceptor};
pub use version::{IracMetadata, SiteVersion, VersionOrdering, VersionVector};
