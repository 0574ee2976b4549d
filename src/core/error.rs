//! Error types and classification.
//!
//! Every failure that travels through an invocation stage is a [`CacheError`].
//! Errors are cloneable because a completed stage hands the same outcome to
//! late observers (blocking callers, async awaiters, frozen-deque fallbacks).

use thiserror::Error;

/// Common cache error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The key's ownership changed while the command was in flight.
    ///
    /// Recovered by the topology retry interceptor; only reaches the caller
    /// when a retry bound is configured and exhausted.
    #[error("outdated topology: command topology {command_topology}, current topology {current_topology}")]
    OutdatedTopology {
        command_topology: u32,
        current_topology: u32,
    },

    /// A cross-site update reached a node that is not the primary owner.
    ///
    /// Retryable: the remote site resends after refreshing its topology.
    #[error("node {node} is not the primary owner of segment {segment}")]
    NotPrimaryOwner { node: String, segment: u32 },

    /// Topology retries were capped and the cap was reached.
    #[error("gave up after {attempts} topology retries: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<CacheError>,
    },

    /// A write that must carry cross-site version metadata arrived without it.
    #[error("missing cross-site version for key {key}")]
    MissingVersion { key: String },

    /// A stage or chain was used in a way its contract forbids.
    #[error("illegal state: {message}")]
    IllegalState { message: String },

    /// The deferred computation backing a stage was dropped without completing.
    #[error("deferred computation abandoned before completion")]
    Abandoned,

    /// Persistence collaborator failure.
    #[error("persistence failure: {message}")]
    Persistence { message: String },

    /// Transport collaborator failure (includes remote timeouts).
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// Failure raised by application code running inside a continuation.
    #[error("{message}")]
    Application { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },

    /// An error that replaced other errors while propagating through the
    /// stage chain. The replaced errors are kept, never dropped.
    #[error("{error} ({} suppressed)", suppressed.len())]
    Suppressing {
        error: Box<CacheError>,
        suppressed: Vec<CacheError>,
    },
}

impl CacheError {
    /// Create an OutdatedTopology error.
    pub fn outdated_topology(command_topology: u32, current_topology: u32) -> Self {
        Self::OutdatedTopology {
            command_topology,
            current_topology,
        }
    }

    /// Create a NotPrimaryOwner error.
    pub fn not_primary(node: impl Into<String>, segment: u32) -> Self {
        Self::NotPrimaryOwner {
            node: node.into(),
            segment,
        }
    }

    /// Create an IllegalState error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create an Application error.
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
        }
    }

    /// Create a Persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a Transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a MissingVersion error for a key.
    pub fn missing_version(key: &[u8]) -> Self {
        Self::MissingVersion {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// The error with any suppression wrapper removed.
    pub fn root(&self) -> &CacheError {
        match self {
            Self::Suppressing { error, .. } => error.root(),
            other => other,
        }
    }

    /// Errors this one replaced on its way through the stage chain.
    pub fn suppressed(&self) -> &[CacheError] {
        match self {
            Self::Suppressing { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Record `other` as suppressed by this error.
    ///
    /// Adding an error equal to this one is a no-op.
    pub fn with_suppressed(self, other: CacheError) -> Self {
        if self == other || self.root() == &other {
            return self;
        }
        match self {
            Self::Suppressing {
                error,
                mut suppressed,
            } => {
                suppressed.push(other);
                Self::Suppressing { error, suppressed }
            }
            error => Self::Suppressing {
                error: Box::new(error),
                suppressed: vec![other],
            },
        }
    }

    /// Check if the error signals a concurrent topology change.
    pub fn is_outdated_topology(&self) -> bool {
        matches!(self.root(), Self::OutdatedTopology { .. })
    }

    /// Check if the caller may retry the operation.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.root(),
            Self::OutdatedTopology { .. } | Self::NotPrimaryOwner { .. } | Self::Transport { .. }
        )
    }

    /// Check if the error is a programming error that must never be swallowed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.root(),
            Self::IllegalState { .. } | Self::MissingVersion { .. } | Self::Internal { .. }
        )
    }
}

/// Result type using CacheError.
pub type CacheResult<T> = Result<T, CacheError>;
