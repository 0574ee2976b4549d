//! xsite-cache - request-processing core of a replicated, cross-site cache.
//!
//! Every cache operation becomes a [`commands::Command`] that travels down an
//! immutable chain of interceptors. Each interceptor returns an
//! [`invocation::InvocationStage`], a value that is usually already complete
//! and only occasionally backed by an in-flight result, so the in-memory
//! fast path never allocates a future. Writes are versioned per site and
//! updates arriving from other sites are ordered against local ones by
//! version vectors.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         CacheNode API                           │
//! │     get │ put │ remove │ put_all │ get_all │ apply_remote       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Interceptor Chain                         │
//! │  bulk │ retry │ notify │ wrap │ load │ xsite │ distribute │ call │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Collaborators                            │
//! │  topology │ versions │ container │ store │ transport │ listeners │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error types
//! - [`core::node`] - Node wiring and cache operations
//!
//! ## Invocation
//! - [`invocation::stage`] - Invocation stages and their composition
//! - [`invocation::pending`] - In-flight completion and continuation draining
//! - [`invocation::deque`] - Continuation ring buffer
//!
//! ## Commands
//! - [`commands`] - Commands, flags and return values
//! - [`commands::context`] - Invocation context and wrapped entries
//!
//! ## Interceptors
//! - [`interceptors`] - Chain dispatch
//! - [`interceptors::factory`] - Chain assembly
//!
//! ## Cross-site
//! - [`xsite::version`] - Version vectors and entry metadata
//! - [`xsite::remote`] - Conflict resolution of remote updates
//! - [`xsite::local`] - Versioning of local writes
//!
//! ## Control
//! - [`control::routing`] - Key to segment hashing
//! - [`control::topology`] - Segment ownership
//!
//! ## Collaborators
//! - [`container`] - In-memory data container
//! - [`persistence`] - Persistence store
//! - [`transport`] - Cluster transport
//! - [`notifications`] - Listener notifications
//!
//! # Key Invariants
//!
//! - A stage completes once; its continuations run in FIFO order, each once
//! - Interceptors observe a command in chain order
//! - Only the primary owner compares versions of a remote update
//! - Expiration is never versioned nor replicated to other sites

// Core infrastructure
pub mod core;

// Continuation engine
pub mod invocation;

// Commands and per-execution state
pub mod commands;

// Interceptor chain
pub mod interceptors;

// Cross-site replication
pub mod xsite;

// Topology and routing
pub mod control;

// Collaborators
pub mod container;
pub mod notifications;
pub mod persistence;
pub mod transport;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, node};
pub use control::{routing, topology};
pub use invocation::{InvocationStage, Outcome, StageCompleter};
