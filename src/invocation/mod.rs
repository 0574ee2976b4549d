//! Invocation stages: the continuation engine every interceptor returns.
//!
//! - [`stage`] - `InvocationStage` and its composition algebra
//! - [`pending`] - in-flight completion cell and `StageCompleter`
//! - [`deque`] - freezable ring buffer of continuation slots

pub mod deque;
pub mod pending;
pub mod stage;

pub use pending::{PendingResult, StageCompleter};
pub use stage::{InvocationStage, Outcome, StageFuture};
