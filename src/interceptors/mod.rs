//! Interceptor chain dispatch.
//!
//! A chain is an immutable list of [`ChainNode`] cons cells built once per
//! configuration and shared by every concurrent execution. Each interceptor
//! receives an explicit [`Next`] token naming its position; it continues the
//! chain with [`Next::invoke`], short-circuits by returning a stage of its
//! own, or runs sub-commands from the top with [`Next::fork`] and
//! [`Next::invoke_sequentially`].
//!
//! - [`factory`] - chain assembly from configuration
//! - [`bulk`] - bulk command decomposition
//! - [`retry`] - retry after concurrent topology changes
//! - [`notification`] - listener events
//! - [`entry_wrapping`] - context entries and commit
//! - [`loader`] - loads from the persistence store
//! - [`distribution`] - ownership checks, forwarding and backups
//! - [`writer`] - writes to the persistence store
//! - [`call`] - applies commands to context entries

pub mod bulk;
pub mod call;
pub mod distribution;
pub mod entry_wrapping;
pub mod factory;
pub mod loader;
pub mod notification;
pub mod retry;
pub mod writer;

pub use factory::{ChainFactory, Components};

use crate::commands::context::InvocationContext;
use crate::commands::{Command, ReturnValue};
use crate::core::error::CacheResult;
use crate::invocation::{InvocationStage, Outcome};
use std::collections::VecDeque;
use std::sync::Arc;

/// One behavior contributed to command processing.
pub trait Interceptor: Send + Sync {
    /// Name shown in logs and chain listings.
    fn name(&self) -> &'static str;

    /// Process `cmd`. Call `next.invoke` at most once to continue the chain.
    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage;
}

/// Immutable cons cell of the chain.
pub struct ChainNode {
    interceptor: Arc<dyn Interceptor>,
    next: Option<Arc<ChainNode>>,
}

impl ChainNode {
    fn dispatch(
        node: &Arc<ChainNode>,
        head: &Arc<ChainNode>,
        ctx: &Arc<InvocationContext>,
        cmd: &Arc<Command>,
        depth: usize,
    ) -> InvocationStage {
        tracing::trace!(
            interceptor = node.interceptor.name(),
            depth,
            command = cmd.kind().name(),
            "visiting"
        );
        let next = Next {
            head: Arc::clone(head),
            remaining: node.next.clone(),
            depth: depth + 1,
        };
        node.interceptor.visit(ctx, cmd, next)
    }
}

/// Position of an interceptor in the chain.
///
/// Cheap to clone and to move into continuations.
#[derive(Clone)]
pub struct Next {
    head: Arc<ChainNode>,
    remaining: Option<Arc<ChainNode>>,
    depth: usize,
}

impl Next {
    /// Run the rest of the chain. Past the last interceptor the result is
    /// [`ReturnValue::Null`].
    pub fn invoke(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>) -> InvocationStage {
        match &self.remaining {
            Some(node) => ChainNode::dispatch(node, &self.head, ctx, cmd, self.depth),
            None => InvocationStage::null(),
        }
    }

    /// Run `sub` through the whole chain, independently of the current command.
    pub fn fork(&self, ctx: &Arc<InvocationContext>, sub: Arc<Command>) -> InvocationStage {
        tracing::trace!(command = sub.kind().name(), depth = self.depth, "forking");
        ChainNode::dispatch(&self.head, &self.head, ctx, &sub, 0)
    }

    /// Fork `subs` one at a time, in order.
    ///
    /// The first failure completes the returned stage and the remaining
    /// sub-commands never run. When all succeed, `finish` receives their
    /// results in order.
    pub fn invoke_sequentially<F>(
        &self,
        ctx: &Arc<InvocationContext>,
        subs: Vec<Arc<Command>>,
        finish: F,
    ) -> InvocationStage
    where
        F: FnOnce(Vec<ReturnValue>) -> CacheResult<ReturnValue> + Send + 'static,
    {
        let results = Vec::with_capacity(subs.len());
        run_sequence(self.clone(), Arc::clone(ctx), subs.into(), results, Box::new(finish))
    }

    /// Position of the interceptor holding this token; 1 is the first.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Check if no interceptor follows.
    pub fn is_last(&self) -> bool {
        self.remaining.is_none()
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("depth", &self.depth)
            .field(
                "remaining",
                &self.remaining.as_ref().map(|node| node.interceptor.name()),
            )
            .finish()
    }
}

type Finish = Box<dyn FnOnce(Vec<ReturnValue>) -> CacheResult<ReturnValue> + Send>;

fn run_sequence(
    next: Next,
    ctx: Arc<InvocationContext>,
    mut subs: VecDeque<Arc<Command>>,
    mut results: Vec<ReturnValue>,
    finish: Finish,
) -> InvocationStage {
    // Completed sub-commands are consumed in a loop; only a suspended one
    // resumes the sequence from its continuation.
    while let Some(sub) = subs.pop_front() {
        match next.fork(&ctx, sub).into_outcome() {
            Ok(Ok(value)) => results.push(value),
            Ok(Err(error)) => return InvocationStage::fail(error),
            Err(pending) => {
                return pending.then_compose(move |value| {
                    results.push(value);
                    run_sequence(next, ctx, subs, results, finish)
                });
            }
        }
    }
    InvocationStage::from_result(finish(results))
}

/// An assembled, immutable interceptor chain.
pub struct InterceptorChain {
    head: Option<Arc<ChainNode>>,
    names: Vec<&'static str>,
}

impl InterceptorChain {
    /// Build a chain running `interceptors` in order.
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        let names = interceptors.iter().map(|i| i.name()).collect();
        let head = interceptors
            .into_iter()
            .rev()
            .fold(None, |next, interceptor| {
                Some(Arc::new(ChainNode { interceptor, next }))
            });
        Self { head, names }
    }

    /// Run `cmd` through the chain.
    pub fn invoke(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>) -> InvocationStage {
        match &self.head {
            Some(head) => ChainNode::dispatch(head, head, ctx, cmd, 0),
            None => InvocationStage::null(),
        }
    }

    /// Run `cmd` and block until it completes.
    ///
    /// For synchronous callers outside the runtime only.
    pub fn invoke_blocking(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>) -> Outcome {
        self.invoke(ctx, cmd).get_blocking()
    }

    /// Run `cmd` and await its completion.
    pub async fn invoke_async(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>) -> Outcome {
        self.invoke(ctx, cmd).await
    }

    /// Interceptor names, top to bottom.
    pub fn interceptor_names(&self) -> &[&'static str] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.names)
            .finish()
    }
}
