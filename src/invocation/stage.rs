//! The invocation stage and its composition algebra.
//!
//! Most commands complete on the in-memory fast path, so a stage has three
//! representations: an already-successful value, an already-failed error and
//! an in-flight [`PendingResult`]. Composition on a completed stage runs the
//! handler inline; composition on a pending stage queues it.

use super::pending::{Continuation, PendingResult, StageCompleter};
use crate::commands::context::InvocationContext;
use crate::commands::{Command, ReturnValue};
use crate::core::error::{CacheError, CacheResult};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Terminal value or error of a stage.
pub type Outcome = CacheResult<ReturnValue>;

pub(crate) enum Repr {
    Success(ReturnValue),
    Failure(CacheError),
    Pending(Arc<PendingResult>),
}

/// Eventual outcome of processing a command through the rest of the chain.
///
/// Composition methods consume the stage and return the stage representing
/// the composed computation. On a pending stage that is the same underlying
/// result with the handler queued, so handlers composed one after another
/// form a pipeline.
#[must_use = "an invocation stage does nothing unless composed or awaited"]
pub struct InvocationStage {
    pub(crate) repr: Repr,
}

impl InvocationStage {
    /// A stage that already completed with `value`.
    pub fn wrap(value: ReturnValue) -> Self {
        Self {
            repr: Repr::Success(value),
        }
    }

    /// A stage that already completed with [`ReturnValue::Null`].
    pub fn null() -> Self {
        Self::wrap(ReturnValue::Null)
    }

    /// A stage that already failed with `error`.
    pub fn fail(error: CacheError) -> Self {
        Self {
            repr: Repr::Failure(error),
        }
    }

    /// A completed stage holding `outcome`.
    pub fn from_result(outcome: Outcome) -> Self {
        match outcome {
            Ok(value) => Self::wrap(value),
            Err(error) => Self::fail(error),
        }
    }

    /// A pending stage completed through the returned [`StageCompleter`].
    pub fn deferred() -> (Self, StageCompleter) {
        let pending = Arc::new(PendingResult::new());
        let completer = StageCompleter::new(Arc::clone(&pending));
        (
            Self {
                repr: Repr::Pending(pending),
            },
            completer,
        )
    }

    /// A stage backed by `future`.
    ///
    /// The future is polled once inline; a future that is immediately ready
    /// yields a completed stage without touching the runtime. Otherwise it is
    /// spawned on `runtime` and completes the stage from there.
    pub fn from_future<F>(future: F, runtime: &Handle) -> Self
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let _entered = runtime.enter();
        let mut future = Box::pin(future);
        let waker = futures::task::noop_waker();
        let mut cx = TaskContext::from_waker(&waker);
        if let Poll::Ready(outcome) = future.as_mut().poll(&mut cx) {
            return Self::from_result(outcome);
        }

        let (stage, completer) = Self::deferred();
        runtime.spawn(async move {
            completer.complete(future.await);
        });
        stage
    }

    /// A stage that already failed, backed by a frozen in-flight result.
    ///
    /// Behaves like [`InvocationStage::fail`]; used where a stage must expose
    /// a pending representation that can never accept continuations.
    pub fn failed_pending(error: CacheError) -> Self {
        Self {
            repr: Repr::Pending(Arc::new(PendingResult::failed(error))),
        }
    }

    /// Check if the stage reached a terminal state.
    pub fn is_done(&self) -> bool {
        match &self.repr {
            Repr::Success(_) | Repr::Failure(_) => true,
            Repr::Pending(pending) => pending.is_done(),
        }
    }

    /// Check if the stage is backed by an in-flight result.
    pub fn is_pending(&self) -> bool {
        matches!(self.repr, Repr::Pending(_))
    }

    /// The outcome if the stage is done, without blocking.
    pub fn try_outcome(&self) -> Option<Outcome> {
        match &self.repr {
            Repr::Success(value) => Some(Ok(value.clone())),
            Repr::Failure(error) => Some(Err(error.clone())),
            Repr::Pending(pending) => pending.try_outcome(),
        }
    }

    /// The outcome of a done stage, or the stage itself while still pending.
    pub fn into_outcome(self) -> Result<Outcome, InvocationStage> {
        match self.repr {
            Repr::Success(value) => Ok(Ok(value)),
            Repr::Failure(error) => Ok(Err(error)),
            Repr::Pending(pending) => match pending.try_outcome() {
                Some(outcome) => Ok(outcome),
                None => Err(Self {
                    repr: Repr::Pending(pending),
                }),
            },
        }
    }

    /// Block the calling thread until the stage completes.
    ///
    /// Only for synchronous chain boundaries; never call it from a
    /// continuation or from a runtime worker that must drive the stage.
    pub fn get_blocking(self) -> Outcome {
        match self.repr {
            Repr::Success(value) => Ok(value),
            Repr::Failure(error) => Err(error),
            Repr::Pending(pending) => pending.wait(),
        }
    }

    // ------------------------------------------------------------------------
    // Composition
    // ------------------------------------------------------------------------

    /// Run `handler` with the outcome once this stage completes.
    ///
    /// The stage returned by the handler is flattened into the result. If the
    /// handler fails immediately while handling a different error, that error
    /// is kept as a suppressed cause.
    pub fn compose<F>(self, handler: F) -> Self
    where
        F: FnOnce(Outcome) -> InvocationStage + Send + 'static,
    {
        self.add(Continuation::Plain(Box::new(handler)))
    }

    /// Map the success value; skipped for errors.
    pub fn then_apply<F>(self, f: F) -> Self
    where
        F: FnOnce(ReturnValue) -> CacheResult<ReturnValue> + Send + 'static,
    {
        self.compose(move |outcome| match outcome {
            Ok(value) => Self::from_result(f(value)),
            Err(error) => Self::fail(error),
        })
    }

    /// Observe the success value, keeping it; skipped for errors.
    pub fn then_accept<F>(self, f: F) -> Self
    where
        F: FnOnce(&ReturnValue) -> CacheResult<()> + Send + 'static,
    {
        self.compose(move |outcome| match outcome {
            Ok(value) => match f(&value) {
                Ok(()) => Self::wrap(value),
                Err(error) => Self::fail(error),
            },
            Err(error) => Self::fail(error),
        })
    }

    /// Chain another stage after success; skipped for errors.
    pub fn then_compose<F>(self, f: F) -> Self
    where
        F: FnOnce(ReturnValue) -> InvocationStage + Send + 'static,
    {
        self.compose(move |outcome| match outcome {
            Ok(value) => f(value),
            Err(error) => Self::fail(error),
        })
    }

    /// Recover from an error; skipped for success.
    pub fn exceptionally<F>(self, f: F) -> Self
    where
        F: FnOnce(CacheError) -> CacheResult<ReturnValue> + Send + 'static,
    {
        self.compose(move |outcome| match outcome {
            Ok(value) => Self::wrap(value),
            Err(error) => Self::from_result(f(error)),
        })
    }

    /// Recover from an error with another stage; skipped for success.
    pub fn exceptionally_compose<F>(self, f: F) -> Self
    where
        F: FnOnce(CacheError) -> InvocationStage + Send + 'static,
    {
        self.compose(move |outcome| match outcome {
            Ok(value) => Self::wrap(value),
            Err(error) => f(error),
        })
    }

    /// Map the outcome, whatever it is.
    pub fn handle<F>(self, f: F) -> Self
    where
        F: FnOnce(Outcome) -> CacheResult<ReturnValue> + Send + 'static,
    {
        self.compose(move |outcome| Self::from_result(f(outcome)))
    }

    /// Observe the outcome, whatever it is, and pass it on unchanged.
    pub fn when_complete<F>(self, f: F) -> Self
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        self.compose(move |outcome| {
            f(&outcome);
            Self::from_result(outcome)
        })
    }

    // ------------------------------------------------------------------------
    // Composition with context arguments
    // ------------------------------------------------------------------------

    /// Like [`compose`](Self::compose), handing `ctx` and `command` to the
    /// handler. They are queued as separate slots, so a handler that captures
    /// nothing costs no allocation.
    pub fn compose_with<F>(self, ctx: &Arc<InvocationContext>, command: &Arc<Command>, f: F) -> Self
    where
        F: FnOnce(&Arc<InvocationContext>, &Arc<Command>, Outcome) -> InvocationStage
            + Send
            + 'static,
    {
        self.add(Continuation::WithContext(
            Box::new(f),
            Arc::clone(ctx),
            Arc::clone(command),
        ))
    }

    /// Map the success value with the context at hand.
    pub fn then_apply_with<F>(self, ctx: &Arc<InvocationContext>, command: &Arc<Command>, f: F) -> Self
    where
        F: FnOnce(&Arc<InvocationContext>, &Arc<Command>, ReturnValue) -> CacheResult<ReturnValue>
            + Send
            + 'static,
    {
        self.compose_with(ctx, command, move |ctx, command, outcome| match outcome {
            Ok(value) => Self::from_result(f(ctx, command, value)),
            Err(error) => Self::fail(error),
        })
    }

    /// Observe the success value with the context at hand.
    pub fn then_accept_with<F>(self, ctx: &Arc<InvocationContext>, command: &Arc<Command>, f: F) -> Self
    where
        F: FnOnce(&Arc<InvocationContext>, &Arc<Command>, &ReturnValue) -> CacheResult<()>
            + Send
            + 'static,
    {
        self.compose_with(ctx, command, move |ctx, command, outcome| match outcome {
            Ok(value) => match f(ctx, command, &value) {
                Ok(()) => Self::wrap(value),
                Err(error) => Self::fail(error),
            },
            Err(error) => Self::fail(error),
        })
    }

    /// Chain another stage after success with the context at hand.
    pub fn then_compose_with<F>(self, ctx: &Arc<InvocationContext>, command: &Arc<Command>, f: F) -> Self
    where
        F: FnOnce(&Arc<InvocationContext>, &Arc<Command>, ReturnValue) -> InvocationStage
            + Send
            + 'static,
    {
        self.compose_with(ctx, command, move |ctx, command, outcome| match outcome {
            Ok(value) => f(ctx, command, value),
            Err(error) => Self::fail(error),
        })
    }

    /// Observe the outcome with the context at hand.
    pub fn when_complete_with<F>(self, ctx: &Arc<InvocationContext>, command: &Arc<Command>, f: F) -> Self
    where
        F: FnOnce(&Arc<InvocationContext>, &Arc<Command>, &Outcome) + Send + 'static,
    {
        self.compose_with(ctx, command, move |ctx, command, outcome| {
            f(ctx, command, &outcome);
            Self::from_result(outcome)
        })
    }

    fn add(self, continuation: Continuation) -> Self {
        match self.repr {
            Repr::Success(value) => continuation.run(Ok(value)),
            Repr::Failure(error) => continuation.run(Err(error)),
            Repr::Pending(pending) => match pending.enqueue(continuation) {
                Ok(()) => Self {
                    repr: Repr::Pending(pending),
                },
                // Frozen: the outcome is published (or about to be), so the
                // continuation runs now and its result becomes a new stage.
                Err(continuation) => continuation.run(pending.wait()),
            },
        }
    }
}

impl std::fmt::Debug for InvocationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.repr {
            Repr::Success(value) => f.debug_tuple("Success").field(value).finish(),
            Repr::Failure(error) => f.debug_tuple("Failure").field(error).finish(),
            Repr::Pending(pending) => f.debug_tuple("Pending").field(pending).finish(),
        }
    }
}

impl From<Outcome> for InvocationStage {
    fn from(outcome: Outcome) -> Self {
        Self::from_result(outcome)
    }
}

// ============================================================================
// Async bridge
// ============================================================================

/// Future resolving to a stage's outcome.
#[derive(Debug)]
pub struct StageFuture {
    state: StageFutureState,
}

#[derive(Debug)]
enum StageFutureState {
    Ready(Option<Outcome>),
    Waiting(oneshot::Receiver<Outcome>),
}

impl IntoFuture for InvocationStage {
    type Output = Outcome;
    type IntoFuture = StageFuture;

    fn into_future(self) -> StageFuture {
        let state = match self.repr {
            Repr::Success(value) => StageFutureState::Ready(Some(Ok(value))),
            Repr::Failure(error) => StageFutureState::Ready(Some(Err(error))),
            pending @ Repr::Pending(_) => {
                let (tx, rx) = oneshot::channel();
                let _observer = Self { repr: pending }.when_complete(move |outcome| {
                    let _ = tx.send(outcome.clone());
                });
                StageFutureState::Waiting(rx)
            }
        };
        StageFuture { state }
    }
}

impl Future for StageFuture {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Outcome> {
        match &mut self.state {
            StageFutureState::Ready(outcome) => Poll::Ready(
                outcome
                    .take()
                    .unwrap_or_else(|| Err(CacheError::illegal_state("stage future polled after completion"))),
            ),
            StageFutureState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(CacheError::Abandoned))),
        }
    }
}
