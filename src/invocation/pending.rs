//! In-flight representation of an invocation stage.
//!
//! A [`PendingResult`] owns the continuation deque of a stage whose outcome is
//! not known yet. Completion drains the deque in FIFO order: each continuation
//! receives the outcome produced by the one before it. When a continuation
//! returns another pending stage, draining suspends and resumes from that
//! stage's completion.

use super::deque::HandlerDeque;
use super::stage::{InvocationStage, Outcome, Repr};
use crate::commands::context::InvocationContext;
use crate::commands::Command;
use crate::core::error::CacheError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Continuation receiving only the outcome.
pub(crate) type Handler = Box<dyn FnOnce(Outcome) -> InvocationStage + Send>;

/// Continuation receiving the context and command queued alongside it.
pub(crate) type ContextHandler =
    Box<dyn FnOnce(&Arc<InvocationContext>, &Arc<Command>, Outcome) -> InvocationStage + Send>;

/// One deque slot: a handler or one of its auxiliary arguments.
pub(crate) enum Slot {
    Handler(Handler),
    ContextHandler(ContextHandler),
    Context(Arc<InvocationContext>),
    Command(Arc<Command>),
}

/// A continuation taken out of (or refused by) the deque.
pub(crate) enum Continuation {
    Plain(Handler),
    WithContext(ContextHandler, Arc<InvocationContext>, Arc<Command>),
}

impl Continuation {
    /// Run the continuation.
    ///
    /// An immediate error returned for an errored input keeps the input error
    /// as a suppressed cause.
    pub(crate) fn run(self, outcome: Outcome) -> InvocationStage {
        let previous = outcome.as_ref().err().cloned();
        let next = match self {
            Self::Plain(handler) => handler(outcome),
            Self::WithContext(handler, ctx, command) => handler(&ctx, &command, outcome),
        };
        match (previous, next.repr) {
            (Some(previous), Repr::Failure(error)) => {
                InvocationStage::fail(error.with_suppressed(previous))
            }
            (_, repr) => InvocationStage { repr },
        }
    }
}

/// Completion cell and continuation queue of a pending stage.
pub struct PendingResult {
    deque: Mutex<HandlerDeque<Slot>>,
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl PendingResult {
    /// Create an uncompleted result with an open deque.
    pub(crate) fn new() -> Self {
        Self {
            deque: Mutex::new(HandlerDeque::new()),
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// Create a result that already failed; its deque is frozen from the start.
    pub(crate) fn failed(error: CacheError) -> Self {
        Self {
            deque: Mutex::new(HandlerDeque::frozen()),
            outcome: Mutex::new(Some(Err(error))),
            done: Condvar::new(),
        }
    }

    /// Check if the final outcome is available.
    pub fn is_done(&self) -> bool {
        self.outcome.lock().is_some()
    }

    /// Number of continuation slots waiting for completion.
    pub fn queued_slots(&self) -> usize {
        self.deque.lock().len()
    }

    /// Queue a continuation; hands it back if the deque is frozen.
    pub(crate) fn enqueue(&self, continuation: Continuation) -> Result<(), Continuation> {
        let mut deque = self.deque.lock();
        if deque.is_frozen() {
            return Err(continuation);
        }
        let pushed = match continuation {
            Continuation::Plain(handler) => deque.push_group([Slot::Handler(handler)]).is_ok(),
            Continuation::WithContext(handler, ctx, command) => deque
                .push_group([
                    Slot::ContextHandler(handler),
                    Slot::Context(ctx),
                    Slot::Command(command),
                ])
                .is_ok(),
        };
        debug_assert!(pushed, "open deque refused a push");
        Ok(())
    }

    /// Final outcome, waiting for it if necessary.
    ///
    /// Only blocks between the moment the deque freezes and the moment the
    /// draining thread publishes the outcome, or when called from a
    /// synchronous chain boundary.
    pub(crate) fn wait(&self) -> Outcome {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut outcome);
        }
    }

    /// Final outcome if already published.
    pub(crate) fn try_outcome(&self) -> Option<Outcome> {
        self.outcome.lock().clone()
    }

    /// Complete with `outcome` and drain queued continuations.
    ///
    /// Also called to resume draining once a nested stage completes; the
    /// outcome is published only after the deque froze.
    pub(crate) fn complete(self: &Arc<Self>, mut outcome: Outcome) {
        if self.is_done() {
            tracing::warn!("ignoring second completion of an invocation stage");
            return;
        }
        loop {
            let next = Self::poll_continuation(&mut self.deque.lock());
            let continuation = match next {
                None => {
                    self.publish(outcome);
                    return;
                }
                Some(Ok(continuation)) => continuation,
                Some(Err(error)) => {
                    outcome = Err(error);
                    continue;
                }
            };

            match continuation.run(outcome).repr {
                Repr::Success(value) => outcome = Ok(value),
                Repr::Failure(error) => outcome = Err(error),
                Repr::Pending(nested) => {
                    let this = Arc::clone(self);
                    let resume = Continuation::Plain(Box::new(move |nested_outcome: Outcome| {
                        this.complete(nested_outcome.clone());
                        InvocationStage::from_result(nested_outcome)
                    }));
                    match nested.enqueue(resume) {
                        // Draining continues once the nested stage completes.
                        Ok(()) => return,
                        Err(_) => outcome = nested.wait(),
                    }
                }
            }
        }
    }

    fn publish(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock();
        *slot = Some(outcome);
        self.done.notify_all();
    }

    fn poll_continuation(
        deque: &mut HandlerDeque<Slot>,
    ) -> Option<Result<Continuation, CacheError>> {
        match deque.poll()? {
            Slot::Handler(handler) => Some(Ok(Continuation::Plain(handler))),
            Slot::ContextHandler(handler) => match (deque.poll(), deque.poll()) {
                (Some(Slot::Context(ctx)), Some(Slot::Command(command))) => {
                    Some(Ok(Continuation::WithContext(handler, ctx, command)))
                }
                _ => Some(Err(CacheError::illegal_state(
                    "continuation queued without its context arguments",
                ))),
            },
            Slot::Context(_) | Slot::Command(_) => Some(Err(CacheError::illegal_state(
                "argument slot found where a continuation was expected",
            ))),
        }
    }
}

impl std::fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("queued_slots", &self.queued_slots())
            .field("done", &self.is_done())
            .finish()
    }
}

/// Completes the stage created by [`InvocationStage::deferred`].
///
/// Consumed by completion, so a stage completes at most once. Dropping a
/// completer that never completed fails the stage with
/// [`CacheError::Abandoned`].
pub struct StageCompleter {
    pending: Option<Arc<PendingResult>>,
}

impl StageCompleter {
    pub(crate) fn new(pending: Arc<PendingResult>) -> Self {
        Self {
            pending: Some(pending),
        }
    }

    /// Complete the stage with an outcome.
    pub fn complete(mut self, outcome: Outcome) {
        if let Some(pending) = self.pending.take() {
            pending.complete(outcome);
        }
    }

    /// Complete the stage successfully.
    pub fn succeed(self, value: crate::commands::ReturnValue) {
        self.complete(Ok(value));
    }

    /// Complete the stage with an error.
    pub fn fail(self, error: CacheError) {
        self.complete(Err(error));
    }
}

impl Drop for StageCompleter {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.complete(Err(CacheError::Abandoned));
        }
    }
}

impl std::fmt::Debug for StageCompleter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageCompleter")
            .field("completed", &self.pending.is_none())
            .finish()
    }
}
