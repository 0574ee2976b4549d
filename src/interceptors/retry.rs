//! Retry of commands that raced with a topology change.

use super::{Interceptor, Next};
use crate::commands::context::InvocationContext;
use crate::commands::{Command, CommandFlags, NO_TOPOLOGY};
use crate::control::topology::OwnershipOracle;
use crate::core::error::CacheError;
use crate::invocation::{InvocationStage, Outcome};
use std::sync::Arc;

/// Stamps commands with the current topology id and retries local commands
/// that fail with `OutdatedTopology`.
///
/// A retry drops the context entries of the command's keys, resets the state
/// the failed attempt attached to the command, sets
/// [`CommandFlags::COMMAND_RETRY`], moves the command to the newest topology
/// and runs the rest of the chain again. Without a configured bound the loop
/// ends only once the topology stops changing under the command.
pub struct TopologyRetryInterceptor {
    oracle: Arc<dyn OwnershipOracle>,
    max_retries: Option<u32>,
}

impl TopologyRetryInterceptor {
    pub fn new(oracle: Arc<dyn OwnershipOracle>, max_retries: Option<u32>) -> Self {
        Self { oracle, max_retries }
    }
}

impl Interceptor for TopologyRetryInterceptor {
    fn name(&self) -> &'static str {
        "TopologyRetryInterceptor"
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        if cmd.topology_id() == NO_TOPOLOGY {
            cmd.set_topology_id(self.oracle.topology_id());
        }
        // Remote originators refresh their topology and retry themselves.
        if !ctx.is_origin_local() {
            return next.invoke(ctx, cmd);
        }
        let attempts = Attempts {
            oracle: Arc::clone(&self.oracle),
            max_retries: self.max_retries,
            ctx: Arc::clone(ctx),
            cmd: Arc::clone(cmd),
            next,
        };
        attempts.run(0)
    }
}

/// Result of one attempt.
enum Step {
    Retry,
    Done(Outcome),
}

/// Attempts of one command.
struct Attempts {
    oracle: Arc<dyn OwnershipOracle>,
    max_retries: Option<u32>,
    ctx: Arc<InvocationContext>,
    cmd: Arc<Command>,
    next: Next,
}

impl Attempts {
    /// Attempts that complete inline are retried in a loop; only a suspended
    /// attempt continues from its continuation.
    fn run(self, mut retries: u32) -> InvocationStage {
        loop {
            let outcome = match self.next.invoke(&self.ctx, &self.cmd).into_outcome() {
                Ok(outcome) => outcome,
                Err(pending) => {
                    return pending.compose(move |outcome| match self.step(outcome, retries) {
                        Step::Retry => self.run(retries + 1),
                        Step::Done(outcome) => InvocationStage::from_result(outcome),
                    });
                }
            };
            match self.step(outcome, retries) {
                Step::Retry => retries += 1,
                Step::Done(outcome) => return InvocationStage::from_result(outcome),
            }
        }
    }

    fn step(&self, outcome: Outcome, retries: u32) -> Step {
        let error = match outcome {
            Err(error) if error.is_outdated_topology() => error,
            outcome => return Step::Done(outcome),
        };
        let cmd = &self.cmd;
        if self.max_retries.is_some_and(|max| retries >= max) {
            tracing::warn!(
                command = cmd.kind().name(),
                retries,
                "topology retries exhausted"
            );
            return Step::Done(Err(CacheError::RetriesExhausted {
                attempts: retries,
                last: Box::new(error),
            }));
        }

        let observed = match error.root() {
            CacheError::OutdatedTopology {
                current_topology, ..
            } => *current_topology,
            _ => NO_TOPOLOGY,
        };
        let topology_id = self
            .oracle
            .topology_id()
            .max(observed)
            .max(cmd.topology_id() + 1);
        tracing::debug!(
            command = cmd.kind().name(),
            from = cmd.topology_id(),
            to = topology_id,
            retry = retries + 1,
            "retrying after topology change"
        );

        self.ctx.remove_entries(&cmd.affected_keys());
        cmd.reset_attempt();
        cmd.add_flags(CommandFlags::COMMAND_RETRY);
        cmd.set_topology_id(topology_id);
        Step::Retry
    }
}
