//! Context entry lookup and commit.

use super::{Interceptor, Next};
use crate::commands::context::{CacheEntry, InvocationContext};
use crate::commands::Command;
use crate::container::DataContainer;
use crate::invocation::InvocationStage;
use std::sync::Arc;

/// Wraps container entries into the context before the command runs and
/// commits the changed ones after it succeeded.
///
/// Absent keys are wrapped with the tombstone of their last removal, so the
/// cross-site resolver can order a remote update against it. Only the
/// command's own keys are committed; sub-commands share their parent's
/// context.
pub struct EntryWrappingInterceptor {
    container: Arc<DataContainer>,
}

impl EntryWrappingInterceptor {
    pub fn new(container: Arc<DataContainer>) -> Self {
        Self { container }
    }

    fn wrap(&self, ctx: &InvocationContext, cmd: &Command) {
        for key in cmd.affected_keys() {
            if ctx.contains(&key) {
                continue;
            }
            let entry = match self.container.get(&key) {
                Some(internal) => CacheEntry::existing(key, internal.value, internal.irac),
                None => {
                    let tombstone = self.container.tombstone(&key);
                    let mut entry = CacheEntry::absent(key);
                    entry.irac = tombstone;
                    entry
                }
            };
            ctx.put_entry(entry);
        }
    }
}

impl Interceptor for EntryWrappingInterceptor {
    fn name(&self) -> &'static str {
        "EntryWrappingInterceptor"
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        self.wrap(ctx, cmd);
        if !cmd.is_write() {
            return next.invoke(ctx, cmd);
        }

        let container = Arc::clone(&self.container);
        next.invoke(ctx, cmd)
            .then_accept_with(ctx, cmd, move |ctx, cmd, _| {
                commit(&container, ctx, cmd);
                Ok(())
            })
    }
}

fn commit(container: &DataContainer, ctx: &InvocationContext, cmd: &Command) {
    if !cmd.is_successful() {
        return;
    }
    for entry in ctx.entries_for(&cmd.affected_keys()) {
        if !entry.is_changed() {
            continue;
        }
        tracing::trace!(key = ?entry.key, removed = entry.value.is_none(), "committing entry");
        match entry.value {
            Some(value) => container.put(entry.key, value, entry.irac),
            None => {
                container.remove(&entry.key, entry.irac);
            }
        }
    }
}
