//! Listener notifications.

use super::{Interceptor, Next};
use crate::commands::context::InvocationContext;
use crate::commands::{Command, CommandFlags};
use crate::invocation::InvocationStage;
use crate::notifications::CacheNotifier;
use std::sync::Arc;

/// Fires post-events for the entries a successful write changed.
///
/// Pre-events fire where the previous state of the entry is known: in the
/// call interceptor for local writes and in the cross-site resolver once a
/// remote update is accepted.
pub struct NotificationInterceptor {
    notifier: Arc<dyn CacheNotifier>,
}

impl NotificationInterceptor {
    pub fn new(notifier: Arc<dyn CacheNotifier>) -> Self {
        Self { notifier }
    }
}

impl Interceptor for NotificationInterceptor {
    fn name(&self) -> &'static str {
        "NotificationInterceptor"
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        if !cmd.is_write() || cmd.has_flag(CommandFlags::SKIP_LISTENER_NOTIFICATION) {
            return next.invoke(ctx, cmd);
        }

        let notifier = Arc::clone(&self.notifier);
        next.invoke(ctx, cmd)
            .then_accept_with(ctx, cmd, move |ctx, cmd, _| {
                if !cmd.is_successful() {
                    return Ok(());
                }
                for entry in ctx.entries_for(&cmd.affected_keys()) {
                    if entry.is_changed() {
                        notifier.notify_changed(&entry.key, entry.value.as_ref(), false);
                    }
                }
                Ok(())
            })
    }
}
