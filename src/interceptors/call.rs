//! Terminal interceptor.

use super::{Interceptor, Next};
use crate::commands::context::InvocationContext;
use crate::commands::{Command, CommandFlags, CommandKind, ReturnValue};
use crate::core::error::CacheError;
use crate::invocation::InvocationStage;
use crate::notifications::CacheNotifier;
use crate::xsite::version::IracMetadata;
use bytes::Bytes;
use std::sync::Arc;

/// Applies the command to the entries wrapped in the context.
///
/// Writes only change context entries; interceptors above commit them.
/// Pre-events of local writes fire here, where the previous value is known:
/// a removal of an absent key changes nothing and fires nothing.
#[derive(Default)]
pub struct CallInterceptor {
    notifier: Option<Arc<dyn CacheNotifier>>,
}

impl CallInterceptor {
    pub fn new(notifier: Arc<dyn CacheNotifier>) -> Self {
        Self {
            notifier: Some(notifier),
        }
    }

    fn notify_before(&self, ctx: &InvocationContext, cmd: &Command) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        match cmd.kind() {
            CommandKind::Put { key, value } => notifier.notify_changed(key, Some(value), true),
            CommandKind::Remove { key } | CommandKind::RemoveExpired { key } => {
                if ctx.lookup(key).is_some_and(|entry| entry.value.is_some()) {
                    notifier.notify_changed(key, None, true);
                }
            }
            _ => {}
        }
    }
}

impl Interceptor for CallInterceptor {
    fn name(&self) -> &'static str {
        "CallInterceptor"
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, _next: Next) -> InvocationStage {
        if !cmd.is_successful() {
            return InvocationStage::null();
        }
        let notify = !cmd.has_flag(CommandFlags::SKIP_LISTENER_NOTIFICATION);
        match cmd.kind() {
            CommandKind::Get { key } => {
                let value = ctx.lookup(key).and_then(|entry| entry.value);
                InvocationStage::wrap(value.map_or(ReturnValue::Null, ReturnValue::Value))
            }
            CommandKind::Prepare { modifications, .. } => {
                for modification in modifications {
                    if modification.is_successful() {
                        if notify {
                            self.notify_before(ctx, modification);
                        }
                        apply(ctx, modification, cmd);
                    }
                }
                InvocationStage::null()
            }
            CommandKind::GetAll { .. } | CommandKind::PutMap { .. } => InvocationStage::fail(
                CacheError::illegal_state("bulk command reached the end of the chain"),
            ),
            _ => {
                if notify {
                    self.notify_before(ctx, cmd);
                }
                InvocationStage::wrap(apply(ctx, cmd, cmd))
            }
        }
    }
}

/// Apply one write. Cross-site metadata is read from `versions`, which is the
/// enclosing prepare for transactional modifications.
fn apply(ctx: &InvocationContext, cmd: &Command, versions: &Command) -> ReturnValue {
    match cmd.kind() {
        CommandKind::Put { key, value } => {
            let irac = versions.irac_metadata(key);
            let previous = ctx.update_or_absent(key, |entry| {
                let previous = entry.value.clone();
                entry.set_value(value.clone());
                if irac.is_some() {
                    entry.irac = irac;
                }
                previous
            });
            ReturnValue::Previous(previous)
        }
        CommandKind::Remove { key } => {
            let irac = versions.irac_metadata(key);
            let previous = ctx.update_or_absent(key, |entry| {
                let previous = entry.value.clone();
                if previous.is_some() {
                    entry.remove();
                    if irac.is_some() {
                        entry.irac = irac;
                    }
                }
                previous
            });
            if previous.is_none() {
                cmd.fail();
            }
            ReturnValue::Previous(previous)
        }
        CommandKind::RemoveExpired { key } => {
            let previous = ctx.update_or_absent(key, |entry| {
                let previous = entry.value.clone();
                if previous.is_some() {
                    entry.remove();
                    entry.irac = None;
                }
                previous
            });
            ReturnValue::Bool(previous.is_some())
        }
        CommandKind::IracUpdate {
            key,
            value,
            metadata,
        } => {
            apply_remote(ctx, key, value.as_ref(), metadata.clone());
            ReturnValue::Null
        }
        CommandKind::Get { .. }
        | CommandKind::GetAll { .. }
        | CommandKind::PutMap { .. }
        | CommandKind::Prepare { .. } => ReturnValue::Null,
    }
}

fn apply_remote(ctx: &InvocationContext, key: &Bytes, value: Option<&Bytes>, metadata: IracMetadata) {
    ctx.update_or_absent(key, |entry| {
        if entry.is_discarded() {
            return;
        }
        match value {
            Some(value) => entry.set_value(value.clone()),
            None => entry.remove(),
        }
        entry.irac = Some(metadata);
    });
}
