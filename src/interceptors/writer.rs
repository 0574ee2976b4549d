//! Write-through to the persistence store.

use super::{Interceptor, Next};
use crate::commands::context::InvocationContext;
use crate::commands::{Command, CommandFlags};
use crate::invocation::InvocationStage;
use crate::persistence::{PersistenceStore, StoredEntry};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Writes the entries a successful command changed to the persistence store.
///
/// Removals with cross-site metadata are stored as tombstones, others are
/// deleted. Commands marked failed, e.g. a discarded cross-site update,
/// write nothing.
pub struct CacheWriterInterceptor {
    store: Arc<dyn PersistenceStore>,
    runtime: Handle,
}

impl CacheWriterInterceptor {
    pub fn new(store: Arc<dyn PersistenceStore>, runtime: Handle) -> Self {
        Self { store, runtime }
    }
}

impl Interceptor for CacheWriterInterceptor {
    fn name(&self) -> &'static str {
        "CacheWriterInterceptor"
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        if !cmd.is_write() || cmd.has_flag(CommandFlags::SKIP_CACHE_STORE) {
            return next.invoke(ctx, cmd);
        }

        let store = Arc::clone(&self.store);
        let runtime = self.runtime.clone();
        next.invoke(ctx, cmd)
            .then_compose_with(ctx, cmd, move |ctx, cmd, value| {
                if !cmd.is_successful() {
                    return InvocationStage::wrap(value);
                }
                let changed: Vec<_> = ctx
                    .entries_for(&cmd.affected_keys())
                    .into_iter()
                    .filter(|entry| entry.is_changed())
                    .collect();
                if changed.is_empty() {
                    return InvocationStage::wrap(value);
                }

                let write = async move {
                    for entry in changed {
                        match (entry.value, entry.irac) {
                            (Some(stored), irac) => {
                                store.store(entry.key, StoredEntry::live(stored, irac)).await?
                            }
                            (None, Some(tombstone)) => {
                                store.store(entry.key, StoredEntry::tombstone(tombstone)).await?
                            }
                            (None, None) => store.delete(entry.key).await?,
                        }
                    }
                    Ok(value)
                };
                InvocationStage::from_future(write, &runtime)
            })
    }
}
