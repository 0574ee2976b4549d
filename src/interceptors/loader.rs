//! Loading of entries missing from memory.

use super::{Interceptor, Next};
use crate::commands::context::{CacheEntry, EntryFlags, InvocationContext};
use crate::commands::{Command, CommandFlags, ReturnValue};
use crate::invocation::InvocationStage;
use crate::persistence::PersistenceStore;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Loads keys absent from the container from the persistence store before
/// the command runs.
pub struct CacheLoaderInterceptor {
    store: Arc<dyn PersistenceStore>,
    runtime: Handle,
}

impl CacheLoaderInterceptor {
    pub fn new(store: Arc<dyn PersistenceStore>, runtime: Handle) -> Self {
        Self { store, runtime }
    }
}

impl Interceptor for CacheLoaderInterceptor {
    fn name(&self) -> &'static str {
        "CacheLoaderInterceptor"
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        if cmd.has_flag(CommandFlags::SKIP_CACHE_LOAD) || cmd.is_expiration() {
            return next.invoke(ctx, cmd);
        }

        let missing: Vec<_> = cmd
            .affected_keys()
            .into_iter()
            .filter(|key| {
                ctx.lookup(key).map_or(true, |entry| {
                    entry.is_absent()
                        && entry.irac.is_none()
                        && !entry.flags.contains(EntryFlags::LOADED)
                })
            })
            .collect();
        if missing.is_empty() {
            return next.invoke(ctx, cmd);
        }

        let store = Arc::clone(&self.store);
        let target = Arc::clone(ctx);
        let load = async move {
            for key in missing {
                match store.load(key.clone()).await? {
                    Some(stored) => {
                        tracing::trace!(key = ?key, tombstone = stored.is_tombstone(), "loaded entry from store");
                        let mut entry = match stored.value {
                            Some(value) => CacheEntry::existing(key, value, stored.irac),
                            None => {
                                let mut entry = CacheEntry::absent(key);
                                entry.irac = stored.irac;
                                entry
                            }
                        };
                        entry.flags.insert(EntryFlags::LOADED);
                        target.put_entry(entry);
                    }
                    None => {
                        target.update_or_absent(&key, |entry| entry.flags.insert(EntryFlags::LOADED));
                    }
                }
            }
            Ok(ReturnValue::Null)
        };

        InvocationStage::from_future(load, &self.runtime)
            .then_compose_with(ctx, cmd, move |ctx, cmd, _| next.invoke(ctx, cmd))
    }
}
