//! Decomposition of bulk commands into per-key commands.

use super::{Interceptor, Next};
use crate::commands::context::InvocationContext;
use crate::commands::{Command, CommandKind, ReturnValue};
use crate::invocation::InvocationStage;
use bytes::Bytes;
use std::sync::Arc;

/// Splits `PutMap` into sequential `Put`s and `GetAll` into forked `Get`s.
///
/// Each per-key command runs through the whole chain, so every interceptor
/// sees single-key commands only.
#[derive(Debug, Default)]
pub struct BulkSplitInterceptor;

impl Interceptor for BulkSplitInterceptor {
    fn name(&self) -> &'static str {
        "BulkSplitInterceptor"
    }

    fn visit(&self, ctx: &Arc<InvocationContext>, cmd: &Arc<Command>, next: Next) -> InvocationStage {
        match cmd.kind() {
            CommandKind::PutMap { entries } => {
                let subs: Vec<_> = entries
                    .iter()
                    .map(|(key, value)| {
                        Arc::new(Command::with_flags(
                            CommandKind::Put {
                                key: key.clone(),
                                value: value.clone(),
                            },
                            cmd.flags(),
                        ))
                    })
                    .collect();
                let count = subs.len() as u64;
                next.invoke_sequentially(ctx, subs, move |_| Ok(ReturnValue::Count(count)))
            }
            CommandKind::GetAll { keys } => {
                let reads: Vec<(Bytes, InvocationStage)> = keys
                    .iter()
                    .map(|key| {
                        let get = Command::with_flags(CommandKind::Get { key: key.clone() }, cmd.flags());
                        (key.clone(), next.fork(ctx, Arc::new(get)))
                    })
                    .collect();
                collect_reads(reads)
            }
            _ => next.invoke(ctx, cmd),
        }
    }
}

/// Combine forked reads into one `Entries` result, in key order.
fn collect_reads(reads: Vec<(Bytes, InvocationStage)>) -> InvocationStage {
    reads.into_iter().fold(
        InvocationStage::wrap(ReturnValue::Entries(Vec::new())),
        |acc, (key, read)| {
            acc.then_compose(move |collected| {
                read.then_apply(move |value| {
                    let mut entries = match collected {
                        ReturnValue::Entries(entries) => entries,
                        _ => Vec::new(),
                    };
                    entries.push((key, value.value().cloned()));
                    Ok(ReturnValue::Entries(entries))
                })
            })
        },
    )
}
