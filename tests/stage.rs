//! Invocation stage tests.

mod common;

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use xsite_cache::commands::context::InvocationContext;
use xsite_cache::commands::{Command, ReturnValue};
use xsite_cache::core::error::CacheError;
use xsite_cache::invocation::InvocationStage;

fn count(n: u64) -> ReturnValue {
    ReturnValue::Count(n)
}

fn increment(value: ReturnValue) -> Result<ReturnValue, CacheError> {
    match value {
        ReturnValue::Count(n) => Ok(ReturnValue::Count(n + 1)),
        other => Err(CacheError::application(format!("not a count: {other:?}"))),
    }
}

// ============================================================================
// Completed stages
// ============================================================================

#[test]
fn completed_stage_composes_inline() {
    let stage = InvocationStage::wrap(count(1))
        .then_apply(increment)
        .then_apply(increment);
    assert!(!stage.is_pending());
    assert_eq!(stage.try_outcome(), Some(Ok(count(3))));
}

#[test]
fn errors_skip_success_handlers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let stage = InvocationStage::fail(CacheError::application("boom")).then_apply(move |value| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(stage.get_blocking(), Err(CacheError::application("boom")));
}

#[test]
fn exceptionally_recovers() {
    let stage = InvocationStage::fail(CacheError::application("boom"))
        .exceptionally(|_| Ok(count(0)))
        .then_apply(increment);
    assert_eq!(stage.get_blocking(), Ok(count(1)));
}

#[test]
fn null_is_the_empty_value() {
    assert_eq!(InvocationStage::null().get_blocking(), Ok(ReturnValue::Null));
}

// ============================================================================
// Deferred stages
// ============================================================================

#[test]
fn continuations_run_in_order_once_completed() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (stage, completer) = InvocationStage::deferred();

    let mut stage = stage;
    for i in 0..20 {
        let log = Arc::clone(&log);
        stage = stage.then_accept(move |_| {
            log.lock().push(i);
            Ok(())
        });
    }
    assert!(stage.is_pending());
    assert!(!stage.is_done());
    assert!(log.lock().is_empty());

    completer.succeed(count(7));
    assert_eq!(*log.lock(), (0..20).collect::<Vec<_>>());
    assert_eq!(stage.get_blocking(), Ok(count(7)));
}

#[test]
fn each_continuation_sees_the_previous_outcome() {
    let (stage, completer) = InvocationStage::deferred();
    let stage = stage
        .then_apply(increment)
        .then_apply(|_| Err(CacheError::application("second")))
        .exceptionally(|error| {
            assert_eq!(error, CacheError::application("second"));
            Ok(count(100))
        })
        .then_apply(increment);
    completer.succeed(count(1));
    assert_eq!(stage.get_blocking(), Ok(count(101)));
}

#[test]
fn continuation_added_after_completion_runs_against_outcome() {
    let (stage, completer) = InvocationStage::deferred();
    let stage = stage.then_apply(increment);
    completer.succeed(count(1));

    // The deque is frozen now; the handler runs immediately.
    let late = stage.then_apply(increment);
    assert!(late.is_done());
    assert_eq!(late.get_blocking(), Ok(count(3)));
}

#[test]
fn completion_races_with_composition() {
    const HANDLERS: usize = 2_000;

    let log = Arc::new(Mutex::new(Vec::with_capacity(HANDLERS)));
    let (stage, completer) = InvocationStage::deferred();

    let composer = {
        let log = Arc::clone(&log);
        std::thread::spawn(move || {
            let mut stage = stage;
            for i in 0..HANDLERS {
                let log = Arc::clone(&log);
                stage = stage.then_accept(move |_| {
                    log.lock().push(i);
                    Ok(())
                });
            }
            stage.get_blocking()
        })
    };
    std::thread::sleep(Duration::from_micros(200));
    completer.succeed(count(1));

    assert_eq!(composer.join().unwrap(), Ok(count(1)));
    assert_eq!(*log.lock(), (0..HANDLERS).collect::<Vec<_>>());
}

#[test]
fn nested_pending_stage_suspends_draining() {
    let (outer, outer_completer) = InvocationStage::deferred();
    let (inner, inner_completer) = InvocationStage::deferred();
    let after = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&after);
    let stage = outer
        .then_compose(move |_| inner)
        .then_apply(move |value| {
            seen.fetch_add(1, Ordering::SeqCst);
            increment(value)
        });

    outer_completer.succeed(count(1));
    assert!(!stage.is_done());
    assert_eq!(after.load(Ordering::SeqCst), 0);

    inner_completer.succeed(count(10));
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(stage.get_blocking(), Ok(count(11)));
}

#[test]
fn dropped_completer_abandons_stage() {
    let (stage, completer) = InvocationStage::deferred();
    drop(completer);
    assert_eq!(stage.get_blocking(), Err(CacheError::Abandoned));
}

#[test]
fn failed_pending_rejects_continuations_but_runs_them() {
    let stage = InvocationStage::failed_pending(CacheError::application("early"));
    assert!(stage.is_pending());
    assert!(stage.is_done());
    let recovered = stage.exceptionally(|_| Ok(count(5)));
    assert_eq!(recovered.get_blocking(), Ok(count(5)));
}

// ============================================================================
// Composition laws
// ============================================================================

fn double(value: ReturnValue) -> InvocationStage {
    InvocationStage::from_result(match value {
        ReturnValue::Count(n) => Ok(ReturnValue::Count(n * 2)),
        other => Ok(other),
    })
}

fn deferred_plus_three(value: ReturnValue) -> InvocationStage {
    let (stage, completer) = InvocationStage::deferred();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(2));
        completer.complete(match value {
            ReturnValue::Count(n) => Ok(ReturnValue::Count(n + 3)),
            other => Ok(other),
        });
    });
    stage
}

#[test]
fn composition_is_associative() {
    let left = InvocationStage::wrap(count(1))
        .then_compose(double)
        .then_compose(deferred_plus_three);
    let right =
        InvocationStage::wrap(count(1)).then_compose(|value| double(value).then_compose(deferred_plus_three));
    assert_eq!(left.get_blocking(), right.get_blocking());

    let left = deferred_plus_three(count(1))
        .then_compose(deferred_plus_three)
        .then_compose(double);
    let right = deferred_plus_three(count(1))
        .then_compose(|value| deferred_plus_three(value).then_compose(double));
    assert_eq!(left.get_blocking(), Ok(count(14)));
    assert_eq!(right.get_blocking(), Ok(count(14)));
}

// ============================================================================
// Suppression
// ============================================================================

#[test]
fn handler_error_keeps_input_error_as_suppressed() {
    let stage = InvocationStage::fail(CacheError::application("first"))
        .handle(|_| Err(CacheError::application("second")));
    let error = stage.get_blocking().unwrap_err();
    assert_eq!(error.root(), &CacheError::application("second"));
    assert_eq!(error.suppressed(), &[CacheError::application("first")]);
}

#[test]
fn suppressed_errors_accumulate_on_pending_stages() {
    let (stage, completer) = InvocationStage::deferred();
    let stage = stage
        .exceptionally_compose(|_| InvocationStage::fail(CacheError::application("second")))
        .handle(|_| Err(CacheError::application("third")));
    completer.fail(CacheError::application("first"));

    let error = stage.get_blocking().unwrap_err();
    assert_eq!(error.root(), &CacheError::application("third"));
    assert_eq!(error.suppressed().len(), 1);
    let second = &error.suppressed()[0];
    assert_eq!(second.root(), &CacheError::application("second"));
    assert_eq!(second.suppressed(), &[CacheError::application("first")]);
}

#[test]
fn rethrowing_the_same_error_adds_nothing() {
    let stage = InvocationStage::fail(CacheError::application("same")).handle(|outcome| outcome);
    let error = stage.get_blocking().unwrap_err();
    assert!(error.suppressed().is_empty());
}

// ============================================================================
// Context-carrying composition
// ============================================================================

#[test]
fn context_handlers_receive_queued_arguments() {
    let ctx = Arc::new(InvocationContext::local());
    let cmd = Arc::new(Command::get(Bytes::from_static(b"k")));
    let (stage, completer) = InvocationStage::deferred();

    let (expected_ctx, expected_cmd) = (Arc::clone(&ctx), Arc::clone(&cmd));
    let stage = stage.then_apply_with(&ctx, &cmd, move |ctx, cmd, value| {
        assert!(Arc::ptr_eq(ctx, &expected_ctx));
        assert!(Arc::ptr_eq(cmd, &expected_cmd));
        increment(value)
    });
    let observed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&observed);
    let stage = stage.when_complete_with(&ctx, &cmd, move |_, _, outcome| {
        assert!(outcome.is_ok());
        seen.fetch_add(1, Ordering::SeqCst);
    });

    completer.succeed(count(1));
    assert_eq!(stage.get_blocking(), Ok(count(2)));
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Futures
// ============================================================================

#[test]
fn ready_future_yields_completed_stage() {
    let runtime = common::runtime();
    let stage = InvocationStage::from_future(async { Ok(count(1)) }, runtime.handle());
    assert!(!stage.is_pending());
    assert_eq!(stage.get_blocking(), Ok(count(1)));
}

#[test]
fn suspended_future_completes_from_runtime() {
    let runtime = common::runtime();
    let stage = InvocationStage::from_future(
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(count(1))
        },
        runtime.handle(),
    );
    assert!(stage.is_pending());
    assert_eq!(stage.then_apply(increment).get_blocking(), Ok(count(2)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stages_can_be_awaited() {
    assert_eq!(InvocationStage::wrap(count(4)).await, Ok(count(4)));

    let (stage, completer) = InvocationStage::deferred();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        completer.succeed(count(9));
    });
    assert_eq!(stage.then_apply(increment).await, Ok(count(10)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn awaiting_abandoned_stage_fails() {
    let (stage, completer) = InvocationStage::deferred();
    tokio::spawn(async move {
        drop(completer);
    });
    assert_eq!(stage.await, Err(CacheError::Abandoned));
}
