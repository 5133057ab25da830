//! Unit tests for the UI hand-off.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use rstest::rstest;

use super::*;

#[rstest]
fn actions_run_on_the_ui_thread() {
    let (dispatcher, handle) = UiDispatcher::spawn_thread("ui-test").expect("spawn ui thread");
    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);

    dispatcher
        .invoke_and_wait(Box::new(move || {
            *slot.lock().expect("slot lock") = thread::current().name().map(str::to_owned);
        }))
        .expect("invoke");

    assert_eq!(*seen.lock().expect("slot lock"), Some("ui-test".to_owned()));
    drop(dispatcher);
    handle.join().expect("ui thread exits");
}

#[rstest]
fn nested_calls_from_the_ui_thread_run_inline() {
    let (dispatcher, handle) = UiDispatcher::spawn_thread("ui-nested").expect("spawn ui thread");
    let inner = dispatcher.clone();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    dispatcher
        .invoke_and_wait(Box::new(move || {
            inner
                .invoke_and_wait(Box::new(move || flag.store(true, Ordering::SeqCst)))
                .expect("nested invoke");
        }))
        .expect("invoke");

    assert!(ran.load(Ordering::SeqCst));
    drop(dispatcher);
    handle.join().expect("ui thread exits");
}

#[rstest]
fn panics_are_reported_and_the_loop_survives() {
    let (dispatcher, handle) = UiDispatcher::spawn_thread("ui-panic").expect("spawn ui thread");

    let error = dispatcher
        .invoke_and_wait(Box::new(|| panic!("dialog failed")))
        .expect_err("panic reported");
    assert_eq!(
        error,
        UiError::Panicked {
            message: "dialog failed".to_owned()
        }
    );

    dispatcher
        .invoke_and_wait(Box::new(|| {}))
        .expect("loop still alive");
    drop(dispatcher);
    handle.join().expect("ui thread exits");
}

#[rstest]
fn pump_runs_queued_actions_on_the_calling_thread() {
    let (dispatcher, ui_loop) = UiDispatcher::channel();
    let counter = Arc::new(Mutex::new(0_u32));
    let worker_counter = Arc::clone(&counter);
    let worker = thread::spawn(move || {
        dispatcher.invoke_and_wait(Box::new(move || {
            *worker_counter.lock().expect("counter lock") += 1;
        }))
    });

    let stop = || *counter.lock().expect("counter lock") > 0;
    ui_loop.run_until(&stop, Duration::from_millis(10));

    worker.join().expect("worker").expect("invoke");
    assert_eq!(ui_loop.pump(), 0);
}

#[rstest]
fn dropped_loop_reports_closed() {
    let (dispatcher, ui_loop) = UiDispatcher::channel();
    drop(ui_loop);

    let outcome = thread::spawn(move || dispatcher.invoke_and_wait(Box::new(|| {})))
        .join()
        .expect("caller thread");

    assert_eq!(outcome, Err(UiError::Closed));
}

#[rstest]
fn inline_ui_runs_immediately() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    InlineUi
        .invoke_and_wait(Box::new(move || flag.store(true, Ordering::SeqCst)))
        .expect("inline");
    assert!(ran.load(Ordering::SeqCst));
}
