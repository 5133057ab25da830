//! Unit tests for per-plugin run serialization.

use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn serializer() -> RunSerializer {
    RunSerializer::new()
}

#[rstest]
fn tasks_for_one_id_never_overlap(serializer: RunSerializer) {
    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let tickets: Vec<_> = (0..8)
        .map(|_| {
            let active_count = Arc::clone(&active);
            let max_count = Arc::clone(&max_seen);
            serializer
                .submit("same", move || {
                    let now = active_count.fetch_add(1, Ordering::SeqCst) + 1;
                    max_count.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active_count.fetch_sub(1, Ordering::SeqCst);
                })
                .expect("submit")
        })
        .collect();
    for ticket in tickets {
        ticket.wait().expect("task ran");
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(serializer.lane_count(), 1);
}

#[rstest]
fn tasks_for_one_id_run_in_submission_order(serializer: RunSerializer) {
    let order = Arc::new(Mutex::new(Vec::new()));
    let tickets: Vec<_> = (0..5)
        .map(|index| {
            let log = Arc::clone(&order);
            serializer
                .submit("ordered", move || {
                    log.lock().expect("order lock").push(index);
                })
                .expect("submit")
        })
        .collect();
    for ticket in tickets {
        ticket.wait().expect("task ran");
    }

    assert_eq!(*order.lock().expect("order lock"), vec![0, 1, 2, 3, 4]);
}

#[rstest]
fn different_ids_run_concurrently(serializer: RunSerializer) {
    let barrier = Arc::new(Barrier::new(2));
    let first = Arc::clone(&barrier);
    let second = Arc::clone(&barrier);

    let a = serializer.submit("a", move || first.wait().is_leader()).expect("submit a");
    let b = serializer.submit("b", move || second.wait().is_leader()).expect("submit b");

    let leaders = [a.wait().expect("a ran"), b.wait().expect("b ran")];
    assert_eq!(leaders.iter().filter(|leader| **leader).count(), 1);
    assert_eq!(serializer.lane_count(), 2);
}

#[rstest]
fn tasks_never_run_on_the_submitting_thread(serializer: RunSerializer) {
    let caller = thread::current().id();
    let ticket = serializer
        .submit("elsewhere", || thread::current().id())
        .expect("submit");

    assert_ne!(ticket.wait().expect("task ran"), caller);
}

#[rstest]
fn panicking_task_leaves_the_lane_usable(serializer: RunSerializer) {
    let failed = serializer
        .submit("fragile", || -> u32 { panic!("boom") })
        .expect("submit");
    let error = failed.wait().expect_err("panic surfaced");
    assert!(matches!(
        error,
        SerializerError::Panicked { ref plugin_id, ref message }
            if plugin_id == "fragile" && message == "boom"
    ));

    let next = serializer.submit("fragile", || 7).expect("submit");
    assert_eq!(next.wait().expect("lane survived"), 7);
}

#[rstest]
fn shutdown_drains_queued_work_and_rejects_new_tasks(serializer: RunSerializer) {
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let count = Arc::clone(&counter);
        let ticket = serializer
            .submit("drain", move || {
                thread::sleep(Duration::from_millis(2));
                count.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit");
        drop(ticket);
    }

    serializer.shutdown();

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert!(matches!(
        serializer.submit("drain", || ()),
        Err(SerializerError::ShutDown)
    ));
    assert_eq!(serializer.lane_count(), 0);
}
