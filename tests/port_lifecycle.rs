//! Port lifecycle under contention: pinning, teardown, idempotent close.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use asyncport::{test_complete, test_phase, ErrorKind, Overlapped};
use common::*;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

#[test]
fn close_does_not_free_under_pinned_consumers() {
    init_test("close_does_not_free_under_pinned_consumers");
    let ports = Arc::new(select_ports());
    let port = bare_port(&ports);

    // Pin the port with several blocked consumers.
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let ports = Arc::clone(&ports);
            thread::spawn(move || {
                ports.get_queued_completion_status(port, Some(Duration::from_secs(10)))
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    ports.close_handle(port).expect("close");
    assert!(
        start.elapsed() < Duration::from_secs(3),
        "pinned consumers drained promptly"
    );

    // Every pinned consumer must observe the teardown, not a payload and
    // not a crash.
    for waiter in waiters {
        let result = waiter.join().expect("consumer panicked");
        let err = result.expect_err("no completions were ever produced");
        assert!(
            matches!(err.kind(), ErrorKind::ShuttingDown | ErrorKind::NotFound),
            "unexpected error: {err}"
        );
    }
    test_complete!("close_does_not_free_under_pinned_consumers");
}

#[test]
fn concurrent_close_yields_one_success() {
    init_test("concurrent_close_yields_one_success");
    let ports = Arc::new(select_ports());
    let port = bare_port(&ports);

    // A pinned consumer keeps the first closer inside its drain wait long
    // enough for the second closer to overlap it.
    let consumer = {
        let ports = Arc::clone(&ports);
        thread::spawn(move || {
            let _ = ports.get_queued_completion_status(port, Some(Duration::from_secs(10)));
        })
    };
    thread::sleep(Duration::from_millis(100));

    let successes = Arc::new(AtomicUsize::new(0));
    let already = Arc::new(AtomicUsize::new(0));
    let closers: Vec<_> = (0..2)
        .map(|_| {
            let ports = Arc::clone(&ports);
            let successes = Arc::clone(&successes);
            let already = Arc::clone(&already);
            thread::spawn(move || match ports.close_handle(port) {
                Ok(()) => {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    assert!(
                        matches!(err.kind(), ErrorKind::AlreadyClosing | ErrorKind::NotFound),
                        "unexpected close error: {err}"
                    );
                    already.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for closer in closers {
        closer.join().expect("closer panicked");
    }
    consumer.join().expect("consumer panicked");

    assert_eq!(successes.load(Ordering::SeqCst), 1, "exactly one close wins");
    assert_eq!(already.load(Ordering::SeqCst), 1, "the loser is told so");
    test_complete!("concurrent_close_yields_one_success");
}

#[test]
fn close_wakes_indefinite_waiter() {
    init_test("close_wakes_indefinite_waiter");
    let ports = Arc::new(select_ports());
    let port = bare_port(&ports);

    let waiter = {
        let ports = Arc::clone(&ports);
        thread::spawn(move || ports.get_queued_completion_status(port, None))
    };
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    ports.close_handle(port).expect("close");
    let err = waiter
        .join()
        .expect("waiter panicked")
        .expect_err("teardown, not a completion");
    assert!(
        matches!(err.kind(), ErrorKind::ShuttingDown | ErrorKind::NotFound),
        "unexpected error: {err}"
    );
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "indefinite waiter released promptly"
    );
    test_complete!("close_wakes_indefinite_waiter");
}

#[test]
fn subsystem_restarts_after_last_close() {
    init_test("subsystem_restarts_after_last_close");
    let ports = select_ports();

    // First generation: the lazy harvester start.
    let port = bare_port(&ports);
    ports.close_handle(port).expect("close");

    // Second generation: the harvester must come back after the last
    // close stopped it.
    let port = bare_port(&ports);
    let ctx = Overlapped::new();
    ports
        .post_queued_completion_status(port, 5, 6, &ctx)
        .expect("post");
    let done = ports
        .get_queued_completion_status(port, Some(Duration::from_secs(5)))
        .expect("get");
    assert_eq!((done.bytes, done.key), (5, 6));
    ports.close_handle(port).expect("close");
    test_complete!("subsystem_restarts_after_last_close");
}

#[test]
fn dropping_subsystem_with_open_ports_is_clean() {
    init_test("dropping_subsystem_with_open_ports_is_clean");
    let ports = select_ports();
    let _a = bare_port(&ports);
    let _b = bare_port(&ports);
    let ctx = Overlapped::new();
    ports
        .post_queued_completion_status(_a, 1, 1, &ctx)
        .expect("post");
    drop(ports);
    test_complete!("dropping_subsystem_with_open_ports_is_clean");
}

#[test]
fn ports_are_independent() {
    init_test("ports_are_independent");
    let ports = select_ports();
    let a = bare_port(&ports);
    let b = bare_port(&ports);

    let ctx = Overlapped::new();
    ports
        .post_queued_completion_status(a, 10, 0, &ctx)
        .expect("post");

    // Nothing arrives on b.
    let err = ports
        .get_queued_completion_status(b, Some(Duration::from_millis(100)))
        .expect_err("b is empty");
    assert_eq!(err.kind(), ErrorKind::TimedOut);

    // Closing b leaves a's queue intact.
    ports.close_handle(b).expect("close b");
    let done = ports
        .get_queued_completion_status(a, Some(Duration::from_secs(5)))
        .expect("a still works");
    assert_eq!(done.bytes, 10);
    ports.close_handle(a).expect("close a");
    test_complete!("ports_are_independent");
}
