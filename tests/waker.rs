mod common;

use polysock::Driver;
use rand::Rng;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// A `Driver::run()` blocked forever (no sockets, no tasks) must still react
/// promptly to a task scheduled from another thread: `schedule` bumps the
/// wakeup socket so the blocked poll returns immediately rather than
/// waiting out whatever timeout it last entered with.
#[test]
fn scheduling_a_task_wakes_a_blocked_run_promptly() {
    common::init_logging();
    let driver = Driver::new().unwrap();
    let handle = driver.handle();
    let worker = thread::spawn(move || handle.run());

    // A small random delay before scheduling stands in for whatever other
    // work a caller's thread might be doing; the pause handshake should be
    // unaffected by exactly when it happens.
    let jitter = Duration::from_millis(rand::rng().random_range(5..40));
    thread::sleep(jitter);
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    driver.schedule(move || tx.send(()).unwrap(), Duration::from_millis(0));

    rx.recv_timeout(Duration::from_secs(2)).expect("scheduled task never ran");
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "pause handshake took {:?}, expected well under a second",
        started.elapsed()
    );

    driver.stop();
    worker.join().unwrap();
}

#[test]
fn stop_interrupts_a_run_blocked_with_no_work() {
    common::init_logging();
    let driver = Driver::new().unwrap();
    let handle = driver.handle();
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        handle.run();
        tx.send(()).unwrap();
    });
    thread::sleep(Duration::from_millis(20));
    driver.stop();
    rx.recv_timeout(Duration::from_secs(2)).expect("run() did not return after stop()");
    worker.join().unwrap();
}
