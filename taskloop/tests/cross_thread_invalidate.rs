// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! §8 scenario 6: while one thread is blocked inside `poll` with an fd task pending,
//! another thread invalidates it and wakes the dispatcher. The poll call returns
//! promptly, the invalidated task is reaped before any further callback runs, and its
//! callback is never invoked.
//!
//! Uses a real background thread and a completion channel instead of a sleep-and-hope
//! race: a bounded `recv_timeout` stands in for "the poll call returned promptly" so the
//! test fails loudly instead of hanging if the wakeup protocol regresses.

use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use taskloop::adapter::mio_adapter::MioAdapter;
use taskloop::adapter::PlatformAdapter;
use taskloop::config::SchedulerConfig;
use taskloop::scheduler::Scheduler;
use taskloop::task::{Ctx, Interest, TaskId};

static CALLBACK_INVOKED: AtomicBool = AtomicBool::new(false);

fn must_not_be_invoked<C>(_scheduler: &Scheduler<C>, _task: TaskId, _ready: Interest, _ctx: Ctx) {
    CALLBACK_INVOKED.store(true, Ordering::SeqCst);
}

#[test]
fn cross_thread_invalidate_wakes_poll_and_reaps_without_firing() {
    let adapter: Box<dyn PlatformAdapter<()>> = Box::new(MioAdapter::<()>::new().unwrap());
    let scheduler = Scheduler::init(SchedulerConfig::default(), (), adapter).unwrap();

    let (_keep_alive, peer) = UnixStream::pair().unwrap();
    let key = peer.as_raw_fd() as u64;
    scheduler.add_fd(key, must_not_be_invoked, 0).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let dispatch_thread = {
        let scheduler = scheduler.clone();
        thread::spawn(move || {
            started_tx.send(()).unwrap();
            let outcome = scheduler.run_once(-1);
            done_tx.send(outcome).unwrap();
        })
    };

    started_rx.recv_timeout(Duration::from_secs(5)).expect("dispatch thread did not start");
    // Give the dispatch thread a moment to actually enter the blocking poll call
    // before we invalidate and wake it from here.
    thread::sleep(Duration::from_millis(50));

    scheduler.invalidate_by_fd(key).unwrap();
    scheduler.wake().unwrap();

    let outcome = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("poll did not return promptly after invalidate + wake")
        .unwrap();
    dispatch_thread.join().unwrap();

    assert_eq!(outcome, taskloop::LoopOutcome::Ran);
    assert!(!CALLBACK_INVOKED.load(Ordering::SeqCst));
    assert_eq!(scheduler.get_listen_mask(key), None);
}
