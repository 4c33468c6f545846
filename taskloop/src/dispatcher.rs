// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! The dispatch loop (§4.1): one iteration drains pending signals, evicts and fires due
//! timers, polls the platform adapter, dispatches ready fd tasks, and then runs a
//! second, bounded timer pass. `run_forever` and `run_once` both call [`iterate_once`];
//! the only difference is whether the caller loops.

use std::time::Duration;

use tracing::trace;

use crate::adapter::PollOutcome;
use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::slab::SlotId;
use crate::task::timeout::Deadline;
use crate::task::{Interest, TaskId, TaskKind};

/// What one iteration did. `run_once` returns this directly; `run_forever` loops on it
/// until it sees [`LoopOutcome::Stopped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// `stop()` was observed before or during this iteration.
    Stopped,
    /// The iteration ran to completion; call again to continue the loop.
    Ran,
}

/// `run()` (§4.1 run-forever): iterates until [`Scheduler::stop`] is called.
pub fn run_forever<C>(scheduler: &Scheduler<C>) -> Result<(), SchedulerError> {
    loop {
        match iterate_once(scheduler, -1)? {
            LoopOutcome::Stopped => return Ok(()),
            LoopOutcome::Ran => {}
        }
    }
}

/// `run_once(timeout)` (§4.1 run-once / §6.1): `timeout_us == -1` bounds the poll wait
/// by the timeout queue alone; `0` services whatever is already ready without blocking;
/// any other value is an upper bound the queue-derived wait is clamped to.
pub fn iterate_once<C>(scheduler: &Scheduler<C>, timeout_us: i64) -> Result<LoopOutcome, SchedulerError> {
    if scheduler.is_stopped() {
        return Ok(LoopOutcome::Stopped);
    }

    // Step 1: drain signals delivered since the last iteration, on this thread. The
    // snapshot is taken under the adapter lock, which is then dropped before any
    // callback runs - a callback is free to register new work, and that path
    // re-acquires the same (non-reentrant) lock via `Scheduler::wake`.
    drain_pending_signals(scheduler);
    if scheduler.is_stopped() {
        return Ok(LoopOutcome::Stopped);
    }

    // Step 2: evict invalid leading timeouts and fire whatever is already due, so the
    // poll wait below is computed against a queue whose head is genuinely live.
    dispatch_timeouts(scheduler, false);
    if scheduler.is_stopped() {
        return Ok(LoopOutcome::Stopped);
    }

    let queue_wait = {
        let registry = scheduler.registry_lock();
        registry.timeouts().head_deadline().map(|deadline| deadline_to_wait(scheduler, deadline))
    };
    let wait = resolve_wait(timeout_us, queue_wait);

    // Step 3: poll.
    let outcome = scheduler.adapter_lock().poll(wait)?;

    match outcome {
        PollOutcome::Stopped => return Ok(LoopOutcome::Stopped),
        PollOutcome::Interrupted => {
            trace!("poll interrupted, continuing");
            return Ok(LoopOutcome::Ran);
        }
        PollOutcome::Timeout => {}
        PollOutcome::Ready(ready) => dispatch_ready_fds(scheduler, ready),
    }
    if scheduler.is_stopped() {
        return Ok(LoopOutcome::Stopped);
    }

    // Step 4: dispatch due timers, bounded per pass (§9 config). If the wait we just
    // used was short, run a second opportunistic pass rather than waiting for the next
    // iteration to notice timers that came due while we were dispatching fds.
    dispatch_timeouts(scheduler, false);
    let threshold = scheduler.config().opportunistic_timer_threshold;
    if wait.is_some_and(|w| w < threshold) {
        dispatch_timeouts(scheduler, false);
    }

    Ok(LoopOutcome::Ran)
}

/// Drains every timeout task regardless of the per-pass cap. Used only by
/// `Scheduler::uninit`.
pub fn drain_timeouts<C>(scheduler: &Scheduler<C>, unbounded: bool) {
    dispatch_timeouts(scheduler, unbounded);
}

/// Snapshots the pending signal `(callback, ctx)` pairs under the adapter lock, drops
/// the guard, then invokes each. Shared by the dispatch loop's signal-drain step and by
/// `Scheduler::uninit`'s final drain, so both run callbacks with the adapter lock
/// released.
pub(crate) fn drain_pending_signals<C>(scheduler: &Scheduler<C>) {
    let pending = {
        let mut adapter = scheduler.adapter_lock();
        if adapter.take_signals_pending() { adapter.drain_signal_callbacks() } else { Vec::new() }
    };
    for (callback, ctx) in pending {
        callback(scheduler, ctx);
    }
}

fn resolve_wait(timeout_us: i64, queue_wait: Option<Duration>) -> Option<Duration> {
    match timeout_us {
        -1 => queue_wait,
        0 => Some(Duration::ZERO),
        us => {
            let requested = Duration::from_micros(us.max(0) as u64);
            Some(match queue_wait {
                Some(queue) => queue.min(requested),
                None => requested,
            })
        }
    }
}

fn deadline_to_wait<C>(scheduler: &Scheduler<C>, deadline: Deadline) -> Duration {
    let now = scheduler.now_deadline();
    if deadline <= now {
        Duration::ZERO
    } else {
        let seconds = deadline.seconds - now.seconds;
        let now_micros = i64::from(now.micros);
        let dead_micros = i64::from(deadline.micros);
        let (seconds, micros) = if dead_micros >= now_micros {
            (seconds, (dead_micros - now_micros) as u32)
        } else {
            (seconds.saturating_sub(1), (1_000_000 + dead_micros - now_micros) as u32)
        };
        Duration::new(seconds, micros * 1_000)
    }
}

/// Fires every timeout whose deadline has passed, evicting invalid leading entries
/// along the way. `unbounded` lifts the per-pass cap (teardown only).
fn dispatch_timeouts<C>(scheduler: &Scheduler<C>, unbounded: bool) {
    let limit = if unbounded { u32::MAX } else { scheduler.config().max_timeout_dispatch_per_pass };
    let now = scheduler.now_deadline();
    let mut fired = 0u32;

    loop {
        if !unbounded && fired >= limit {
            break;
        }

        let due_slot = {
            let mut registry = scheduler.registry_lock();
            loop {
                let Some(slot) = registry.timeouts().head_slot() else { break None };
                if !registry.timeouts().is_valid(slot) {
                    registry.timeouts_mut().pop_head();
                    continue;
                }
                let deadline = registry.timeouts().get(slot).expect("head_slot implies get").deadline;
                if deadline <= now {
                    break Some(slot);
                } else {
                    break None;
                }
            }
        };

        let Some(slot) = due_slot else { break };
        let snapshot = {
            let mut registry = scheduler.registry_lock();
            let snapshot = registry.timeouts().get(slot).map(|task| (task.callback, task.ctx));
            registry.timeouts_mut().pop_head();
            snapshot
        };

        if let Some((callback, ctx)) = snapshot {
            callback(scheduler, TaskId { kind: TaskKind::Timeout, slot }, ctx);
            fired += 1;
        }
    }
}

/// Dispatches every ready fd from one poll result: read before write per key, a write
/// suppressed if the read invalidated the task, and a sweep over every touched slot
/// afterward to reap whatever went invalid during this pass (§4.1 step 5).
fn dispatch_ready_fds<C>(scheduler: &Scheduler<C>, ready: Vec<(u64, Interest)>) {
    let mut touched = Vec::with_capacity(ready.len());
    for (key, mask) in ready {
        let Some(slot) = scheduler.registry_lock().fd_slot(key) else { continue };
        touched.push(slot);
        dispatch_one_fd_with_mask(scheduler, slot, mask);
        if scheduler.is_stopped() {
            break;
        }
    }
    reap_invalidated(scheduler, &touched);
}

/// Dispatches a single already-armed fd task using its currently staged returned mask.
/// Used by `set_listen_mask(.., send_events=true)` to synthesise an immediate callback
/// without waiting for the next poll.
pub fn dispatch_one_fd<C>(scheduler: &Scheduler<C>, slot: SlotId) {
    let mask = {
        let registry = scheduler.registry_lock();
        match registry.fd_task(slot) {
            Some(task) if task.is_valid() => task.returned_mask,
            _ => return,
        }
    };
    dispatch_one_fd_with_mask(scheduler, slot, mask);
    reap_invalidated(scheduler, &[slot]);
}

fn dispatch_one_fd_with_mask<C>(scheduler: &Scheduler<C>, slot: SlotId, mask: Interest) {
    if mask.contains(Interest::READ) {
        invoke_fd(scheduler, slot, Interest::READ);
    }
    let still_valid = {
        let registry = scheduler.registry_lock();
        registry.fd_task(slot).is_some_and(|task| task.is_valid())
    };
    if still_valid && mask.contains(Interest::WRITE) {
        invoke_fd(scheduler, slot, Interest::WRITE);
    }
}

fn invoke_fd<C>(scheduler: &Scheduler<C>, slot: SlotId, which: Interest) {
    let snapshot = {
        let registry = scheduler.registry_lock();
        registry.fd_task(slot).filter(|task| task.is_valid()).map(|task| (task.callback, task.ctx))
    };
    if let Some((callback, ctx)) = snapshot {
        callback(scheduler, TaskId { kind: TaskKind::Fd, slot }, which, ctx);
    }
}

fn reap_invalidated<C>(scheduler: &Scheduler<C>, slots: &[SlotId]) {
    for &slot in slots {
        let should_reap = {
            let registry = scheduler.registry_lock();
            registry.fd_task(slot).is_some_and(|task| !task.is_valid())
        };
        if should_reap {
            scheduler.registry_lock().reap_invalid_fd(slot);
            trace!("reaped invalidated fd task");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::adapter::PollOutcome;
    use crate::config::SchedulerConfig;
    use crate::scheduler::Scheduler;
    use crate::task::{Ctx, Interest, TaskId};
    use crate::test_support::FakeAdapter;

    /// §8 scenario 1: a single timer fires exactly once with the expected context, and
    /// the queue is empty afterward.
    #[test]
    fn test_single_timer_fires_once_with_expected_ctx() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        fn expire<C>(_s: &Scheduler<C>, _t: TaskId, ctx: Ctx) {
            assert_eq!(ctx, 42);
            SEEN.fetch_add(1, Ordering::SeqCst);
        }
        let adapter: Box<dyn crate::adapter::PlatformAdapter<()>> = Box::new(FakeAdapter::<()>::new());
        let scheduler = Scheduler::init(SchedulerConfig::default(), (), adapter).unwrap();
        scheduler.add_timeout(expire, 42, 0, 0);
        scheduler.run_once(-1).unwrap();
        assert_eq!(SEEN.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.registry_lock().timeouts().live_len(), 0);
    }

    /// §8 scenario 2: invalidating a timer before it's due fires zero callbacks and
    /// recycles the slot onto the freelist.
    #[test]
    fn test_cancel_before_fire_fires_zero_callbacks() {
        fn never<C>(_s: &Scheduler<C>, _t: TaskId, _ctx: Ctx) { panic!("must not fire"); }
        let adapter: Box<dyn crate::adapter::PlatformAdapter<()>> = Box::new(FakeAdapter::<()>::new());
        let scheduler = Scheduler::init(SchedulerConfig::default(), (), adapter).unwrap();
        let task = scheduler.add_timeout(never, 1, 0, 10_000);
        scheduler.invalidate(task).unwrap();
        scheduler.run_once(0).unwrap();
        assert!(scheduler.registry_lock().timeouts().freelist_len() >= 1);
    }

    /// §4.3 knob: at most `max_timeout_dispatch_per_pass` callbacks fire in a single
    /// `dispatch_timeouts` pass, even when more are already due.
    #[test]
    fn test_dispatch_timeouts_respects_burst_cap_within_one_pass() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn tick<C>(_s: &Scheduler<C>, _t: TaskId, _ctx: Ctx) { FIRED.fetch_add(1, Ordering::SeqCst); }
        let config = SchedulerConfig::default().with_max_timeout_dispatch_per_pass(5);
        let adapter: Box<dyn crate::adapter::PlatformAdapter<()>> = Box::new(FakeAdapter::<()>::new());
        let scheduler = Scheduler::init(config, (), adapter).unwrap();
        for _ in 0..12 {
            scheduler.add_timeout(tick, 0, 0, 0);
        }
        super::dispatch_timeouts(&scheduler, false);
        assert_eq!(FIRED.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.registry_lock().timeouts().live_len(), 8);
    }

    /// One `run_once(0)` iteration dispatches timers in up to three passes (the
    /// unconditional step 2 and step 4 passes, plus the opportunistic extra pass that
    /// fires because a zero wait is below the opportunistic-timer threshold), so a dozen
    /// simultaneously-due timers with a cap of 5 drain completely in one call.
    #[test]
    fn test_run_once_drains_burst_across_multiple_passes() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn tick<C>(_s: &Scheduler<C>, _t: TaskId, _ctx: Ctx) { FIRED.fetch_add(1, Ordering::SeqCst); }
        let config = SchedulerConfig::default().with_max_timeout_dispatch_per_pass(5);
        let adapter: Box<dyn crate::adapter::PlatformAdapter<()>> = Box::new(FakeAdapter::<()>::new());
        let scheduler = Scheduler::init(config, (), adapter).unwrap();
        for _ in 0..12 {
            scheduler.add_timeout(tick, 0, 0, 0);
        }
        scheduler.run_once(0).unwrap();
        assert_eq!(FIRED.load(Ordering::SeqCst), 12);
        // Only the scheduler's own far-future freelist GC timer remains live.
        assert_eq!(scheduler.registry_lock().timeouts().live_len(), 1);
    }

    /// §4.1 step 5: a fd ready for both directions dispatches read-then-write in order;
    /// invalidating inside the read callback suppresses the write half.
    #[test]
    fn test_fd_read_invalidate_suppresses_write() {
        static READ_THEN_WRITE: std::sync::Mutex<Vec<&str>> = std::sync::Mutex::new(Vec::new());
        fn on_ready<C>(scheduler: &Scheduler<C>, task: TaskId, ready: Interest, _ctx: Ctx) {
            if ready.contains(Interest::READ) {
                READ_THEN_WRITE.lock().unwrap().push("read");
                scheduler.invalidate(task).unwrap();
            } else {
                READ_THEN_WRITE.lock().unwrap().push("write");
            }
        }
        let mut fake = FakeAdapter::<()>::new();
        fake.push_outcome(PollOutcome::Ready(vec![(7, Interest::READ | Interest::WRITE)]));
        let adapter: Box<dyn crate::adapter::PlatformAdapter<()>> = Box::new(fake);
        let scheduler = Scheduler::init(SchedulerConfig::default(), (), adapter).unwrap();
        scheduler.add_fd(7, on_ready, 0).unwrap();
        scheduler.run_once(0).unwrap();
        assert_eq!(*READ_THEN_WRITE.lock().unwrap(), vec!["read"]);
    }

    #[test]
    fn test_stop_observed_before_iteration_returns_stopped() {
        let adapter: Box<dyn crate::adapter::PlatformAdapter<()>> = Box::new(FakeAdapter::<()>::new());
        let scheduler = Scheduler::init(SchedulerConfig::default(), (), adapter).unwrap();
        scheduler.stop();
        assert_eq!(scheduler.run_once(0).unwrap(), super::LoopOutcome::Stopped);
    }

    /// §4.1 step 1: a signal callback that registers follow-up work (`add_timeout`,
    /// which calls `wake()` and re-acquires the adapter lock) must not deadlock against
    /// the lock the signal-drain step itself is holding while collecting callbacks.
    #[test]
    fn test_signal_callback_registering_followup_work_does_not_deadlock() {
        static CALLED: AtomicUsize = AtomicUsize::new(0);
        fn noop_timeout<C>(_s: &Scheduler<C>, _t: TaskId, _c: Ctx) {}
        fn on_signal<C>(scheduler: &Scheduler<C>, _ctx: Ctx) {
            CALLED.fetch_add(1, Ordering::SeqCst);
            scheduler.add_timeout(noop_timeout, 0, 0, 0);
        }
        let mut fake = FakeAdapter::<()>::new();
        fake.deliver_signal();
        let adapter: Box<dyn crate::adapter::PlatformAdapter<()>> = Box::new(fake);
        let scheduler = Scheduler::init(SchedulerConfig::default(), (), adapter).unwrap();
        scheduler.add_signal(1, on_signal, 0).unwrap();
        scheduler.run_once(0).unwrap();
        assert_eq!(CALLED.load(Ordering::SeqCst), 1);
    }
}
