// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! A deterministic [`PlatformAdapter`] test double, shared by the dispatcher's, the
//! registry's, and the scheduler's unit tests. Scripted [`PollOutcome`]s let a test
//! assert exact iteration-by-iteration behavior instead of racing wall-clock sleeps
//! against a real poller.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::adapter::{PlatformAdapter, PollOutcome, SignalCallback};
use crate::error::SchedulerError;
use crate::task::{Ctx, Interest};
use crate::wakeup::Waker;

pub struct FakeWaker(Arc<Mutex<usize>>);

impl Waker for FakeWaker {
    fn wake(&self) -> std::io::Result<()> {
        *self.0.lock().expect("fake waker count poisoned") += 1;
        Ok(())
    }
}

/// A [`PlatformAdapter`] whose `poll` replays a scripted queue of outcomes instead of
/// touching any real OS readiness primitive.
pub struct FakeAdapter<C> {
    pub wake_count: Arc<Mutex<usize>>,
    outcomes: VecDeque<PollOutcome>,
    armed: HashMap<u64, Interest>,
    pending_signal: bool,
    signal_callbacks: HashMap<i32, (SignalCallback<C>, Ctx)>,
}

impl<C> FakeAdapter<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            wake_count: Arc::new(Mutex::new(0)),
            outcomes: VecDeque::new(),
            armed: HashMap::new(),
            pending_signal: false,
            signal_callbacks: HashMap::new(),
        }
    }

    /// Queues an outcome for the next `poll` call; once exhausted, `poll` reports
    /// [`PollOutcome::Timeout`].
    pub fn push_outcome(&mut self, outcome: PollOutcome) {
        self.outcomes.push_back(outcome);
    }

    #[must_use]
    pub fn armed_mask(&self, key: u64) -> Option<Interest> {
        self.armed.get(&key).copied()
    }

    /// Marks a signal as delivered, for tests exercising the signal-drain step.
    pub fn deliver_signal(&mut self) {
        self.pending_signal = true;
    }
}

impl<C> Default for FakeAdapter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PlatformAdapter<C> for FakeAdapter<C> {
    fn init(&mut self) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn arm_fd(&mut self, key: u64, mask: Interest) -> Result<(), SchedulerError> {
        self.armed.insert(key, mask);
        Ok(())
    }

    fn poll(&mut self, _timeout: Option<Duration>) -> Result<PollOutcome, SchedulerError> {
        Ok(self.outcomes.pop_front().unwrap_or(PollOutcome::Timeout))
    }

    fn waker(&self) -> Arc<dyn Waker> {
        Arc::new(FakeWaker(Arc::clone(&self.wake_count)))
    }

    fn signal_register(&mut self, signo: i32, callback: SignalCallback<C>, ctx: Ctx) -> Result<(), SchedulerError> {
        self.signal_callbacks.insert(signo, (callback, ctx));
        Ok(())
    }

    fn signal_unregister(&mut self, signo: i32) -> Result<(), SchedulerError> {
        self.signal_callbacks.remove(&signo);
        Ok(())
    }

    fn take_signals_pending(&mut self) -> bool {
        std::mem::take(&mut self.pending_signal)
    }

    fn drain_signal_callbacks(&mut self) -> Vec<(SignalCallback<C>, Ctx)> {
        self.signal_callbacks.values().copied().collect()
    }
}

pub fn boxed<C: 'static>() -> Box<dyn PlatformAdapter<C>> {
    Box::new(FakeAdapter::new())
}
