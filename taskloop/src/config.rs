// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! Tunables for a [`Scheduler`]. See [`SchedulerConfig`].
//!
//! The timer-dispatch burst limit, the opportunistic-timer threshold, and the
//! freelist GC period/floor are all otherwise-arbitrary defaults; this module exposes
//! them as configuration rather than hardcoding them.
//!
//! [`Scheduler`]: crate::scheduler::Scheduler

use std::time::Duration;

/// Construction-time tunables for a [`Scheduler`].
///
/// [`Scheduler`]: crate::scheduler::Scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Ceiling on the number of live fd tasks. `0` means unlimited.
    ///
    /// Enforced by `add_fd`; exceeding it returns [`SchedulerError::Limit`].
    ///
    /// [`SchedulerError::Limit`]: crate::error::SchedulerError::Limit
    pub max_tasks: usize,

    /// At most this many timeout callbacks fire per `dispatch_timeouts` call, so a
    /// burst of near-simultaneous deadlines cannot starve fd work. Default `40`.
    pub max_timeout_dispatch_per_pass: u32,

    /// When an iteration's computed poll wait is below this threshold, the dispatcher
    /// also runs an opportunistic timer pass after fd dispatch, rather than waiting for
    /// the next iteration. Default `50ms`.
    pub opportunistic_timer_threshold: Duration,

    /// How often the self-rescheduling freelist GC timer runs. Default `3600s`.
    pub freelist_gc_period: Duration,

    /// The freelist GC never trims below this many cached entries. Default `10`.
    pub freelist_gc_floor: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks: 0,
            max_timeout_dispatch_per_pass: 40,
            opportunistic_timer_threshold: Duration::from_millis(50),
            freelist_gc_period: Duration::from_secs(3600),
            freelist_gc_floor: 10,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    #[must_use]
    pub fn with_max_timeout_dispatch_per_pass(mut self, n: u32) -> Self {
        self.max_timeout_dispatch_per_pass = n;
        self
    }

    #[must_use]
    pub fn with_opportunistic_timer_threshold(mut self, threshold: Duration) -> Self {
        self.opportunistic_timer_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_freelist_gc_period(mut self, period: Duration) -> Self {
        self.freelist_gc_period = period;
        self
    }

    #[must_use]
    pub fn with_freelist_gc_floor(mut self, floor: usize) -> Self {
        self.freelist_gc_floor = floor;
        self
    }
}
