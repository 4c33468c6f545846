// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! [`TimeoutTask`]: a one-shot deadline, fired at-most-once, then recycled onto the
//! freelist (§4.3).

use std::sync::atomic::{AtomicBool, Ordering};

use super::Ctx;

/// Callback invoked when a [`TimeoutTask`] expires. There is no "ready" direction for
/// timers - they always fire with the conceptual `Expire` event (see the glossary),
/// which this signature makes implicit rather than passing a redundant enum variant.
pub type TimeoutCallback<C> = fn(scheduler: &crate::scheduler::Scheduler<C>, task: crate::task::TaskId, ctx: Ctx);

/// Absolute deadline, seconds and microseconds since the scheduler's monotonic epoch.
/// Microseconds is always normalised into `[0, 1_000_000)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    pub(crate) seconds: u64,
    pub(crate) micros: u32,
}

impl Deadline {
    #[must_use]
    pub fn new(seconds: u64, micros: u32) -> Self {
        let extra_seconds = u64::from(micros / 1_000_000);
        Self { seconds: seconds + extra_seconds, micros: micros % 1_000_000 }
    }
}

pub struct TimeoutTask<C> {
    pub(crate) deadline: Deadline,
    pub(crate) callback: TimeoutCallback<C>,
    pub(crate) ctx: Ctx,
    pub(crate) valid: AtomicBool,
}

impl<C> TimeoutTask<C> {
    pub(crate) fn new(deadline: Deadline, callback: TimeoutCallback<C>, ctx: Ctx) -> Self {
        Self { deadline, callback, ctx, valid: AtomicBool::new(true) }
    }

    pub(crate) fn is_valid(&self) -> bool { self.valid.load(Ordering::Acquire) }

    pub(crate) fn invalidate(&self) { self.valid.store(false, Ordering::Release); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_normalises_overflowing_micros() {
        let d = Deadline::new(10, 1_500_000);
        assert_eq!(d.seconds, 11);
        assert_eq!(d.micros, 500_000);
    }

    #[test]
    fn test_deadline_ordering_is_chronological() {
        let earlier = Deadline::new(5, 0);
        let later = Deadline::new(5, 1);
        assert!(earlier < later);
        assert!(Deadline::new(4, 999_999) < Deadline::new(5, 0));
    }
}
