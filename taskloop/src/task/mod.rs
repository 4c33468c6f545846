// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! The three task kinds the registry manages, and the opaque [`TaskId`] handle callers
//! hold for all of them.
//!
//! See [`crate::task::fd`], [`crate::task::timeout`], [`crate::task::event`] for the
//! per-kind bodies.

pub mod event;
pub mod fd;
pub mod timeout;

pub use event::{EventArgs, EventCallback, EventTask};
pub use fd::{FdCallback, FdTask};
pub use timeout::{Deadline, TimeoutCallback, TimeoutTask};

use crate::slab::SlotId;

/// Caller-chosen identity tag carried on every task, used only by the `invalidate_by_*`
/// convenience selectors (§4.2) to match tasks by "the same context the caller passed at
/// add-time" - the Rust stand-in for the source's `void *` identity comparison.
///
/// Real per-callback state should live in the closure/fn's own captures or behind this
/// tag (e.g. as an index into a side table); `Ctx` itself carries no data.
pub type Ctx = usize;

/// Which of the three task kinds a [`TaskId`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Fd,
    Timeout,
    Event,
}

/// Opaque handle to a task owned by a [`Scheduler`](crate::scheduler::Scheduler)'s
/// registry.
///
/// Callers treat this as a token: it remains a valid argument to further API calls after
/// the task is invalidated, but those calls report
/// [`SchedulerError::NotValid`](crate::error::SchedulerError::NotValid) rather than
/// panicking or operating on freed memory - the slot's generation (see
/// [`crate::slab`]) makes that check exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub(crate) kind: TaskKind,
    pub(crate) slot: SlotId,
}

impl TaskId {
    #[must_use]
    pub fn kind(&self) -> TaskKind { self.kind }
}

/// Which readiness bits a fd task is interested in or was found ready for. Only `READ`
/// and `WRITE` are meaningful for fd operations - `EXPIRE` and `INTERRUPT` describe
/// timer/signal events conceptually (spec glossary) but never appear in an `Interest`
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0b01);
    pub const WRITE: Self = Self(0b10);

    #[must_use]
    pub fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }

    #[must_use]
    pub fn is_none(self) -> bool { self.0 == 0 }

    #[must_use]
    pub fn bits(self) -> u8 { self.0 }

    #[must_use]
    pub fn from_bits_truncate(bits: u8) -> Self { Self(bits & 0b11) }
}

impl std::ops::BitOr for Interest {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

impl std::ops::BitAnd for Interest {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self { Self(self.0 & rhs.0) }
}

impl std::ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Self) { self.0 |= rhs.0; }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_bits_compose() {
        let both = Interest::READ | Interest::WRITE;
        assert!(both.contains(Interest::READ));
        assert!(both.contains(Interest::WRITE));
        assert!(!Interest::READ.contains(Interest::WRITE));
        assert!(Interest::NONE.is_none());
        assert!(!both.is_none());
    }
}
