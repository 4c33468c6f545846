// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! [`FdTask`]: a registration that fires when a file handle becomes readable or
//! writable.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{Ctx, Interest};

/// Callback invoked once per ready direction (`READ` then `WRITE`) on an [`FdTask`].
///
/// `scheduler` is `&C` only - callbacks never get mutable access to the application
/// context, matching §4.5: the lock is released before a callback runs, so there is no
/// safe way to hand out `&mut C` without risking aliasing against a concurrent
/// registration from another thread.
pub type FdCallback<C> = fn(scheduler: &crate::scheduler::Scheduler<C>, task: crate::task::TaskId, ready: Interest, ctx: Ctx);

/// A registered interest in a file handle's readiness, keyed by an unsigned integer the
/// caller chooses (typically a raw fd / socket / `RawFd`).
pub struct FdTask<C> {
    pub(crate) key: u64,
    pub(crate) requested_mask: Interest,
    pub(crate) returned_mask: Interest,
    pub(crate) callback: FdCallback<C>,
    pub(crate) ctx: Ctx,
    /// Monotone true -> false flag, readable without the registry lock from inside the
    /// hot dispatch loop (the loop already holds the lock for everything else it does
    /// to this task; this flag is additionally written by `invalidate*` from a foreign
    /// thread, which is the one path that does need the atomic).
    pub(crate) valid: AtomicBool,
}

impl<C> FdTask<C> {
    pub(crate) fn new(key: u64, requested_mask: Interest, callback: FdCallback<C>, ctx: Ctx) -> Self {
        Self { key, requested_mask, returned_mask: Interest::NONE, callback, ctx, valid: AtomicBool::new(true) }
    }

    pub(crate) fn is_valid(&self) -> bool { self.valid.load(Ordering::Acquire) }

    /// Flips validity to false. Idempotent: invalidating an already-invalid task is a
    /// no-op, preserving the "starts true, transitions once" invariant.
    pub(crate) fn invalidate(&self) { self.valid.store(false, Ordering::Release); }
}
