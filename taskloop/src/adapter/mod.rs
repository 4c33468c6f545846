// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! The platform adapter contract (§6.2): the abstract interface the scheduler kernel
//! calls into for readiness polling, wakeup, and signal delivery. [`mio_adapter`] ships
//! the one included implementation.

pub mod mio_adapter;

use std::sync::Arc;
use std::time::Duration;

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::task::{Ctx, Interest};
use crate::wakeup::Waker;

/// Invoked when a registered signal has been delivered and drained by
/// [`PlatformAdapter::drain_signal_callbacks`].
pub type SignalCallback<C> = fn(scheduler: &Scheduler<C>, ctx: Ctx);

/// Result of one [`PlatformAdapter::poll`] call.
pub enum PollOutcome {
    /// `n` fd tasks have a non-zero returned mask; `ready` pairs each polled key with
    /// the interest bits observed for it.
    Ready(Vec<(u64, Interest)>),
    /// The poll's timeout elapsed with nothing ready.
    Timeout,
    /// The poll call was interrupted (e.g. `EINTR`); the dispatcher continues without
    /// treating this as an error.
    Interrupted,
    /// The adapter itself has been asked to stop (rare; surfaced defensively).
    Stopped,
}

/// The five (plus signal-trampoline) operations a scheduler's dispatch loop calls into.
///
/// Implementations are free to use whatever readiness primitive fits the platform; they
/// own converting `key: u64` into whatever OS handle type that represents (raw fd,
/// `SOCKET`, ...).
pub trait PlatformAdapter<C>: Send {
    /// Sets up the poller and the internal wakeup primitive. Called once, before the
    /// first `poll`.
    fn init(&mut self) -> Result<(), SchedulerError>;

    /// Releases poller resources. Called once, during `Scheduler::uninit`.
    fn uninit(&mut self) -> Result<(), SchedulerError>;

    /// Registers or re-registers `key` for `mask`; `Interest::NONE` disables the key
    /// without removing its task (§4.2 `set_listen_mask`).
    fn arm_fd(&mut self, key: u64, mask: Interest) -> Result<(), SchedulerError>;

    /// Blocks up to `timeout` (`None` means block indefinitely) waiting for readiness,
    /// a wakeup, or a delivered signal.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<PollOutcome, SchedulerError>;

    /// A cloneable, thread-safe handle onto the adapter's installed waker, type-erased
    /// so `Scheduler` need not be generic over it. Handed to registration entry points
    /// so they can call `wake()` without holding the adapter's own lock.
    fn waker(&self) -> Arc<dyn Waker>;

    /// Installs a signal trampoline for `signo`. Real signal handlers only set a flag
    /// and perform a wakeup (§9 Design Notes); the callback itself runs later, from
    /// `drain_signal_callbacks`, on the dispatch thread.
    fn signal_register(&mut self, signo: i32, callback: SignalCallback<C>, ctx: Ctx) -> Result<(), SchedulerError>;

    fn signal_unregister(&mut self, signo: i32) -> Result<(), SchedulerError>;

    /// True if a signal has been observed since the last call, and clears the flag. The
    /// dispatcher's signal-drain step (§4.1 step 1) polls this before deciding whether
    /// to call `drain_signal_callbacks`.
    fn take_signals_pending(&mut self) -> bool;

    /// Returns the `(callback, ctx)` pair for every signal delivered since the last
    /// call, without invoking them. The adapter lock is non-reentrant and a callback is
    /// free to register new work (which re-acquires it via `Scheduler::wake`), so the
    /// caller must drop its adapter lock guard before invoking anything in the returned
    /// list - never call these back while still holding the lock this method was called
    /// under.
    fn drain_signal_callbacks(&mut self) -> Vec<(SignalCallback<C>, Ctx)>;
}
