// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! Errors surfaced to callers of the scheduler API. See [`SchedulerError`].

/// Errors returned by [`Scheduler`] and [`TaskId`] operations.
///
/// Each variant carries a dedicated [diagnostic code] and actionable help text.
///
/// The scheduler's own state is never left invalid by a failed call - see
/// [`Scheduler::uninit`] for the one exception (teardown) and its own contract.
///
/// [`Scheduler`]: crate::scheduler::Scheduler
/// [`Scheduler::uninit`]: crate::scheduler::Scheduler::uninit
/// [diagnostic code]: miette::Diagnostic::code
/// [`TaskId`]: crate::task::TaskId
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum SchedulerError {
    /// A caller-supplied argument failed validation before any state was touched.
    #[error("invalid argument: {0}")]
    #[diagnostic(
        code(taskloop::invalid_argument),
        help("check the argument against the operation's documented preconditions")
    )]
    InvalidArgument(&'static str),

    /// The referenced [`TaskId`] no longer names a live task - its generation no longer
    /// matches the slot, because the task was already invalidated and reaped.
    ///
    /// [`TaskId`]: crate::task::TaskId
    #[error("task handle is no longer valid")]
    #[diagnostic(
        code(taskloop::not_valid),
        help(
            "the task was invalidated and reaped by a prior dispatch sweep; \
             handles are single-use once invalidated"
        )
    )]
    NotValid,

    /// `add_fd` was called for a key that already maps to a *valid* task.
    #[error("a valid fd task is already registered for this key")]
    #[diagnostic(
        code(taskloop::already_exists),
        help("invalidate the existing task first, or use set_listen_mask to re-arm it")
    )]
    AlreadyExists,

    /// The event name passed to `declare` is already registered and still valid.
    #[error("event `{0}` is already declared")]
    #[diagnostic(
        code(taskloop::event_already_exists),
        help("delete the existing event before re-declaring it, or reuse it as-is")
    )]
    EventAlreadyExists(String),

    /// A lookup (fd key, event name, subscription pair) found nothing.
    #[error("not found: {0}")]
    #[diagnostic(
        code(taskloop::not_found),
        help("the key, event name, or (callback, context) pair does not match any live entry")
    )]
    NotFound(&'static str),

    /// `add_fd` was refused because `max_tasks` would be exceeded.
    #[error("task limit reached ({limit})")]
    #[diagnostic(
        code(taskloop::limit),
        help("raise SchedulerConfig::max_tasks, or invalidate unused tasks before adding more")
    )]
    Limit {
        /// The configured ceiling that was hit.
        limit: usize,
    },

    /// Allocation failed while registering a task; all partial state (slab entry,
    /// adapter arming) was rolled back before this was returned.
    #[error("out of memory while registering a task")]
    #[diagnostic(
        code(taskloop::out_of_memory),
        help("the process is likely near a resource limit; free tasks or resources and retry")
    )]
    OutOfMemory,

    /// The platform adapter reported an I/O failure (not `Interrupted`, which is
    /// swallowed internally).
    #[error("platform adapter I/O error")]
    #[diagnostic(
        code(taskloop::io_error),
        help("see the wrapped error for the underlying OS failure")
    )]
    IoError(#[source] std::io::Error),

    /// `uninit` was called while the scheduler is still valid (`stop` was not called
    /// first), or while the loop is mid-iteration on another thread.
    #[error("scheduler is still running; call stop() before uninit()")]
    #[diagnostic(
        code(taskloop::busy),
        help("call Scheduler::stop() and let the current run/run_once call return first")
    )]
    Busy,
}
