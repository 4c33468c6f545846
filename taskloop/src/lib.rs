// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! `taskloop` is an application main-loop scheduler for network programs: it multiplexes
//! fd readiness, timer expirations, and a named cross-thread event bus onto one dispatch
//! thread per [`Scheduler`], while letting other threads register, re-arm, and cancel
//! work safely.
//!
//! # Layout
//!
//! - [`scheduler`] — [`Scheduler`], the value with identity: registry, platform adapter,
//!   per-thread arena, and application context, one per dispatch thread. A child
//!   scheduler holds a non-owning reference to its parent and shares the root's event
//!   bus.
//! - [`registry`] — the per-scheduler fd/timeout/event registry, plus the
//!   notify-observer hook fired on every add and every invalidation.
//! - [`event_bus`] — the named publish/subscribe store living on the root scheduler.
//! - [`task`] — the three task kinds ([`task::FdTask`], [`task::TimeoutTask`],
//!   [`task::EventTask`]) and the opaque [`task::TaskId`] handle callers hold for all of
//!   them.
//! - [`adapter`] — the [`adapter::PlatformAdapter`] trait the dispatch loop calls into
//!   for readiness polling, wakeup, and signal delivery, plus the shipped
//!   [`adapter::mio_adapter::MioAdapter`] implementation.
//! - [`config`] — [`config::SchedulerConfig`], the construction-time tunables (task
//!   limits, the timer-dispatch burst cap, the opportunistic-timer threshold, the
//!   freelist GC period and floor).
//! - [`error`] — [`error::SchedulerError`], the error enum every fallible operation
//!   returns.
//! - [`wakeup`] — the cross-thread wakeup primitive: a [`wakeup::Waker`] trait plus the
//!   reader/writer-split slot that lets a foreign thread force a blocked `poll` call to
//!   return promptly.
//! - [`log`] — an opt-in `tracing-subscriber` installer for binaries embedding the
//!   scheduler; the scheduler itself only emits events/spans, never installs a
//!   subscriber.
//!
//! # Minimal usage
//!
//! ```no_run
//! use taskloop::adapter::mio_adapter::MioAdapter;
//! use taskloop::config::SchedulerConfig;
//! use taskloop::scheduler::Scheduler;
//! use taskloop::task::{Ctx, TaskId};
//!
//! fn on_tick<C>(_scheduler: &Scheduler<C>, _task: TaskId, _ctx: Ctx) {
//!     println!("tick");
//! }
//!
//! let adapter: Box<dyn taskloop::adapter::PlatformAdapter<()>> =
//!     Box::new(MioAdapter::<()>::new().unwrap());
//! let scheduler = Scheduler::init(SchedulerConfig::default(), (), adapter).unwrap();
//! scheduler.add_timeout(on_tick, 0, 1, 0);
//! scheduler.run_once(-1).unwrap();
//! scheduler.stop();
//! scheduler.uninit().unwrap();
//! ```

pub mod adapter;
pub mod arena;
pub mod config;
mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod log;
pub mod registry;
pub mod scheduler;
mod slab;
pub mod task;
mod timeout_queue;
pub mod wakeup;

pub use config::SchedulerConfig;
pub use dispatcher::LoopOutcome;
pub use error::SchedulerError;
pub use scheduler::{global, Scheduler};
pub use task::{Interest, TaskId, TaskKind};

#[cfg(test)]
pub(crate) mod test_support;
