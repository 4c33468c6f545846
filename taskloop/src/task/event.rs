// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! [`EventTask`]: a named publish/subscribe slot living on the root scheduler only
//! (§4.4). Child schedulers forward event operations to their root.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use super::Ctx;
use crate::scheduler::Scheduler;

/// Borrowed, type-erased argument list passed to subscribers by [`event_signal`].
///
/// The source passes a C `va_list`; copying the cursor before each subscriber call (per
/// §4.4) is trivial here because a slice of references is `Copy` - each subscriber sees
/// the same borrowed arguments, not a consumed cursor.
///
/// [`event_signal`]: crate::event_bus::EventBus::signal
pub type EventArgs<'a> = &'a [&'a dyn std::any::Any];

/// Callback invoked for each subscriber during `signal()`.
///
/// Returning `false` vetoes the fan-out: no further subscriber in that `signal()` call
/// is invoked (§4.4, testable property 6). The first argument is the *originating*
/// scheduler the subscription was created from, not necessarily the scheduler `signal`
/// was called on - events live on the root, but a subscriber expects to see the
/// scheduler (and thus the `C` app context) it subscribed from.
pub type EventCallback<C> = fn(origin: &Scheduler<C>, task: crate::task::TaskId, ctx: Ctx, args: EventArgs<'_>) -> bool;

/// One `connect()`'d listener on an [`EventTask`].
///
/// `origin` is a non-owning reference (per the Design Notes' "child never owns its
/// parent" rule, generalised here to "a subscription never owns the scheduler it was
/// registered from"): callers are expected to hold their `Scheduler<C>` in an `Arc`, the
/// same ownership shape the platform adapter and dispatch thread use.
pub struct Subscription<C> {
    pub(crate) callback: EventCallback<C>,
    pub(crate) ctx: Ctx,
    pub(crate) origin: Weak<Scheduler<C>>,
}

impl<C> Subscription<C> {
    fn matches(&self, callback: EventCallback<C>, ctx: Ctx) -> bool {
        self.callback as usize == callback as usize && self.ctx == ctx
    }
}

pub struct EventTask<C> {
    pub(crate) name: String,
    pub(crate) subscriptions: Vec<Subscription<C>>,
    pub(crate) valid: AtomicBool,
}

impl<C> EventTask<C> {
    pub(crate) fn new(name: String) -> Self {
        Self { name, subscriptions: Vec::new(), valid: AtomicBool::new(true) }
    }

    pub(crate) fn is_valid(&self) -> bool { self.valid.load(Ordering::Acquire) }

    pub(crate) fn invalidate(&self) { self.valid.store(false, Ordering::Release); }

    /// Appends a subscription, rejecting an exact `(callback, context)` duplicate.
    pub(crate) fn connect(
        &mut self,
        callback: EventCallback<C>,
        ctx: Ctx,
        origin: Weak<Scheduler<C>>,
    ) -> Result<(), crate::error::SchedulerError> {
        if self.subscriptions.iter().any(|s| s.matches(callback, ctx)) {
            return Err(crate::error::SchedulerError::AlreadyExists);
        }
        self.subscriptions.push(Subscription { callback, ctx, origin });
        Ok(())
    }

    /// Removes the first subscription matching `(callback, context)`.
    pub(crate) fn disconnect(
        &mut self,
        callback: EventCallback<C>,
        ctx: Ctx,
    ) -> Result<(), crate::error::SchedulerError> {
        let position = self
            .subscriptions
            .iter()
            .position(|s| s.matches(callback, ctx))
            .ok_or(crate::error::SchedulerError::NotFound("event subscription"))?;
        self.subscriptions.remove(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cb(_origin: &Scheduler<()>, _task: crate::task::TaskId, _ctx: Ctx, _args: EventArgs<'_>) -> bool { true }

    #[test]
    fn test_connect_rejects_exact_duplicate() {
        let mut event: EventTask<()> = EventTask::new("x".to_owned());
        event.connect(cb, 1, Weak::new()).unwrap();
        let err = event.connect(cb, 1, Weak::new()).unwrap_err();
        assert!(matches!(err, crate::error::SchedulerError::AlreadyExists));
        assert_eq!(event.subscriptions.len(), 1);
    }

    #[test]
    fn test_disconnect_removes_matching_pair_only() {
        let mut event: EventTask<()> = EventTask::new("x".to_owned());
        event.connect(cb, 1, Weak::new()).unwrap();
        event.connect(cb, 2, Weak::new()).unwrap();
        event.disconnect(cb, 1).unwrap();
        assert_eq!(event.subscriptions.len(), 1);
        assert_eq!(event.subscriptions[0].ctx, 2);
    }

    #[test]
    fn test_disconnect_missing_pair_errors() {
        let mut event: EventTask<()> = EventTask::new("x".to_owned());
        let err = event.disconnect(cb, 1).unwrap_err();
        assert!(matches!(err, crate::error::SchedulerError::NotFound(_)));
    }
}
