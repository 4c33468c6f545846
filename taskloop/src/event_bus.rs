// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! The named-event store (§4.4). Lives only on the root scheduler's [`Registry`]; child
//! schedulers forward event operations to their root (see
//! [`Scheduler::root`](crate::scheduler::Scheduler::root)).
//!
//! This module owns the data structure and the operations that run entirely under the
//! registry lock (`declare`/`connect`/`disconnect`/lookup/mark-for-delete). The
//! lock-drop-per-subscriber fan-out in `signal()` needs the scheduler's lock and root
//! link together, so that loop lives on `Scheduler` itself (see `scheduler::event_signal`).

use rustc_hash::FxHashMap;

use crate::error::SchedulerError;
use crate::slab::{Slab, SlotId};
use crate::task::event::{EventCallback, EventTask, Subscription};
use crate::task::{Ctx, TaskId, TaskKind};

impl<C> Clone for Subscription<C> {
    fn clone(&self) -> Self {
        Self { callback: self.callback, ctx: self.ctx, origin: self.origin.clone() }
    }
}

/// How a caller names the event they want to operate on - spec.md's API accepts either
/// a name or a previously-returned handle for `connect`/`disconnect`/`signal`/`delete`.
pub enum EventSelector<'a> {
    Name(&'a str),
    Handle(TaskId),
}

pub struct EventBus<C> {
    slab: Slab<EventTask<C>>,
    names: FxHashMap<String, SlotId>,
}

impl<C> EventBus<C> {
    #[must_use]
    pub fn new() -> Self { Self { slab: Slab::new(), names: FxHashMap::default() } }

    /// `declare(name)`: fails if a *valid* task already exists for `name`. A prior
    /// declaration that was deleted (now invalid, pending its zero-delay reap) does not
    /// block re-declaration under a fresh slot.
    pub fn declare(&mut self, name: &str) -> Result<TaskId, SchedulerError> {
        if let Some(slot) = self.names.get(name) {
            if self.slab.get(*slot).is_some_and(EventTask::is_valid) {
                return Err(SchedulerError::EventAlreadyExists(name.to_owned()));
            }
        }
        let slot = self.slab.insert(EventTask::new(name.to_owned()));
        self.names.insert(name.to_owned(), slot);
        Ok(TaskId { kind: TaskKind::Event, slot })
    }

    pub fn lookup(&self, selector: &EventSelector<'_>) -> Result<TaskId, SchedulerError> {
        let slot = match selector {
            EventSelector::Name(name) => {
                *self.names.get(*name).ok_or(SchedulerError::NotFound("event name"))?
            }
            EventSelector::Handle(task) => task.slot,
        };
        match self.slab.get(slot) {
            Some(task) if task.is_valid() => Ok(TaskId { kind: TaskKind::Event, slot }),
            Some(_) => Err(SchedulerError::NotValid),
            None => Err(SchedulerError::NotFound("event handle")),
        }
    }

    #[must_use]
    pub fn get(&self, slot: SlotId) -> Option<&EventTask<C>> { self.slab.get(slot) }

    pub fn connect(
        &mut self,
        selector: &EventSelector<'_>,
        callback: EventCallback<C>,
        ctx: Ctx,
        origin: std::sync::Weak<crate::scheduler::Scheduler<C>>,
    ) -> Result<(), SchedulerError> {
        let task = self.lookup(selector)?;
        let event = self.slab.get_mut(task.slot).ok_or(SchedulerError::NotValid)?;
        event.connect(callback, ctx, origin)
    }

    pub fn disconnect(
        &mut self,
        selector: &EventSelector<'_>,
        callback: EventCallback<C>,
        ctx: Ctx,
    ) -> Result<(), SchedulerError> {
        let task = self.lookup(selector)?;
        let event = self.slab.get_mut(task.slot).ok_or(SchedulerError::NotValid)?;
        event.disconnect(callback, ctx)
    }

    /// Marks the event invalid. Actual removal is the caller's job (a zero-delay timer
    /// per §4.4), so a `signal()` in progress on another thread still sees a live
    /// `EventTask` value to read even after this returns.
    pub fn mark_deleted(&self, selector: &EventSelector<'_>) -> Result<TaskId, SchedulerError> {
        let task = self.lookup(selector)?;
        self.slab.get(task.slot).expect("looked up just above").invalidate();
        Ok(task)
    }

    /// Performed by the zero-delay cleanup timer: actually frees the `EventTask` and its
    /// subscriptions, and drops the name mapping if it still points at this slot.
    pub fn reap(&mut self, slot: SlotId) {
        if let Some(task) = self.slab.get(slot) {
            let name = task.name.clone();
            if self.names.get(&name) == Some(&slot) {
                self.names.remove(&name);
            }
        }
        self.slab.remove(slot);
    }

    #[must_use]
    pub fn is_valid(&self, slot: SlotId) -> bool { self.slab.get(slot).is_some_and(EventTask::is_valid) }

    pub fn iter_slots(&self) -> impl Iterator<Item = SlotId> + '_ { self.slab.iter().map(|(slot, _)| slot) }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self { Self::new() }
}
