// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! The per-scheduler task registry (§4.2): fd map, timeout queue, and (root-only) event
//! bus, plus the notify-observer hook fired on every add/invalidate.
//!
//! Arming the platform adapter for fd tasks is deliberately *not* done here - the
//! adapter lives behind its own lock on [`Scheduler`], and `Scheduler::add_fd` /
//! `set_listen_mask` compose a registry mutation with an adapter call, rolling the
//! registry side back if arming fails. Keeping `Registry` adapter-agnostic means it
//! isn't generic over the adapter type, only over the application context `C`.

use rustc_hash::FxHashMap;

use crate::error::SchedulerError;
use crate::event_bus::{EventBus, EventSelector};
use crate::scheduler::Scheduler;
use crate::slab::{Slab, SlotId};
use crate::task::event::EventCallback;
use crate::task::fd::FdCallback;
use crate::task::timeout::{Deadline, TimeoutCallback};
use crate::task::{Ctx, FdTask, Interest, TaskId, TaskKind};
use crate::timeout_queue::TimeoutQueue;

/// Passed to the notify-observer for every add and every invalidation (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct NotifyEvent {
    pub added: bool,
    pub task: TaskId,
    pub is_fd: bool,
    pub fd_or_zero: u64,
    pub mask: Interest,
    pub seconds: u64,
    pub microseconds: u32,
}

pub type NotifyCallback<C> = fn(scheduler: &Scheduler<C>, event: NotifyEvent, observer_ctx: Ctx);

pub struct Registry<C> {
    fds: Slab<FdTask<C>>,
    fd_keys: FxHashMap<u64, SlotId>,
    timeouts: TimeoutQueue<C>,
    /// `Some` only on a root scheduler (§3 Invariant 4).
    events: Option<EventBus<C>>,
    notify: Option<(NotifyCallback<C>, Ctx)>,
    max_tasks: usize,
}

impl<C> Registry<C> {
    #[must_use]
    pub fn new(max_tasks: usize, is_root: bool) -> Self {
        Self {
            fds: Slab::new(),
            fd_keys: FxHashMap::default(),
            timeouts: TimeoutQueue::new(),
            events: is_root.then(EventBus::new),
            notify: None,
            max_tasks,
        }
    }

    pub fn set_notify(&mut self, callback: NotifyCallback<C>, ctx: Ctx) { self.notify = Some((callback, ctx)); }

    pub fn clear_notify(&mut self) { self.notify = None; }

    fn fire_notify(&self, scheduler: &Scheduler<C>, event: NotifyEvent) {
        if let Some((callback, ctx)) = self.notify {
            callback(scheduler, event, ctx);
        }
    }

    // ---- fd tasks -------------------------------------------------------------

    #[must_use]
    pub fn fd_task(&self, slot: SlotId) -> Option<&FdTask<C>> { self.fds.get(slot) }

    /// `add-fd` (§4.2), adapter arming excluded. On success the key's initial
    /// requested mask is always `READ`, per §4.5/§6.2 ("register for the initial mask
    /// `{read}`"); callers wanting more call `set_listen_mask` right after.
    pub fn add_fd(
        &mut self,
        scheduler: &Scheduler<C>,
        key: u64,
        callback: FdCallback<C>,
        ctx: Ctx,
    ) -> Result<TaskId, SchedulerError> {
        if let Some(slot) = self.fd_keys.get(&key).copied() {
            if self.fds.get(slot).is_some_and(FdTask::is_valid) {
                return Err(SchedulerError::AlreadyExists);
            }
            self.fds.remove(slot);
            self.fd_keys.remove(&key);
        }
        if self.max_tasks != 0 && self.fds.len() >= self.max_tasks {
            return Err(SchedulerError::Limit { limit: self.max_tasks });
        }
        let slot = self.fds.insert(FdTask::new(key, Interest::READ, callback, ctx));
        self.fd_keys.insert(key, slot);
        let task = TaskId { kind: TaskKind::Fd, slot };
        self.fire_notify(
            scheduler,
            NotifyEvent { added: true, task, is_fd: true, fd_or_zero: key, mask: Interest::READ, seconds: 0, microseconds: 0 },
        );
        Ok(task)
    }

    /// Rolls back a just-inserted fd task whose adapter arming failed.
    pub fn rollback_fd(&mut self, key: u64, slot: SlotId) {
        self.fds.remove(slot);
        self.fd_keys.remove(&key);
    }

    pub fn set_listen_mask(&mut self, scheduler: &Scheduler<C>, key: u64, mask: Interest) -> Result<TaskId, SchedulerError> {
        let slot = *self.fd_keys.get(&key).ok_or(SchedulerError::NotFound("fd key"))?;
        let task = self.fds.get_mut(slot).ok_or(SchedulerError::NotFound("fd key"))?;
        if !task.is_valid() {
            return Err(SchedulerError::NotValid);
        }
        task.requested_mask = mask;
        let task_id = TaskId { kind: TaskKind::Fd, slot };
        self.fire_notify(
            scheduler,
            NotifyEvent { added: true, task: task_id, is_fd: true, fd_or_zero: key, mask, seconds: 0, microseconds: 0 },
        );
        Ok(task_id)
    }

    #[must_use]
    pub fn get_listen_mask(&self, key: u64) -> Option<Interest> {
        let slot = *self.fd_keys.get(&key)?;
        self.fds.get(slot).filter(|t| t.is_valid()).map(|t| t.requested_mask)
    }

    pub fn set_returned_mask(&mut self, slot: SlotId, mask: Interest) {
        if let Some(task) = self.fds.get_mut(slot) {
            task.returned_mask = mask;
        }
    }

    pub fn fd_slot(&self, key: u64) -> Option<SlotId> { self.fd_keys.get(&key).copied() }

    pub fn reap_invalid_fd(&mut self, slot: SlotId) {
        if let Some(task) = self.fds.get(slot) {
            let key = task.key;
            if self.fd_keys.get(&key) == Some(&slot) {
                self.fd_keys.remove(&key);
            }
        }
        self.fds.remove(slot);
    }

    // ---- timeout tasks ----------------------------------------------------------

    #[must_use]
    pub fn timeouts(&self) -> &TimeoutQueue<C> { &self.timeouts }

    pub fn timeouts_mut(&mut self) -> &mut TimeoutQueue<C> { &mut self.timeouts }

    pub fn add_timeout(
        &mut self,
        scheduler: &Scheduler<C>,
        callback: TimeoutCallback<C>,
        ctx: Ctx,
        seconds: u64,
        microseconds: u32,
        now: Deadline,
    ) -> TaskId {
        let deadline = Deadline::new(now.seconds + seconds, now.micros + microseconds);
        let task = self.timeouts.insert(deadline, callback, ctx);
        self.fire_notify(
            scheduler,
            NotifyEvent { added: true, task, is_fd: false, fd_or_zero: 0, mask: Interest::NONE, seconds, microseconds },
        );
        task
    }

    // ---- event tasks (root only) --------------------------------------------------

    #[must_use]
    pub fn events(&self) -> Option<&EventBus<C>> { self.events.as_ref() }

    pub fn events_mut(&mut self) -> Option<&mut EventBus<C>> { self.events.as_mut() }

    pub fn add_event(&mut self, scheduler: &Scheduler<C>, name: &str) -> Result<TaskId, SchedulerError> {
        let bus = self.events.as_mut().ok_or(SchedulerError::InvalidArgument("add_event called on non-root scheduler"))?;
        let task = bus.declare(name)?;
        self.fire_notify(
            scheduler,
            NotifyEvent { added: true, task, is_fd: false, fd_or_zero: 0, mask: Interest::NONE, seconds: 0, microseconds: 0 },
        );
        Ok(task)
    }

    pub fn event_connect(
        &mut self,
        selector: &EventSelector<'_>,
        callback: EventCallback<C>,
        ctx: Ctx,
        origin: std::sync::Weak<Scheduler<C>>,
    ) -> Result<(), SchedulerError> {
        self.events.as_mut().ok_or(SchedulerError::InvalidArgument("event op on non-root scheduler"))?.connect(
            selector, callback, ctx, origin,
        )
    }

    pub fn event_disconnect(
        &mut self,
        selector: &EventSelector<'_>,
        callback: EventCallback<C>,
        ctx: Ctx,
    ) -> Result<(), SchedulerError> {
        self.events.as_mut().ok_or(SchedulerError::InvalidArgument("event op on non-root scheduler"))?.disconnect(
            selector, callback, ctx,
        )
    }

    // ---- cross-kind invalidation -------------------------------------------------

    /// `invalidate(task)` (§4.2): flips validity only. Returns the kind so the caller
    /// can decide whether to schedule the root-side zero-delay event reap.
    pub fn invalidate(&self, task: TaskId) -> Result<TaskKind, SchedulerError> {
        let found = match task.kind {
            TaskKind::Fd => self.fds.get(task.slot).map(FdTask::invalidate).is_some(),
            TaskKind::Timeout => self.timeouts.invalidate(task.slot),
            TaskKind::Event => {
                self.events.as_ref().is_some_and(|bus| bus.mark_deleted(&EventSelector::Handle(task)).is_ok())
            }
        };
        if found {
            Ok(task.kind)
        } else {
            Err(SchedulerError::NotFound("task handle"))
        }
    }

    pub fn invalidate_by_fd(&self, key: u64) -> Result<TaskId, SchedulerError> {
        let slot = *self.fd_keys.get(&key).ok_or(SchedulerError::NotFound("fd key"))?;
        let task = self.fds.get(slot).ok_or(SchedulerError::NotFound("fd key"))?;
        task.invalidate();
        Ok(TaskId { kind: TaskKind::Fd, slot })
    }

    pub fn invalidate_fd_by_callback(&self, callback: FdCallback<C>) -> Vec<TaskId> {
        self.fds
            .iter()
            .filter(|(_, task)| task.is_valid() && task.callback as usize == callback as usize)
            .map(|(slot, task)| {
                task.invalidate();
                TaskId { kind: TaskKind::Fd, slot }
            })
            .collect()
    }

    pub fn invalidate_by_context(&self, ctx: Ctx) -> Vec<TaskId> {
        let mut invalidated = Vec::new();
        for (slot, task) in self.fds.iter() {
            if task.is_valid() && task.ctx == ctx {
                task.invalidate();
                invalidated.push(TaskId { kind: TaskKind::Fd, slot });
            }
        }
        for slot in self.timeouts.iter_slots() {
            if let Some(task) = self.timeouts.get(slot) {
                if task.is_valid() && task.ctx == ctx {
                    task.invalidate();
                    invalidated.push(TaskId { kind: TaskKind::Timeout, slot });
                }
            }
        }
        invalidated
    }

    pub fn invalidate_fd_by_all(&self, key: Option<u64>, callback: Option<FdCallback<C>>, ctx: Option<Ctx>) -> Vec<TaskId> {
        self.fds
            .iter()
            .filter(|(_, task)| {
                task.is_valid()
                    && key.is_none_or(|k| k == task.key)
                    && callback.is_none_or(|cb| cb as usize == task.callback as usize)
                    && ctx.is_none_or(|c| c == task.ctx)
            })
            .map(|(slot, task)| {
                task.invalidate();
                TaskId { kind: TaskKind::Fd, slot }
            })
            .collect()
    }

    /// `remove(ALL)` (§4.2): bulk invalidate and immediately reap every task of every
    /// kind. Used only during teardown (`Scheduler::uninit`).
    pub fn remove_all(&mut self, scheduler: &Scheduler<C>) {
        let fd_slots: Vec<_> = self.fds.iter().map(|(slot, _)| slot).collect();
        for slot in fd_slots {
            if let Some(task) = self.fds.get(slot) {
                let key = task.key;
                task.invalidate();
                self.fire_notify(
                    scheduler,
                    NotifyEvent { added: false, task: TaskId { kind: TaskKind::Fd, slot }, is_fd: true, fd_or_zero: key, mask: Interest::NONE, seconds: 0, microseconds: 0 },
                );
            }
            self.reap_invalid_fd(slot);
        }

        while self.timeouts.live_len() > 0 {
            if let Some(slot) = self.timeouts.head_slot() {
                if let Some(task) = self.timeouts.get(slot) {
                    task.invalidate();
                    self.fire_notify(
                        scheduler,
                        NotifyEvent { added: false, task: TaskId { kind: TaskKind::Timeout, slot }, is_fd: false, fd_or_zero: 0, mask: Interest::NONE, seconds: 0, microseconds: 0 },
                    );
                }
                self.timeouts.pop_head();
            }
        }

        if let Some(bus) = self.events.as_mut() {
            let slots: Vec<_> = bus.iter_slots().collect();
            for slot in slots {
                if let Some(task) = bus.get(slot) {
                    task.invalidate();
                    self.fire_notify(
                        scheduler,
                        NotifyEvent { added: false, task: TaskId { kind: TaskKind::Event, slot }, is_fd: false, fd_or_zero: 0, mask: Interest::NONE, seconds: 0, microseconds: 0 },
                    );
                }
                bus.reap(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SchedulerConfig;
    use crate::scheduler::Scheduler;
    use crate::task::{Ctx, Interest, TaskId};
    use crate::test_support::FakeAdapter;

    fn scheduler() -> std::sync::Arc<Scheduler<()>> {
        let adapter: Box<dyn crate::adapter::PlatformAdapter<()>> = Box::new(FakeAdapter::<()>::new());
        Scheduler::init(SchedulerConfig::default(), (), adapter).unwrap()
    }

    fn noop_fd<C>(_s: &Scheduler<C>, _t: TaskId, _r: Interest, _c: Ctx) {}

    /// §8 invariant 5 / §4.2: `add_fd(k)` on a present-and-valid key fails; on a
    /// present-and-invalid key, it replaces the entry under a fresh slot.
    #[test]
    fn test_add_fd_duplicate_key_rules() {
        let scheduler = scheduler();
        let first = scheduler.add_fd(7, noop_fd, 0).unwrap();
        let err = scheduler.add_fd(7, noop_fd, 0).unwrap_err();
        assert!(matches!(err, crate::error::SchedulerError::AlreadyExists));
        scheduler.invalidate(first).unwrap();
        let second = scheduler.add_fd(7, noop_fd, 0).unwrap();
        assert_ne!(first, second);
        assert_eq!(scheduler.get_listen_mask(7), Some(Interest::READ));
    }

    #[test]
    fn test_add_fd_enforces_max_tasks() {
        let adapter: Box<dyn crate::adapter::PlatformAdapter<()>> = Box::new(FakeAdapter::<()>::new());
        let scheduler = Scheduler::init(SchedulerConfig::default().with_max_tasks(1), (), adapter).unwrap();
        // slot 0 is consumed internally by the scheduler's own wakeup fd task.
        let err = scheduler.add_fd(7, noop_fd, 0).unwrap_err();
        assert!(matches!(err, crate::error::SchedulerError::Limit { limit: 1 }));
    }

    #[test]
    fn test_set_listen_mask_round_trips() {
        let scheduler = scheduler();
        scheduler.add_fd(7, noop_fd, 0).unwrap();
        scheduler.set_listen_mask(7, Interest::READ | Interest::WRITE, false).unwrap();
        assert_eq!(scheduler.get_listen_mask(7), Some(Interest::READ | Interest::WRITE));
    }

    #[test]
    fn test_invalidate_by_context_spans_fd_and_timeout() {
        fn noop_timeout<C>(_s: &Scheduler<C>, _t: TaskId, _c: Ctx) {}
        let scheduler = scheduler();
        let fd = scheduler.add_fd(7, noop_fd, 99).unwrap();
        let timer = scheduler.add_timeout(noop_timeout, 99, 10, 0);
        let other = scheduler.add_fd(8, noop_fd, 1).unwrap();
        let invalidated = scheduler.invalidate_by_context(99);
        assert_eq!(invalidated.len(), 2);
        assert!(invalidated.contains(&fd));
        assert!(invalidated.contains(&timer));
        assert!(!invalidated.contains(&other));
    }
}
