// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! [`Scheduler`]: the value with identity described in §2 - registry, platform
//! adapter, arena, and application context, one per dispatch thread.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tracing::instrument;

use crate::adapter::PlatformAdapter;
use crate::arena::Arena;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::event_bus::EventSelector;
use crate::registry::{NotifyCallback, Registry};
use crate::task::event::EventCallback;
use crate::task::fd::FdCallback;
use crate::task::timeout::{Deadline, TimeoutCallback};
use crate::task::{Ctx, Interest, TaskId, TaskKind};

/// The scheduler itself (§2/§3). Always held behind an `Arc`: child links, the
/// per-thread global slot, and event subscriptions' `origin` all need a non-owning,
/// upgradeable reference to a scheduler that outlives them.
pub struct Scheduler<C> {
    registry: Mutex<Registry<C>>,
    adapter: Mutex<Box<dyn PlatformAdapter<C>>>,
    stopped: AtomicBool,
    config: SchedulerConfig,
    parent: Option<Weak<Scheduler<C>>>,
    root: Weak<Scheduler<C>>,
    app_context: C,
    arena: Mutex<Arena>,
    epoch: Instant,
}

impl<C> Scheduler<C> {
    /// `init(max_tasks, app_context, arena, parent?)` (§6.1), Rust-shaped: the arena is
    /// built internally rather than taken as a parameter, and the platform adapter -
    /// absent from the source's signature because it was a compile-time global there -
    /// is supplied explicitly.
    pub fn init(config: SchedulerConfig, app_context: C, adapter: Box<dyn PlatformAdapter<C>>) -> Result<Arc<Self>, SchedulerError> {
        let max_tasks = config.max_tasks;
        let mut adapter = adapter;
        adapter.init().map_err(|_| SchedulerError::IoError(std::io::Error::other("adapter init failed")))?;
        let scheduler = Arc::new_cyclic(|weak| Self {
            registry: Mutex::new(Registry::new(max_tasks, true)),
            adapter: Mutex::new(adapter),
            stopped: AtomicBool::new(false),
            config,
            parent: None,
            root: weak.clone(),
            app_context,
            arena: Mutex::new(Arena::new()),
            epoch: Instant::now(),
        });
        scheduler.register_wakeup_fd_task()?;
        scheduler.register_freelist_gc_timer();
        Ok(scheduler)
    }

    /// Builds a non-owning child scheduler sharing this scheduler's root (and thus its
    /// event bus). Construction-time-only parent link (§9 Design Notes: "a child never
    /// owns its parent"; "set once at construction").
    pub fn new_child(self: &Arc<Self>, app_context: C, adapter: Box<dyn PlatformAdapter<C>>) -> Result<Arc<Self>, SchedulerError> {
        let max_tasks = self.config.max_tasks;
        let mut adapter = adapter;
        adapter.init().map_err(|_| SchedulerError::IoError(std::io::Error::other("adapter init failed")))?;
        let root = self.root.upgrade().expect("root outlives its children");
        let child = Arc::new_cyclic(|_weak| Self {
            registry: Mutex::new(Registry::new(max_tasks, false)),
            adapter: Mutex::new(adapter),
            stopped: AtomicBool::new(false),
            config: self.config.clone(),
            parent: Some(Arc::downgrade(self)),
            root: Arc::downgrade(&root),
            app_context,
            arena: Mutex::new(Arena::new()),
            epoch: Instant::now(),
        });
        child.register_wakeup_fd_task()?;
        child.register_freelist_gc_timer();
        Ok(child)
    }

    /// Registers the always-first internal fd task whose callback no-ops, draining the
    /// wakeup primitive (§4.5).
    fn register_wakeup_fd_task(&self) -> Result<(), SchedulerError> {
        fn drain<C>(_scheduler: &Scheduler<C>, _task: TaskId, _ready: Interest, _ctx: Ctx) {}
        self.add_fd(crate::adapter::mio_adapter::WAKEUP_KEY, drain, 0)?;
        Ok(())
    }

    /// Schedules the self-rescheduling freelist GC timer (§4.3/§9 config): runs
    /// `run_freelist_gc` on the timeout queue's slab, then reschedules itself for
    /// `freelist_gc_period` later so it keeps running for the scheduler's whole life
    /// without external supervision.
    fn register_freelist_gc_timer(&self) {
        fn tick<C>(scheduler: &Scheduler<C>, _task: TaskId, _ctx: Ctx) {
            let floor = scheduler.config().freelist_gc_floor;
            let reclaimed = scheduler.registry_lock().timeouts_mut().run_freelist_gc(floor);
            if reclaimed > 0 {
                tracing::debug!(reclaimed, "freelist GC reclaimed timeout slots");
            }
            let period = scheduler.config().freelist_gc_period;
            scheduler.add_timeout(tick, 0, period.as_secs(), period.subsec_micros());
        }
        let period = self.config.freelist_gc_period;
        self.add_timeout(tick, 0, period.as_secs(), period.subsec_micros());
    }

    // ---- lifecycle --------------------------------------------------------------

    #[must_use]
    pub fn is_stopped(&self) -> bool { self.stopped.load(Ordering::Acquire) }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let _ = self.wake();
    }

    pub fn wake(&self) -> Result<(), SchedulerError> {
        self.adapter.lock().expect("adapter lock poisoned").waker().wake().map_err(SchedulerError::IoError)
    }

    /// Runs iterations until `stop()` is called (§4.1 run-forever).
    #[instrument(skip_all)]
    pub fn run(&self) -> Result<(), SchedulerError> {
        crate::dispatcher::run_forever(self)
    }

    /// Performs exactly one iteration (§4.1 run-once). `timeout_us == -1` computes the
    /// bound from the timeout queue; `0` services ready work without blocking.
    pub fn run_once(&self, timeout_us: i64) -> Result<crate::dispatcher::LoopOutcome, SchedulerError> {
        crate::dispatcher::iterate_once(self, timeout_us)
    }

    /// Refuses while the scheduler is still valid (§7): call `stop()` first. After
    /// stopping, drains remaining timers, signals, and invalidates+reaps every task.
    pub fn uninit(&self) -> Result<(), SchedulerError> {
        if !self.is_stopped() {
            return Err(SchedulerError::Busy);
        }
        crate::dispatcher::drain_timeouts(self, true);
        crate::dispatcher::drain_pending_signals(self);
        {
            let mut registry = self.registry.lock().expect("registry lock poisoned");
            registry.remove_all(self);
        }
        self.arena.lock().expect("arena lock poisoned").clear();
        self.adapter.lock().expect("adapter lock poisoned").uninit()
    }

    #[must_use]
    pub fn get_parent(&self) -> Option<Arc<Self>> { self.parent.as_ref().and_then(Weak::upgrade) }

    #[must_use]
    pub fn root(&self) -> Arc<Self> { self.root.upgrade().expect("root outlives its children") }

    #[must_use]
    pub fn get_app_context(&self) -> &C { &self.app_context }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig { &self.config }

    pub fn with_arena<R>(&self, f: impl FnOnce(&mut Arena) -> R) -> R {
        f(&mut self.arena.lock().expect("arena lock poisoned"))
    }

    pub fn set_notify(&self, callback: NotifyCallback<C>, ctx: Ctx) {
        self.registry.lock().expect("registry lock poisoned").set_notify(callback, ctx);
    }

    pub fn clear_notify(&self) {
        self.registry.lock().expect("registry lock poisoned").clear_notify();
    }

    pub(crate) fn registry_lock(&self) -> MutexGuard<'_, Registry<C>> {
        self.registry.lock().expect("registry lock poisoned")
    }

    pub(crate) fn adapter_lock(&self) -> MutexGuard<'_, Box<dyn PlatformAdapter<C>>> {
        self.adapter.lock().expect("adapter lock poisoned")
    }

    #[must_use]
    pub(crate) fn now_deadline(&self) -> Deadline {
        let elapsed = self.epoch.elapsed();
        Deadline::new(elapsed.as_secs(), elapsed.subsec_micros())
    }

    // ---- fd task ops --------------------------------------------------------------

    /// `add_fd` (§4.2/§6.2): registers the task, then asks the adapter to arm it for
    /// `READ`; rolls the registry insert back if arming fails.
    pub fn add_fd(&self, key: u64, callback: FdCallback<C>, ctx: Ctx) -> Result<TaskId, SchedulerError> {
        let task = {
            let mut registry = self.registry_lock();
            registry.add_fd(self, key, callback, ctx)?
        };
        let armed = self.adapter_lock().arm_fd(key, Interest::READ);
        if let Err(err) = armed {
            self.registry_lock().rollback_fd(key, task.slot);
            return Err(err);
        }
        let _ = self.wake();
        Ok(task)
    }

    pub fn add_timeout(
        &self,
        callback: TimeoutCallback<C>,
        ctx: Ctx,
        seconds: u64,
        microseconds: u32,
    ) -> TaskId {
        let now = self.now_deadline();
        let task = self.registry_lock().add_timeout(self, callback, ctx, seconds, microseconds, now);
        let _ = self.wake();
        task
    }

    pub fn add_signal(&self, signo: i32, callback: crate::adapter::SignalCallback<C>, ctx: Ctx) -> Result<(), SchedulerError> {
        self.adapter_lock().signal_register(signo, callback, ctx)
    }

    pub fn set_listen_mask(&self, key: u64, mask: Interest, send_events: bool) -> Result<TaskId, SchedulerError> {
        let task = self.registry_lock().set_listen_mask(self, key, mask)?;
        self.adapter_lock().arm_fd(key, mask)?;
        if send_events && !mask.is_none() {
            {
                let mut registry = self.registry_lock();
                registry.set_returned_mask(task.slot, mask);
            }
            crate::dispatcher::dispatch_one_fd(self, task.slot);
        }
        let _ = self.wake();
        Ok(task)
    }

    #[must_use]
    pub fn get_listen_mask(&self, key: u64) -> Option<Interest> { self.registry_lock().get_listen_mask(key) }

    pub fn unset_listen(&self, key: u64) -> Result<TaskId, SchedulerError> {
        self.set_listen_mask(key, Interest::NONE, false)
    }

    // ---- invalidation ---------------------------------------------------------

    pub fn invalidate(&self, task: TaskId) -> Result<(), SchedulerError> {
        let kind = self.registry_lock().invalidate(task)?;
        if kind == TaskKind::Event {
            self.schedule_event_reap(task);
        }
        let _ = self.wake();
        Ok(())
    }

    pub fn invalidate_by_fd(&self, key: u64) -> Result<TaskId, SchedulerError> {
        let task = self.registry_lock().invalidate_by_fd(key)?;
        let _ = self.wake();
        Ok(task)
    }

    pub fn invalidate_fd_by_callback(&self, callback: FdCallback<C>) -> Vec<TaskId> {
        let tasks = self.registry_lock().invalidate_fd_by_callback(callback);
        let _ = self.wake();
        tasks
    }

    pub fn invalidate_by_context(&self, ctx: Ctx) -> Vec<TaskId> {
        let tasks = self.registry_lock().invalidate_by_context(ctx);
        let _ = self.wake();
        tasks
    }

    pub fn invalidate_fd_by_all(&self, key: Option<u64>, callback: Option<FdCallback<C>>, ctx: Option<Ctx>) -> Vec<TaskId> {
        let tasks = self.registry_lock().invalidate_fd_by_all(key, callback, ctx);
        let _ = self.wake();
        tasks
    }

    // ---- event ops (always forwarded to root, §4.4) --------------------------------

    pub fn add_event(&self, name: &str) -> Result<TaskId, SchedulerError> {
        let root = self.root();
        root.registry_lock().add_event(&root, name)
    }

    pub fn event_connect(
        self: &Arc<Self>,
        selector: EventSelector<'_>,
        callback: EventCallback<C>,
        ctx: Ctx,
    ) -> Result<(), SchedulerError> {
        let root = self.root();
        root.registry_lock().event_connect(&selector, callback, ctx, Arc::downgrade(self))
    }

    pub fn event_disconnect(&self, selector: EventSelector<'_>, callback: EventCallback<C>, ctx: Ctx) -> Result<(), SchedulerError> {
        let root = self.root();
        root.registry_lock().event_disconnect(&selector, callback, ctx)
    }

    /// `signal(name | handle, args)` (§4.4): releases the registry lock around every
    /// subscriber call, stopping on veto or mid-iteration invalidation.
    pub fn event_signal(&self, selector: EventSelector<'_>, args: crate::task::EventArgs<'_>) -> Result<(), SchedulerError> {
        let root = self.root();
        let task = { root.registry_lock().events().ok_or(SchedulerError::InvalidArgument("no event bus"))?.lookup(&selector)? };

        let mut index = 0;
        loop {
            let snapshot = {
                let registry = root.registry_lock();
                let Some(bus) = registry.events() else { break };
                if !bus.is_valid(task.slot) {
                    break;
                }
                match bus.get(task.slot).and_then(|event| event.subscriptions.get(index)) {
                    Some(sub) => sub.clone(),
                    None => break,
                }
            };
            let Some(origin) = sub_origin(&snapshot) else {
                index += 1;
                continue;
            };
            let keep_going = (snapshot.callback)(&origin, task, snapshot.ctx, args);
            {
                let registry = root.registry_lock();
                if registry.events().is_none_or(|bus| !bus.is_valid(task.slot)) {
                    break;
                }
            }
            if !keep_going {
                break;
            }
            index += 1;
        }
        Ok(())
    }

    pub fn event_delete(&self, selector: EventSelector<'_>) -> Result<(), SchedulerError> {
        let root = self.root();
        let task = {
            let registry = root.registry_lock();
            let bus = registry.events().ok_or(SchedulerError::InvalidArgument("no event bus"))?;
            bus.mark_deleted(&selector)?
        };
        root.schedule_event_reap(task);
        Ok(())
    }

    /// Schedules the zero-delay reap timer for an invalidated event task (§4.4: actual
    /// removal deferred so an in-flight `signal()` on another thread finishes safely).
    fn schedule_event_reap(&self, task: TaskId) {
        fn reap_event<C>(scheduler: &Scheduler<C>, _task: TaskId, ctx: Ctx) {
            let root = scheduler.root();
            let slot = crate::slab::SlotId::decode(ctx);
            if let Some(bus) = root.registry_lock().events_mut() {
                bus.reap(slot);
            }
        }
        let root = self.root();
        let ctx = task.slot.encode();
        root.add_timeout(reap_event, ctx, 0, 0);
    }
}

fn sub_origin<C>(sub: &crate::task::event::Subscription<C>) -> Option<Arc<Scheduler<C>>> {
    sub.origin.upgrade()
}

impl<C> std::fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("stopped", &self.is_stopped()).finish_non_exhaustive()
    }
}

thread_local! {
    #[allow(clippy::type_complexity)]
    static GLOBAL_ANCHOR: RefCell<()> = const { RefCell::new(()) };
}

/// A per-thread global scheduler slot (§9 Design Notes), modelled as an explicit
/// closure-based accessor rather than a silent null-fallback: `set_global` installs a
/// scheduler for the current thread, `with_global` hands it to a closure if present.
pub mod global {
    use super::*;

    fn slot<C: 'static>() -> &'static std::thread::LocalKey<RefCell<Option<Arc<Scheduler<C>>>>> {
        thread_local! {
            static CURRENT: RefCell<Option<Arc<Scheduler<C>>>> = const { RefCell::new(None) };
        }
        &CURRENT
    }

    pub fn set_global<C: 'static>(scheduler: Option<Arc<Scheduler<C>>>) {
        slot::<C>().with(|cell| *cell.borrow_mut() = scheduler);
    }

    pub fn with_global<C: 'static, R>(f: impl FnOnce(Option<&Arc<Scheduler<C>>>) -> R) -> R {
        slot::<C>().with(|cell| f(cell.borrow().as_ref()))
    }
}
