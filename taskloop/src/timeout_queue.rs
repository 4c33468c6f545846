// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! The timeout priority queue (§4.3): an ordered list of [`TimeoutTask`]s plus the
//! freelist garbage collector that trims the slab's recycled slots during quiescent
//! periods.
//!
//! "The freelist" is a distinct cache of recycled `TimeoutTask` allocations; here that
//! cache *is* [`Slab`]'s own free-slot reuse: inserting after a remove reuses the freed
//! index at zero allocation cost, which is exactly the behaviour a freelist exists to
//! provide. `run_freelist_gc` operates on `Slab::free_count`/`shrink_free_tail` rather
//! than a second, parallel structure.

use crate::slab::{Slab, SlotId};
use crate::task::timeout::{Deadline, TimeoutCallback, TimeoutTask};
use crate::task::{Ctx, TaskId, TaskKind};

/// Ordered-by-deadline storage for timeout tasks. Ties keep FIFO order: a new task
/// inserted with the same deadline as existing ones lands after them.
pub struct TimeoutQueue<C> {
    slab: Slab<TimeoutTask<C>>,
    order: Vec<SlotId>,
}

impl<C> TimeoutQueue<C> {
    #[must_use]
    pub fn new() -> Self { Self { slab: Slab::new(), order: Vec::new() } }

    #[must_use]
    pub fn live_len(&self) -> usize { self.order.len() }

    #[must_use]
    pub fn freelist_len(&self) -> usize { self.slab.free_count() }

    pub fn insert(&mut self, deadline: Deadline, callback: TimeoutCallback<C>, ctx: Ctx) -> TaskId {
        let slot = self.slab.insert(TimeoutTask::new(deadline, callback, ctx));
        let position = self
            .order
            .partition_point(|existing| self.slab.get(*existing).map(|t| t.deadline) <= Some(deadline));
        self.order.insert(position, slot);
        TaskId { kind: TaskKind::Timeout, slot }
    }

    #[must_use]
    pub fn get(&self, slot: SlotId) -> Option<&TimeoutTask<C>> { self.slab.get(slot) }

    #[must_use]
    pub fn is_valid(&self, slot: SlotId) -> bool { self.slab.get(slot).is_some_and(TimeoutTask::is_valid) }

    /// Flips the task's validity flag. Callable under the registry lock from any
    /// thread; does not touch `order` or free anything (§3 Invariant 6: freeing happens
    /// only during a sweep on the owning thread).
    pub fn invalidate(&self, slot: SlotId) -> bool {
        match self.slab.get(slot) {
            Some(task) => {
                task.invalidate();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn head_slot(&self) -> Option<SlotId> { self.order.first().copied() }

    #[must_use]
    pub fn head_deadline(&self) -> Option<Deadline> {
        self.head_slot().and_then(|slot| self.slab.get(slot)).map(|t| t.deadline)
    }

    /// Removes the queue head (whatever its validity) from both `order` and the slab,
    /// recycling its slot. Used to both evict leading invalid entries and to reap a
    /// task that just fired.
    pub fn pop_head(&mut self) -> Option<SlotId> {
        if self.order.is_empty() {
            return None;
        }
        let slot = self.order.remove(0);
        self.slab.remove(slot);
        Some(slot)
    }

    pub fn iter_slots(&self) -> impl Iterator<Item = SlotId> + '_ { self.order.iter().copied() }

    /// Removes a specific slot wherever it sits in `order` (used by
    /// `invalidate_by_all`-style bulk removal and by teardown). O(n); only used off the
    /// hot dispatch path.
    pub fn remove(&mut self, slot: SlotId) -> bool {
        if let Some(position) = self.order.iter().position(|s| *s == slot) {
            self.order.remove(position);
            self.slab.remove(slot).is_some()
        } else {
            false
        }
    }

    /// Trims the freelist per §4.3: if it holds more entries than `floor` and more than
    /// the live queue, frees half the excess down to `floor`. Returns the number of
    /// slots actually reclaimed.
    pub fn run_freelist_gc(&mut self, floor: usize) -> usize {
        let free = self.slab.free_count();
        let live = self.order.len();
        if free > floor && free > live {
            let excess = free - floor;
            let to_remove = (excess / 2).max(1).min(free - floor);
            self.slab.shrink_free_tail(to_remove)
        } else {
            0
        }
    }
}

impl<C> Default for TimeoutQueue<C> {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn noop<C>(_scheduler: &crate::scheduler::Scheduler<C>, _task: TaskId, _ctx: Ctx) {}

    #[test]
    fn test_insert_keeps_order_sorted_with_fifo_ties() {
        let mut queue: TimeoutQueue<()> = TimeoutQueue::new();
        let first = queue.insert(Deadline::new(5, 0), noop, 1);
        let second = queue.insert(Deadline::new(1, 0), noop, 2);
        let third = queue.insert(Deadline::new(5, 0), noop, 3);
        let order: Vec<_> = queue.iter_slots().collect();
        assert_eq!(order, vec![second.slot, first.slot, third.slot]);
    }

    #[test]
    fn test_invalidate_then_pop_head_reaps_without_firing() {
        let mut queue: TimeoutQueue<()> = TimeoutQueue::new();
        let task = queue.insert(Deadline::new(0, 0), noop, 1);
        assert!(queue.invalidate(task.slot));
        assert!(!queue.is_valid(task.slot));
        assert_eq!(queue.pop_head(), Some(task.slot));
        assert_eq!(queue.live_len(), 0);
    }

    #[test]
    fn test_freelist_gc_trims_half_excess_down_to_floor() {
        let mut queue: TimeoutQueue<()> = TimeoutQueue::new();
        let slots: Vec<_> = (0..20).map(|i| queue.insert(Deadline::new(i, 0), noop, 0)).collect();
        for s in &slots {
            queue.remove(s.slot);
        }
        assert_eq!(queue.freelist_len(), 20);
        let removed = queue.run_freelist_gc(10);
        assert_eq!(removed, 5);
        assert_eq!(queue.freelist_len(), 15);
    }

    #[test]
    fn test_freelist_gc_noop_below_floor() {
        let mut queue: TimeoutQueue<()> = TimeoutQueue::new();
        let task = queue.insert(Deadline::new(0, 0), noop, 0);
        queue.remove(task.slot);
        assert_eq!(queue.run_freelist_gc(10), 0);
    }
}
