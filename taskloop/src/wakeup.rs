// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! Cross-thread wakeup (§4.5): a shared slot holding an optional waker, split into a
//! write half and a read half so the type system - not a convention comment - enforces
//! who may install a waker vs. who may call it.

use std::io;
use std::sync::{Arc, Mutex};

/// A platform-specific primitive that can force a blocked `poll` call to return
/// promptly. Implemented once per [`PlatformAdapter`](crate::adapter::PlatformAdapter).
pub trait Waker: Send + Sync {
    fn wake(&self) -> io::Result<()>;
}

type SharedSlot<W> = Arc<Mutex<Option<W>>>;

/// The write half of a waker slot: only the adapter that installs the waker (during
/// `init`) holds this.
pub struct WakerSlotWriter<W>(SharedSlot<W>);

/// The read half of a waker slot: held by anything that needs to call `wake()` from a
/// foreign thread (registration entry points, `Scheduler::wake`).
#[derive(Clone)]
pub struct WakerSlotReader<W>(SharedSlot<W>);

/// Creates a linked writer/reader pair sharing one empty slot.
#[must_use]
pub fn waker_slot<W>() -> (WakerSlotWriter<W>, WakerSlotReader<W>) {
    let shared = Arc::new(Mutex::new(None));
    (WakerSlotWriter(Arc::clone(&shared)), WakerSlotReader(shared))
}

impl<W> WakerSlotWriter<W> {
    pub fn install(&self, waker: W) { *self.0.lock().expect("waker slot poisoned") = Some(waker); }

    pub fn clear(&self) { *self.0.lock().expect("waker slot poisoned") = None; }
}

impl<W: Waker> Waker for WakerSlotReader<W> {
    /// Calls `wake()` on the installed waker, if any. A missing waker (not yet
    /// installed, or already torn down) is not an error - there's nothing blocked in
    /// `poll` to wake in that case.
    fn wake(&self) -> io::Result<()> {
        match self.0.lock().expect("waker slot poisoned").as_ref() {
            Some(waker) => waker.wake(),
            None => Ok(()),
        }
    }
}
