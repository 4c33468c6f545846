// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! [`MioAdapter`]: the shipped [`PlatformAdapter`] implementation, built on `mio` for
//! readiness polling and `signal-hook`/`signal-hook-mio` for turning process signals
//! into a pollable source, generalised from one hardcoded stdin/SIGWINCH registration
//! to arbitrary fds and arbitrary signals.

use std::io;
use std::marker::PhantomData;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Poll, Token};
use rustc_hash::FxHashMap;
use signal_hook_mio::v1_0::Signals;

use super::{PlatformAdapter, PollOutcome, SignalCallback};
use crate::error::SchedulerError;
use crate::task::{Ctx, Interest};
use crate::wakeup::{self, Waker as WakerTrait, WakerSlotReader, WakerSlotWriter};

const WAKE_TOKEN: Token = Token(usize::MAX);
const SIGNAL_TOKEN: Token = Token(usize::MAX - 1);
/// Reserved fd key for the scheduler's own internal wakeup task (§4.5): arming this key
/// is how the scheduler registers the self-pipe-equivalent drain callback as an
/// ordinary, always-first `FdTask`.
pub const WAKEUP_KEY: u64 = u64::MAX;

pub struct MioWaker(mio::Waker);

impl WakerTrait for MioWaker {
    fn wake(&self) -> io::Result<()> { self.0.wake() }
}

/// `mio` + `signal-hook-mio`-backed [`PlatformAdapter`].
///
/// `signals_pending` is a plain `bool`, not an atomic: the adapter only ever lives
/// behind `Scheduler`'s own adapter lock, so everything touching it already holds that
/// lock. When the signals source wakes `poll`, the adapter only sets the flag and
/// performs a wakeup; the registered callback itself runs later, from
/// `drain_signal_callbacks`, on the dispatch thread rather than from inside the signal
/// trampoline.
pub struct MioAdapter<C> {
    poll: Poll,
    events: Events,
    waker_writer: WakerSlotWriter<MioWaker>,
    waker_reader: WakerSlotReader<MioWaker>,
    signals: Signals,
    signals_pending: bool,
    signal_callbacks: FxHashMap<i32, (SignalCallback<C>, Ctx)>,
    fd_tokens: FxHashMap<u64, Token>,
    token_fds: FxHashMap<Token, u64>,
    next_token: usize,
    _marker: PhantomData<C>,
}

impl<C> MioAdapter<C> {
    /// Builds the poller, the self-pipe-equivalent waker, and the signal source, and
    /// registers all three.
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let mio_waker = mio::Waker::new(poll.registry(), WAKE_TOKEN)?;
        let (waker_writer, waker_reader) = wakeup::waker_slot();
        waker_writer.install(MioWaker(mio_waker));

        let mut signals = Signals::new([])?;
        poll.registry().register(&mut signals, SIGNAL_TOKEN, mio::Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(128),
            waker_writer,
            waker_reader,
            signals,
            signals_pending: false,
            signal_callbacks: FxHashMap::default(),
            fd_tokens: FxHashMap::default(),
            token_fds: FxHashMap::default(),
            next_token: 0,
            _marker: PhantomData,
        })
    }

    fn token_for(&mut self, key: u64) -> Token {
        if let Some(token) = self.fd_tokens.get(&key) {
            return *token;
        }
        let token = Token(self.next_token);
        self.next_token += 1;
        self.fd_tokens.insert(key, token);
        self.token_fds.insert(token, key);
        token
    }

    fn to_mio_interest(mask: Interest) -> Option<mio::Interest> {
        match (mask.contains(Interest::READ), mask.contains(Interest::WRITE)) {
            (true, true) => Some(mio::Interest::READABLE.add(mio::Interest::WRITABLE)),
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl<C> PlatformAdapter<C> for MioAdapter<C> {
    fn init(&mut self) -> Result<(), SchedulerError> { Ok(()) }

    fn uninit(&mut self) -> Result<(), SchedulerError> {
        self.waker_writer.clear();
        Ok(())
    }

    fn arm_fd(&mut self, key: u64, mask: Interest) -> Result<(), SchedulerError> {
        if key == WAKEUP_KEY {
            // The mio::Waker backing this key was already registered under WAKE_TOKEN
            // in `new()`; it isn't a real fd and has no separate source to (re)arm.
            return Ok(());
        }
        let fd = key as RawFd;
        let token = self.token_for(key);
        let mut source = SourceFd(&fd);
        match Self::to_mio_interest(mask) {
            Some(interest) => {
                let registry = self.poll.registry();
                registry
                    .reregister(&mut source, token, interest)
                    .or_else(|_| registry.register(&mut source, token, interest))
                    .map_err(SchedulerError::IoError)
            }
            None => {
                // mask == NONE: disable without forgetting the key, matching the
                // "mask of 0 disables" contract (§6.2).
                let _ = self.poll.registry().deregister(&mut source);
                Ok(())
            }
        }
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<PollOutcome, SchedulerError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(PollOutcome::Interrupted),
            Err(err) => return Err(SchedulerError::IoError(err)),
        }

        let mut ready = Vec::new();
        for event in &self.events {
            match event.token() {
                WAKE_TOKEN => ready.push((WAKEUP_KEY, Interest::READ)),
                SIGNAL_TOKEN => self.signals_pending = true,
                token => {
                    if let Some(key) = self.token_fds.get(&token) {
                        let mut mask = Interest::NONE;
                        if event.is_readable() {
                            mask |= Interest::READ;
                        }
                        if event.is_writable() {
                            mask |= Interest::WRITE;
                        }
                        if !mask.is_none() {
                            ready.push((*key, mask));
                        }
                    }
                }
            }
        }

        if ready.is_empty() {
            Ok(PollOutcome::Timeout)
        } else {
            Ok(PollOutcome::Ready(ready))
        }
    }

    fn waker(&self) -> Arc<dyn WakerTrait> { Arc::new(self.waker_reader.clone()) }

    fn signal_register(&mut self, signo: i32, callback: SignalCallback<C>, ctx: Ctx) -> Result<(), SchedulerError> {
        self.signals.add_signal(signo).map_err(SchedulerError::IoError)?;
        self.signal_callbacks.insert(signo, (callback, ctx));
        Ok(())
    }

    fn signal_unregister(&mut self, signo: i32) -> Result<(), SchedulerError> {
        self.signal_callbacks.remove(&signo);
        Ok(())
    }

    fn take_signals_pending(&mut self) -> bool { std::mem::take(&mut self.signals_pending) }

    fn drain_signal_callbacks(&mut self) -> Vec<(SignalCallback<C>, Ctx)> {
        self.signals.pending().filter_map(|signo| self.signal_callbacks.get(&signo).copied()).collect()
    }
}
