//! Event groups: a word of flag bits that tasks wait on and anyone, interrupts included, sets.
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::{
    error::{Error, Result},
    interrupt::{ensure_task_context, is_isr_context},
    mutex::{Mutex, MutexGuard},
    time::{MAX_TICKS, Tick, deadline_after},
};

/// Wake tokens kept at most. Waiters re-check the bits, so dropped or stale tokens are harmless.
const WAKE_CAPACITY: usize = 32;

struct State {
    bits: u32,
    /// Tasks blocked in [EventGroup::wait].
    waiters: usize,
}

pub struct EventGroup {
    state: Mutex<State>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl EventGroup {
    pub fn new() -> EventGroup {
        let (wake_tx, wake_rx) = channel::bounded(WAKE_CAPACITY);
        EventGroup {
            state: Mutex::new(State { bits: 0, waiters: 0 }),
            wake_tx,
            wake_rx,
        }
    }

    /// Interrupt handlers must not spin on the lock: they get [Error::Resource] instead.
    fn state(&self) -> Result<MutexGuard<'_, State>> {
        if is_isr_context() {
            self.state.try_lock().ok_or(Error::Resource)
        } else {
            Ok(self.state.lock())
        }
    }

    /// Set `flags` and wake the waiting tasks.
    pub fn set(&self, flags: u32) -> Result<()> {
        let waiters = {
            let mut state = self.state()?;
            state.bits |= flags;
            state.waiters
        };
        for _ in 0..waiters.min(WAKE_CAPACITY) {
            if self.wake_tx.try_send(()).is_err() {
                break;
            }
        }
        Ok(())
    }

    pub fn clear(&self, flags: u32) -> Result<()> {
        self.state()?.bits &= !flags;
        Ok(())
    }

    /// Current bits. Returns 0 when an interrupt handler finds the group locked.
    pub fn get(&self) -> u32 {
        self.state().map_or(0, |state| state.bits)
    }

    /// Wait until any (or, with `await_all`, every) bit of `flags` is set, for at most
    /// `timeout` ticks. Returns the bits seen when the wait was satisfied; `clear_on_exit`
    /// then clears `flags`.
    ///
    /// An expired wait fails with [Error::Timeout] when none of `flags` is set and with
    /// [Error::Resource] when only some of them are.
    pub fn wait(&self, flags: u32, await_all: bool, clear_on_exit: bool, timeout: Tick) -> Result<u32> {
        ensure_task_context()?;
        if flags == 0 {
            return Err(Error::InvalidArgument);
        }
        let deadline = deadline_after(timeout);
        loop {
            {
                let mut state = self.state.lock();
                let matched = state.bits & flags;
                let satisfied = if await_all { matched == flags } else { matched != 0 };
                if satisfied {
                    let seen = state.bits;
                    if clear_on_exit {
                        state.bits &= !flags;
                    }
                    return Ok(seen);
                }
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Err(if matched == 0 { Error::Timeout } else { Error::Resource });
                }
                state.waiters += 1;
            }
            let woken = match deadline {
                Some(deadline) => self.wake_rx.recv_deadline(deadline),
                None => self.wake_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            self.state.lock().waiters -= 1;
            if let Err(RecvTimeoutError::Disconnected) = woken {
                return Err(Error::Resource);
            }
        }
    }

    /// [EventGroup::wait] without a time limit.
    pub fn wait_forever(&self, flags: u32, await_all: bool, clear_on_exit: bool) -> Result<u32> {
        self.wait(flags, await_all, clear_on_exit, MAX_TICKS)
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        EventGroup::new()
    }
}
