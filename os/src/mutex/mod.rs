//! Kernel locking primitives.
//!
//! [Mutex] is a non-recursive lock with bounded waits, [RecursiveMutex] may be re-entered
//! by the task that holds it. Both are built on [spin] and back off to the host scheduler
//! while contended.

use std::{thread, time::Instant};

mod recursive;
mod spin;

pub use recursive::{RecursiveMutex, RecursiveMutexGuard};
pub use spin::{Mutex, MutexGuard};

/// Busy iterations before a waiter starts yielding its time slice.
const SPIN_LIMIT: u32 = 64;

/// Retry `attempt` until it produces a value or `deadline` passes.
///
/// `None` as deadline waits forever. `attempt` always runs at least once.
pub(crate) fn wait_until<R>(deadline: Option<Instant>, mut attempt: impl FnMut() -> Option<R>) -> Option<R> {
    let mut spins = 0;
    loop {
        if let Some(value) = attempt() {
            return Some(value);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return None;
        }
        if spins < SPIN_LIMIT {
            spins += 1;
            core::hint::spin_loop();
        } else {
            thread::yield_now();
        }
    }
}
