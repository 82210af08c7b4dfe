//! Time keeping in ticks.
//!
//! Every timeout in the kernel is expressed in ticks of `1 / TICK_RATE_HZ` seconds, counted
//! from the first time the clock is read. [MAX_TICKS] as a timeout means "wait forever".
use config::TICK_RATE_HZ;
use lazy_static::lazy_static;
use std::{
    thread,
    time::{Duration, Instant},
};

pub type Tick = u32;

/// Used as a timeout: block until the operation completes.
pub const MAX_TICKS: Tick = Tick::MAX;

lazy_static! {
    static ref BOOT_INSTANT: Instant = Instant::now();
}

pub fn get_tick_frequency() -> u32 {
    TICK_RATE_HZ as u32
}

/// Ticks passed since boot. Wraps around like a hardware tick counter.
pub fn get_ticks() -> Tick {
    let micros = BOOT_INSTANT.elapsed().as_micros();
    (micros * TICK_RATE_HZ as u128 / 1_000_000) as Tick
}

/// Milliseconds passed since boot.
pub fn get_millis() -> u64 {
    BOOT_INSTANT.elapsed().as_millis() as u64
}

pub fn millis_to_ticks(millis: u32) -> Tick {
    (millis as u64 * TICK_RATE_HZ as u64 / 1000) as Tick
}

pub fn ticks_to_duration(ticks: Tick) -> Duration {
    Duration::from_micros(ticks as u64 * 1_000_000 / TICK_RATE_HZ as u64)
}

/// Ticks left of `timeout` when the wait started at `start_time`; `0` once it expired.
pub fn get_timeout_remaining_ticks(timeout: Tick, start_time: Tick) -> Tick {
    let ticks_passed = get_ticks().wrapping_sub(start_time);
    if ticks_passed >= timeout {
        0
    } else {
        timeout - ticks_passed
    }
}

pub fn delay_ticks(ticks: Tick) {
    thread::sleep(ticks_to_duration(ticks));
}

pub fn delay_millis(millis: u32) {
    thread::sleep(Duration::from_millis(millis as u64));
}

/// The instant a wait of `timeout` ticks gives up, or [None] for [MAX_TICKS].
pub(crate) fn deadline_after(timeout: Tick) -> Option<Instant> {
    if timeout == MAX_TICKS {
        None
    } else {
        Some(Instant::now() + ticks_to_duration(timeout))
    }
}
