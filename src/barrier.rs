//! Two-counter spin rendezvous.
//!
//! Each thread owns one monotonic counter and bumps it at the start and at
//! the end of every iteration, so the counters never drift more than one
//! bump apart. The start-of-iteration rendezvous spins until the peer
//! counter catches up; the end of an iteration is just a release bump, and
//! the next rendezvous catches any lagging party.
//!
//! A futex or condvar here would add microseconds of wakeup jitter that
//! swamps the nanosecond-scale races being aligned, so the wait is a pure
//! spin. On machines without spare hardware parallelism the spin must
//! yield, otherwise the peer never gets scheduled and the rendezvous
//! deadlocks.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// One pass through the wait loop. Also used by the delay loop so that a
/// delay unit costs roughly the same as a barrier spin.
#[inline]
fn spin_once(yield_in_wait: bool) {
    if yield_in_wait {
        std::thread::yield_now();
    } else {
        std::hint::spin_loop();
    }
}

/// True when `seen` has reached `target` in wrapping u32 sequence space.
///
/// The peer may already be one bump past the value we are waiting for
/// (it can clear the rendezvous and bump again at its window end before we
/// get a look), so an equality test can strand the waiter. Serial-number
/// comparison treats anything up to half the u32 range ahead as "caught
/// up" and survives counter wraparound.
#[inline]
fn caught_up(seen: u32, target: u32) -> bool {
    seen.wrapping_sub(target) as i32 >= 0
}

/// Publish our arrival and spin until the peer arrives too.
///
/// Bumps `ours` (release, so the peer observes everything we wrote before
/// arriving), then acquire-loads `theirs` until it catches up. The first
/// load always happens after our own bump is visible; a thread arriving
/// second therefore cannot miss the first one's increment. Returns how
/// many times the loop spun, which calibrates the delay unit.
///
/// `stop` breaks the wait so a cancelled run never leaves a thread
/// spinning here forever.
pub(crate) fn pair_wait(
    ours: &AtomicU32,
    theirs: &AtomicU32,
    stop: &AtomicBool,
    yield_in_wait: bool,
) -> u32 {
    let target = ours.fetch_add(1, Ordering::Release).wrapping_add(1);
    let mut spins: u32 = 0;

    while !caught_up(theirs.load(Ordering::Acquire), target) {
        if stop.load(Ordering::Acquire) {
            break;
        }
        spins = spins.saturating_add(1);
        spin_once(yield_in_wait);
    }
    spins
}

/// Advance our counter without waiting.
///
/// Used at the end of a window: the release bump publishes the endpoint
/// timestamp written just before it, and the peer's next rendezvous does
/// the waiting.
#[inline]
pub(crate) fn pair_advance(ours: &AtomicU32) {
    ours.fetch_add(1, Ordering::Release);
}

/// Burn `units` spin iterations of the same cost as a rendezvous spin.
///
/// The load of the peer counter keeps each pass comparable to one wait
/// iteration, which is what the estimator assumed when it converted a
/// nanosecond bias into spin units.
pub(crate) fn delay_spin(theirs: &AtomicU32, units: u32, yield_in_wait: bool) {
    for _ in 0..units {
        let _ = theirs.load(Ordering::Acquire);
        spin_once(yield_in_wait);
    }
}
