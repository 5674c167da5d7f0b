use nix::sys::time::TimeValLike;
use nix::time::ClockId;

use chirp_core::clock::Clock;
use chirp_core::time::ClockTime;

/// A pipeline clock over the system monotonic clock, zeroed at
/// construction.
pub struct MonotonicClock {
    epoch: u64,
}

impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock { epoch: raw_nanos() }
    }
}

impl Default for MonotonicClock {
    fn default() -> MonotonicClock {
        MonotonicClock::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Option<ClockTime> {
        Some(ClockTime::from_nanos(raw_nanos() - self.epoch))
    }
}

fn raw_nanos() -> u64 {
    let timespec = nix::time::clock_gettime(ClockId::CLOCK_MONOTONIC_RAW)
        .expect("clock_gettime(CLOCK_MONOTONIC_RAW) failed, are we on Linux?");

    u64::try_from(timespec.num_nanoseconds())
        .expect("cannot convert i64 time value to u64")
}
