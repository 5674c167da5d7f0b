use core::ops::{Add, AddAssign, Sub};

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// A point on a clock's timeline, in nanoseconds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, derive_more::Display)]
#[display(fmt = "{_0}ns")]
pub struct ClockTime(u64);

impl ClockTime {
    pub const ZERO: ClockTime = ClockTime(0);
    pub const SECOND: ClockTime = ClockTime(NANOS_PER_SECOND);

    pub const fn from_nanos(nanos: u64) -> ClockTime {
        ClockTime(nanos)
    }

    pub const fn nanos(self) -> u64 {
        self.0
    }

    pub const fn from_micros(micros: u64) -> ClockTime {
        ClockTime(micros * 1000)
    }

    /// Time of the `samples`'th sample at `rate` Hz.
    pub fn from_samples(samples: u64, rate: u32) -> ClockTime {
        assert!(rate != 0, "sample rate must be non-zero");
        let nanos = (u128::from(samples) * u128::from(NANOS_PER_SECOND)) / u128::from(rate);
        let nanos = u64::try_from(nanos).expect("can't narrow sample time to u64");
        ClockTime(nanos)
    }

    /// Sample position at `rate` Hz, rounding down.
    pub fn to_samples_lossy(self, rate: u32) -> u64 {
        let samples = (u128::from(self.0) * u128::from(rate)) / u128::from(NANOS_PER_SECOND);
        u64::try_from(samples).expect("can't narrow sample count to u64")
    }

    pub fn checked_sub(self, other: ClockTime) -> Option<ClockTime> {
        self.0.checked_sub(other.0).map(ClockTime)
    }

    pub fn saturating_sub(self, other: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_sub(other.0))
    }

    pub fn delta(self, other: ClockTime) -> TimeDelta {
        let self_ = i64::try_from(self.0).expect("u64 -> i64 in ClockTime::delta");
        let other = i64::try_from(other.0).expect("u64 -> i64 in ClockTime::delta");
        TimeDelta(self_.checked_sub(other).expect("underflow in ClockTime::delta"))
    }

    pub fn saturating_add_signed(self, delta: TimeDelta) -> ClockTime {
        ClockTime(self.0.saturating_add_signed(delta.0))
    }
}

impl Add<ClockTime> for ClockTime {
    type Output = ClockTime;

    fn add(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0.checked_add(rhs.0).expect("ClockTime::add would overflow!"))
    }
}

impl AddAssign<ClockTime> for ClockTime {
    fn add_assign(&mut self, rhs: ClockTime) {
        *self = self.add(rhs);
    }
}

impl Sub<ClockTime> for ClockTime {
    type Output = ClockTime;

    fn sub(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0.checked_sub(rhs.0).expect("ClockTime::sub would underflow!"))
    }
}

/// A signed distance between two clock times, in nanoseconds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, derive_more::Display)]
#[display(fmt = "{_0}ns")]
pub struct TimeDelta(i64);

impl TimeDelta {
    pub const ZERO: TimeDelta = TimeDelta(0);

    pub const fn from_nanos(nanos: i64) -> TimeDelta {
        TimeDelta(nanos)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub fn abs(self) -> ClockTime {
        ClockTime(u64::try_from(self.0.abs()).expect("i64::MIN in TimeDelta::abs"))
    }

    /// Duration of a signed sample count at `rate` Hz.
    pub fn from_samples_lossy(samples: i64, rate: u32) -> TimeDelta {
        assert!(rate != 0, "sample rate must be non-zero");
        let nanos = (i128::from(samples) * i128::from(NANOS_PER_SECOND)) / i128::from(rate);
        TimeDelta(i64::try_from(nanos).expect("can't narrow sample delta to i64"))
    }
}
