use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::ring::RingBuffer;
use crate::time::ClockTime;

/// A monotonic time source the renderer can schedule against.
pub trait Clock: Send + Sync {
    /// `None` while the clock has nothing to report (for the provided
    /// clock: ring buffer not acquired).
    fn now(&self) -> Option<ClockTime>;
}

/// Affine map translating reference-clock (external) time into the
/// provided clock's internal time domain:
///
/// ```text
/// internal = (external - cexternal) * rate_denom / rate_num + cinternal
/// ```
///
/// Identity until seeded on the transition to PLAYING while slaved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Calibration {
    pub internal: ClockTime,
    pub external: ClockTime,
    pub rate_num: u64,
    pub rate_denom: u64,
}

impl Default for Calibration {
    fn default() -> Calibration {
        Calibration {
            internal: ClockTime::ZERO,
            external: ClockTime::ZERO,
            rate_num: 1,
            rate_denom: 1,
        }
    }
}

/// The clock the sink provides to the pipeline: playback position of
/// the ring buffer's consumer, expressed as time.
///
/// The value is a pure function of a single `samples_done` snapshot:
/// `samples_done` is monotone and `delay` is bounded by the device
/// fill, so consecutive reads never decrease. A high-water mark guards
/// the remaining rounding jitter.
pub struct SinkClock {
    ring: Arc<dyn RingBuffer>,
    calibration: Mutex<Calibration>,
    us_latency: AtomicU64,
    last_time: AtomicU64,
    master: Mutex<Option<Arc<dyn Clock>>>,
}

impl SinkClock {
    pub fn new(ring: Arc<dyn RingBuffer>) -> SinkClock {
        SinkClock {
            ring,
            calibration: Mutex::new(Calibration::default()),
            us_latency: AtomicU64::new(0),
            last_time: AtomicU64::new(0),
            master: Mutex::new(None),
        }
    }

    /// Time in the internal domain: samples the device has played,
    /// scaled to nanoseconds, shifted by the upstream live latency so
    /// elements see time advancing from the moment data first reached
    /// the pipeline.
    pub fn internal_now(&self) -> Option<ClockTime> {
        let spec = self.ring.spec()?;

        if !self.ring.is_acquired() || spec.rate() == 0 {
            return None;
        }

        let done = self.ring.samples_done();
        let delay = u64::from(self.ring.delay());
        let played = done - done.min(delay);

        let time = ClockTime::from_samples(played, spec.rate())
            + ClockTime::from_nanos(self.us_latency.load(Ordering::Relaxed));

        // never step backwards
        let prev = self.last_time.fetch_max(time.nanos(), Ordering::AcqRel);
        Some(ClockTime::from_nanos(prev.max(time.nanos())))
    }

    pub fn calibration(&self) -> Calibration {
        *self.calibration.lock().unwrap()
    }

    pub fn set_calibration(&self, calibration: Calibration) {
        *self.calibration.lock().unwrap() = calibration;
    }

    /// Minimum upstream live latency from the last latency query.
    pub fn set_us_latency(&self, latency: ClockTime) {
        self.us_latency.store(latency.nanos(), Ordering::Relaxed);
    }

    pub fn us_latency(&self) -> ClockTime {
        ClockTime::from_nanos(self.us_latency.load(Ordering::Relaxed))
    }

    /// Mark (or clear) the reference clock this clock is slaved to.
    /// The rate corrector driving `Calibration::rate_num/rate_denom`
    /// from master observations lives with the embedder; resample
    /// slaving only records the relationship here.
    pub fn slave_to(&self, master: Option<Arc<dyn Clock>>) {
        *self.master.lock().unwrap() = master;
    }

    pub fn master(&self) -> Option<Arc<dyn Clock>> {
        self.master.lock().unwrap().clone()
    }
}

impl Clock for SinkClock {
    fn now(&self) -> Option<ClockTime> {
        self.internal_now()
    }
}
