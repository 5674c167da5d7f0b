use std::error::Error;

use thiserror::Error;

use crate::format::AudioFormat;
use crate::time::ClockTime;

/// Segment layout the sink asks the ring buffer to allocate. Derived
/// from the requested buffer/latency durations at acquire time and
/// immutable until release.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferSpec {
    pub format: AudioFormat,
    /// bytes per segment
    pub segsize: u32,
    /// segment count
    pub segtotal: u32,
    /// segments of headroom before the device may underrun
    pub seglatency: u32,
}

impl BufferSpec {
    /// Derive the segment layout from the requested device buffer and
    /// segment durations, both in microseconds.
    pub fn new(format: AudioFormat, buffer_time: u64, latency_time: u64) -> BufferSpec {
        let bps = format.bytes_per_sample();
        let samples_per_seg =
            ((latency_time * u64::from(format.rate)) / 1_000_000).max(1);
        let segsize = u32::try_from(samples_per_seg * u64::from(bps))
            .expect("segment size overflows u32");
        let segtotal = u32::try_from((buffer_time / latency_time.max(1)).max(2))
            .expect("segment count overflows u32");

        BufferSpec {
            format,
            segsize,
            segtotal,
            seglatency: segtotal,
        }
    }

    pub fn rate(&self) -> u32 {
        self.format.rate
    }

    pub fn bytes_per_sample(&self) -> u32 {
        self.format.bytes_per_sample()
    }

    pub fn samples_per_seg(&self) -> u32 {
        self.segsize / self.bytes_per_sample()
    }

    /// Duration of the whole device buffer.
    pub fn duration(&self) -> ClockTime {
        let samples = u64::from(self.segtotal) * u64::from(self.samples_per_seg());
        ClockTime::from_samples(samples, self.rate())
    }

    /// Duration of one segment.
    pub fn seg_duration(&self) -> ClockTime {
        ClockTime::from_samples(u64::from(self.samples_per_seg()), self.rate())
    }
}

#[derive(Debug, Error)]
pub enum RingError {
    #[error("opening audio device: {0}")]
    OpenDevice(#[source] Box<dyn Error + Send + Sync>),
    #[error("acquiring ring buffer: {0}")]
    Acquire(#[source] Box<dyn Error + Send + Sync>),
}

/// Callback installed for pull mode. Invoked on the device thread with
/// the byte span of the segment about to be consumed.
pub type RingCallback = Box<dyn FnMut(&mut [u8]) + Send>;

/// Bounded producer/consumer buffer of fixed-size segments with a
/// device-driven consumer. The sink is the only producer; the consumer
/// lives on the implementation's device thread. Implementations own
/// their locking, every operation here is callable from any thread.
pub trait RingBuffer: Send + Sync {
    /// Idempotent driver-level device acquisition.
    fn open_device(&self) -> Result<(), RingError>;
    fn close_device(&self);

    /// Set the format and allocate segments. May be called again after
    /// `release`.
    fn acquire(&self, spec: BufferSpec) -> Result<(), RingError>;
    fn release(&self);
    fn is_acquired(&self) -> bool;

    /// The spec passed to `acquire`, while acquired.
    fn spec(&self) -> Option<BufferSpec>;

    /// Start the consumer, if armed via `may_start(true)`.
    fn start(&self);
    fn pause(&self);
    /// Arm-only hint: `start` calls are ignored while disarmed.
    fn may_start(&self, allowed: bool);

    /// While flushing, pending waiters unblock and commits return
    /// immediately.
    fn set_flushing(&self, flushing: bool);

    /// Write `in_samples` of `data` at `*sample_offset`, representing
    /// `out_samples` of output slots. When the counts differ the buffer
    /// stretches or compresses the input, carrying fractional progress
    /// in `accum` across calls. Advances `*sample_offset` by the output
    /// samples produced. Returns samples consumed from `data`, which is
    /// short of `in_samples` when the buffer is flushing or released.
    fn commit(
        &self,
        sample_offset: &mut u64,
        data: &[u8],
        in_samples: usize,
        out_samples: usize,
        accum: &mut i32,
    ) -> usize;

    /// Total samples the device consumed since acquire.
    fn samples_done(&self) -> u64;

    /// Samples queued in the device but not yet audible.
    fn delay(&self) -> u32;

    /// Segments consumed by the device since `segbase`.
    fn segdone(&self) -> u64;
    fn segbase(&self) -> u64;

    /// Install (or clear) the pull-mode producer callback.
    fn set_callback(&self, callback: Option<RingCallback>);
}
