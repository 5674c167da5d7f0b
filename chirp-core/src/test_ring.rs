//! Scripted ring buffer and clocks for exercising the renderer and the
//! provided clock without a device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::format::PartialFormat;
use crate::ring::{BufferSpec, RingBuffer, RingCallback, RingError};
use crate::sink::{Interrupted, LatencyReply, SinkHost};
use crate::time::ClockTime;

impl BufferSpec {
    /// 44.1kHz stereo 16-bit, 1024 samples per segment, 8 segments.
    pub(crate) fn test_spec() -> BufferSpec {
        BufferSpec {
            format: PartialFormat::default().fixate(),
            segsize: 4096,
            segtotal: 8,
            seglatency: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    pub offset: u64,
    pub samples: usize,
    pub out_samples: usize,
}

#[derive(Default)]
struct State {
    spec: Option<BufferSpec>,
    device_open: bool,
    playing: bool,
    armed: bool,
    flushing: bool,
    segdone: u64,
    segbase: u64,
    samples_done: u64,
    delay: u32,
    commits: Vec<Committed>,
    commit_limit: Option<usize>,
    starts: usize,
    callback: Option<RingCallback>,
}

#[derive(Default)]
pub struct MockRing {
    state: Mutex<State>,
}

impl MockRing {
    pub fn new() -> MockRing {
        MockRing::default()
    }

    pub fn set_samples_done(&self, samples: u64) {
        self.state.lock().unwrap().samples_done = samples;
    }

    pub fn set_delay(&self, delay: u32) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn set_segdone(&self, segdone: u64) {
        self.state.lock().unwrap().segdone = segdone;
    }

    /// Make the next commit consume at most `samples` before returning,
    /// as a flushed or paused buffer would.
    pub fn limit_next_commit(&self, samples: usize) {
        self.state.lock().unwrap().commit_limit = Some(samples);
    }

    pub fn commits(&self) -> Vec<Committed> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    pub fn is_flushing(&self) -> bool {
        self.state.lock().unwrap().flushing
    }

    pub fn device_open(&self) -> bool {
        self.state.lock().unwrap().device_open
    }

    pub fn callback_installed(&self) -> bool {
        self.state.lock().unwrap().callback.is_some()
    }

    /// Drive the pull-mode producer the way the device thread would.
    pub fn invoke_callback(&self, out: &mut [u8]) {
        let mut state = self.state.lock().unwrap();
        let callback = state.callback.as_mut().expect("no callback installed");
        callback(out);
    }
}

impl RingBuffer for MockRing {
    fn open_device(&self) -> Result<(), RingError> {
        self.state.lock().unwrap().device_open = true;
        Ok(())
    }

    fn close_device(&self) {
        self.state.lock().unwrap().device_open = false;
    }

    fn acquire(&self, spec: BufferSpec) -> Result<(), RingError> {
        let mut state = self.state.lock().unwrap();
        state.spec = Some(spec);
        state.segdone = 0;
        state.segbase = 0;
        state.samples_done = 0;
        state.delay = 0;
        Ok(())
    }

    fn release(&self) {
        self.state.lock().unwrap().spec = None;
    }

    fn is_acquired(&self) -> bool {
        self.state.lock().unwrap().spec.is_some()
    }

    fn spec(&self) -> Option<BufferSpec> {
        self.state.lock().unwrap().spec
    }

    fn start(&self) {
        let mut state = self.state.lock().unwrap();
        if state.armed {
            state.playing = true;
            state.starts += 1;
        }
    }

    fn pause(&self) {
        self.state.lock().unwrap().playing = false;
    }

    fn may_start(&self, allowed: bool) {
        self.state.lock().unwrap().armed = allowed;
    }

    fn set_flushing(&self, flushing: bool) {
        self.state.lock().unwrap().flushing = flushing;
    }

    fn commit(
        &self,
        sample_offset: &mut u64,
        _data: &[u8],
        in_samples: usize,
        out_samples: usize,
        _accum: &mut i32,
    ) -> usize {
        let mut state = self.state.lock().unwrap();

        if state.flushing || state.spec.is_none() {
            return 0;
        }

        let taken = match state.commit_limit.take() {
            Some(limit) => limit.min(in_samples),
            None => in_samples,
        };

        state.commits.push(Committed {
            offset: *sample_offset,
            samples: taken,
            out_samples,
        });

        if taken == in_samples {
            *sample_offset += u64::try_from(out_samples).unwrap();
        } else if in_samples > 0 {
            // a real buffer advances by the output slots it produced,
            // not by the input it consumed
            let produced = taken * out_samples / in_samples;
            *sample_offset += u64::try_from(produced).unwrap();
        }

        taken
    }

    fn samples_done(&self) -> u64 {
        self.state.lock().unwrap().samples_done
    }

    fn delay(&self) -> u32 {
        self.state.lock().unwrap().delay
    }

    fn segdone(&self) -> u64 {
        self.state.lock().unwrap().segdone
    }

    fn segbase(&self) -> u64 {
        self.state.lock().unwrap().segbase
    }

    fn set_callback(&self, callback: Option<RingCallback>) {
        self.state.lock().unwrap().callback = callback;
    }
}

/// A pipeline clock scripted by the test.
#[derive(Default)]
pub struct TestClock {
    now: Mutex<Option<ClockTime>>,
}

impl TestClock {
    pub fn new() -> TestClock {
        TestClock::default()
    }

    pub fn set(&self, now: ClockTime) {
        *self.now.lock().unwrap() = Some(now);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Option<ClockTime> {
        *self.now.lock().unwrap()
    }
}

/// Base-sink services scripted by the test. Implemented for
/// `Arc<TestHost>` so the test keeps a handle after handing it to the
/// sink.
pub struct TestHost {
    clock: Mutex<Option<Arc<dyn Clock>>>,
    base_time: Mutex<ClockTime>,
    sync: AtomicBool,
    upstream: Mutex<Option<LatencyReply>>,
    interrupt: AtomicBool,
    eos_waits: Mutex<Vec<ClockTime>>,
}

impl TestHost {
    pub fn new() -> TestHost {
        TestHost {
            clock: Mutex::new(None),
            base_time: Mutex::new(ClockTime::ZERO),
            sync: AtomicBool::new(true),
            upstream: Mutex::new(None),
            interrupt: AtomicBool::new(false),
            eos_waits: Mutex::new(Vec::new()),
        }
    }

    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        *self.clock.lock().unwrap() = Some(clock);
    }

    pub fn set_base_time(&self, base_time: ClockTime) {
        *self.base_time.lock().unwrap() = base_time;
    }

    pub fn set_sync(&self, sync: bool) {
        self.sync.store(sync, Ordering::Relaxed);
    }

    pub fn set_upstream(&self, reply: Option<LatencyReply>) {
        *self.upstream.lock().unwrap() = reply;
    }

    /// Make preroll and EOS waits fail as a flush would.
    pub fn interrupt_waits(&self, interrupt: bool) {
        self.interrupt.store(interrupt, Ordering::Relaxed);
    }

    pub fn eos_waits(&self) -> Vec<ClockTime> {
        self.eos_waits.lock().unwrap().clone()
    }
}

impl SinkHost for Arc<TestHost> {
    fn clock(&self) -> Option<Arc<dyn Clock>> {
        self.clock.lock().unwrap().clone()
    }

    fn base_time(&self) -> ClockTime {
        *self.base_time.lock().unwrap()
    }

    fn sync(&self) -> bool {
        self.sync.load(Ordering::Relaxed)
    }

    fn upstream_latency(&self) -> Option<LatencyReply> {
        *self.upstream.lock().unwrap()
    }

    fn wait_preroll(&self) -> Result<(), Interrupted> {
        if self.interrupt.load(Ordering::Relaxed) {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    fn wait_eos(&self, until: ClockTime) -> Result<(), Interrupted> {
        self.eos_waits.lock().unwrap().push(until);
        if self.interrupt.load(Ordering::Relaxed) {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}
