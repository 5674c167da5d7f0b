use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use chirp_core::ring::{BufferSpec, RingBuffer, RingCallback, RingError};

#[derive(Debug, Error)]
enum DeviceError {
    #[error("no output device available")]
    NoDevice,
    #[error("only interleaved signed 16-bit formats are supported")]
    UnsupportedFormat,
    #[error("device thread terminated before reporting")]
    ThreadDied,
}

pub(crate) struct SegmentStore {
    spec: BufferSpec,
    data: Vec<u8>,
    /// segments fully consumed by the device since acquire
    segdone: u64,
    segbase: u64,
    /// bytes consumed of the segment currently being read
    read_offset: usize,
    playing: bool,
    armed: bool,
    flushing: bool,
}

impl SegmentStore {
    fn new(spec: BufferSpec) -> SegmentStore {
        let silence = spec.format.silence_byte();
        let size = spec.segsize as usize * spec.segtotal as usize;

        SegmentStore {
            spec,
            data: vec![silence; size],
            segdone: 0,
            segbase: 0,
            read_offset: 0,
            playing: false,
            armed: false,
            flushing: false,
        }
    }

    fn silence(&mut self) {
        let silence = self.spec.format.silence_byte();
        self.data.fill(silence);
    }
}

enum WaitOutcome {
    Writable,
    GiveUp,
}

/// Everything the producer, the device thread and the control surface
/// share. The segment logic lives here so it is testable without a
/// device.
pub(crate) struct Shared {
    state: Mutex<Option<SegmentStore>>,
    cond: Condvar,
    callback: Mutex<Option<RingCallback>>,
    /// samples sitting in the driver beyond our segments, estimated
    /// from the stream's callback-to-playback timestamp distance
    latency_samples: AtomicU32,
}

impl Shared {
    pub(crate) fn new() -> Shared {
        Shared {
            state: Mutex::new(None),
            cond: Condvar::new(),
            callback: Mutex::new(None),
            latency_samples: AtomicU32::new(0),
        }
    }

    pub(crate) fn acquire(&self, spec: BufferSpec) {
        *self.state.lock().unwrap() = Some(SegmentStore::new(spec));
    }

    pub(crate) fn release(&self) {
        *self.state.lock().unwrap() = None;
        // unblock writers stuck waiting for a segment
        self.cond.notify_all();
    }

    pub(crate) fn is_acquired(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    pub(crate) fn spec(&self) -> Option<BufferSpec> {
        self.state.lock().unwrap().as_ref().map(|store| store.spec)
    }

    pub(crate) fn start(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(store) = state.as_mut() {
            if store.armed && !store.playing {
                log::debug!("ring buffer started");
                store.playing = true;
                self.cond.notify_all();
            }
        }
    }

    pub(crate) fn pause(&self) {
        if let Some(store) = self.state.lock().unwrap().as_mut() {
            store.playing = false;
        }
    }

    pub(crate) fn may_start(&self, allowed: bool) {
        if let Some(store) = self.state.lock().unwrap().as_mut() {
            store.armed = allowed;
        }
    }

    pub(crate) fn set_flushing(&self, flushing: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(store) = state.as_mut() {
            store.flushing = flushing;
            if flushing {
                store.silence();
            }
        }
        self.cond.notify_all();
    }

    pub(crate) fn segdone(&self) -> u64 {
        self.state
            .lock()
            .unwrap()
            .as_ref()
            .map(|store| store.segdone)
            .unwrap_or(0)
    }

    pub(crate) fn segbase(&self) -> u64 {
        self.state
            .lock()
            .unwrap()
            .as_ref()
            .map(|store| store.segbase)
            .unwrap_or(0)
    }

    pub(crate) fn samples_done(&self) -> u64 {
        let state = self.state.lock().unwrap();
        let Some(store) = state.as_ref() else {
            return 0;
        };
        let whole = (store.segdone - store.segbase) * u64::from(store.spec.samples_per_seg());
        whole + (store.read_offset / store.spec.bytes_per_sample() as usize) as u64
    }

    pub(crate) fn delay(&self) -> u32 {
        self.latency_samples.load(Ordering::Relaxed)
    }

    fn store_latency(&self, samples: u32) {
        self.latency_samples.store(samples, Ordering::Relaxed);
    }

    pub(crate) fn set_callback(&self, callback: Option<RingCallback>) {
        *self.callback.lock().unwrap() = callback;
    }

    pub(crate) fn commit(
        &self,
        sample_offset: &mut u64,
        data: &[u8],
        in_samples: usize,
        out_samples: usize,
        accum: &mut i32,
    ) -> usize {
        if in_samples == out_samples {
            self.commit_plain(sample_offset, data, in_samples)
        } else {
            self.commit_stretched(sample_offset, data, in_samples, out_samples, accum)
        }
    }

    fn commit_plain(&self, sample_offset: &mut u64, data: &[u8], in_samples: usize) -> usize {
        let mut guard = self.state.lock().unwrap();
        let mut written = 0usize;

        while written < in_samples {
            let layout = match layout_of(&guard) {
                Some(layout) => layout,
                None => break,
            };

            let writeseg = *sample_offset / layout.sps;
            let sampleoff = (*sample_offset % layout.sps) as usize;
            let chunk = (layout.sps as usize - sampleoff).min(in_samples - written);

            if writeseg < layout.segdone {
                // landed behind the reader: drop, pretending we wrote
                log::debug!("dropping {chunk} samples behind the reader");
                *sample_offset += chunk as u64;
                written += chunk;
                continue;
            }

            if writeseg >= layout.segdone + layout.segtotal {
                let (returned, outcome) = self.wait_for_segment(guard, writeseg);
                guard = returned;
                match outcome {
                    WaitOutcome::Writable => continue,
                    WaitOutcome::GiveUp => break,
                }
            }

            let store = guard.as_mut().expect("store vanished while writable");
            let slot = (writeseg % layout.segtotal) as usize;
            let start = slot * layout.segsize + sampleoff * layout.bps;
            store.data[start..start + chunk * layout.bps]
                .copy_from_slice(&data[written * layout.bps..(written + chunk) * layout.bps]);

            *sample_offset += chunk as u64;
            written += chunk;
        }

        written
    }

    /// Commit with `in_samples != out_samples`: nearest-neighbour
    /// stretch of the input across the output slots. `accum` holds the
    /// sub-sample error term so the ratio stays exact across calls; it
    /// is always bounded by `out_samples`.
    fn commit_stretched(
        &self,
        sample_offset: &mut u64,
        data: &[u8],
        in_samples: usize,
        out_samples: usize,
        accum: &mut i32,
    ) -> usize {
        if out_samples == 0 {
            return in_samples;
        }

        let in_i = i64::try_from(in_samples).expect("in_samples overflows i64");
        let out_i = i64::try_from(out_samples).expect("out_samples overflows i64");

        let mut guard = self.state.lock().unwrap();
        let mut produced = 0usize;
        // input position, advanced by in/out per output slot
        let mut src = 0usize;

        while produced < out_samples {
            let layout = match layout_of(&guard) {
                Some(layout) => layout,
                None => break,
            };

            let writeseg = *sample_offset / layout.sps;
            let sampleoff = (*sample_offset % layout.sps) as usize;
            let chunk = (layout.sps as usize - sampleoff).min(out_samples - produced);

            if writeseg < layout.segdone {
                log::debug!("dropping {chunk} output samples behind the reader");
                *sample_offset += chunk as u64;
                produced += chunk;
                let total = i64::from(*accum) + in_i * chunk as i64;
                src += usize::try_from(total / out_i).expect("stretch position overflow");
                *accum = i32::try_from(total % out_i).expect("residue bounded by out_samples");
                continue;
            }

            if writeseg >= layout.segdone + layout.segtotal {
                let (returned, outcome) = self.wait_for_segment(guard, writeseg);
                guard = returned;
                match outcome {
                    WaitOutcome::Writable => continue,
                    WaitOutcome::GiveUp => break,
                }
            }

            let store = guard.as_mut().expect("store vanished while writable");
            let slot = (writeseg % layout.segtotal) as usize;
            let base = slot * layout.segsize + sampleoff * layout.bps;

            for i in 0..chunk {
                let take = src.min(in_samples - 1);
                let dst = base + i * layout.bps;
                store.data[dst..dst + layout.bps]
                    .copy_from_slice(&data[take * layout.bps..(take + 1) * layout.bps]);

                *accum += i32::try_from(in_i).expect("in_samples overflows i32");
                while *accum >= out_samples as i32 {
                    *accum -= out_samples as i32;
                    src += 1;
                }
            }

            *sample_offset += chunk as u64;
            produced += chunk;
        }

        src.min(in_samples)
    }

    /// Block until `writeseg` enters the writable window. Gives up when
    /// flushing, released, or the consumer is neither running nor
    /// allowed to run; a blocked writer with an armed consumer starts
    /// it rather than deadlock.
    fn wait_for_segment<'a>(
        &self,
        mut guard: MutexGuard<'a, Option<SegmentStore>>,
        writeseg: u64,
    ) -> (MutexGuard<'a, Option<SegmentStore>>, WaitOutcome) {
        loop {
            enum Action {
                Writable,
                GiveUp,
                Wait,
            }

            let action = match guard.as_mut() {
                None => Action::GiveUp,
                Some(store) if store.flushing => Action::GiveUp,
                Some(store) => {
                    if writeseg < store.segdone + u64::from(store.spec.segtotal) {
                        Action::Writable
                    } else if store.playing {
                        Action::Wait
                    } else if store.armed {
                        log::debug!("auto-starting ring buffer from commit");
                        store.playing = true;
                        Action::Wait
                    } else {
                        // nobody will consume segments; let the caller
                        // preroll-wait instead of deadlocking here
                        Action::GiveUp
                    }
                }
            };

            match action {
                Action::Writable => return (guard, WaitOutcome::Writable),
                Action::GiveUp => return (guard, WaitOutcome::GiveUp),
                Action::Wait => guard = self.cond.wait(guard).unwrap(),
            }
        }
    }

    /// Fill `out` from the segment sequence: invoke the pull callback
    /// at each fresh segment, silence consumed data behind the reader,
    /// notify blocked writers at segment boundaries.
    pub(crate) fn read_into(&self, out: &mut [u8]) {
        let mut state = self.state.lock().unwrap();

        let silence = state
            .as_ref()
            .map(|store| store.spec.format.silence_byte())
            .unwrap_or(0);

        let mut filled = 0usize;

        while filled < out.len() {
            let Some(store) = state.as_mut() else {
                break;
            };
            if !store.playing || store.flushing {
                break;
            }

            let segsize = store.spec.segsize as usize;
            let segtotal = u64::from(store.spec.segtotal);
            let slot = (store.segdone % segtotal) as usize;
            let seg_start = slot * segsize;

            if store.read_offset == 0 {
                let mut callback = self.callback.lock().unwrap();
                if let Some(callback) = callback.as_mut() {
                    callback(&mut store.data[seg_start..seg_start + segsize]);
                }
            }

            let chunk = (segsize - store.read_offset).min(out.len() - filled);
            let start = seg_start + store.read_offset;

            out[filled..filled + chunk].copy_from_slice(&store.data[start..start + chunk]);
            store.data[start..start + chunk].fill(silence);

            filled += chunk;
            store.read_offset += chunk;

            if store.read_offset == segsize {
                store.segdone += 1;
                store.read_offset = 0;
                self.cond.notify_all();
            }
        }

        out[filled..].fill(silence);
    }
}

struct Layout {
    sps: u64,
    bps: usize,
    segsize: usize,
    segtotal: u64,
    segdone: u64,
}

fn layout_of(guard: &MutexGuard<'_, Option<SegmentStore>>) -> Option<Layout> {
    let store = guard.as_ref()?;
    if store.flushing {
        return None;
    }
    Some(Layout {
        sps: u64::from(store.spec.samples_per_seg()),
        bps: store.spec.bytes_per_sample() as usize,
        segsize: store.spec.segsize as usize,
        segtotal: u64::from(store.spec.segtotal),
        segdone: store.segdone,
    })
}

struct StreamHandle {
    // holding the sender keeps the stream thread, and with it the
    // stream, alive; dropping it ends both
    _guard: mpsc::SyncSender<()>,
}

// cpal streams are not Send on every platform, so the stream lives and
// dies on a dedicated thread.
fn start_stream_thread(shared: Arc<Shared>, spec: BufferSpec) -> Result<StreamHandle, RingError> {
    let (result_tx, result_rx) = mpsc::sync_channel(0);
    let (guard_tx, guard_rx) = mpsc::sync_channel::<()>(0);

    std::thread::Builder::new()
        .name("chirp/device".into())
        .spawn(move || match build_stream(shared, spec) {
            Err(error) => {
                let _ = result_tx.send(Err(error));
            }
            Ok(stream) => {
                let _ = result_tx.send(Ok(()));
                // block until the handle is dropped, then stop the stream
                let _ = guard_rx.recv();
                drop(stream);
            }
        })
        .expect("spawning device thread");

    match result_rx.recv() {
        Ok(Ok(())) => Ok(StreamHandle { _guard: guard_tx }),
        Ok(Err(error)) => Err(RingError::Acquire(error)),
        Err(_) => Err(RingError::Acquire(DeviceError::ThreadDied.into())),
    }
}

fn build_stream(
    shared: Arc<Shared>,
    spec: BufferSpec,
) -> Result<cpal::Stream, Box<dyn Error + Send + Sync>> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;

    let config = cpal::StreamConfig {
        channels: spec.format.channels,
        sample_rate: cpal::SampleRate(spec.rate()),
        buffer_size: cpal::BufferSize::Default,
    };

    let rate = spec.rate();

    let stream = device.build_output_stream(
        &config,
        {
            let shared = shared.clone();
            move |data: &mut [i16], info: &cpal::OutputCallbackInfo| {
                // estimate the driver-internal queue from how far ahead
                // of the callback the playback timestamp sits
                let ts = info.timestamp();
                if let Some(latency) = ts.playback.duration_since(&ts.callback) {
                    let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
                    let samples = micros.saturating_mul(u64::from(rate)) / 1_000_000;
                    shared.store_latency(u32::try_from(samples).unwrap_or(u32::MAX));
                }

                let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
                shared.read_into(bytes);
            }
        },
        move |error| {
            log::error!("stream error: {error:?}");
        },
        None,
    )?;

    stream.play()?;

    Ok(stream)
}

/// A [`RingBuffer`] over a cpal output stream.
pub struct CpalRing {
    shared: Arc<Shared>,
    handle: Mutex<Option<StreamHandle>>,
    device_open: AtomicBool,
}

impl CpalRing {
    pub fn new() -> CpalRing {
        CpalRing {
            shared: Arc::new(Shared::new()),
            handle: Mutex::new(None),
            device_open: AtomicBool::new(false),
        }
    }
}

impl Default for CpalRing {
    fn default() -> CpalRing {
        CpalRing::new()
    }
}

impl RingBuffer for CpalRing {
    fn open_device(&self) -> Result<(), RingError> {
        if self.device_open.load(Ordering::Relaxed) {
            return Ok(());
        }

        let host = cpal::default_host();
        if host.default_output_device().is_none() {
            return Err(RingError::OpenDevice(DeviceError::NoDevice.into()));
        }

        self.device_open.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn close_device(&self) {
        self.device_open.store(false, Ordering::Relaxed);
    }

    fn acquire(&self, spec: BufferSpec) -> Result<(), RingError> {
        let format = spec.format;
        if format.width != 16 || !format.signed || format.float {
            return Err(RingError::Acquire(DeviceError::UnsupportedFormat.into()));
        }

        self.shared.acquire(spec);

        match start_stream_thread(self.shared.clone(), spec) {
            Ok(handle) => {
                *self.handle.lock().unwrap() = Some(handle);
                Ok(())
            }
            Err(error) => {
                self.shared.release();
                Err(error)
            }
        }
    }

    fn release(&self) {
        *self.handle.lock().unwrap() = None;
        self.shared.release();
    }

    fn is_acquired(&self) -> bool {
        self.shared.is_acquired()
    }

    fn spec(&self) -> Option<BufferSpec> {
        self.shared.spec()
    }

    fn start(&self) {
        self.shared.start();
    }

    fn pause(&self) {
        self.shared.pause();
    }

    fn may_start(&self, allowed: bool) {
        self.shared.may_start(allowed);
    }

    fn set_flushing(&self, flushing: bool) {
        self.shared.set_flushing(flushing);
    }

    fn commit(
        &self,
        sample_offset: &mut u64,
        data: &[u8],
        in_samples: usize,
        out_samples: usize,
        accum: &mut i32,
    ) -> usize {
        self.shared
            .commit(sample_offset, data, in_samples, out_samples, accum)
    }

    fn samples_done(&self) -> u64 {
        self.shared.samples_done()
    }

    fn delay(&self) -> u32 {
        self.shared.delay()
    }

    fn segdone(&self) -> u64 {
        self.shared.segdone()
    }

    fn segbase(&self) -> u64 {
        self.shared.segbase()
    }

    fn set_callback(&self, callback: Option<RingCallback>) {
        self.shared.set_callback(callback);
    }
}
