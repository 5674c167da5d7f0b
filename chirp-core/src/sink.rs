use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::clock::{Calibration, Clock, SinkClock};
use crate::format::AudioFormat;
use crate::render::{RenderError, RenderStats, Segment, SyncState};
use crate::ring::{BufferSpec, RingBuffer, RingError};
use crate::slave::SlaveMethod;
use crate::time::{ClockTime, TimeDelta};

/// Sink configuration. Read at state-change time; changing fields while
/// PLAYING takes effect on the next transition.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// requested device buffer duration, microseconds
    pub buffer_time: u64,
    /// requested segment duration, microseconds
    pub latency_time: u64,
    /// expose the playback position as a pipeline clock
    pub provide_clock: bool,
    pub slave_method: SlaveMethod,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            buffer_time: 200_000,
            latency_time: 10_000,
            provide_clock: true,
            slave_method: SlaveMethod::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Null,
    Ready,
    Paused,
    Playing,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open audio output")]
    OpenFailed(#[from] RingError),
    #[error("operation requires the ring buffer, sink is in NULL")]
    NotReady,
}

/// A blocking wait ended early by flush-start or a state change.
#[derive(Debug, Error)]
#[error("interrupted by flush or state change")]
pub struct Interrupted;

/// Upstream's answer to a latency query, as relayed by the host.
#[derive(Debug, Clone, Copy)]
pub struct LatencyReply {
    /// whether this sink is part of a live pipeline
    pub live: bool,
    /// whether upstream delivers live data
    pub upstream_live: bool,
    pub min: ClockTime,
    pub max: Option<ClockTime>,
}

/// The latency this sink reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latency {
    pub live: bool,
    pub min: ClockTime,
    pub max: Option<ClockTime>,
}

/// Services the embedding pipeline element provides to the sink.
pub trait SinkHost: Send {
    /// The clock the pipeline selected, if any.
    fn clock(&self) -> Option<Arc<dyn Clock>>;

    /// When stream time zero maps onto clock time.
    fn base_time(&self) -> ClockTime;

    /// Whether rendering synchronises against the clock at all.
    fn sync(&self) -> bool {
        true
    }

    /// Delegate a latency query upstream.
    fn upstream_latency(&self) -> Option<LatencyReply>;

    /// Block until the element leaves the prerolling state. Must be
    /// unblockable by flush-start and by downward state changes.
    fn wait_preroll(&self) -> Result<(), Interrupted>;

    /// Block until the running time `until` has been reached.
    fn wait_eos(&self, until: ClockTime) -> Result<(), Interrupted>;
}

/// Events arriving on the streaming thread.
#[derive(Debug)]
pub enum Event {
    FlushStart,
    FlushStop,
    Eos,
    Segment(Segment),
}

/// Producer invoked by the ring buffer in pull mode. `Ok(0)` signals
/// end of stream.
pub trait PullSource: Send {
    fn pull(&mut self, out: &mut [u8]) -> std::io::Result<usize>;
}

type RingFactory = Box<dyn Fn() -> Result<Arc<dyn RingBuffer>, RingError> + Send>;

/// An audio sink renderer: accepts timestamped sample buffers and lands
/// them in a ring buffer at the instant and rate the pipeline clock
/// demands, slaving the device clock to the pipeline's reference.
///
/// The concrete device lives behind the [`RingBuffer`] the factory
/// creates on the transition out of NULL.
pub struct AudioSink<H: SinkHost> {
    pub(crate) host: H,
    pub(crate) config: Config,
    factory: RingFactory,
    pub(crate) ring: Option<Arc<dyn RingBuffer>>,
    pub(crate) clock: Option<Arc<SinkClock>>,
    state: State,
    pub(crate) segment: Segment,
    pub(crate) sync: SyncState,
    /// min total latency from the last latency query
    pub(crate) latency: ClockTime,
    /// running time of the end of the last rendered buffer, handed to
    /// `wait_eos` unadjusted when draining
    pub(crate) eos_rtime: Option<ClockTime>,
    pub(crate) stats: RenderStats,
    /// snapshot of `config.slave_method`, taken at state changes so the
    /// render path never races a reconfiguration
    pub(crate) slave_method: SlaveMethod,
    pull_eos: Option<Arc<AtomicBool>>,
}

impl<H: SinkHost> AudioSink<H> {
    pub fn new<F>(config: Config, create_ringbuffer: F, host: H) -> AudioSink<H>
    where
        F: Fn() -> Result<Arc<dyn RingBuffer>, RingError> + Send + 'static,
    {
        AudioSink {
            host,
            config,
            factory: Box::new(create_ringbuffer),
            ring: None,
            clock: None,
            state: State::Null,
            segment: Segment::default(),
            sync: SyncState::default(),
            latency: ClockTime::ZERO,
            eos_rtime: None,
            stats: RenderStats::default(),
            slave_method: config.slave_method,
            pull_eos: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// The clock this sink provides, exposed once the ring buffer is
    /// acquired and providing is enabled.
    pub fn provided_clock(&self) -> Option<Arc<SinkClock>> {
        if !self.config.provide_clock {
            return None;
        }
        if !self.ring.as_ref()?.is_acquired() {
            return None;
        }
        self.clock.clone()
    }

    pub(crate) fn next_sample(&self) -> Option<u64> {
        self.sync.next_sample
    }

    pub(crate) fn last_align(&self) -> Option<i64> {
        self.sync.last_align
    }

    pub(crate) fn avg_skew(&self) -> Option<TimeDelta> {
        self.sync.avg_skew
    }

    /// Fix the stream format and (re)acquire the ring buffer with the
    /// segment layout derived from the configured durations.
    pub fn set_format(&mut self, format: AudioFormat) -> Result<(), StateError> {
        let ring = self.ring.clone().ok_or(StateError::NotReady)?;

        if ring.is_acquired() {
            ring.release();
        }

        let spec = BufferSpec::new(format, self.config.buffer_time, self.config.latency_time);
        log::debug!(
            "acquiring ring buffer: rate={}, segsize={}, segtotal={}",
            spec.rate(),
            spec.segsize,
            spec.segtotal
        );
        ring.acquire(spec)?;

        self.sync = SyncState::default();
        self.eos_rtime = None;
        Ok(())
    }

    pub fn set_state(&mut self, target: State) -> Result<(), StateError> {
        while self.state != target {
            let next = if target > self.state {
                step_up(self.state)
            } else {
                step_down(self.state)
            };
            self.transition(self.state, next)?;
            self.state = next;
        }
        Ok(())
    }

    fn transition(&mut self, from: State, to: State) -> Result<(), StateError> {
        log::debug!("state change {from:?} -> {to:?}");
        match (from, to) {
            (State::Null, State::Ready) => self.null_to_ready(),
            (State::Ready, State::Paused) => self.ready_to_paused(),
            (State::Paused, State::Playing) => self.async_play(),
            (State::Playing, State::Paused) => self.playing_to_paused(),
            (State::Paused, State::Ready) => self.paused_to_ready(),
            (State::Ready, State::Null) => self.ready_to_null(),
            _ => unreachable!("state changes step through adjacent states"),
        }
    }

    fn null_to_ready(&mut self) -> Result<(), StateError> {
        let ring = (self.factory)()?;
        ring.open_device()?;

        self.clock = Some(Arc::new(SinkClock::new(ring.clone())));
        self.ring = Some(ring);
        self.slave_method = self.config.slave_method;
        Ok(())
    }

    fn ready_to_paused(&mut self) -> Result<(), StateError> {
        let ring = self.ring.clone().ok_or(StateError::NotReady)?;

        self.sync = SyncState::default();
        self.slave_method = self.config.slave_method;
        ring.set_flushing(false);
        ring.may_start(false);
        Ok(())
    }

    /// The transition into PLAYING: arm the consumer and, when slaved
    /// to a foreign clock, reseed the calibration at the current pair
    /// of clock readings.
    fn async_play(&mut self) -> Result<(), StateError> {
        let ring = self.ring.clone().ok_or(StateError::NotReady)?;

        ring.may_start(true);

        if let (Some(clock), Some(pipeline_clock)) = (self.clock.clone(), self.host.clock()) {
            if !self.is_master(&pipeline_clock) {
                if let (Some(itime), Some(etime)) = (clock.internal_now(), pipeline_clock.now()) {
                    let prev = clock.calibration();
                    clock.set_calibration(Calibration {
                        internal: itime,
                        external: etime,
                        rate_num: prev.rate_num,
                        rate_denom: prev.rate_denom,
                    });
                    log::debug!("seeded calibration: internal={itime}, external={etime}");
                }

                self.sync.resync();

                if self.slave_method == SlaveMethod::Resample {
                    // hand the clock to the external rate corrector
                    clock.slave_to(Some(pipeline_clock));
                }
            }
        }

        ring.start();
        Ok(())
    }

    fn playing_to_paused(&mut self) -> Result<(), StateError> {
        let ring = self.ring.clone().ok_or(StateError::NotReady)?;

        ring.may_start(false);
        ring.pause();

        if let Some(clock) = &self.clock {
            clock.slave_to(None);
        }
        Ok(())
    }

    fn paused_to_ready(&mut self) -> Result<(), StateError> {
        let ring = self.ring.clone().ok_or(StateError::NotReady)?;

        // unblock any writer stuck in commit before tearing down
        ring.set_flushing(true);
        ring.release();

        self.sync = SyncState::default();
        self.eos_rtime = None;
        Ok(())
    }

    fn ready_to_null(&mut self) -> Result<(), StateError> {
        if let Some(ring) = self.ring.take() {
            // an acquire may have happened after READY without a
            // matching release
            ring.release();
            ring.close_device();
        }
        self.clock = None;
        self.pull_eos = None;
        Ok(())
    }

    pub fn event(&mut self, event: Event) -> Result<(), RenderError> {
        match event {
            Event::FlushStart => {
                if let Some(ring) = &self.ring {
                    ring.set_flushing(true);
                }
                Ok(())
            }
            Event::FlushStop => {
                self.sync.resync();
                if let Some(ring) = &self.ring {
                    ring.set_flushing(false);
                }
                Ok(())
            }
            Event::Segment(segment) => {
                log::debug!(
                    "segment [{}, {:?}] rate {}",
                    segment.start,
                    segment.stop,
                    segment.rate
                );
                self.segment = segment;
                Ok(())
            }
            Event::Eos => self.drain(),
        }
    }

    /// Play out everything committed so far, including sub-segment
    /// residue that never filled a whole segment.
    fn drain(&mut self) -> Result<(), RenderError> {
        let Some(ring) = self.ring.clone() else {
            return Ok(());
        };

        if ring.is_acquired() {
            ring.start();
        }

        let until = self.eos_rtime.or_else(|| {
            let spec = ring.spec()?;
            self.sync
                .next_sample
                .map(|sample| ClockTime::from_samples(sample, spec.rate()))
        });

        if let Some(until) = until {
            log::debug!("draining until running time {until}");
            if self.host.wait_eos(until).is_err() {
                // the drain was flushed away; that is a normal end
                log::debug!("eos wait interrupted");
            }
        }

        self.sync.next_sample = None;
        self.eos_rtime = None;
        Ok(())
    }

    /// Answer a latency query: device buffering composed with the
    /// upstream live latency. `None` before negotiation.
    pub fn query_latency(&mut self) -> Option<Latency> {
        let ring = self.ring.as_ref()?;
        let spec = ring.spec()?;
        let reply = self.host.upstream_latency()?;

        if reply.live && reply.upstream_live {
            let device = device_latency(&spec);
            let min = device + reply.min;
            let max = min + reply.max.unwrap_or(ClockTime::ZERO);

            if let Some(clock) = &self.clock {
                clock.set_us_latency(reply.min);
            }
            self.latency = min;

            log::debug!("latency: device={device}, min={min}, max={max}");
            Some(Latency {
                live: true,
                min,
                max: Some(max),
            })
        } else {
            self.latency = ClockTime::ZERO;
            Some(Latency {
                live: false,
                min: ClockTime::ZERO,
                max: None,
            })
        }
    }

    /// Switch the ring buffer to pull mode: the consumer obtains data
    /// on demand from `source` instead of waiting for `render`.
    ///
    /// End of stream is latched: once the source reports it, it is
    /// never pulled again and the callback produces silence.
    pub fn activate_pull<S: PullSource + 'static>(&mut self, mut source: S) -> Result<(), StateError> {
        let ring = self.ring.clone().ok_or(StateError::NotReady)?;
        let spec = ring.spec().ok_or(StateError::NotReady)?;

        let silence = spec.format.silence_byte();
        let eos = Arc::new(AtomicBool::new(false));
        self.pull_eos = Some(eos.clone());

        ring.set_callback(Some(Box::new(move |out: &mut [u8]| {
            if eos.load(Ordering::Relaxed) {
                out.fill(silence);
                return;
            }

            let mut filled = 0;
            while filled < out.len() {
                match source.pull(&mut out[filled..]) {
                    Ok(0) => {
                        log::info!("end of stream in pull mode");
                        eos.store(true, Ordering::Relaxed);
                        out[filled..].fill(silence);
                        return;
                    }
                    Ok(n) => filled += n,
                    Err(e) => {
                        log::warn!("pull failed: {e}");
                        out[filled..].fill(silence);
                        return;
                    }
                }
            }
        })));

        Ok(())
    }

    pub fn deactivate_pull(&mut self) {
        if let Some(ring) = &self.ring {
            ring.set_callback(None);
        }
        self.pull_eos = None;
    }

    /// Whether the pull-mode source has reported end of stream.
    pub fn pull_eos_reached(&self) -> bool {
        self.pull_eos
            .as_ref()
            .map(|eos| eos.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

fn device_latency(spec: &BufferSpec) -> ClockTime {
    let samples = u64::from(spec.seglatency) * u64::from(spec.samples_per_seg());
    ClockTime::from_samples(samples, spec.rate())
}

fn step_up(state: State) -> State {
    match state {
        State::Null => State::Ready,
        State::Ready => State::Paused,
        State::Paused | State::Playing => State::Playing,
    }
}

fn step_down(state: State) -> State {
    match state {
        State::Playing => State::Paused,
        State::Paused => State::Ready,
        State::Ready | State::Null => State::Null,
    }
}
