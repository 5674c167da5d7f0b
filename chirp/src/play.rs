use std::f32::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use structopt::StructOpt;
use thiserror::Error;

use chirp_core::render::{AudioBuffer, BufferFlags, RenderError, Segment};
use chirp_core::ring::{RingBuffer, RingError};
use chirp_core::sink::{
    AudioSink, Config, Event, Interrupted, LatencyReply, SinkHost, State, StateError,
};
use chirp_core::{Clock, ClockTime, PartialFormat, SlaveMethod};
use chirp_device::{CpalRing, MonotonicClock};

#[derive(StructOpt)]
pub struct PlayOpt {
    /// Tone frequency in Hz
    #[structopt(long, default_value = "440")]
    pub freq: f32,
    /// Playback length in seconds
    #[structopt(long, default_value = "3")]
    pub duration: u64,
    /// Requested device buffer duration in microseconds
    #[structopt(long, default_value = "200000")]
    pub buffer_time: u64,
    /// Requested segment duration in microseconds
    #[structopt(long, default_value = "10000")]
    pub latency_time: u64,
    /// Drift correction towards the pipeline clock: resample, skew or none
    #[structopt(long, default_value = "skew")]
    pub slave_method: SlaveMethod,
    /// Schedule against the system monotonic clock instead of the
    /// device clock, exercising the slaving path
    #[structopt(long)]
    pub system_clock: bool,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("state change: {0}")]
    State(#[from] StateError),
    #[error("render: {0}")]
    Render(#[from] RenderError),
}

/// The pipeline services a real element would get from its surroundings.
struct PipelineHost {
    clock: Mutex<Option<Arc<dyn Clock>>>,
    base_time: Mutex<ClockTime>,
}

impl PipelineHost {
    fn new() -> PipelineHost {
        PipelineHost {
            clock: Mutex::new(None),
            base_time: Mutex::new(ClockTime::ZERO),
        }
    }

    fn set_clock(&self, clock: Arc<dyn Clock>) {
        *self.clock.lock().unwrap() = Some(clock);
    }

    fn set_base_time(&self, base_time: ClockTime) {
        *self.base_time.lock().unwrap() = base_time;
    }
}

#[derive(Clone)]
struct Host(Arc<PipelineHost>);

impl Host {
    fn new() -> Host {
        Host(Arc::new(PipelineHost::new()))
    }

    fn set_clock(&self, clock: Arc<dyn Clock>) {
        self.0.set_clock(clock);
    }

    fn set_base_time(&self, base_time: ClockTime) {
        self.0.set_base_time(base_time);
    }
}

impl SinkHost for Host {
    fn clock(&self) -> Option<Arc<dyn Clock>> {
        self.0.clock.lock().unwrap().clone()
    }

    fn base_time(&self) -> ClockTime {
        *self.0.base_time.lock().unwrap()
    }

    fn upstream_latency(&self) -> Option<LatencyReply> {
        // the tone generator is not live
        Some(LatencyReply {
            live: false,
            upstream_live: false,
            min: ClockTime::ZERO,
            max: None,
        })
    }

    fn wait_preroll(&self) -> Result<(), Interrupted> {
        // this pipeline never pauses mid-stream
        Ok(())
    }

    fn wait_eos(&self, until: ClockTime) -> Result<(), Interrupted> {
        let clock = self.0.clock.lock().unwrap().clone().ok_or(Interrupted)?;
        let deadline = self.base_time() + until;

        loop {
            let now = clock.now().ok_or(Interrupted)?;
            if now >= deadline {
                return Ok(());
            }
            let remaining = Duration::from_nanos((deadline - now).nanos());
            std::thread::sleep(remaining.min(Duration::from_millis(10)));
        }
    }
}

pub fn run(opt: PlayOpt) -> Result<(), RunError> {
    let config = Config {
        buffer_time: opt.buffer_time,
        latency_time: opt.latency_time,
        provide_clock: true,
        slave_method: opt.slave_method,
    };

    let host = Host::new();
    let mut sink = AudioSink::new(
        config,
        || -> Result<Arc<dyn RingBuffer>, RingError> { Ok(Arc::new(CpalRing::new())) },
        host.clone(),
    );

    sink.set_state(State::Ready)?;

    let format = PartialFormat {
        rate: Some(44100),
        ..PartialFormat::default()
    }
    .fixate();
    sink.set_format(format)?;
    sink.set_state(State::Paused)?;

    let clock: Arc<dyn Clock> = if opt.system_clock {
        Arc::new(MonotonicClock::new())
    } else {
        sink.provided_clock().expect("clock provision is enabled")
    };
    host.set_clock(clock.clone());

    let total_samples = u64::from(format.rate) * opt.duration;
    let stop = ClockTime::from_samples(total_samples, format.rate);
    sink.event(Event::Segment(Segment {
        start: ClockTime::ZERO,
        stop: Some(stop),
        rate: 1.0,
    }))?;

    sink.set_state(State::Playing)?;

    // stream time zero starts now
    host.set_base_time(clock.now().unwrap_or(ClockTime::ZERO));

    log::info!(
        "playing {}hz for {}s ({} against the pipeline clock)",
        opt.freq,
        opt.duration,
        if opt.system_clock { "slaved" } else { "master" },
    );

    // 10ms of stereo frames per buffer; commit paces us against the ring
    let samples_per_buffer = format.rate as usize / 100;
    let step = TAU * opt.freq / format.rate as f32;
    let mut frames = vec![0i16; samples_per_buffer * 2];
    let mut phase = 0.0f32;
    let mut position = 0u64;

    while position < total_samples {
        let samples = samples_per_buffer.min((total_samples - position) as usize);

        for frame in frames.chunks_exact_mut(2).take(samples) {
            let value = (phase.sin() * 0.25 * f32::from(i16::MAX)) as i16;
            frame[0] = value;
            frame[1] = value;
            phase += step;
            if phase > TAU {
                phase -= TAU;
            }
        }

        sink.render(AudioBuffer {
            data: bytemuck::cast_slice(&frames[..samples * 2]),
            pts: Some(ClockTime::from_samples(position, format.rate)),
            flags: BufferFlags::empty(),
        })?;

        position += samples as u64;
    }

    sink.event(Event::Eos)?;
    sink.set_state(State::Null)?;

    Ok(())
}
