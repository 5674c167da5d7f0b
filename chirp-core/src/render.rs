use std::sync::Arc;

use thiserror::Error;

use crate::clock::Clock;
use crate::ring::{BufferSpec, RingBuffer};
use crate::sink::{AudioSink, SinkHost};
use crate::slave::{self, SlaveMethod};
use crate::time::{ClockTime, TimeDelta};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        /// This buffer does not continue the previous one; never align
        /// it, place it by clock arithmetic.
        const DISCONT = 0x01;
    }
}

/// One incoming chunk of raw interleaved PCM. `data` must be a whole
/// number of samples; `pts` is the presentation timestamp in the
/// current segment's time coordinates.
#[derive(Debug, Clone, Copy)]
pub struct AudioBuffer<'a> {
    pub data: &'a [u8],
    pub pts: Option<ClockTime>,
    pub flags: BufferFlags,
}

/// The time interval buffers are played within, with its playback rate.
/// Buffers outside it are dropped, buffers straddling it are trimmed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: ClockTime,
    pub stop: Option<ClockTime>,
    pub rate: f64,
}

impl Default for Segment {
    fn default() -> Segment {
        Segment {
            start: ClockTime::ZERO,
            stop: None,
            rate: 1.0,
        }
    }
}

impl Segment {
    /// Intersect `[start, stop]` with the segment. `None` when nothing
    /// is left.
    pub fn clip(&self, start: ClockTime, stop: ClockTime) -> Option<(ClockTime, ClockTime)> {
        if stop <= self.start {
            return None;
        }

        if let Some(seg_stop) = self.stop {
            if start >= seg_stop {
                return None;
            }
        }

        let clipped_start = start.max(self.start);
        let clipped_stop = match self.stop {
            Some(seg_stop) => stop.min(seg_stop),
            None => stop,
        };

        Some((clipped_start, clipped_stop))
    }

    /// Map a segment position onto the running timeline, so pauses and
    /// seeks don't perturb scheduling.
    pub fn to_running_time(&self, time: ClockTime) -> Option<ClockTime> {
        if self.rate >= 0.0 {
            let offset = time.checked_sub(self.start)?;
            Some(unscale_rate(offset, self.rate))
        } else {
            let offset = self.stop?.checked_sub(time)?;
            Some(unscale_rate(offset, self.rate))
        }
    }
}

fn unscale_rate(time: ClockTime, rate: f64) -> ClockTime {
    let rate = rate.abs();
    if rate == 1.0 {
        time
    } else {
        ClockTime::from_nanos((time.nanos() as f64 / rate) as u64)
    }
}

/// Alignment and drift memory of the streaming thread.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SyncState {
    /// Absolute sample position the next buffer is expected to land at.
    /// `None` means resync: place the next buffer by clock arithmetic.
    pub(crate) next_sample: Option<u64>,
    /// Signed sample shift applied to the previous buffer to meet
    /// `next_sample`.
    pub(crate) last_align: Option<i64>,
    /// Smoothed reference-minus-internal clock difference.
    pub(crate) avg_skew: Option<TimeDelta>,
}

impl SyncState {
    pub(crate) fn resync(&mut self) {
        self.next_sample = None;
        self.avg_skew = None;
    }
}

/// Counters observable by the application.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenderStats {
    /// buffers shifted onto the previous one
    pub aligned: u64,
    /// timestamp gaps over half a second, played unaligned
    pub drift_warnings: u64,
    /// skew corrections that had to forget the alignment position
    pub resyncs: u64,
    /// buffers dropped as outside the segment
    pub dropped: u64,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no format negotiated: render before ring buffer acquire")]
    NotNegotiated,
    #[error("buffer of {size} bytes is not a multiple of the {frame} byte sample size")]
    WrongSize { size: usize, frame: usize },
    #[error("interrupted by flush or state change")]
    Stopping,
}

impl<H: SinkHost> AudioSink<H> {
    /// Land one buffer in the ring buffer at the sample position its
    /// timestamp demands.
    pub fn render(&mut self, buffer: AudioBuffer<'_>) -> Result<(), RenderError> {
        let ring = self.ring.clone().ok_or(RenderError::NotNegotiated)?;
        let spec = ring.spec().ok_or(RenderError::NotNegotiated)?;
        let bps = spec.bytes_per_sample() as usize;
        let rate = spec.rate();

        if buffer.data.len() % bps != 0 {
            return Err(RenderError::WrongSize {
                size: buffer.data.len(),
                frame: bps,
            });
        }

        let mut data = buffer.data;
        let mut samples = data.len() / bps;
        let discont = buffer.flags.contains(BufferFlags::DISCONT);
        let forward = self.segment.rate >= 0.0;

        // whether the pre-clip end of this buffer touches the end of
        // the segment; a short segment may never fill seglatency worth
        // of data, so we kick the consumer at the end
        let mut reached_segment_end = false;

        let placement = match buffer.pts {
            None => None,
            Some(pts) => {
                let duration = ClockTime::from_samples(samples as u64, rate);
                let stop = pts + duration;

                if let Some(seg_stop) = self.segment.stop {
                    reached_segment_end = stop >= seg_stop;
                }

                let Some((clipped_start, clipped_stop)) = self.segment.clip(pts, stop) else {
                    log::debug!("buffer [{pts}, {stop}] outside segment, dropping");
                    self.stats.dropped += 1;
                    return Ok(());
                };

                // trim the clipped head and tail off the data
                if clipped_start > pts {
                    let head = ((clipped_start - pts).to_samples_lossy(rate) as usize).min(samples);
                    data = &data[head * bps..];
                    samples -= head;
                }
                if clipped_stop < stop {
                    let tail = (stop - clipped_stop).to_samples_lossy(rate) as usize;
                    samples = samples.saturating_sub(tail);
                }
                if samples == 0 {
                    self.stats.dropped += 1;
                    return Ok(());
                }

                match self.pipeline_clock() {
                    None => None,
                    Some(pipeline_clock) => {
                        self.clock_placement(&pipeline_clock, &spec, clipped_start, clipped_stop)
                    }
                }
            }
        };

        let (mut render_start, mut render_stop, mode) = match placement {
            Some(placed) => placed,
            None => {
                let (start, stop) = self.fallback_position(&*ring, &spec, samples);
                // fast path: no alignment, the position is authoritative
                self.commit_samples(&ring, data, samples, bps, start, stop, forward)?;
                if reached_segment_end {
                    ring.start();
                }
                return Ok(());
            }
        };

        // align onto the previous buffer when the gap is under half a
        // second, otherwise let the clock position stand
        if !discont {
            if let Some(next) = self.sync.next_sample {
                let sample_offset = if forward { render_start } else { render_stop };
                let diff = next.abs_diff(sample_offset);

                if diff < u64::from(rate) / 2 {
                    let align = i64::try_from(next).expect("sample position overflows i64")
                        - i64::try_from(sample_offset).expect("sample position overflows i64");
                    render_start = render_start.saturating_add_signed(align);
                    if mode != SlaveMethod::Resample {
                        // resample keeps the unaligned stop so the
                        // resampler sees the real output length
                        render_stop = render_stop.saturating_add_signed(align);
                    }
                    self.sync.last_align = Some(align);
                    self.stats.aligned += 1;
                    log::trace!("aligned by {align} samples to position {next}");
                } else {
                    let drift = ClockTime::from_samples(diff, rate);
                    log::warn!(
                        "compensating for audio synchronisation problems: \
                         {drift} away from expected sample {next}"
                    );
                    self.stats.drift_warnings += 1;
                }
            }
        }

        if render_stop < render_start {
            // a large negative alignment emptied the range; nothing to
            // write, and nothing moved, so the alignment memory stands
            log::debug!("empty render range after alignment, skipping commit");
            return Ok(());
        }

        self.commit_samples(&ring, data, samples, bps, render_start, render_stop, forward)?;

        if reached_segment_end {
            ring.start();
        }

        Ok(())
    }

    /// Running-time mapping, latency compensation and clock slaving:
    /// from segment times to absolute ring buffer sample positions.
    fn clock_placement(
        &mut self,
        pipeline_clock: &Arc<dyn Clock>,
        spec: &BufferSpec,
        clipped_start: ClockTime,
        clipped_stop: ClockTime,
    ) -> Option<(u64, u64, SlaveMethod)> {
        let rate = spec.rate();
        let forward = self.segment.rate >= 0.0;

        let first = self.segment.to_running_time(clipped_start)?;
        let second = self.segment.to_running_time(clipped_stop)?;
        let (running_start, running_stop) = if forward {
            (first, second)
        } else {
            (second, first)
        };

        // remembered unadjusted so EOS drain can wait on it directly
        self.eos_rtime = Some(running_stop);

        let shift = self.host.base_time() + self.latency;
        let absolute_start = running_start + shift;
        let absolute_stop = running_stop + shift;

        let clock = self.clock.clone()?;

        let mode = if self.is_master(pipeline_clock) {
            // we are the reference; only honour calibration-recorded
            // rate corrections
            SlaveMethod::None
        } else {
            self.slave_method
        };

        let (slaved_start, slaved_stop) = match mode {
            SlaveMethod::Skew => slave::skew_slaving(
                &clock,
                &**pipeline_clock,
                &mut self.sync,
                &mut self.stats,
                ClockTime::from_micros(self.config.latency_time),
                u64::from(spec.samples_per_seg()),
                absolute_start,
                absolute_stop,
            ),
            SlaveMethod::Resample | SlaveMethod::None => {
                slave::convert_to_internal(&clock, absolute_start, absolute_stop)
            }
        };

        log::trace!(
            "running [{running_start}, {running_stop}] slaved to [{slaved_start}, {slaved_stop}]"
        );

        Some((
            slaved_start.to_samples_lossy(rate),
            slaved_stop.to_samples_lossy(rate),
            mode,
        ))
    }

    /// Sample position used without a timestamp or without sync: the
    /// expected next position, bumped past anything the device already
    /// consumed.
    fn fallback_position(
        &self,
        ring: &dyn RingBuffer,
        spec: &BufferSpec,
        samples: usize,
    ) -> (u64, u64) {
        let samples_per_seg = u64::from(spec.samples_per_seg());
        let mut sample = self.sync.next_sample.unwrap_or(0);

        let done = ring.segdone().saturating_sub(ring.segbase());
        if sample / samples_per_seg < done {
            // we are late, skip to the next segment the device has not
            // reached yet
            sample = (done + 1) * samples_per_seg;
        }

        (sample, sample + samples as u64)
    }

    fn commit_samples(
        &mut self,
        ring: &Arc<dyn RingBuffer>,
        mut data: &[u8],
        mut samples: usize,
        bps: usize,
        render_start: u64,
        render_stop: u64,
        forward: bool,
    ) -> Result<(), RenderError> {
        let out_samples = usize::try_from(render_stop - render_start)
            .expect("output sample count overflows usize");
        let mut sample_offset = if forward { render_start } else { render_stop };
        // commit advances the offset by the output slots it produced;
        // everything between the offset and this mark is still owed
        let end_offset = sample_offset + out_samples as u64;
        let mut accum = 0i32;
        let mut interrupted = false;

        loop {
            let out_remaining = usize::try_from(end_offset.saturating_sub(sample_offset))
                .expect("output sample count overflows usize");
            let written = ring.commit(
                &mut sample_offset,
                &data[..samples * bps],
                samples,
                out_remaining,
                &mut accum,
            );
            if written == samples {
                break;
            }

            // the buffer gave up early: flushing, or the device is not
            // allowed to run yet. wait it out or bail.
            interrupted = true;
            self.host.wait_preroll().map_err(|_| RenderError::Stopping)?;

            // written counts input samples consumed; the output side is
            // read back from how far commit moved the offset
            if sample_offset >= end_offset {
                break;
            }
            accum = 0;
            samples -= written;
            data = &data[written * bps..];
        }

        // interruption means an unknown amount of output was dropped;
        // the next buffer cannot assume contiguity
        self.sync.next_sample = if interrupted {
            None
        } else {
            Some(sample_offset)
        };

        Ok(())
    }

    fn pipeline_clock(&self) -> Option<Arc<dyn Clock>> {
        if !self.host.sync() {
            return None;
        }
        self.host.clock()
    }

    pub(crate) fn is_master(&self, pipeline_clock: &Arc<dyn Clock>) -> bool {
        match &self.clock {
            Some(own) => {
                let own: Arc<dyn Clock> = own.clone();
                Arc::as_ptr(&own) as *const () == Arc::as_ptr(pipeline_clock) as *const ()
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::format::PartialFormat;
    use crate::ring::RingError;
    use crate::sink::{Config, Event, State};
    use crate::test_ring::{MockRing, TestClock, TestHost};

    const BPS: usize = 4;

    struct Fixture {
        sink: AudioSink<Arc<TestHost>>,
        ring: Arc<MockRing>,
        host: Arc<TestHost>,
    }

    /// Sink negotiated and playing, provided clock selected as pipeline
    /// clock (master mode: placement is pure timestamp arithmetic).
    fn playing_sink() -> Fixture {
        playing_sink_with(Config::default())
    }

    fn playing_sink_with(config: Config) -> Fixture {
        let ring = Arc::new(MockRing::new());
        let host = Arc::new(TestHost::new());

        let factory = {
            let ring = ring.clone();
            move || -> Result<Arc<dyn crate::ring::RingBuffer>, RingError> { Ok(ring.clone()) }
        };

        let mut sink = AudioSink::new(config, factory, host.clone());
        sink.set_state(State::Ready).unwrap();
        sink.set_format(PartialFormat::default().fixate()).unwrap();
        sink.set_state(State::Paused).unwrap();

        host.set_clock(sink.provided_clock().unwrap());
        sink.set_state(State::Playing).unwrap();

        Fixture { sink, ring, host }
    }

    /// Sink slaved to a scripted foreign clock in resample mode, so
    /// output sample counts can differ from input sample counts.
    fn resample_playing_sink() -> Fixture {
        let ring = Arc::new(MockRing::new());
        let host = Arc::new(TestHost::new());

        let factory = {
            let ring = ring.clone();
            move || -> Result<Arc<dyn crate::ring::RingBuffer>, RingError> { Ok(ring.clone()) }
        };

        let config = Config {
            slave_method: SlaveMethod::Resample,
            ..Config::default()
        };
        let mut sink = AudioSink::new(config, factory, host.clone());
        sink.set_state(State::Ready).unwrap();
        sink.set_format(PartialFormat::default().fixate()).unwrap();
        sink.set_state(State::Paused).unwrap();

        let pipeline = Arc::new(TestClock::new());
        pipeline.set(ClockTime::ZERO);
        host.set_clock(pipeline);
        sink.set_state(State::Playing).unwrap();

        Fixture { sink, ring, host }
    }

    fn pcm(samples: usize) -> Vec<u8> {
        vec![0u8; samples * BPS]
    }

    fn buffer(data: &[u8], pts_ms: u64) -> AudioBuffer<'_> {
        AudioBuffer {
            data,
            pts: Some(ClockTime::from_micros(pts_ms * 1000)),
            flags: BufferFlags::empty(),
        }
    }

    #[test]
    fn render_before_negotiation_fails() {
        let ring = Arc::new(MockRing::new());
        let host = Arc::new(TestHost::new());
        let factory = {
            let ring = ring.clone();
            move || -> Result<Arc<dyn crate::ring::RingBuffer>, RingError> { Ok(ring.clone()) }
        };
        let mut sink = AudioSink::new(Config::default(), factory, host);

        let data = pcm(100);
        let err = sink.render(buffer(&data, 0)).unwrap_err();
        assert!(matches!(err, RenderError::NotNegotiated));
    }

    #[test]
    fn partial_sample_is_rejected() {
        let mut fx = playing_sink();
        let data = vec![0u8; 6]; // one and a half 4-byte samples
        let err = fx.sink.render(buffer(&data, 0)).unwrap_err();
        assert!(matches!(err, RenderError::WrongSize { size: 6, frame: 4 }));
    }

    #[test]
    fn contiguous_buffers_land_back_to_back() {
        // S1: 4410 samples at 0, 100ms, 200ms
        let mut fx = playing_sink();
        let data = pcm(4410);

        for (i, pts) in [0u64, 100, 200].into_iter().enumerate() {
            fx.sink.render(buffer(&data, pts)).unwrap();
            assert_eq!(fx.sink.next_sample(), Some(4410 * (i as u64 + 1)));
        }

        assert_eq!(fx.sink.last_align(), Some(0));
        assert_eq!(fx.sink.stats().drift_warnings, 0);

        let commits = fx.ring.commits();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].offset, 0);
        assert_eq!(commits[1].offset, 4410);
        assert_eq!(commits[2].offset, 8820);
    }

    #[test]
    fn small_drift_is_absorbed_by_alignment() {
        // S2: second buffer 10ms late in timestamp, pulled back onto
        // the previous one
        let mut fx = playing_sink();
        let data = pcm(4410);

        fx.sink.render(buffer(&data, 0)).unwrap();
        fx.sink.render(buffer(&data, 110)).unwrap();

        assert_eq!(fx.sink.last_align(), Some(-441));
        assert_eq!(fx.sink.next_sample(), Some(8820));
        assert_eq!(fx.sink.stats().drift_warnings, 0);
        assert_eq!(fx.ring.commits()[1].offset, 4410);
    }

    #[test]
    fn large_drift_plays_at_clock_position() {
        // S3: 600ms gap is past the half-second window
        let mut fx = playing_sink();
        let data = pcm(4410);

        fx.sink.render(buffer(&data, 0)).unwrap();
        fx.sink.render(buffer(&data, 700)).unwrap();

        assert_eq!(fx.sink.stats().drift_warnings, 1);
        assert_eq!(fx.sink.last_align(), None);
        assert_eq!(fx.ring.commits()[1].offset, 30870);
        assert_eq!(fx.sink.next_sample(), Some(30870 + 4410));
    }

    #[test]
    fn discont_skips_alignment() {
        // S4
        let mut fx = playing_sink();
        let data = pcm(4410);

        fx.sink.render(buffer(&data, 0)).unwrap();

        let mut second = buffer(&data, 110);
        second.flags = BufferFlags::DISCONT;
        fx.sink.render(second).unwrap();

        assert_eq!(fx.sink.last_align(), None);
        assert_eq!(fx.ring.commits()[1].offset, 4851);
        assert_eq!(fx.sink.next_sample(), Some(4851 + 4410));
        assert_eq!(fx.sink.stats().drift_warnings, 0);
    }

    #[test]
    fn flush_stop_forces_clock_placement() {
        // S5
        let mut fx = playing_sink();
        let data = pcm(4410);

        for pts in [0u64, 100, 200] {
            fx.sink.render(buffer(&data, pts)).unwrap();
        }

        fx.sink.event(Event::FlushStart).unwrap();
        fx.sink.event(Event::FlushStop).unwrap();
        assert_eq!(fx.sink.next_sample(), None);
        assert_eq!(fx.sink.avg_skew(), None);

        fx.sink.render(buffer(&data, 300)).unwrap();
        assert_eq!(fx.ring.commits()[3].offset, 13230);
        assert_eq!(fx.sink.next_sample(), Some(17640));
    }

    #[test]
    fn buffers_outside_the_segment_are_dropped() {
        let mut fx = playing_sink();
        fx.sink
            .event(Event::Segment(Segment {
                start: ClockTime::from_micros(500_000),
                stop: None,
                rate: 1.0,
            }))
            .unwrap();

        let data = pcm(4410);
        fx.sink.render(buffer(&data, 0)).unwrap();

        assert_eq!(fx.sink.stats().dropped, 1);
        assert!(fx.ring.commits().is_empty());
    }

    #[test]
    fn straddling_buffer_is_trimmed_to_the_segment() {
        let mut fx = playing_sink();
        fx.sink
            .event(Event::Segment(Segment {
                start: ClockTime::from_micros(50_000),
                stop: None,
                rate: 1.0,
            }))
            .unwrap();

        // 100ms of data from 0: the first 50ms fall before the segment
        let data = pcm(4410);
        fx.sink.render(buffer(&data, 0)).unwrap();

        let commits = fx.ring.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].samples, 2205);
        // running time of the clipped start is zero
        assert_eq!(commits[0].offset, 0);
    }

    #[test]
    fn no_timestamp_appends_at_next_position() {
        let mut fx = playing_sink();
        let data = pcm(4410);

        fx.sink.render(buffer(&data, 0)).unwrap();
        fx.sink
            .render(AudioBuffer {
                data: &data,
                pts: None,
                flags: BufferFlags::empty(),
            })
            .unwrap();

        assert_eq!(fx.ring.commits()[1].offset, 4410);
        assert_eq!(fx.sink.next_sample(), Some(8820));
    }

    #[test]
    fn no_timestamp_skips_past_consumed_segments() {
        let mut fx = playing_sink();
        let data = pcm(441);

        // device already chewed through 3 of the 441-sample segments
        fx.ring.set_segdone(3);
        fx.sink
            .render(AudioBuffer {
                data: &data,
                pts: None,
                flags: BufferFlags::empty(),
            })
            .unwrap();

        // landed on the first segment the device has not reached
        assert_eq!(fx.ring.commits()[0].offset, 4 * 441);
    }

    #[test]
    fn sync_disabled_uses_fallback_placement() {
        let mut fx = playing_sink();
        fx.host.set_sync(false);
        let data = pcm(4410);

        fx.sink.render(buffer(&data, 0)).unwrap();
        // timestamp says 0, but so does the fallback position
        fx.sink.render(buffer(&data, 700)).unwrap();

        // no warning: the clock was never consulted
        assert_eq!(fx.sink.stats().drift_warnings, 0);
        assert_eq!(fx.ring.commits()[1].offset, 4410);
    }

    #[test]
    fn interrupted_commit_resumes_and_resyncs() {
        let mut fx = playing_sink();
        let data = pcm(4410);

        fx.ring.limit_next_commit(1000);
        fx.sink.render(buffer(&data, 0)).unwrap();

        let commits = fx.ring.commits();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].samples, 1000);
        assert_eq!(commits[1].offset, 1000);
        assert_eq!(commits[1].samples, 3410);
        assert_eq!(commits[1].out_samples, 3410);

        // interruption forbids aligning the next buffer
        assert_eq!(fx.sink.next_sample(), None);
    }

    #[test]
    fn resample_interruption_recomputes_the_output_span() {
        let mut fx = resample_playing_sink();
        let data = pcm(4410);

        fx.sink.render(buffer(&data, 0)).unwrap();

        // second buffer 10ms late: resample mode aligns the start but
        // keeps the unaligned stop, leaving 441 extra output slots for
        // the stretcher
        fx.ring.limit_next_commit(1000);
        fx.sink.render(buffer(&data, 110)).unwrap();

        let commits = fx.ring.commits();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[1].offset, 4410);
        assert_eq!(commits[1].out_samples, 4851);

        // the partial write produced 1100 output slots for its 1000
        // input samples; the resumed commit asks for exactly the span
        // still ahead of the advanced offset, in output units
        assert_eq!(commits[2].offset, 5510);
        assert_eq!(commits[2].samples, 3410);
        assert_eq!(commits[2].out_samples, 3751);

        assert_eq!(fx.sink.next_sample(), None);
    }

    #[test]
    fn cancelled_preroll_wait_stops_the_render() {
        let mut fx = playing_sink();
        let data = pcm(4410);

        fx.ring.limit_next_commit(0);
        fx.host.interrupt_waits(true);

        let err = fx.sink.render(buffer(&data, 0)).unwrap_err();
        assert!(matches!(err, RenderError::Stopping));
    }

    #[test]
    fn segment_end_kicks_the_consumer() {
        let mut fx = playing_sink();
        let starts_after_play = fx.ring.starts();

        fx.sink
            .event(Event::Segment(Segment {
                start: ClockTime::ZERO,
                stop: Some(ClockTime::from_micros(100_000)),
                rate: 1.0,
            }))
            .unwrap();

        // a buffer reaching exactly the segment stop
        let data = pcm(4410);
        fx.sink.render(buffer(&data, 0)).unwrap();

        assert_eq!(fx.ring.starts(), starts_after_play + 1);
    }

    #[test]
    fn base_time_shifts_placement() {
        let mut fx = playing_sink();
        fx.host.set_base_time(ClockTime::from_micros(100_000));

        let data = pcm(4410);
        fx.sink.render(buffer(&data, 0)).unwrap();

        assert_eq!(fx.ring.commits()[0].offset, 4410);
    }
}
