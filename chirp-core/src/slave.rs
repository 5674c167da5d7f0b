use std::str::FromStr;

use crate::clock::{Calibration, Clock, SinkClock};
use crate::render::{RenderStats, SyncState};
use crate::time::{ClockTime, TimeDelta};

/// How sustained drift between the device clock and the pipeline clock
/// is corrected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SlaveMethod {
    /// Feed the ring buffer's resampler a drifting target so the output
    /// sample count adapts. The clock is additionally marked as slaved
    /// so an external rate corrector can drive the calibration rate.
    Resample,
    /// Step the calibration offset one segment at a time once the
    /// averaged skew exceeds half a segment.
    #[default]
    Skew,
    /// Only apply the initial calibration; never track drift.
    None,
}

impl FromStr for SlaveMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<SlaveMethod, String> {
        match s {
            "resample" => Ok(SlaveMethod::Resample),
            "skew" => Ok(SlaveMethod::Skew),
            "none" => Ok(SlaveMethod::None),
            other => Err(format!("unknown slave method: {other}")),
        }
    }
}

/// Translate a reference-clock time into the internal time domain and
/// strip the upstream latency shift, leaving a time that maps directly
/// onto ring buffer sample positions.
///
/// A zeroed calibration rate is read as 1/1 so an unseeded calibration
/// stays usable.
pub(crate) fn clock_convert(
    external: ClockTime,
    cal: Calibration,
    us_latency: ClockTime,
) -> ClockTime {
    let (num, denom) = if cal.rate_num == 0 || cal.rate_denom == 0 {
        (1, 1)
    } else {
        (cal.rate_num, cal.rate_denom)
    };

    let raw = if external >= cal.external {
        cal.internal + scale(external - cal.external, denom, num)
    } else {
        cal.internal.saturating_sub(scale(cal.external - external, denom, num))
    };

    raw.saturating_sub(us_latency)
}

fn scale(time: ClockTime, num: u64, denom: u64) -> ClockTime {
    let scaled = (u128::from(time.nanos()) * u128::from(num)) / u128::from(denom);
    ClockTime::from_nanos(u64::try_from(scaled).expect("can't narrow scaled time to u64"))
}

/// Conversion used by the resample and none strategies, and in master
/// mode: apply the stored calibration, including any rate correction an
/// external master-clock observer recorded, without updating anything.
pub(crate) fn convert_to_internal(
    clock: &SinkClock,
    start: ClockTime,
    stop: ClockTime,
) -> (ClockTime, ClockTime) {
    let cal = clock.calibration();
    let us_latency = clock.us_latency();
    (
        clock_convert(start, cal, us_latency),
        clock_convert(stop, cal, us_latency),
    )
}

/// Skew slaving: observe the drift between the reference clock and the
/// device clock, smooth it, and once the average exceeds half a segment
/// step the calibration offset by a whole segment so playback position
/// jumps at segment granularity instead of creeping.
///
/// Speed is deliberately ignored here, conversion runs at rate 1/1.
pub(crate) fn skew_slaving(
    clock: &SinkClock,
    pipeline_clock: &dyn Clock,
    sync: &mut SyncState,
    stats: &mut RenderStats,
    segtime: ClockTime,
    samples_per_seg: u64,
    start: ClockTime,
    stop: ClockTime,
) -> (ClockTime, ClockTime) {
    let mut cal = clock.calibration();
    let us_latency = clock.us_latency();

    let (Some(etime), Some(itime)) = (pipeline_clock.now(), clock.internal_now()) else {
        // nothing to observe against yet
        let conv = identity_rate(cal);
        return (
            clock_convert(start, conv, us_latency),
            clock_convert(stop, conv, us_latency),
        );
    };

    // drift accumulated since the calibration point
    let etime = etime.saturating_sub(cal.external);
    let itime = itime.saturating_sub(cal.internal);
    let skew = itime.delta(etime);

    let mut avg = match sync.avg_skew {
        None => skew,
        Some(avg) => TimeDelta::from_nanos((31 * avg.nanos() + skew.nanos()) / 32),
    };

    log::trace!("skew={skew}, avg_skew={avg}");

    let segtime_ns = i64::try_from(segtime.nanos()).expect("segment time too large");
    let segsamples = i64::try_from(samples_per_seg).expect("samples_per_seg too large");

    if avg.nanos() > segtime_ns / 2 {
        // the reference runs slow relative to the device, pull internal
        // time forward by one segment
        log::debug!("avg_skew {avg} over half a segment, stepping cexternal back by {segtime}");
        cal.external = cal.external.saturating_sub(segtime);
        avg = TimeDelta::from_nanos(avg.nanos() - segtime_ns);

        let last_align = sync.last_align.unwrap_or(0);
        if last_align < 0 || last_align > segsamples {
            log::debug!("alignment {last_align} fights the correction, resyncing");
            sync.next_sample = None;
            stats.resyncs += 1;
        }

        clock.set_calibration(cal);
    } else if avg.nanos() < -(segtime_ns / 2) {
        // the reference runs fast relative to the device, push internal
        // time back by one segment
        log::debug!("avg_skew {avg} under half a segment, stepping cexternal up by {segtime}");
        cal.external = cal.external + segtime;
        avg = TimeDelta::from_nanos(avg.nanos() + segtime_ns);

        let last_align = sync.last_align.unwrap_or(0);
        if last_align > 0 || -last_align > segsamples {
            log::debug!("alignment {last_align} fights the correction, resyncing");
            sync.next_sample = None;
            stats.resyncs += 1;
        }

        clock.set_calibration(cal);
    }

    sync.avg_skew = Some(avg);

    let conv = identity_rate(cal);
    (
        clock_convert(start, conv, us_latency),
        clock_convert(stop, conv, us_latency),
    )
}

fn identity_rate(cal: Calibration) -> Calibration {
    Calibration {
        rate_num: 1,
        rate_denom: 1,
        ..cal
    }
}
