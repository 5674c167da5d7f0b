pub mod clock;
pub mod format;
pub mod render;
pub mod ring;
pub mod sink;
pub mod slave;
pub mod time;

#[cfg(test)]
pub(crate) mod test_ring;

pub use clock::{Calibration, Clock, SinkClock};
pub use format::{AudioFormat, PartialFormat};
pub use render::{AudioBuffer, BufferFlags, RenderError, RenderStats, Segment};
pub use ring::{BufferSpec, RingBuffer, RingCallback, RingError};
pub use sink::{
    AudioSink, Config, Event, Interrupted, Latency, LatencyReply, PullSource, SinkHost, State,
    StateError,
};
pub use slave::SlaveMethod;
pub use time::{ClockTime, TimeDelta};
