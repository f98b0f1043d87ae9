//! Configuration types for the audio sink.

use std::time::Duration;

/// Strategy used to keep the device clock in step with the pipeline clock.
///
/// When the pipeline runs on a clock other than the one this sink provides,
/// the two clocks drift apart over time and the sink must compensate. The
/// method only matters while slaved; when the sink's own clock drives the
/// pipeline no correction is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlaveMethod {
    /// Schedule samples so that an external resampler stretches or shrinks
    /// the output to match the master clock rate.
    ///
    /// The sink itself does not resample; it keeps the distinction between
    /// input and output sample counts alive so the ring buffer's resampler
    /// can absorb the difference.
    Resample,

    /// Periodically skew the playout position once the averaged drift
    /// exceeds half a segment.
    ///
    /// Cheap and robust; produces an audible but short glitch at each
    /// correction point.
    #[default]
    Skew,

    /// Apply only the static offset between the two clock domains,
    /// measured when playback starts. Drift is never corrected.
    None,
}

/// Configuration for an [`AudioSink`](crate::AudioSink).
///
/// Use [`SinkConfig::default()`] for sensible defaults, or customize as
/// needed.
///
/// # Example
///
/// ```
/// use render_audio::SinkConfig;
/// use std::time::Duration;
///
/// let config = SinkConfig {
///     latency_time: Duration::from_millis(20),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Requested total device buffer duration.
    ///
    /// The ring buffer is sized to hold roughly this much queued audio.
    /// Larger values survive scheduling hiccups; smaller values reduce the
    /// time it takes for a pipeline change to become audible.
    /// Default: 200ms
    pub buffer_time: Duration,

    /// Requested duration of one ring-buffer segment.
    ///
    /// This is the granularity at which the device consumes audio, and the
    /// maximum drift tolerated by the skew slaving method before it
    /// corrects. Default: 10ms
    pub latency_time: Duration,

    /// Whether the sink exposes its device clock to the pipeline.
    ///
    /// Default: true
    pub provide_clock: bool,

    /// How to track a foreign pipeline clock. Default: [`SlaveMethod::Skew`]
    pub slave_method: SlaveMethod,

    /// Whether buffers are scheduled against the pipeline clock at all.
    ///
    /// When false, buffers are played back-to-back as fast as the device
    /// accepts them. Default: true
    pub sync: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_time: Duration::from_millis(200),
            latency_time: Duration::from_millis(10),
            provide_clock: true,
            slave_method: SlaveMethod::default(),
            sync: true,
        }
    }
}
