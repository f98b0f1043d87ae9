//! Audio sample buffer with timing metadata.

use crate::time::{samples_to_time, ClockTime};
use std::time::Duration;

/// A discrete buffer of raw PCM audio handed to the sink for rendering.
///
/// `SampleBuffer` is the unit of data entering the render path. The payload
/// is raw interleaved PCM whose size must be a multiple of the negotiated
/// frame size (`bytes_per_sample` × channels).
///
/// # Example
///
/// ```
/// use render_audio::SampleBuffer;
///
/// // 100ms of 16-bit stereo at 44.1kHz, starting at stream time zero.
/// let buf = SampleBuffer::with_timestamp(vec![0u8; 4410 * 4], 0);
/// assert_eq!(buf.samples(4), 4410);
/// ```
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    /// Raw interleaved PCM frames.
    pub data: Vec<u8>,

    /// Presentation timestamp in nanoseconds of stream time, or `None` when
    /// the producer did not timestamp the data. Untimestamped buffers are
    /// played as soon as possible after the previous one.
    pub timestamp: Option<ClockTime>,

    /// Marks a discontinuity. The renderer never aligns a discontinuous
    /// buffer against the previous one; it is placed by clock arithmetic.
    pub discont: bool,
}

impl SampleBuffer {
    /// Creates a buffer without a timestamp.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            timestamp: None,
            discont: false,
        }
    }

    /// Creates a buffer with a presentation timestamp in nanoseconds.
    pub fn with_timestamp(data: Vec<u8>, timestamp: ClockTime) -> Self {
        Self {
            data,
            timestamp: Some(timestamp),
            discont: false,
        }
    }

    /// Marks this buffer as discontinuous, forcing a resync.
    #[must_use]
    pub fn discont(mut self) -> Self {
        self.discont = true;
        self
    }

    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if this buffer contains no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of sample frames, given the negotiated frame size.
    pub fn samples(&self, bytes_per_sample: u32) -> usize {
        if bytes_per_sample == 0 {
            return 0;
        }
        self.data.len() / bytes_per_sample as usize
    }

    /// Returns the duration this buffer covers at the given format.
    pub fn duration(&self, rate: u32, bytes_per_sample: u32) -> Duration {
        if rate == 0 || bytes_per_sample == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(samples_to_time(
            self.samples(bytes_per_sample) as u64,
            rate,
        ))
    }
}
