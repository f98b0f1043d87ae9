//! The device ring buffer contract.
//!
//! The sink core never talks to audio hardware. Everything it needs from a
//! device is expressed by the [`RingBuffer`] trait: a bounded sequence of
//! fixed-size segments written by the sink at absolute sample positions and
//! consumed in order by a device thread that advances a monotonic
//! segments-done counter. Concrete implementations (ALSA, CoreAudio, a test
//! double) are installed through the builder's factory.

mod mock;

pub use mock::MockRingBuffer;

use std::sync::Arc;
use std::time::Duration;

use crate::error::RenderError;
use crate::format::FixedFormat;
use crate::time::scale;

/// Callback used in pull mode: invoked by the device thread with a segment
/// to fill.
pub type FillCallback = Arc<dyn Fn(&mut [u8]) + Send + Sync>;

/// The negotiated device format and segment geometry.
///
/// Built from a [`FixedFormat`] plus the configured buffer and latency
/// durations, then immutable for the lifetime of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSpec {
    /// Sample rate in Hz.
    pub rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Bytes per frame (all channels of one sample instant).
    pub bytes_per_sample: u32,
    /// Bytes per ring-buffer segment.
    pub segsize: u32,
    /// Number of segments in the ring.
    pub segtotal: u32,
    /// Segments of headroom the device keeps before it underruns.
    pub seglatency: u32,
    /// Actual duration of the whole ring, derived from the geometry.
    pub buffer_time: Duration,
    /// Actual duration of one segment, derived from the geometry.
    pub latency_time: Duration,
}

impl SinkSpec {
    /// Derives the segment geometry for `format` from the requested
    /// durations.
    ///
    /// The segment size is the requested latency worth of frames, the
    /// segment count the requested buffer duration divided by it. Because
    /// both round to whole frames and whole segments, the spec records the
    /// *actual* durations recomputed from the final geometry, which is what
    /// latency reporting and drift tolerance use.
    pub fn from_format(
        format: &FixedFormat,
        buffer_time: Duration,
        latency_time: Duration,
    ) -> Self {
        let bps = format.bytes_per_sample();
        let latency_us = latency_time.as_micros().max(1) as u64;
        let buffer_us = buffer_time.as_micros().max(1) as u64;

        let mut segsize = scale(
            u64::from(format.rate) * u64::from(bps),
            latency_us,
            1_000_000,
        ) as u32;
        // whole frames only, and never less than one
        segsize -= segsize % bps;
        segsize = segsize.max(bps);
        let segtotal = (buffer_us / latency_us).max(2) as u32;

        let mut spec = Self {
            rate: format.rate,
            channels: format.channels,
            bytes_per_sample: bps,
            segsize,
            segtotal,
            seglatency: segtotal,
            buffer_time,
            latency_time,
        };
        spec.recompute_times();
        spec
    }

    /// Recomputes `latency_time` and `buffer_time` from the geometry.
    fn recompute_times(&mut self) {
        let latency_ns = scale(
            u64::from(self.segsize),
            1_000_000_000,
            u64::from(self.rate) * u64::from(self.bytes_per_sample),
        );
        self.latency_time = Duration::from_nanos(latency_ns);
        self.buffer_time = Duration::from_nanos(latency_ns * u64::from(self.segtotal));
    }

    /// Number of sample frames in one segment.
    pub fn samples_per_seg(&self) -> u32 {
        self.segsize / self.bytes_per_sample
    }

    /// Duration of audio the fully-filled ring holds.
    pub fn buffer_duration(&self) -> Duration {
        self.buffer_time
    }

    #[cfg(test)]
    pub(crate) fn for_tests(rate: u32, bytes_per_sample: u32, segsize: u32, segtotal: u32) -> Self {
        let mut spec = Self {
            rate,
            channels: 2,
            bytes_per_sample,
            segsize,
            segtotal,
            seglatency: segtotal,
            buffer_time: Duration::ZERO,
            latency_time: Duration::ZERO,
        };
        spec.recompute_times();
        spec
    }
}

/// Bounded producer/consumer buffer between the sink and the device.
///
/// The sink is the only producer; the consumer is a device thread owned by
/// the implementation, which plays segments in order and advances
/// [`segdone`](RingBuffer::segdone). Implementations do their own internal
/// locking; every method here may be called from the streaming, state or
/// device thread.
///
/// # Lifecycle
///
/// `open_device`/`close_device` bracket driver-level access and are
/// idempotent. `acquire` fixes the format and allocates the segments;
/// `release` undoes it and may be followed by another `acquire`.
/// `set_flushing(true)` unblocks every pending waiter and makes further
/// commits return immediately until flushing is cleared.
pub trait RingBuffer: Send + Sync {
    /// Opens the device. Idempotent; no format is set yet.
    fn open_device(&self) -> Result<(), RenderError>;

    /// Closes the device. Idempotent.
    fn close_device(&self);

    /// Sets the format and allocates `spec.segtotal` segments.
    fn acquire(&self, spec: SinkSpec) -> Result<(), RenderError>;

    /// Drops the format and frees the segments.
    fn release(&self);

    /// Whether a format is currently acquired.
    fn is_acquired(&self) -> bool;

    /// Starts the consumer thread, if it is allowed to start.
    fn start(&self) -> bool;

    /// Pauses the consumer thread.
    fn pause(&self) -> bool;

    /// Arms or disarms starting: `start()` only has effect after
    /// `may_start(true)`.
    fn may_start(&self, allowed: bool);

    /// Enters or leaves the flushing state. While flushing, pending
    /// waiters unblock and commits return early.
    fn set_flushing(&self, flushing: bool);

    /// Writes `in_samples` frames from `data` at `*sample_offset`,
    /// occupying `out_samples` output slots.
    ///
    /// When the counts differ, the implementation stretches or compresses
    /// through its resampler; `accum` carries the fractional residue
    /// across calls. Advances `*sample_offset` past the slots written.
    /// Returns the number of input frames consumed, which is less than
    /// `in_samples` when the buffer is flushing.
    fn commit(
        &self,
        sample_offset: &mut u64,
        data: &[u8],
        in_samples: u32,
        out_samples: u32,
        accum: &mut i32,
    ) -> u32;

    /// Total frames the device has consumed since acquire.
    fn samples_done(&self) -> u64;

    /// Frames queued in the device that are not yet audible.
    fn delay(&self) -> u32;

    /// Segments consumed by the device, monotonically increasing.
    fn segdone(&self) -> u64;

    /// Value of `segdone` at the last acquire; positions are relative to
    /// it.
    fn segbase(&self) -> u64;

    /// The acquired spec, or `None` before acquire / after release.
    fn spec(&self) -> Option<SinkSpec>;

    /// Installs or removes the pull-mode fill callback.
    fn set_callback(&self, callback: Option<FillCallback>);
}
