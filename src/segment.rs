//! Stream segments: the time interval buffers are scheduled within.
//!
//! A segment maps buffer timestamps to running time, the coordinate the
//! pipeline clock schedules against. Buffers outside the segment interval
//! are clipped or dropped.

use crate::time::ClockTime;

/// The active playback interval, as announced by a new-segment event.
///
/// Timestamps are clipped to `[start, stop]` and then shifted so that
/// `start` maps to running time zero. `rate` carries the playback
/// direction and speed; reverse playback renders each buffer's last sample
/// first.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSegment {
    /// Stream time where the segment begins.
    pub start: ClockTime,
    /// Stream time where the segment ends, or `None` for an unbounded
    /// segment.
    pub stop: Option<ClockTime>,
    /// Playback rate. Negative values play in reverse.
    pub rate: f64,
}

impl Default for StreamSegment {
    fn default() -> Self {
        Self {
            start: 0,
            stop: None,
            rate: 1.0,
        }
    }
}

impl StreamSegment {
    /// Creates a segment covering `[start, stop]` at normal rate.
    pub fn new(start: ClockTime, stop: Option<ClockTime>) -> Self {
        Self {
            start,
            stop,
            rate: 1.0,
        }
    }

    /// Intersects the interval `[from, to]` with this segment.
    ///
    /// Returns `None` when the interval lies entirely outside the segment,
    /// meaning the buffer must be dropped.
    pub fn clip(&self, from: ClockTime, to: ClockTime) -> Option<(ClockTime, ClockTime)> {
        if let Some(stop) = self.stop {
            if from >= stop {
                return None;
            }
        }
        if to < self.start {
            return None;
        }

        let cfrom = from.max(self.start);
        let cto = match self.stop {
            Some(stop) => to.min(stop),
            None => to,
        };
        Some((cfrom, cto))
    }

    /// Maps a stream timestamp inside the segment to running time.
    ///
    /// Returns `None` for times the segment does not cover. For reverse
    /// playback the mapping runs backwards from `stop`, which must be
    /// known.
    pub fn to_running_time(&self, time: ClockTime) -> Option<ClockTime> {
        if self.rate >= 0.0 {
            if time < self.start {
                return None;
            }
            Some(scale_by_rate(time - self.start, self.rate))
        } else {
            let stop = self.stop?;
            if time > stop {
                return None;
            }
            Some(scale_by_rate(stop - time, self.rate))
        }
    }
}

/// Divides a time span by the absolute playback rate.
fn scale_by_rate(span: ClockTime, rate: f64) -> ClockTime {
    let abs = rate.abs();
    if abs == 1.0 || abs == 0.0 {
        span
    } else {
        (span as f64 / abs) as ClockTime
    }
}
