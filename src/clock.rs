//! The clock the sink derives from device progress.
//!
//! [`AudioClock`] turns the ring buffer's processed-sample count into a
//! monotonic time the rest of the pipeline can synchronize against. When
//! the pipeline runs on a different clock, the slaving engine keeps a
//! [`Calibration`] up to date that maps between the two time domains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::ringbuffer::RingBuffer;
use crate::time::{samples_to_time, scale, ClockTime};

/// A source of pipeline time.
///
/// The pipeline selects one clock that every element schedules against;
/// the sink's own [`AudioClock`] implements this so it can be that clock.
/// `now()` returns `None` while the clock has nothing to measure against
/// (for the audio clock: no acquired ring buffer).
pub trait ReferenceClock: Send + Sync {
    /// Current time of this clock in nanoseconds.
    fn now(&self) -> Option<ClockTime>;
}

/// Affine map between the external (pipeline) and internal (device) time
/// domains.
///
/// `external` time `e` maps to internal time
/// `(e - external) * rate_denom / rate_num + internal`, saturating at
/// zero. The identity calibration maps the domains one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// Internal time at the calibration point.
    pub internal: ClockTime,
    /// External time at the calibration point.
    pub external: ClockTime,
    /// Numerator of the external-over-internal rate ratio.
    pub rate_num: u64,
    /// Denominator of the external-over-internal rate ratio.
    pub rate_denom: u64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            internal: 0,
            external: 0,
            rate_num: 1,
            rate_denom: 1,
        }
    }
}

/// Clock derived from the ring buffer's playback position.
///
/// The time reported is `(samples_done - delay) / rate`, shifted by the
/// minimum upstream latency observed in the last latency query. Both
/// inputs come from the device thread; `samples_done` only ever grows and
/// `delay` is bounded by the device fill level, so consecutive readings
/// never decrease while the buffer stays acquired.
///
/// Obtained from [`AudioSink::provide_clock()`](crate::AudioSink::provide_clock).
pub struct AudioClock {
    ringbuffer: RwLock<Option<Arc<dyn RingBuffer>>>,
    calibration: Mutex<Calibration>,
    us_latency: AtomicU64,
    master: Mutex<Option<Arc<dyn ReferenceClock>>>,
}

impl AudioClock {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            ringbuffer: RwLock::new(None),
            calibration: Mutex::new(Calibration::default()),
            us_latency: AtomicU64::new(0),
            master: Mutex::new(None),
        })
    }

    /// Couples the clock to the ring buffer whose progress it reports.
    pub(crate) fn attach(&self, ringbuffer: Arc<dyn RingBuffer>) {
        *self.ringbuffer.write() = Some(ringbuffer);
    }

    pub(crate) fn detach(&self) {
        *self.ringbuffer.write() = None;
    }

    /// Time of the device domain itself, before calibration.
    ///
    /// Returns `None` when no ring buffer is acquired or the rate is
    /// unknown.
    pub fn internal_time(&self) -> Option<ClockTime> {
        let guard = self.ringbuffer.read();
        let ringbuffer = guard.as_ref()?;
        let spec = ringbuffer.spec()?;
        if spec.rate == 0 {
            return None;
        }

        let raw = ringbuffer.samples_done();
        let delay = u64::from(ringbuffer.delay());
        // samples still queued in the device have not been heard yet
        let samples = raw.saturating_sub(delay);

        let result = samples_to_time(samples, spec.rate) + self.us_latency.load(Ordering::Acquire);

        tracing::trace!(
            raw,
            delay,
            samples,
            time_ns = result,
            "audio clock sampled"
        );

        Some(result)
    }

    /// Returns the current calibration.
    pub fn calibration(&self) -> Calibration {
        *self.calibration.lock()
    }

    /// Replaces the calibration wholesale.
    ///
    /// The four parameters are swapped as one value; a concurrent reader
    /// sees either the old or the new calibration, never a mix.
    pub fn set_calibration(&self, calibration: Calibration) {
        *self.calibration.lock() = calibration;
    }

    /// Marks this clock as slaved to `master`, handing rate estimation to
    /// external clock infrastructure. Used by the resample slaving method.
    pub fn set_master(&self, master: Arc<dyn ReferenceClock>) {
        *self.master.lock() = Some(master);
    }

    /// Removes any master relationship.
    pub fn clear_master(&self) {
        *self.master.lock() = None;
    }

    /// Returns the current master clock, if any.
    pub fn master(&self) -> Option<Arc<dyn ReferenceClock>> {
        self.master.lock().clone()
    }

    pub(crate) fn us_latency(&self) -> ClockTime {
        self.us_latency.load(Ordering::Acquire)
    }

    pub(crate) fn set_us_latency(&self, latency: ClockTime) {
        self.us_latency.store(latency, Ordering::Release);
    }
}

impl ReferenceClock for AudioClock {
    /// Calibrated time: the internal time mapped into the external domain.
    fn now(&self) -> Option<ClockTime> {
        let internal = self.internal_time()?;
        let cal = self.calibration();
        let (num, denom) = if cal.rate_num == 0 {
            (1, 1)
        } else {
            (cal.rate_num, cal.rate_denom)
        };

        let external = if internal >= cal.internal {
            scale(internal - cal.internal, num, denom) + cal.external
        } else {
            let back = scale(cal.internal - internal, num, denom);
            cal.external.saturating_sub(back)
        };
        Some(external)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ringbuffer::MockRingBuffer;
    use crate::ringbuffer::SinkSpec;

    fn acquired_clock(spec: SinkSpec) -> (Arc<AudioClock>, Arc<MockRingBuffer>) {
        let ringbuffer = Arc::new(MockRingBuffer::new());
        ringbuffer.open_device().unwrap();
        ringbuffer.acquire(spec).unwrap();
        let clock = AudioClock::new();
        clock.attach(ringbuffer.clone());
        (clock, ringbuffer)
    }

    fn test_spec() -> SinkSpec {
        // 1024 samples per segment at 44.1kHz
        SinkSpec::for_tests(44100, 4, 4096, 8)
    }

    #[test]
    fn test_unattached_clock_has_no_time() {
        let clock = AudioClock::new();
        assert_eq!(clock.internal_time(), None);
        assert_eq!(clock.now(), None);
    }

    #[test]
    fn test_time_tracks_samples_done() {
        let (clock, ringbuffer) = acquired_clock(test_spec());
        assert_eq!(clock.internal_time(), Some(0));

        // one segment = 1024 samples
        ringbuffer.advance(1);
        assert_eq!(clock.internal_time(), Some(samples_to_time(1024, 44100)));
    }

    #[test]
    fn test_delay_is_subtracted_and_clamped() {
        let (clock, ringbuffer) = acquired_clock(test_spec());
        ringbuffer.set_delay(4096);
        // more delay than samples done clamps to zero
        assert_eq!(clock.internal_time(), Some(0));

        ringbuffer.advance(8);
        let expected = samples_to_time(8 * 1024 - 4096, 44100);
        assert_eq!(clock.internal_time(), Some(expected));
    }

    #[test]
    fn test_us_latency_shifts_zero() {
        let (clock, _ringbuffer) = acquired_clock(test_spec());
        clock.set_us_latency(5_000_000);
        assert_eq!(clock.internal_time(), Some(5_000_000));
    }

    #[test]
    fn test_monotonic_under_advancing_device() {
        let (clock, ringbuffer) = acquired_clock(test_spec());
        let mut last = 0;
        for _ in 0..32 {
            ringbuffer.advance(1);
            let now = clock.internal_time().unwrap();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_calibrated_time_applies_offset() {
        let (clock, ringbuffer) = acquired_clock(test_spec());
        ringbuffer.advance(4);
        let internal = clock.internal_time().unwrap();

        clock.set_calibration(Calibration {
            internal: 0,
            external: 1_000_000_000,
            rate_num: 1,
            rate_denom: 1,
        });
        assert_eq!(clock.now(), Some(internal + 1_000_000_000));
    }

    #[test]
    fn test_calibrated_time_saturates_below_zero() {
        let (clock, _ringbuffer) = acquired_clock(test_spec());
        clock.set_calibration(Calibration {
            internal: 1_000_000_000,
            external: 500_000_000,
            rate_num: 1,
            rate_denom: 1,
        });
        // internal time 0 maps a full second behind the calibration point
        assert_eq!(clock.now(), Some(0));
    }

    #[test]
    fn test_zero_rate_calibration_treated_as_identity() {
        let (clock, ringbuffer) = acquired_clock(test_spec());
        ringbuffer.advance(1);
        clock.set_calibration(Calibration {
            internal: 0,
            external: 0,
            rate_num: 0,
            rate_denom: 0,
        });
        assert_eq!(clock.now(), clock.internal_time());
    }
}
