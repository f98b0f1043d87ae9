//! Clock slaving: mapping pipeline-clock time onto the device clock.
//!
//! When the pipeline schedules against a clock other than the one this
//! sink provides, render times arrive in the foreign clock's domain and
//! drift against the device. The strategies here translate a render time
//! range into the device domain and, depending on the method, update the
//! calibration so sustained drift is corrected.

use std::sync::Arc;

use crate::clock::{Calibration, ReferenceClock};
use crate::config::SlaveMethod;
use crate::event::RenderEvent;
use crate::ringbuffer::SinkSpec;
use crate::sink::{AudioSink, StreamState};
use crate::time::{scale, ClockTime};

/// Maps a time in the external (pipeline) domain to the internal (device)
/// domain using `calibration`, then removes the upstream latency offset.
///
/// Saturates at zero on both steps; a zeroed calibration rate is treated
/// as one-to-one.
pub(crate) fn clock_convert_external(
    external: ClockTime,
    calibration: Calibration,
    us_latency: ClockTime,
) -> ClockTime {
    let (num, denom) = if calibration.rate_num == 0 {
        (1, 1)
    } else {
        (calibration.rate_num, calibration.rate_denom)
    };

    // adjust for rate and offset
    let internal = if external >= calibration.external {
        scale(external - calibration.external, denom, num) + calibration.internal
    } else {
        let back = scale(calibration.external - external, denom, num);
        calibration.internal.saturating_sub(back)
    };

    // adjust for the offset when slaving started
    internal.saturating_sub(us_latency)
}

impl AudioSink {
    /// Converts `render_start..render_stop` into the device domain using
    /// the configured slaving method.
    pub(crate) fn handle_slaving(
        &self,
        spec: &SinkSpec,
        pipeline_clock: &Arc<dyn ReferenceClock>,
        stream: &mut StreamState,
        render_start: ClockTime,
        render_stop: ClockTime,
    ) -> (ClockTime, ClockTime) {
        match self.config().slave_method {
            SlaveMethod::Resample => self.resample_slaving(render_start, render_stop),
            SlaveMethod::Skew => {
                self.skew_slaving(spec, pipeline_clock, stream, render_start, render_stop)
            }
            SlaveMethod::None => self.none_slaving(render_start, render_stop),
        }
    }

    /// Conversion only, with the calibration's current rate: the drifting
    /// target makes the ring buffer's resampler produce the compensating
    /// output sample count.
    fn resample_slaving(
        &self,
        render_start: ClockTime,
        render_stop: ClockTime,
    ) -> (ClockTime, ClockTime) {
        let calibration = self.provided_clock().calibration();
        let us_latency = self.provided_clock().us_latency();

        tracing::debug!(
            internal = calibration.internal,
            external = calibration.external,
            rate_num = calibration.rate_num,
            rate_denom = calibration.rate_denom,
            "resample slaving"
        );

        let start = clock_convert_external(render_start, calibration, us_latency);
        let stop = clock_convert_external(render_stop, calibration, us_latency);
        tracing::debug!(start, stop, "after slaving");
        (start, stop)
    }

    /// Measures the drift between both clocks and shifts the playout
    /// position by whole segments once the average exceeds half of one.
    fn skew_slaving(
        &self,
        spec: &SinkSpec,
        pipeline_clock: &Arc<dyn ReferenceClock>,
        stream: &mut StreamState,
        render_start: ClockTime,
        render_stop: ClockTime,
    ) -> (ClockTime, ClockTime) {
        let mut calibration = self.provided_clock().calibration();
        let us_latency = self.provided_clock().us_latency();

        if let (Some(etime), Some(itime)) =
            (pipeline_clock.now(), self.provided_clock().internal_time())
        {
            // normalise both readings against the calibration origin
            let etime = etime.saturating_sub(calibration.external);
            let itime = itime.saturating_sub(calibration.internal);

            let skew = itime as i64 - etime as i64;
            let avg_skew = match stream.avg_skew {
                // first observation
                None => skew,
                Some(prev) => (31 * prev + skew) / 32,
            };
            stream.avg_skew = Some(avg_skew);

            tracing::debug!(itime, etime, skew, avg_skew, "clock skew measured");

            // the max drift we allow is the length of a segment
            let segtime = spec.latency_time.as_nanos() as i64;
            let segtime2 = segtime / 2;
            let segsamples = i64::from(spec.samples_per_seg());

            if avg_skew > segtime2 {
                // master is running slower, move internal time forward
                tracing::warn!(avg_skew, limit = segtime2, "correcting clock skew");
                calibration.external = calibration.external.saturating_sub(segtime as u64);
                stream.avg_skew = Some(avg_skew - segtime);

                // when the last alignment fought the correction or moved
                // more than the correction itself, resync instead
                if matches!(stream.last_align, Some(align) if align < 0 || align > segsamples) {
                    stream.next_sample = None;
                }
                tracing::debug!(
                    last_align = ?stream.last_align,
                    segsamples,
                    next_sample = ?stream.next_sample,
                    "skew corrected backwards"
                );

                self.provided_clock().set_calibration(calibration);
                self.emit(RenderEvent::SkewCorrected {
                    avg_skew,
                    correction: -segtime,
                });
            } else if avg_skew < -segtime2 {
                // master is running faster, move external time forward
                tracing::warn!(avg_skew, limit = -segtime2, "correcting clock skew");
                calibration.external += segtime as u64;
                stream.avg_skew = Some(avg_skew + segtime);

                if matches!(stream.last_align, Some(align) if align > 0 || -align > segsamples) {
                    stream.next_sample = None;
                }
                tracing::debug!(
                    last_align = ?stream.last_align,
                    segsamples,
                    next_sample = ?stream.next_sample,
                    "skew corrected forwards"
                );

                self.provided_clock().set_calibration(calibration);
                self.emit(RenderEvent::SkewCorrected {
                    avg_skew,
                    correction: segtime,
                });
            }
        }

        // convert, ignoring speed
        let start = clock_convert_external(render_start, calibration, us_latency);
        let stop = clock_convert_external(render_stop, calibration, us_latency);
        (start, stop)
    }

    /// Conversion only: a fixed calibration compensates the static offset
    /// between the domains, drift is never tracked.
    pub(crate) fn none_slaving(
        &self,
        render_start: ClockTime,
        render_stop: ClockTime,
    ) -> (ClockTime, ClockTime) {
        let calibration = self.provided_clock().calibration();
        let us_latency = self.provided_clock().us_latency();

        let start = clock_convert_external(render_start, calibration, us_latency);
        let stop = clock_convert_external(render_stop, calibration, us_latency);
        (start, stop)
    }

}
