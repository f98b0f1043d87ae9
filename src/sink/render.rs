//! The per-buffer render path.
//!
//! Each buffer is clipped to the active segment, its timestamps brought to
//! running time, slaved into the device clock domain, aligned against the
//! end of the previous buffer and committed to the ring buffer at the
//! resulting absolute sample position.

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::SampleBuffer;
use crate::config::SlaveMethod;
use crate::error::RenderError;
use crate::event::RenderEvent;
use crate::ringbuffer::{RingBuffer, SinkSpec};
use crate::sink::{AudioSink, StreamState};
use crate::time::{samples_to_time, time_to_samples, ClockTime};

impl AudioSink {
    /// Renders one buffer, blocking until its samples are committed.
    ///
    /// Returns when the data sits in the ring buffer; actual playback
    /// happens asynchronously as the device consumes segments.
    ///
    /// # Errors
    ///
    /// - [`RenderError::NotNegotiated`]: no format acquired yet
    /// - [`RenderError::WrongSize`]: payload not a whole number of frames
    /// - [`RenderError::Stopping`]: a flush or state change interrupted the
    ///   commit; not a failure
    pub fn render(&self, buffer: &SampleBuffer) -> Result<(), RenderError> {
        let (ringbuffer, pipeline_clock) = self.collaborators();
        let ringbuffer = ringbuffer.ok_or(RenderError::NotNegotiated)?;
        if !ringbuffer.is_acquired() {
            tracing::debug!("render before negotiation");
            return Err(RenderError::NotNegotiated);
        }
        let spec = ringbuffer.spec().ok_or(RenderError::NotNegotiated)?;

        let bps = spec.bytes_per_sample;
        if buffer.data.len() % bps as usize != 0 {
            tracing::debug!(size = buffer.data.len(), "buffer has partial frames");
            return Err(RenderError::WrongSize {
                size: buffer.data.len(),
                bytes_per_sample: bps,
            });
        }

        let mut stream = self.stream.lock();
        let mut data: &[u8] = &buffer.data;
        let mut samples = (data.len() / bps as usize) as u32;

        tracing::debug!(
            timestamp = ?buffer.timestamp,
            samples,
            discont = buffer.discont,
            "rendering buffer"
        );

        // without a timestamp the sample is played as soon as possible
        let Some(mut time) = buffer.timestamp else {
            let render_start = clocked_position(ringbuffer.as_ref(), &spec, &stream);
            let render_stop = render_start + u64::from(samples);
            tracing::debug!(render_start, "buffer has no timestamp");
            return self.commit_samples(
                &ringbuffer,
                &spec,
                &mut stream,
                data,
                samples,
                render_start,
                render_stop,
                u64::from(samples),
                samples_to_time(render_stop, spec.rate),
            );
        };

        // derive the stop time from the sample count rather than trusting
        // an upstream duration
        let mut stop = time + samples_to_time(u64::from(samples), spec.rate);

        // samples are clipped to the segment boundaries; completely
        // outside means the whole buffer is dropped
        let Some((ctime, cstop)) = stream.segment.clip(time, stop) else {
            tracing::debug!(timestamp = time, "buffer out of segment, dropping");
            return Ok(());
        };
        if ctime > time {
            let head = (time_to_samples(ctime - time, spec.rate) as u32).min(samples);
            tracing::debug!(clipped = head, "clipping buffer head");
            samples -= head;
            data = &data[head as usize * bps as usize..];
            time = ctime;
        }
        if stop > cstop {
            let tail = (time_to_samples(stop - cstop, spec.rate) as u32).min(samples);
            tracing::debug!(clipped = tail, "clipping buffer tail");
            samples -= tail;
            stop = cstop;
        }

        // without a clock (or with sync disabled) the sample is played as
        // soon as possible while still honouring clipping
        let sync = self.config.sync;
        let Some(pipeline_clock) = pipeline_clock.filter(|_| sync) else {
            let render_start = clocked_position(ringbuffer.as_ref(), &spec, &stream);
            let render_stop = render_start + u64::from(samples);
            tracing::debug!(render_start, "no sync needed");
            self.commit_samples(
                &ringbuffer,
                &spec,
                &mut stream,
                data,
                samples,
                render_start,
                render_stop,
                u64::from(samples),
                samples_to_time(render_stop, spec.rate),
            )?;
            start_at_segment_end(&ringbuffer, &stream, stop);
            return Ok(());
        };

        // bring the buffer times to running time
        let running_start = stream.segment.to_running_time(time).unwrap_or(0);
        let running_stop = stream.segment.to_running_time(stop).unwrap_or(0);

        // sync against the pipeline clock: running time plus base time,
        // shifted by the latency upstream expects us to compensate
        let base_time = self.base_time();
        let latency = self.render_latency();
        let render_start = running_start + base_time + latency;
        let render_stop = running_stop + base_time + latency;

        tracing::debug!(
            running_start,
            running_stop,
            base_time,
            latency,
            "after latency adjustment"
        );

        // bring the times into the device clock domain
        let slaved = !self.clock_is_provided(&pipeline_clock);
        let (slaved_start, slaved_stop) = if slaved {
            self.handle_slaving(&spec, &pipeline_clock, &mut stream, render_start, render_stop)
        } else {
            // no slaving needed, but calibration-recorded rate corrections
            // still apply
            self.none_slaving(render_start, render_stop)
        };

        // and to the rate-corrected sample positions
        let mut render_start = time_to_samples(slaved_start, spec.rate);
        let mut render_stop = time_to_samples(slaved_stop, spec.rate);

        let forward = stream.segment.rate >= 0.0;
        let resample_mode = slaved && self.config.slave_method == SlaveMethod::Resample;

        // align against the end of the previous buffer, unless something
        // forced a resync
        if buffer.discont {
            tracing::debug!("resync after discont");
        } else if let Some(next_sample) = stream.next_sample {
            // positive playback rate renders the first sample at
            // render_start, negative rate at render_stop
            let sample_offset = if forward { render_start } else { render_stop };
            let diff = sample_offset.abs_diff(next_sample);

            // tolerate up to half a second before resyncing; rounding
            // errors in timestamps and sample positions stay far below
            // this, and discontinuities carry the discont flag anyway
            if diff < u64::from(spec.rate) / 2 {
                let align = next_sample as i64 - sample_offset as i64;
                tracing::debug!(align, "aligning with previous sample");
                render_start = add_signed(render_start, align);
                stream.last_align = Some(align);
                if resample_mode {
                    // the resampler needs the unaligned stop to compute
                    // the real output length
                    tracing::debug!("stop not aligned: resample slaving");
                } else {
                    render_stop = add_signed(render_stop, align);
                }
            } else {
                let drift = Duration::from_nanos(samples_to_time(diff, spec.rate));
                tracing::warn!(
                    ?drift,
                    "unexpected discontinuity of more than half a second, resyncing"
                );
                self.emit(RenderEvent::SyncProblem { drift });
                stream.last_align = Some(0);
            }
        } else {
            tracing::debug!("no previous sample position known, no alignment");
        }

        // the output slot count is the distance between the slaved
        // positions; a large negative alignment can invert them, in which
        // case there is nothing to write
        let out_samples = if forward {
            render_stop.saturating_sub(render_start)
        } else {
            render_start.saturating_sub(render_stop)
        };
        if out_samples == 0 {
            tracing::debug!("empty render range after alignment, skipping commit");
            return Ok(());
        }

        self.commit_samples(
            &ringbuffer,
            &spec,
            &mut stream,
            data,
            samples,
            render_start,
            render_stop,
            out_samples,
            running_stop,
        )?;

        start_at_segment_end(&ringbuffer, &stream, stop);
        Ok(())
    }

    /// Commits `samples` frames occupying `out_samples` slots, resuming
    /// after partial writes.
    #[allow(clippy::too_many_arguments)]
    fn commit_samples(
        &self,
        ringbuffer: &Arc<dyn RingBuffer>,
        spec: &SinkSpec,
        stream: &mut StreamState,
        mut data: &[u8],
        mut samples: u32,
        render_start: u64,
        render_stop: u64,
        out_samples: u64,
        eos_running_time: ClockTime,
    ) -> Result<(), RenderError> {
        let bps = spec.bytes_per_sample as usize;

        // the first or the last sample is rendered first, depending on the
        // playback direction
        let mut sample_offset = if stream.segment.rate >= 0.0 {
            render_start
        } else {
            render_stop
        };

        tracing::debug!(
            sample_offset,
            samples,
            out_samples,
            "committing to ring buffer"
        );

        // the accumulator carries the stretch residue across interrupted
        // commits
        let mut accum = 0i32;
        let mut align_next = true;
        let start_offset = sample_offset;
        loop {
            // slots already written no longer count towards the output
            let out_remaining = out_samples.saturating_sub(sample_offset - start_offset);
            let written = ringbuffer.commit(
                &mut sample_offset,
                data,
                samples,
                out_remaining as u32,
                &mut accum,
            );
            tracing::debug!(written, of = samples, "committed");

            if written == samples {
                break;
            }

            // something interrupted the commit; wait for playback to
            // resume before writing the remainder
            self.wait_preroll()?;

            // after an interruption the next buffer cannot assume it is
            // contiguous with this one
            align_next = false;
            samples -= written;
            data = &data[written as usize * bps..];
        }

        stream.next_sample = if align_next { Some(sample_offset) } else { None };
        stream.eos_running_time = Some(eos_running_time);
        tracing::debug!(next_sample = ?stream.next_sample, "next sample expected");

        Ok(())
    }
}

/// Sample position used when the buffer cannot or must not be scheduled by
/// timestamp: right after the previous buffer, or - when the device has
/// already consumed past that point - at the next playable segment.
fn clocked_position(ringbuffer: &dyn RingBuffer, spec: &SinkSpec, stream: &StreamState) -> u64 {
    // assume we can append to the previous sample
    let sample = stream.next_sample.unwrap_or(0);
    let samples_per_seg = u64::from(spec.samples_per_seg());

    let writeseg = sample / samples_per_seg;
    let segdone = ringbuffer.segdone().saturating_sub(ringbuffer.segbase());

    if writeseg < segdone {
        // the sample would be dropped as late; place it at the next
        // position the device has not reached yet
        return (segdone + 1) * samples_per_seg;
    }
    sample
}

/// A segment that ends before filling the device headroom would otherwise
/// never start playing; kick playback once its last sample is queued.
fn start_at_segment_end(
    ringbuffer: &Arc<dyn RingBuffer>,
    stream: &StreamState,
    stop: ClockTime,
) {
    if let Some(segment_stop) = stream.segment.stop {
        if stop >= segment_stop {
            tracing::debug!("at the end of the segment, starting playback");
            ringbuffer.start();
        }
    }
}

fn add_signed(value: u64, delta: i64) -> u64 {
    value.checked_add_signed(delta).unwrap_or(0)
}
