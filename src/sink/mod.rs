//! The audio sink: lifecycle, scheduling and device coupling.
//!
//! [`AudioSink`] accepts timestamped [`SampleBuffer`]s on a streaming
//! thread and commits them to a [`RingBuffer`] at the sample position their
//! timestamps demand, keeping the device in step with the pipeline clock.
//! The render path itself lives in `render`, the clock slaving strategies
//! in `slave`.

mod render;
mod slave;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::buffer::SampleBuffer;
use crate::clock::{AudioClock, Calibration, ReferenceClock};
use crate::config::{SinkConfig, SlaveMethod};
use crate::error::{PullError, RenderError};
use crate::event::{EventCallback, RenderEvent};
use crate::format::AudioFormat;
use crate::ringbuffer::{RingBuffer, SinkSpec};
use crate::segment::StreamSegment;
use crate::time::{scale, ClockTime, NANOS_PER_SEC};

/// Lifecycle states of the sink.
///
/// Transitions always walk through the intermediate states, performing the
/// device work attached to each edge: the ring buffer is created and opened
/// entering `Ready`, acquired while negotiating in `Paused`, started in
/// `Playing`, released leaving `Paused` and closed leaving `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SinkState {
    /// No device resources held.
    Null,
    /// Device opened, no format yet.
    Ready,
    /// Format may be acquired; playback armed but not running.
    Paused,
    /// The device consumes samples.
    Playing,
}

/// Pipeline events the sink consumes.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Upstream starts flushing: unblock all waiters, drop further data.
    FlushStart,
    /// Flushing is over; the next buffer resyncs from scratch.
    FlushStop,
    /// No more data will arrive: play out whatever is queued.
    Eos,
    /// A new playback interval begins.
    NewSegment(StreamSegment),
}

/// Result of delegating a latency query upstream, handed back to
/// [`AudioSink::latency()`].
#[derive(Debug, Clone, Copy)]
pub struct UpstreamLatency {
    /// Whether this sink is part of a live pipeline.
    pub live: bool,
    /// Whether upstream itself is live.
    pub upstream_live: bool,
    /// Minimum upstream latency in nanoseconds.
    pub min: ClockTime,
    /// Maximum upstream latency, or `None` when unbounded.
    pub max: Option<ClockTime>,
}

/// The sink's contribution to a pipeline latency query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyReport {
    /// Whether latency matters at all (both ends live).
    pub live: bool,
    /// Minimum total latency in nanoseconds.
    pub min: ClockTime,
    /// Maximum total latency, or `None` when unbounded.
    pub max: Option<ClockTime>,
}

/// Diagnostic view of the renderer's scheduling state.
///
/// Intended for tests and monitoring; values change with every rendered
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSnapshot {
    /// Absolute sample position where the next buffer is expected, or
    /// `None` when the next buffer resyncs by clock arithmetic.
    pub next_sample: Option<u64>,
    /// Samples the previous buffer was shifted by to meet `next_sample`.
    pub last_align: Option<i64>,
    /// Smoothed drift against the pipeline clock in nanoseconds, or `None`
    /// before the first observation.
    pub avg_skew: Option<i64>,
}

/// Producer the sink pulls from when operating in pull mode.
///
/// The device thread asks for exactly the bytes it needs to fill a
/// segment; the source reads them at the given byte offset.
pub trait PullSource: Send + Sync {
    /// Reads up to `len` bytes at `offset`. A short return is padded with
    /// silence; [`PullError::Eos`] ends the stream.
    fn pull(&self, offset: u64, len: usize) -> Result<Vec<u8>, PullError>;
}

pub(crate) struct Control {
    pub state: SinkState,
    pub ringbuffer: Option<Arc<dyn RingBuffer>>,
    pub pipeline_clock: Option<Arc<dyn ReferenceClock>>,
    pub flushing: bool,
}

pub(crate) struct StreamState {
    pub next_sample: Option<u64>,
    pub last_align: Option<i64>,
    pub avg_skew: Option<i64>,
    pub segment: StreamSegment,
    pub eos_running_time: Option<ClockTime>,
}

struct PullState {
    source: Option<Arc<dyn PullSource>>,
    offset: u64,
    eos_posted: bool,
}

/// Renders timestamped PCM against a device ring buffer.
///
/// Built with [`AudioSink::builder()`]; the builder installs the
/// ring-buffer factory that stands in for the concrete device.
///
/// # Thread model
///
/// One streaming thread calls [`render`](AudioSink::render),
/// [`preroll`](AudioSink::preroll) and [`event`](AudioSink::event); the
/// application thread drives [`set_state`](AudioSink::set_state), clock and
/// latency queries. The device thread lives inside the ring buffer.
/// Blocking waits on the streaming thread are cancelled by
/// [`PipelineEvent::FlushStart`] and by leaving the `Paused`/`Playing`
/// states.
///
/// # Example
///
/// ```ignore
/// let sink = AudioSink::builder()
///     .ring_buffer(|| Arc::new(AlsaRingBuffer::new("default")))
///     .build()?;
///
/// sink.set_state(SinkState::Paused)?;
/// sink.configure(&AudioFormat::default())?;
/// sink.set_state(SinkState::Playing)?;
/// sink.render(&buffer)?;
/// ```
pub struct AudioSink {
    config: SinkConfig,
    factory: Box<dyn Fn() -> Arc<dyn RingBuffer> + Send + Sync>,
    clock: Arc<AudioClock>,
    control: Mutex<Control>,
    gate: Condvar,
    stream: Mutex<StreamState>,
    base_time: AtomicU64,
    latency: AtomicU64,
    events: Option<EventCallback>,
    pull: Mutex<PullState>,
    // handle to self for the pull-mode fill callback
    weak: Weak<AudioSink>,
}

impl AudioSink {
    /// Starts building a sink. See [`AudioSinkBuilder`](crate::AudioSinkBuilder).
    pub fn builder() -> crate::builder::AudioSinkBuilder {
        crate::builder::AudioSinkBuilder::new()
    }

    pub(crate) fn new(
        config: SinkConfig,
        factory: Box<dyn Fn() -> Arc<dyn RingBuffer> + Send + Sync>,
        events: Option<EventCallback>,
        pull_source: Option<Arc<dyn PullSource>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            factory,
            clock: AudioClock::new(),
            control: Mutex::new(Control {
                state: SinkState::Null,
                ringbuffer: None,
                pipeline_clock: None,
                flushing: false,
            }),
            gate: Condvar::new(),
            stream: Mutex::new(StreamState {
                next_sample: None,
                last_align: None,
                avg_skew: None,
                segment: StreamSegment::default(),
                eos_running_time: None,
            }),
            base_time: AtomicU64::new(0),
            latency: AtomicU64::new(0),
            events,
            pull: Mutex::new(PullState {
                source: pull_source,
                offset: 0,
                eos_posted: false,
            }),
            weak: weak.clone(),
        })
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SinkState {
        self.control.lock().state
    }

    /// Returns the sink configuration.
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Moves the sink to `target`, walking through intermediate states.
    ///
    /// # Errors
    ///
    /// [`RenderError::OpenFailed`] when the device cannot be opened on the
    /// way to `Ready`; the sink stays in its previous state.
    pub fn set_state(&self, target: SinkState) -> Result<(), RenderError> {
        loop {
            let current = self.state();
            if current == target {
                return Ok(());
            }
            if current < target {
                self.state_up(current)?;
            } else {
                self.state_down(current);
            }
        }
    }

    fn state_up(&self, current: SinkState) -> Result<(), RenderError> {
        match current {
            SinkState::Null => {
                let ringbuffer = {
                    let mut control = self.control.lock();
                    if control.ringbuffer.is_none() {
                        control.ringbuffer = Some((self.factory)());
                    }
                    control.ringbuffer.clone().ok_or(RenderError::NoRingBuffer)?
                };
                self.clock.attach(ringbuffer.clone());
                ringbuffer.open_device()?;
                self.enter_state(SinkState::Ready);
            }
            SinkState::Ready => {
                {
                    let mut stream = self.stream.lock();
                    stream.next_sample = None;
                    stream.last_align = None;
                }
                let ringbuffer = {
                    let mut control = self.control.lock();
                    control.flushing = false;
                    control.ringbuffer.clone()
                };
                if let Some(ringbuffer) = ringbuffer {
                    ringbuffer.set_flushing(false);
                    ringbuffer.may_start(false);
                }
                self.enter_state(SinkState::Paused);
            }
            SinkState::Paused => {
                self.async_play();
                self.enter_state(SinkState::Playing);
            }
            SinkState::Playing => unreachable!("no state above Playing"),
        }
        Ok(())
    }

    fn state_down(&self, current: SinkState) {
        match current {
            SinkState::Playing => {
                let ringbuffer = self.control.lock().ringbuffer.clone();
                if let Some(ringbuffer) = &ringbuffer {
                    ringbuffer.may_start(false);
                    ringbuffer.pause();
                }
                self.enter_state(SinkState::Paused);
                // stop slaving ourselves to the master, if any
                self.clock.clear_master();
            }
            SinkState::Paused => {
                // unblock any writer before the state flips, so a blocked
                // render call can observe the flush and bail out
                let ringbuffer = {
                    let mut control = self.control.lock();
                    control.flushing = true;
                    control.ringbuffer.clone()
                };
                if let Some(ringbuffer) = &ringbuffer {
                    ringbuffer.set_flushing(true);
                }
                self.gate.notify_all();
                self.enter_state(SinkState::Ready);
                if let Some(ringbuffer) = &ringbuffer {
                    ringbuffer.release();
                }
            }
            SinkState::Ready => {
                let ringbuffer = self.control.lock().ringbuffer.clone();
                if let Some(ringbuffer) = &ringbuffer {
                    // the acquire happens during negotiation, which can run
                    // after Ready without a matching release; release again
                    // before closing
                    ringbuffer.release();
                    ringbuffer.close_device();
                }
                self.clock.detach();
                self.enter_state(SinkState::Null);
            }
            SinkState::Null => unreachable!("no state below Null"),
        }
    }

    fn enter_state(&self, state: SinkState) {
        tracing::debug!(?state, "sink state change");
        self.control.lock().state = state;
        self.gate.notify_all();
    }

    /// Arms the ring buffer and, when slaved, seeds the clock calibration.
    fn async_play(&self) {
        let (ringbuffer, pipeline_clock) = {
            let control = self.control.lock();
            (control.ringbuffer.clone(), control.pipeline_clock.clone())
        };
        let Some(ringbuffer) = ringbuffer else { return };

        tracing::debug!("ring buffer may start now");
        ringbuffer.may_start(true);

        if let Some(pipeline_clock) = pipeline_clock {
            if !self.clock_is_provided(&pipeline_clock) {
                // slaved to a foreign clock: record both clock readings as
                // the calibration origin and start measuring skew afresh
                let etime = pipeline_clock.now().unwrap_or(0);
                let itime = self.clock.internal_time().unwrap_or(0);

                {
                    let mut stream = self.stream.lock();
                    stream.avg_skew = None;
                    stream.next_sample = None;
                }

                tracing::debug!(internal_ns = itime, external_ns = etime, "seeding calibration");

                let calibration = self.clock.calibration();
                self.clock.set_calibration(Calibration {
                    internal: itime,
                    external: etime,
                    rate_num: calibration.rate_num,
                    rate_denom: calibration.rate_denom,
                });

                if self.config.slave_method == SlaveMethod::Resample {
                    // only the resample method hands rate estimation to the
                    // master-clock machinery
                    tracing::debug!("slaving provided clock to the pipeline clock");
                    self.clock.set_master(pipeline_clock.clone());
                }
            }
        }

        // start right away so slaving can begin before the first buffer
        ringbuffer.start();
    }

    /// Handles a pipeline event on the streaming thread.
    pub fn event(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::FlushStart => {
                let ringbuffer = {
                    let mut control = self.control.lock();
                    control.flushing = true;
                    control.ringbuffer.clone()
                };
                if let Some(ringbuffer) = ringbuffer {
                    ringbuffer.set_flushing(true);
                }
                self.gate.notify_all();
            }
            PipelineEvent::FlushStop => {
                // always resync on the next sample after a flush
                {
                    let mut stream = self.stream.lock();
                    stream.avg_skew = None;
                    stream.next_sample = None;
                    stream.eos_running_time = None;
                }
                let ringbuffer = {
                    let mut control = self.control.lock();
                    control.flushing = false;
                    control.ringbuffer.clone()
                };
                if let Some(ringbuffer) = ringbuffer {
                    ringbuffer.set_flushing(false);
                }
            }
            PipelineEvent::Eos => {
                self.drain();
            }
            PipelineEvent::NewSegment(segment) => {
                tracing::debug!(rate = segment.rate, "new segment");
                self.stream.lock().segment = segment;
            }
        }
    }

    /// Gate called with the preroll buffer before playback starts.
    ///
    /// # Errors
    ///
    /// [`RenderError::NotNegotiated`] when no format is acquired yet.
    pub fn preroll(&self, _buffer: &SampleBuffer) -> Result<(), RenderError> {
        let ringbuffer = self.control.lock().ringbuffer.clone();
        match ringbuffer {
            Some(ringbuffer) if ringbuffer.is_acquired() => Ok(()),
            _ => {
                tracing::debug!("preroll before negotiation");
                Err(RenderError::NotNegotiated)
            }
        }
    }

    /// Negotiates `format` with the ring buffer.
    ///
    /// Releases any previous acquisition, fixates the open fields, derives
    /// the segment geometry from the configured buffer and latency times
    /// and acquires the ring buffer with it.
    ///
    /// # Errors
    ///
    /// [`RenderError::NotNegotiated`] when the sink is still in `Null`;
    /// [`RenderError::AcquireFailed`] when the ring buffer rejects the
    /// format.
    pub fn configure(&self, format: &AudioFormat) -> Result<(), RenderError> {
        let ringbuffer = self
            .control
            .lock()
            .ringbuffer
            .clone()
            .ok_or(RenderError::NotNegotiated)?;

        tracing::debug!("releasing old ring buffer");
        ringbuffer.release();

        let fixed = format.fixate();
        let spec = SinkSpec::from_format(&fixed, self.config.buffer_time, self.config.latency_time);
        tracing::debug!(?spec, "acquiring ring buffer");
        ringbuffer.acquire(spec)
    }

    /// Exposes the device clock, when acquired and configured to provide
    /// one.
    pub fn provide_clock(&self) -> Option<Arc<AudioClock>> {
        let control = self.control.lock();
        let ringbuffer = control.ringbuffer.as_ref()?;
        if !ringbuffer.is_acquired() {
            tracing::debug!("ring buffer not acquired, no clock");
            return None;
        }
        if !self.config.provide_clock {
            tracing::debug!("clock provision disabled");
            return None;
        }
        Some(self.clock.clone())
    }

    /// Installs the clock the pipeline scheduled this sink against, or
    /// `None` to run unsynchronized.
    pub fn set_pipeline_clock(&self, clock: Option<Arc<dyn ReferenceClock>>) {
        self.control.lock().pipeline_clock = clock;
    }

    /// Sets the pipeline time at which stream time zero plays.
    pub fn set_base_time(&self, base_time: ClockTime) {
        self.base_time.store(base_time, Ordering::Release);
    }

    /// Returns the configured base time.
    pub fn base_time(&self) -> ClockTime {
        self.base_time.load(Ordering::Acquire)
    }

    /// Answers a latency query, composing the device buffering latency
    /// with the upstream numbers the caller obtained.
    ///
    /// Returns `None` while not negotiated: latency cannot be reported
    /// before the segment geometry is known.
    pub fn latency(&self, upstream: &UpstreamLatency) -> Option<LatencyReport> {
        let ringbuffer = self.control.lock().ringbuffer.clone()?;
        let spec = ringbuffer.spec()?;
        if spec.rate == 0 {
            return None;
        }

        if upstream.live && upstream.upstream_live {
            // latency before the clock starts: data must exist upstream
            // before the device can consume it
            self.clock.set_us_latency(upstream.min);

            let device = scale(
                u64::from(spec.seglatency) * u64::from(spec.segsize),
                NANOS_PER_SEC,
                u64::from(spec.rate) * u64::from(spec.bytes_per_sample),
            );
            let min = device + upstream.min;
            let max = min + upstream.max.unwrap_or(0);
            self.latency.store(min, Ordering::Release);

            tracing::debug!(
                device_ns = device,
                upstream_ns = upstream.min,
                min_ns = min,
                "latency query"
            );
            Some(LatencyReport {
                live: true,
                min,
                max: Some(max),
            })
        } else {
            tracing::debug!("not fully live, latency does not apply");
            self.latency.store(0, Ordering::Release);
            Some(LatencyReport {
                live: false,
                min: 0,
                max: None,
            })
        }
    }

    /// Switches the sink into or out of pull mode.
    ///
    /// While active, the device thread pulls data from the configured
    /// [`PullSource`] on demand instead of waiting for pushed buffers.
    /// Returns `false` when no ring buffer or pull source is available.
    pub fn activate_pull(&self, active: bool) -> bool {
        let ringbuffer = match self.control.lock().ringbuffer.clone() {
            Some(ringbuffer) => ringbuffer,
            None => return false,
        };

        if active {
            {
                let mut pull = self.pull.lock();
                if pull.source.is_none() {
                    tracing::warn!("pull mode requested without a pull source");
                    return false;
                }
                pull.offset = 0;
                pull.eos_posted = false;
            }
            let sink = self.weak.clone();
            ringbuffer.set_callback(Some(Arc::new(move |data: &mut [u8]| {
                if let Some(sink) = sink.upgrade() {
                    sink.pull_fill(data);
                }
            })));
            ringbuffer.start()
        } else {
            ringbuffer.set_callback(None);
            ringbuffer.release();
            true
        }
    }

    /// Fills one segment from the pull source. Runs on the device thread.
    fn pull_fill(&self, data: &mut [u8]) {
        let (source, offset) = {
            let pull = self.pull.lock();
            if pull.eos_posted {
                // stream already over; leave silence
                return;
            }
            (pull.source.clone(), pull.offset)
        };
        let Some(source) = source else { return };

        tracing::trace!(len = data.len(), offset, "pulling to fill segment");
        match source.pull(offset, data.len()) {
            Ok(bytes) => {
                let len = bytes.len().min(data.len());
                if len < data.len() {
                    tracing::info!(got = len, wanted = data.len(), "short read from pull source");
                }
                data[..len].copy_from_slice(&bytes[..len]);
                self.pull.lock().offset += len as u64;
            }
            Err(PullError::Eos) => {
                self.pull.lock().eos_posted = true;
                tracing::debug!("pull source reached end of stream");
                self.emit(RenderEvent::EndOfStream);
                self.drain();
            }
            Err(PullError::Other(reason)) => {
                tracing::warn!(%reason, "pull failed, segment left silent");
            }
        }
    }

    /// Plays out everything queued, then returns.
    ///
    /// Cancelled early by a flush. Playback must be started even when less
    /// than a full latency worth of data was ever queued, otherwise short
    /// streams would never become audible.
    fn drain(&self) {
        let Some(ringbuffer) = self.control.lock().ringbuffer.clone() else {
            return;
        };
        let Some(spec) = ringbuffer.spec() else {
            return;
        };
        if spec.rate == 0 {
            return;
        }

        if ringbuffer.is_acquired() {
            ringbuffer.start();
        }

        let eos = {
            let mut stream = self.stream.lock();
            stream.next_sample = None;
            stream.eos_running_time.take()
        };
        if let Some(running_time) = eos {
            tracing::debug!(running_time_ns = running_time, "draining until end of stream");
            self.wait_eos(running_time, spec.latency_time);
        }
    }

    /// Waits until the clock reaches `running_time`; wakes at least once
    /// per segment period so a flush is observed within bounded time.
    fn wait_eos(&self, running_time: ClockTime, segment_period: Duration) {
        let mut control = self.control.lock();
        loop {
            if control.flushing {
                return;
            }
            let clock: Arc<dyn ReferenceClock> = match &control.pipeline_clock {
                Some(clock) => clock.clone(),
                None => self.clock.clone(),
            };
            let Some(now) = clock.now() else { return };
            let base_time = self.base_time.load(Ordering::Acquire);
            if now.saturating_sub(base_time) >= running_time {
                return;
            }
            let _ = self.gate.wait_for(&mut control, segment_period);
        }
    }

    /// Blocks an interrupted render call until playback resumes.
    ///
    /// # Errors
    ///
    /// [`RenderError::Stopping`] when the wait is cancelled by a flush or
    /// by leaving the `Paused`/`Playing` states.
    pub(crate) fn wait_preroll(&self) -> Result<(), RenderError> {
        let mut control = self.control.lock();
        loop {
            if control.flushing {
                return Err(RenderError::Stopping);
            }
            match control.state {
                SinkState::Playing => return Ok(()),
                SinkState::Paused => {}
                SinkState::Null | SinkState::Ready => return Err(RenderError::Stopping),
            }
            self.gate.wait(&mut control);
        }
    }

    /// Returns a diagnostic snapshot of the scheduling state.
    pub fn timing(&self) -> TimingSnapshot {
        let stream = self.stream.lock();
        TimingSnapshot {
            next_sample: stream.next_sample,
            last_align: stream.last_align,
            avg_skew: stream.avg_skew,
        }
    }

    pub(crate) fn emit(&self, event: RenderEvent) {
        if let Some(callback) = &self.events {
            callback(event);
        }
    }

    pub(crate) fn clock_is_provided(&self, clock: &Arc<dyn ReferenceClock>) -> bool {
        std::ptr::eq(
            Arc::as_ptr(clock) as *const (),
            Arc::as_ptr(&self.clock) as *const (),
        )
    }

    pub(crate) fn render_latency(&self) -> ClockTime {
        self.latency.load(Ordering::Acquire)
    }

    pub(crate) fn provided_clock(&self) -> &Arc<AudioClock> {
        &self.clock
    }

    pub(crate) fn collaborators(
        &self,
    ) -> (
        Option<Arc<dyn RingBuffer>>,
        Option<Arc<dyn ReferenceClock>>,
    ) {
        let control = self.control.lock();
        (control.ringbuffer.clone(), control.pipeline_clock.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ringbuffer::MockRingBuffer;

    fn sink_with_mock() -> Arc<AudioSink> {
        AudioSink::builder()
            .ring_buffer(|| Arc::new(MockRingBuffer::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_initial_state_is_null() {
        let sink = sink_with_mock();
        assert_eq!(sink.state(), SinkState::Null);
    }

    #[test]
    fn test_walks_through_intermediate_states() {
        let sink = sink_with_mock();
        sink.set_state(SinkState::Paused).unwrap();
        assert_eq!(sink.state(), SinkState::Paused);
        sink.set_state(SinkState::Null).unwrap();
        assert_eq!(sink.state(), SinkState::Null);
    }

    #[test]
    fn test_open_failure_aborts_transition() {
        let sink = AudioSink::builder()
            .ring_buffer(|| Arc::new(MockRingBuffer::failing()))
            .build()
            .unwrap();
        let result = sink.set_state(SinkState::Ready);
        assert!(matches!(result, Err(RenderError::OpenFailed { .. })));
        assert_eq!(sink.state(), SinkState::Null);
    }

    #[test]
    fn test_preroll_requires_negotiation() {
        let sink = sink_with_mock();
        sink.set_state(SinkState::Paused).unwrap();
        let buffer = SampleBuffer::new(vec![0u8; 16]);
        assert!(matches!(
            sink.preroll(&buffer),
            Err(RenderError::NotNegotiated)
        ));

        sink.configure(&AudioFormat::default()).unwrap();
        assert!(sink.preroll(&buffer).is_ok());
    }

    #[test]
    fn test_provide_clock_needs_acquired_buffer() {
        let sink = sink_with_mock();
        assert!(sink.provide_clock().is_none());

        sink.set_state(SinkState::Paused).unwrap();
        assert!(sink.provide_clock().is_none());

        sink.configure(&AudioFormat::default()).unwrap();
        assert!(sink.provide_clock().is_some());
    }

    #[test]
    fn test_provide_clock_disabled_by_config() {
        let sink = AudioSink::builder()
            .ring_buffer(|| Arc::new(MockRingBuffer::new()))
            .provide_clock(false)
            .build()
            .unwrap();
        sink.set_state(SinkState::Paused).unwrap();
        sink.configure(&AudioFormat::default()).unwrap();
        assert!(sink.provide_clock().is_none());
    }

    #[test]
    fn test_latency_report_composes_device_and_upstream() {
        let sink = sink_with_mock();
        sink.set_state(SinkState::Paused).unwrap();
        sink.configure(&AudioFormat::default()).unwrap();

        let report = sink
            .latency(&UpstreamLatency {
                live: true,
                upstream_live: true,
                min: 5_000_000,
                max: Some(20_000_000),
            })
            .unwrap();

        // 20 segments of 10ms each of device buffering
        let device = 200_000_000;
        assert!(report.live);
        assert_eq!(report.min, device + 5_000_000);
        assert_eq!(report.max, Some(device + 5_000_000 + 20_000_000));
    }

    #[test]
    fn test_latency_not_live() {
        let sink = sink_with_mock();
        sink.set_state(SinkState::Paused).unwrap();
        sink.configure(&AudioFormat::default()).unwrap();

        let report = sink
            .latency(&UpstreamLatency {
                live: false,
                upstream_live: true,
                min: 5_000_000,
                max: None,
            })
            .unwrap();
        assert_eq!(
            report,
            LatencyReport {
                live: false,
                min: 0,
                max: None
            }
        );
    }

    #[test]
    fn test_latency_before_negotiation() {
        let sink = sink_with_mock();
        let report = sink.latency(&UpstreamLatency {
            live: true,
            upstream_live: true,
            min: 0,
            max: None,
        });
        assert!(report.is_none());
    }

    #[test]
    fn test_flush_stop_forces_resync() {
        let sink = sink_with_mock();
        sink.set_state(SinkState::Paused).unwrap();
        sink.event(PipelineEvent::FlushStop);
        let timing = sink.timing();
        assert_eq!(timing.next_sample, None);
        assert_eq!(timing.avg_skew, None);
    }

    #[test]
    fn test_flush_stop_is_idempotent() {
        let sink = sink_with_mock();
        sink.set_state(SinkState::Paused).unwrap();
        sink.event(PipelineEvent::FlushStop);
        let first = sink.timing();
        sink.event(PipelineEvent::FlushStop);
        assert_eq!(sink.timing(), first);
    }

    #[test]
    fn test_new_segment_replaces_segment() {
        let sink = sink_with_mock();
        let segment = StreamSegment {
            start: 100,
            stop: Some(200),
            rate: 2.0,
        };
        sink.event(PipelineEvent::NewSegment(segment.clone()));
        assert_eq!(sink.stream.lock().segment, segment);
    }

    #[test]
    fn test_wait_preroll_stops_on_flush() {
        let sink = sink_with_mock();
        sink.set_state(SinkState::Paused).unwrap();

        let waiter = {
            let sink = sink.clone();
            std::thread::spawn(move || sink.wait_preroll())
        };
        std::thread::sleep(Duration::from_millis(20));
        sink.event(PipelineEvent::FlushStart);
        assert!(matches!(waiter.join().unwrap(), Err(RenderError::Stopping)));
    }

    #[test]
    fn test_wait_preroll_resumes_on_play() {
        let sink = sink_with_mock();
        sink.set_state(SinkState::Paused).unwrap();
        sink.configure(&AudioFormat::default()).unwrap();

        let waiter = {
            let sink = sink.clone();
            std::thread::spawn(move || sink.wait_preroll())
        };
        std::thread::sleep(Duration::from_millis(20));
        sink.set_state(SinkState::Playing).unwrap();
        assert!(waiter.join().unwrap().is_ok());
    }
}
