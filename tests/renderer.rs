//! End-to-end scheduling scenarios against the mock ring buffer.
//!
//! All tests drive the real state machine and render path; the device is
//! stepped explicitly so every timing outcome is deterministic.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use render_audio::{
    AudioFormat, AudioSink, ClockTime, MockRingBuffer, PipelineEvent, PullError, PullSource,
    ReferenceClock, RenderError, RenderEvent, RingBuffer, SampleBuffer, SinkState, SlaveMethod,
    StreamSegment,
};

/// 44.1kHz stereo 16-bit: the fixated default format.
/// One 10ms segment is 441 frames of 4 bytes.
const RATE: u32 = 44100;
const BPS: usize = 4;
const SEG_FRAMES: u64 = 441;
const MS: ClockTime = 1_000_000;

/// A reference clock stepped manually by the test.
struct TestClock {
    time: Mutex<ClockTime>,
}

impl TestClock {
    fn new(time: ClockTime) -> Arc<Self> {
        Arc::new(Self {
            time: Mutex::new(time),
        })
    }

    fn set(&self, time: ClockTime) {
        *self.time.lock() = time;
    }
}

impl ReferenceClock for TestClock {
    fn now(&self) -> Option<ClockTime> {
        Some(*self.time.lock())
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn frames(count: u64) -> Vec<u8> {
    vec![0u8; count as usize * BPS]
}

fn stamped(count: u64, timestamp: ClockTime) -> SampleBuffer {
    SampleBuffer::with_timestamp(frames(count), timestamp)
}

type Events = Arc<Mutex<Vec<RenderEvent>>>;

fn build_sink(slave_method: SlaveMethod) -> (Arc<AudioSink>, Arc<MockRingBuffer>, Events) {
    let ringbuffer = Arc::new(MockRingBuffer::new());
    let handle = ringbuffer.clone();
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();
    let sink = AudioSink::builder()
        .ring_buffer(move || handle.clone())
        .slave_method(slave_method)
        .on_event(move |event| seen.lock().push(event))
        .build()
        .unwrap();
    sink.set_state(SinkState::Paused).unwrap();
    sink.configure(&AudioFormat::default()).unwrap();
    (sink, ringbuffer, events)
}

/// A playing sink whose pipeline clock is its own provided clock.
fn master_sink() -> (Arc<AudioSink>, Arc<MockRingBuffer>, Events) {
    let (sink, ringbuffer, events) = build_sink(SlaveMethod::Skew);
    let clock = sink.provide_clock().unwrap();
    sink.set_pipeline_clock(Some(clock));
    sink.set_state(SinkState::Playing).unwrap();
    (sink, ringbuffer, events)
}

fn sync_problems(events: &Events) -> usize {
    events
        .lock()
        .iter()
        .filter(|event| matches!(event, RenderEvent::SyncProblem { .. }))
        .count()
}

#[test]
fn contiguous_buffers_land_back_to_back() {
    init_logging();
    let (sink, ringbuffer, events) = master_sink();

    // three buffers of 100ms each, timestamped contiguously
    for (index, timestamp) in [0, 100 * MS, 200 * MS].into_iter().enumerate() {
        sink.render(&stamped(4410, timestamp)).unwrap();

        let timing = sink.timing();
        assert_eq!(timing.next_sample, Some(4410 * (index as u64 + 1)));
        if index > 0 {
            assert_eq!(timing.last_align, Some(0));
        }
        ringbuffer.advance(10);
    }
    assert_eq!(sync_problems(&events), 0);
}

#[test]
fn long_contiguous_stream_stays_aligned_and_clock_monotone() {
    let (sink, ringbuffer, _events) = master_sink();
    let clock = sink.provide_clock().unwrap();

    let mut previous_time = 0;
    for index in 0..30u64 {
        sink.render(&stamped(SEG_FRAMES, index * 10 * MS)).unwrap();
        assert_eq!(sink.timing().next_sample, Some(SEG_FRAMES * (index + 1)));
        if index > 0 {
            assert_eq!(sink.timing().last_align, Some(0));
        }
        ringbuffer.advance(1);

        let now = clock.now().unwrap();
        assert!(now >= previous_time, "clock went backwards");
        previous_time = now;
    }
}

#[test]
fn small_drift_is_aligned_away() {
    init_logging();
    let (sink, ringbuffer, events) = master_sink();

    sink.render(&stamped(4410, 0)).unwrap();
    ringbuffer.advance(10);

    // 10ms late: 441 samples of drift, absorbed by alignment
    sink.render(&stamped(4410, 110 * MS)).unwrap();

    let timing = sink.timing();
    assert_eq!(timing.last_align, Some(-441));
    assert_eq!(timing.next_sample, Some(8820));
    assert_eq!(sync_problems(&events), 0);
}

#[test]
fn large_drift_resyncs_with_a_warning() {
    init_logging();
    let (sink, ringbuffer, events) = master_sink();

    sink.render(&stamped(4410, 0)).unwrap();
    ringbuffer.advance(60);

    // 600ms past the expected position: too far to align
    sink.render(&stamped(4410, 700 * MS)).unwrap();

    let timing = sink.timing();
    assert_eq!(timing.last_align, Some(0));
    // placed at the clock-implied position for 700ms
    assert_eq!(timing.next_sample, Some(30870 + 4410));

    assert_eq!(sync_problems(&events), 1);
    let drift = events
        .lock()
        .iter()
        .find_map(|event| match event {
            RenderEvent::SyncProblem { drift } => Some(*drift),
            _ => None,
        })
        .unwrap();
    assert!(drift >= Duration::from_millis(590) && drift <= Duration::from_millis(610));
}

#[test]
fn discont_buffer_skips_alignment() {
    let (sink, ringbuffer, events) = master_sink();

    sink.render(&stamped(4410, 0)).unwrap();
    let align_before = sink.timing().last_align;
    ringbuffer.advance(10);

    sink.render(&stamped(4410, 100 * MS).discont()).unwrap();

    let timing = sink.timing();
    // the clock-implied position happens to be contiguous here
    assert_eq!(timing.next_sample, Some(8820));
    // but no alignment was attempted
    assert_eq!(timing.last_align, align_before);
    assert_eq!(sync_problems(&events), 0);
}

#[test]
fn flush_stop_forces_clock_resync() {
    let (sink, ringbuffer, events) = master_sink();

    for timestamp in [0, 100 * MS, 200 * MS] {
        sink.render(&stamped(4410, timestamp)).unwrap();
        ringbuffer.advance(10);
    }
    assert_eq!(sink.timing().next_sample, Some(13230));

    sink.event(PipelineEvent::FlushStop);
    let timing = sink.timing();
    assert_eq!(timing.next_sample, None);
    assert_eq!(timing.avg_skew, None);

    // the next buffer lands at its clock-implied position, unaligned
    sink.render(&stamped(4410, 300 * MS)).unwrap();
    assert_eq!(sink.timing().next_sample, Some(13230 + 4410));
    assert_eq!(sync_problems(&events), 0);
}

#[test]
fn flush_stop_twice_equals_once() {
    let (sink, _ringbuffer, _events) = master_sink();

    sink.render(&stamped(4410, 0)).unwrap();
    sink.event(PipelineEvent::FlushStop);
    let after_one = sink.timing();
    sink.event(PipelineEvent::FlushStop);
    assert_eq!(sink.timing(), after_one);
}

#[test]
fn skew_slaving_corrects_sustained_drift() {
    init_logging();
    let (sink, ringbuffer, events) = build_sink(SlaveMethod::Skew);

    // the pipeline clock starts at 1s and runs 1ms/s slower than the
    // device clock
    let pipeline_clock = TestClock::new(1_000_000_000);
    sink.set_pipeline_clock(Some(pipeline_clock.clone()));
    sink.set_base_time(1_000_000_000);
    sink.set_state(SinkState::Playing).unwrap();

    // calibration was seeded from both clocks at play time
    let clock = sink.provide_clock().unwrap();
    assert_eq!(clock.calibration().external, 1_000_000_000);
    assert_eq!(clock.calibration().internal, 0);

    // 10ms buffers; the pipeline clock gains only 9.99ms per buffer
    for index in 0..600u64 {
        pipeline_clock.set(1_000_000_000 + index * 9_990_000);
        sink.render(&stamped(SEG_FRAMES, index * 10 * MS)).unwrap();
        ringbuffer.advance(1);
    }

    // drift accumulated at 10us per buffer; once the average exceeded
    // half a segment (5ms) the calibration moved by exactly one segment
    let corrections: Vec<i64> = events
        .lock()
        .iter()
        .filter_map(|event| match event {
            RenderEvent::SkewCorrected { correction, .. } => Some(*correction),
            _ => None,
        })
        .collect();
    assert_eq!(corrections, vec![-10_000_000]);
    assert_eq!(clock.calibration().external, 990_000_000);

    // after the correction, buffers place one segment earlier and are
    // pulled back into alignment
    assert_eq!(sink.timing().last_align, Some(-441));
    assert_eq!(sync_problems(&events), 0);
}

#[test]
fn render_without_pipeline_clock_plays_asap() {
    let (sink, _ringbuffer, _events) = build_sink(SlaveMethod::Skew);
    sink.set_state(SinkState::Playing).unwrap();

    // timestamps are wild, but with no clock they only matter for
    // clipping
    sink.render(&stamped(SEG_FRAMES, 10_000 * MS)).unwrap();
    assert_eq!(sink.timing().next_sample, Some(SEG_FRAMES));

    sink.render(&stamped(SEG_FRAMES, 90_000 * MS)).unwrap();
    assert_eq!(sink.timing().next_sample, Some(2 * SEG_FRAMES));
}

#[test]
fn flush_interrupts_blocked_render() {
    init_logging();
    let (sink, _ringbuffer, _events) = master_sink();

    // more than the whole ring: the commit must block
    let oversized = SampleBuffer::with_timestamp(frames(21 * SEG_FRAMES), 0);
    let renderer = {
        let sink = sink.clone();
        std::thread::spawn(move || sink.render(&oversized))
    };

    std::thread::sleep(Duration::from_millis(30));
    sink.event(PipelineEvent::FlushStart);
    assert!(matches!(
        renderer.join().unwrap(),
        Err(RenderError::Stopping)
    ));
}

#[test]
fn interrupted_commit_resumes_but_breaks_alignment() {
    let (sink, ringbuffer, _events) = master_sink();

    // spans the ring plus one segment, so the commit parks on the ring
    // being full
    let oversized = SampleBuffer::with_timestamp(frames(21 * SEG_FRAMES), 0);
    let renderer = {
        let sink = sink.clone();
        std::thread::spawn(move || sink.render(&oversized))
    };
    std::thread::sleep(Duration::from_millis(30));

    // a flush on the device alone (not the sink) forces a short write,
    // then the commit resumes and completes
    ringbuffer.set_flushing(true);
    std::thread::sleep(Duration::from_millis(10));
    ringbuffer.set_flushing(false);
    ringbuffer.advance(5);

    assert!(renderer.join().unwrap().is_ok());
    // the next buffer cannot assume contiguity after an interruption
    assert_eq!(sink.timing().next_sample, None);
}

#[test]
fn eos_drains_queued_audio() {
    let (sink, ringbuffer, _events) = master_sink();

    sink.render(&stamped(4410, 0)).unwrap();
    assert_eq!(sink.timing().next_sample, Some(4410));

    // the device plays past the last queued sample
    ringbuffer.advance(11);

    sink.event(PipelineEvent::Eos);
    assert_eq!(sink.timing().next_sample, None);
}

/// Pull source producing a fixed amount of data, recording every request.
struct FixedSource {
    limit: u64,
    pulls: Mutex<Vec<(u64, usize)>>,
}

impl FixedSource {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            pulls: Mutex::new(Vec::new()),
        }
    }
}

impl PullSource for FixedSource {
    fn pull(&self, offset: u64, len: usize) -> Result<Vec<u8>, PullError> {
        self.pulls.lock().push((offset, len));
        if offset >= self.limit {
            return Err(PullError::Eos);
        }
        let available = (self.limit - offset).min(len as u64) as usize;
        Ok(vec![0x5A; available])
    }
}

#[test]
fn pull_mode_fills_segments_on_demand() {
    init_logging();
    let ringbuffer = Arc::new(MockRingBuffer::new());
    let handle = ringbuffer.clone();
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();

    // exactly two segments of data
    let source = Arc::new(FixedSource::new(2 * SEG_FRAMES * BPS as u64));
    let sink = AudioSink::builder()
        .ring_buffer(move || handle.clone())
        .pull_source(SharedSource(source.clone()))
        .on_event(move |event| seen.lock().push(event))
        .build()
        .unwrap();

    sink.set_state(SinkState::Paused).unwrap();
    sink.configure(&AudioFormat::default()).unwrap();
    sink.set_state(SinkState::Playing).unwrap();

    assert!(sink.activate_pull(true));

    // each consumed segment pulls the next one; the third request runs
    // past the end of the source
    ringbuffer.advance(3);

    let pulls = source.pulls.lock().clone();
    assert_eq!(
        pulls,
        vec![
            (0, SEG_FRAMES as usize * BPS),
            (SEG_FRAMES * BPS as u64, SEG_FRAMES as usize * BPS),
            (2 * SEG_FRAMES * BPS as u64, SEG_FRAMES as usize * BPS),
        ]
    );

    let eos_events = events
        .lock()
        .iter()
        .filter(|event| matches!(event, RenderEvent::EndOfStream))
        .count();
    assert_eq!(eos_events, 1);

    // end of stream is latched: further segments stay silent, the source
    // is not asked again
    ringbuffer.advance(2);
    assert_eq!(source.pulls.lock().len(), 3);
}

/// Adapter sharing one [`FixedSource`] between the test and the sink.
struct SharedSource(Arc<FixedSource>);

impl PullSource for SharedSource {
    fn pull(&self, offset: u64, len: usize) -> Result<Vec<u8>, PullError> {
        self.0.pull(offset, len)
    }
}

#[test]
fn reverse_segment_renders_from_the_stop_side() {
    let (sink, _ringbuffer, _events) = master_sink();
    sink.event(PipelineEvent::NewSegment(StreamSegment {
        start: 0,
        stop: Some(1_000 * MS),
        rate: -1.0,
    }));

    // the buffer's stop maps to the earliest running time
    sink.render(&stamped(4410, 900 * MS)).unwrap();
    let next = sink.timing().next_sample.unwrap();
    // running time of the buffer stop (1s - 1s = 0) plus the slot count
    assert_eq!(next, 4410);
}

#[test]
fn latency_reports_device_buffering() {
    let (sink, _ringbuffer, _events) = master_sink();

    let report = sink
        .latency(&render_audio::UpstreamLatency {
            live: true,
            upstream_live: true,
            min: 0,
            max: None,
        })
        .unwrap();
    assert!(report.live);
    // 20 segments of 10ms of device buffering
    assert_eq!(report.min, 200 * MS);
}

#[test]
fn rate_check() {
    // the scenarios above hard-code positions derived from these numbers
    let format = AudioFormat::default().fixate();
    assert_eq!(format.rate, RATE);
    assert_eq!(format.bytes_per_sample() as usize, BPS);
}
