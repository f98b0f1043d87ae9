//! In-memory ring buffer for testing without hardware.

use parking_lot::{Condvar, Mutex};

use crate::error::RenderError;
use crate::ringbuffer::{FillCallback, RingBuffer, SinkSpec};

/// A [`RingBuffer`] backed by plain memory, with the device simulated by
/// explicit [`advance()`](MockRingBuffer::advance) calls.
///
/// This allows testing the full render path without audio hardware,
/// making it suitable for CI environments. Commits follow the real
/// contract: they block while the target segment does not fit in the ring
/// and return early while flushing. The simulated device never runs on its
/// own; tests decide exactly when segments are consumed, which keeps every
/// timing scenario deterministic.
///
/// # Example
///
/// ```
/// use render_audio::{MockRingBuffer, RingBuffer, SinkSpec, AudioFormat};
/// use std::time::Duration;
///
/// let ringbuffer = MockRingBuffer::new();
/// ringbuffer.open_device().unwrap();
///
/// let spec = SinkSpec::from_format(
///     &AudioFormat::default().fixate(),
///     Duration::from_millis(200),
///     Duration::from_millis(10),
/// );
/// ringbuffer.acquire(spec).unwrap();
///
/// // the device consumes two segments
/// ringbuffer.advance(2);
/// assert_eq!(ringbuffer.samples_done(), 2 * 441);
/// ```
pub struct MockRingBuffer {
    state: Mutex<State>,
    space: Condvar,
    fail_open: bool,
}

struct State {
    spec: Option<SinkSpec>,
    buffer: Vec<u8>,
    opened: bool,
    flushing: bool,
    running: bool,
    may_start: bool,
    segdone: u64,
    segbase: u64,
    delay: u32,
    callback: Option<FillCallback>,
}

impl Default for MockRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRingBuffer {
    /// Creates a closed, unacquired mock ring buffer.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                spec: None,
                buffer: Vec::new(),
                opened: false,
                flushing: false,
                running: false,
                may_start: false,
                segdone: 0,
                segbase: 0,
                delay: 0,
                callback: None,
            }),
            space: Condvar::new(),
            fail_open: false,
        }
    }

    /// Creates a mock whose `open_device` always fails, for testing the
    /// open-failure path.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    /// Simulates the device consuming `segments` segments.
    ///
    /// Unblocks pending commits and, when a pull callback is installed and
    /// the buffer is running, asks it to fill one fresh segment per
    /// consumed one.
    pub fn advance(&self, segments: u64) {
        let mut callbacks = Vec::new();
        {
            let mut state = self.state.lock();
            let Some(spec) = state.spec else { return };
            let segsize = spec.segsize as usize;
            for _ in 0..segments {
                state.segdone += 1;
                if state.running {
                    if let Some(cb) = state.callback.clone() {
                        callbacks.push((cb, segsize));
                    }
                }
            }
        }
        // run fill callbacks outside the lock, like a real device thread
        for (cb, segsize) in callbacks {
            let mut scratch = vec![0u8; segsize];
            cb(&mut scratch);
            let mut state = self.state.lock();
            if let Some(spec) = state.spec {
                let ring = spec.segsize as usize * spec.segtotal as usize;
                let seg = (state.segdone - state.segbase) % u64::from(spec.segtotal);
                let at = seg as usize * spec.segsize as usize;
                if at + segsize <= ring {
                    state.buffer[at..at + segsize].copy_from_slice(&scratch);
                }
            }
        }
        self.space.notify_all();
    }

    /// Sets the simulated device delay in frames.
    pub fn set_delay(&self, delay: u32) {
        self.state.lock().delay = delay;
    }

    /// Returns `true` if the consumer is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Returns a copy of the ring contents.
    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().buffer.clone()
    }
}

impl RingBuffer for MockRingBuffer {
    fn open_device(&self) -> Result<(), RenderError> {
        if self.fail_open {
            return Err(RenderError::OpenFailed {
                reason: "mock device configured to fail".to_string(),
            });
        }
        self.state.lock().opened = true;
        Ok(())
    }

    fn close_device(&self) {
        self.state.lock().opened = false;
    }

    fn acquire(&self, spec: SinkSpec) -> Result<(), RenderError> {
        let mut state = self.state.lock();
        if !state.opened {
            return Err(RenderError::AcquireFailed {
                reason: "device not open".to_string(),
            });
        }
        state.buffer = vec![0u8; spec.segsize as usize * spec.segtotal as usize];
        state.segbase = state.segdone;
        state.spec = Some(spec);
        Ok(())
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.spec = None;
        state.buffer = Vec::new();
        state.running = false;
        drop(state);
        self.space.notify_all();
    }

    fn is_acquired(&self) -> bool {
        self.state.lock().spec.is_some()
    }

    fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.spec.is_none() {
            return false;
        }
        if state.may_start {
            state.running = true;
        }
        true
    }

    fn pause(&self) -> bool {
        self.state.lock().running = false;
        true
    }

    fn may_start(&self, allowed: bool) {
        self.state.lock().may_start = allowed;
    }

    fn set_flushing(&self, flushing: bool) {
        let mut state = self.state.lock();
        state.flushing = flushing;
        if flushing {
            state.running = false;
        }
        drop(state);
        self.space.notify_all();
    }

    fn commit(
        &self,
        sample_offset: &mut u64,
        data: &[u8],
        in_samples: u32,
        out_samples: u32,
        accum: &mut i32,
    ) -> u32 {
        let mut state = self.state.lock();
        let Some(spec) = state.spec else { return 0 };
        if in_samples == 0 || out_samples == 0 {
            return in_samples;
        }

        let bps = spec.bytes_per_sample as usize;
        let sps = u64::from(spec.samples_per_seg());
        let segtotal = u64::from(spec.segtotal);
        let ring_samples = sps * segtotal;
        let mut consumed: u32 = 0;

        for _ in 0..out_samples {
            let seg = *sample_offset / sps;

            // wait until the target segment fits in the ring
            loop {
                if state.flushing {
                    return consumed.min(in_samples);
                }
                let segdone = state.segdone - state.segbase;
                if seg < segdone + segtotal {
                    break;
                }
                self.space.wait(&mut state);
                if state.spec.is_none() {
                    return consumed.min(in_samples);
                }
            }

            let segdone = state.segdone - state.segbase;
            if seg >= segdone {
                // writes behind the device position are dropped as late
                let src = (consumed as usize).min(in_samples as usize - 1) * bps;
                let dst = (*sample_offset % ring_samples) as usize * bps;
                let frame = &data[src..src + bps];
                state.buffer[dst..dst + bps].copy_from_slice(frame);
            }

            *sample_offset += 1;
            // fractional input progress per output slot
            *accum += in_samples as i32;
            while *accum >= out_samples as i32 {
                *accum -= out_samples as i32;
                consumed += 1;
            }
        }

        consumed.min(in_samples)
    }

    fn samples_done(&self) -> u64 {
        let state = self.state.lock();
        match state.spec {
            Some(spec) => (state.segdone - state.segbase) * u64::from(spec.samples_per_seg()),
            None => 0,
        }
    }

    fn delay(&self) -> u32 {
        self.state.lock().delay
    }

    fn segdone(&self) -> u64 {
        self.state.lock().segdone
    }

    fn segbase(&self) -> u64 {
        self.state.lock().segbase
    }

    fn spec(&self) -> Option<SinkSpec> {
        self.state.lock().spec
    }

    fn set_callback(&self, callback: Option<FillCallback>) {
        self.state.lock().callback = callback;
    }
}
