//! # render-audio
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Timestamped PCM rendering with clock slaving.
//!
//! `render-audio` is the scheduling core of an audio playback sink: it
//! accepts timestamped sample buffers from an upstream producer and
//! commits them to a device ring buffer at exactly the sample position
//! their timestamps demand, while keeping the device clock in step with a
//! pipeline-wide reference clock.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use render_audio::{AudioSink, AudioFormat, SampleBuffer, SinkState};
//! use std::sync::Arc;
//!
//! let sink = AudioSink::builder()
//!     .ring_buffer(|| Arc::new(AlsaRingBuffer::new("default")))
//!     .on_event(|e| tracing::warn!(?e, "render event"))
//!     .build()?;
//!
//! sink.set_state(SinkState::Paused)?;
//! sink.configure(&AudioFormat::default())?;
//! sink.set_state(SinkState::Playing)?;
//!
//! // streaming thread: hand over timestamped PCM
//! sink.render(&SampleBuffer::with_timestamp(pcm, 0))?;
//! ```
//!
//! ## Architecture
//!
//! The crate keeps a strict thread boundary:
//!
//! - **Streaming thread**: drives [`AudioSink::render`] and pipeline
//!   events; owns the alignment and drift state
//! - **Ring buffer**: a bounded segment queue owned by the device
//!   implementation behind the [`RingBuffer`] trait
//! - **Device thread**: consumes segments inside the ring buffer and
//!   advances the position the provided clock reports
//!
//! Buffers are aligned sample-exactly against the end of the previous
//! buffer, small timestamp drift is absorbed, and sustained drift against
//! a foreign pipeline clock is corrected by one of three slaving
//! strategies ([`SlaveMethod`]).

#![warn(missing_docs)]
// Audio scheduling requires intentional numeric casts between time and
// sample domains
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod buffer;
mod builder;
mod clock;
mod config;
mod error;
mod event;
mod format;
pub mod ringbuffer;
mod segment;
mod sink;
mod time;

pub use buffer::SampleBuffer;
pub use builder::AudioSinkBuilder;
pub use clock::{AudioClock, Calibration, ReferenceClock};
pub use config::{SinkConfig, SlaveMethod};
pub use error::{PullError, RenderError};
pub use event::{event_callback, EventCallback, RenderEvent};
pub use format::{AudioFormat, Endianness, FixedFormat};
pub use ringbuffer::{FillCallback, MockRingBuffer, RingBuffer, SinkSpec};
pub use segment::StreamSegment;
pub use sink::{
    AudioSink, LatencyReport, PipelineEvent, PullSource, SinkState, TimingSnapshot,
    UpstreamLatency,
};
pub use time::{ClockTime, NANOS_PER_SEC};
