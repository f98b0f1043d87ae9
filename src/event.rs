//! Runtime events for monitoring rendering health.
//!
//! Events are non-fatal notifications about scheduling behavior. Rendering
//! continues after an event is emitted - they exist for logging and
//! metrics, not error handling.

use std::sync::Arc;
use std::time::Duration;

/// Runtime events emitted while rendering.
///
/// These are informational, not errors. Register an [`EventCallback`] via
/// the builder to log them or feed metrics.
///
/// # Example
///
/// ```
/// use render_audio::RenderEvent;
///
/// fn handle_event(event: RenderEvent) {
///     match event {
///         RenderEvent::SyncProblem { drift } => {
///             eprintln!("compensating for {}ms of timestamp drift", drift.as_millis());
///         }
///         RenderEvent::SkewCorrected { avg_skew, correction } => {
///             eprintln!("clock skew {avg_skew}ns corrected by {correction}ns");
///         }
///         RenderEvent::EndOfStream => {
///             eprintln!("pull source exhausted");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum RenderEvent {
    /// A buffer's timestamp drifted more than half a second from where the
    /// previous buffer ended.
    ///
    /// The sink gives up aligning and places the buffer at its
    /// clock-implied position instead. Frequent occurrences point at an
    /// upstream producer with broken timestamps.
    SyncProblem {
        /// Distance between the expected and the actual position.
        drift: Duration,
    },

    /// The skew slaving method shifted the playout position because the
    /// averaged drift against the pipeline clock exceeded half a segment.
    ///
    /// Occasional corrections are normal when slaved to a foreign clock;
    /// a steady stream of them means the segment duration is too short for
    /// the actual clock drift.
    SkewCorrected {
        /// Averaged drift in nanoseconds at the moment of correction.
        /// Positive means the pipeline clock runs slow relative to the
        /// device, negative means fast.
        avg_skew: i64,
        /// Signed correction applied to the calibration, in nanoseconds.
        correction: i64,
    },

    /// The pull-mode source reported end of stream.
    ///
    /// Emitted once per stream; subsequent pull cycles leave silence.
    EndOfStream,
}

/// Callback type for receiving runtime events.
///
/// Register an event callback via
/// [`AudioSinkBuilder::on_event()`](crate::AudioSinkBuilder::on_event) to
/// receive drift and correction notifications.
///
/// # Example
///
/// ```ignore
/// let sink = AudioSink::builder()
///     .ring_buffer(|| my_ring_buffer())
///     .on_event(|event| tracing::warn!(?event, "render event"))
///     .build()?;
/// ```
pub type EventCallback = Arc<dyn Fn(RenderEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// This is a convenience function for creating event callbacks without
/// manually wrapping in `Arc`.
///
/// # Example
///
/// ```
/// use render_audio::{event_callback, RenderEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(RenderEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
