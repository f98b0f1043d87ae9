//! Error types for render-audio.
//!
//! Errors are split into two categories:
//! - **Flow errors** ([`RenderError`]): returned from the render path and
//!   from lifecycle transitions
//! - **Recoverable conditions**: runtime drift and correction notices
//!   surfaced via [`EventCallback`](crate::EventCallback)

/// Errors returned by the render path and the sink lifecycle.
///
/// [`RenderError::Stopping`] is a normal flow result, not a failure: it
/// means a blocking wait was cancelled by a flush or a state change and the
/// current render call ended early. Everything else aborts the operation
/// that produced it; the sink never retries on its own.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A buffer arrived before a format was negotiated and the ring buffer
    /// acquired.
    #[error("sink not negotiated - no format acquired yet")]
    NotNegotiated,

    /// The buffer payload is not a whole number of frames.
    #[error("buffer of {size} bytes is not a multiple of the {bytes_per_sample}-byte frame size")]
    WrongSize {
        /// Size of the offending buffer in bytes.
        size: usize,
        /// Negotiated frame size in bytes.
        bytes_per_sample: u32,
    },

    /// A blocking wait (commit, preroll, EOS) was cancelled by a flush or a
    /// state change. The current render call ends; no data was lost beyond
    /// what the flush discarded.
    #[error("rendering stopped by flush or state change")]
    Stopping,

    /// The device could not be opened. The ring-buffer implementation is
    /// responsible for a user-visible description.
    #[error("could not open audio device: {reason}")]
    OpenFailed {
        /// Why the device could not be opened.
        reason: String,
    },

    /// The ring buffer rejected the negotiated format.
    #[error("could not acquire ring buffer: {reason}")]
    AcquireFailed {
        /// Why the acquisition failed.
        reason: String,
    },

    /// The sink was built without a ring-buffer factory.
    #[error("no ring buffer configured - provide one with ring_buffer()")]
    NoRingBuffer,
}

/// Errors produced by a [`PullSource`](crate::PullSource) in pull mode.
#[derive(Debug, thiserror::Error)]
pub enum PullError {
    /// The source has no more data. The sink posts end-of-stream once and
    /// drains.
    #[error("end of stream")]
    Eos,

    /// Any other failure; the pull is logged and skipped.
    #[error("{0}")]
    Other(String),
}
