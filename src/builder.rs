//! Builder pattern for [`AudioSink`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::{SinkConfig, SlaveMethod};
use crate::error::RenderError;
use crate::event::{event_callback, EventCallback, RenderEvent};
use crate::ringbuffer::RingBuffer;
use crate::sink::{AudioSink, PullSource};

/// Builder for configuring an [`AudioSink`].
///
/// Use [`AudioSink::builder()`] to create a new builder. The only required
/// piece is the ring-buffer factory: it stands in for the concrete device
/// and is invoked when the sink leaves the `Null` state.
///
/// # Example
///
/// ```
/// use render_audio::{AudioSink, MockRingBuffer, SlaveMethod};
/// use std::sync::Arc;
///
/// let sink = AudioSink::builder()
///     .ring_buffer(|| Arc::new(MockRingBuffer::new()))
///     .slave_method(SlaveMethod::Resample)
///     .build()
///     .unwrap();
/// ```
#[must_use]
pub struct AudioSinkBuilder {
    factory: Option<Box<dyn Fn() -> Arc<dyn RingBuffer> + Send + Sync>>,
    config: SinkConfig,
    event_callback: Option<EventCallback>,
    pull_source: Option<Arc<dyn PullSource>>,
}

impl Default for AudioSinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSinkBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            factory: None,
            config: SinkConfig::default(),
            event_callback: None,
            pull_source: None,
        }
    }

    /// Installs the factory that creates the device ring buffer.
    ///
    /// Called once when the sink first leaves `Null`; the same ring buffer
    /// is then reused across later state cycles.
    pub fn ring_buffer<R, F>(mut self, factory: F) -> Self
    where
        R: RingBuffer + 'static,
        F: Fn() -> Arc<R> + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(move || -> Arc<dyn RingBuffer> { factory() }));
        self
    }

    /// Replaces the whole configuration at once.
    pub fn config(mut self, config: SinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the requested total device buffer duration.
    ///
    /// Default: 200ms
    pub fn buffer_time(mut self, buffer_time: Duration) -> Self {
        self.config.buffer_time = buffer_time;
        self
    }

    /// Sets the requested segment duration.
    ///
    /// Default: 10ms
    pub fn latency_time(mut self, latency_time: Duration) -> Self {
        self.config.latency_time = latency_time;
        self
    }

    /// Controls whether the sink offers its device clock to the pipeline.
    ///
    /// Default: true
    pub fn provide_clock(mut self, provide: bool) -> Self {
        self.config.provide_clock = provide;
        self
    }

    /// Selects the clock slaving strategy.
    ///
    /// Default: [`SlaveMethod::Skew`]
    pub fn slave_method(mut self, method: SlaveMethod) -> Self {
        self.config.slave_method = method;
        self
    }

    /// Enables or disables scheduling against the pipeline clock.
    ///
    /// Default: true
    pub fn sync(mut self, sync: bool) -> Self {
        self.config.sync = sync;
        self
    }

    /// Sets a callback to receive runtime events.
    ///
    /// Events include sync-compensation warnings and skew corrections.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(RenderEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Installs the source the sink pulls from in pull mode.
    pub fn pull_source<S: PullSource + 'static>(mut self, source: S) -> Self {
        self.pull_source = Some(Arc::new(source));
        self
    }

    /// Builds the sink.
    ///
    /// # Errors
    ///
    /// [`RenderError::NoRingBuffer`] when no ring-buffer factory was
    /// installed.
    pub fn build(self) -> Result<Arc<AudioSink>, RenderError> {
        let factory = self.factory.ok_or(RenderError::NoRingBuffer)?;
        Ok(AudioSink::new(
            self.config,
            factory,
            self.event_callback,
            self.pull_source,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ringbuffer::MockRingBuffer;

    #[test]
    fn test_build_requires_ring_buffer() {
        let result = AudioSinkBuilder::new().build();
        assert!(matches!(result, Err(RenderError::NoRingBuffer)));
    }

    #[test]
    fn test_build_with_defaults() {
        let sink = AudioSinkBuilder::new()
            .ring_buffer(|| Arc::new(MockRingBuffer::new()))
            .build()
            .unwrap();
        assert_eq!(sink.config().buffer_time, Duration::from_millis(200));
        assert_eq!(sink.config().slave_method, SlaveMethod::Skew);
    }

    #[test]
    fn test_builder_overrides() {
        let sink = AudioSinkBuilder::new()
            .ring_buffer(|| Arc::new(MockRingBuffer::new()))
            .buffer_time(Duration::from_millis(500))
            .latency_time(Duration::from_millis(20))
            .provide_clock(false)
            .slave_method(SlaveMethod::None)
            .sync(false)
            .build()
            .unwrap();

        let config = sink.config();
        assert_eq!(config.buffer_time, Duration::from_millis(500));
        assert_eq!(config.latency_time, Duration::from_millis(20));
        assert!(!config.provide_clock);
        assert_eq!(config.slave_method, SlaveMethod::None);
        assert!(!config.sync);
    }
}
