//! Status reporter abstraction for decoupling orchestration from presentation.
//!
//! Services depend on the [`StatusReporter`] trait rather than a concrete chat
//! surface, enabling testing and alternative front ends.

use super::PlaybackEvent;

/// Receives orchestrator status transitions for display.
///
/// Implementations must not block: the orchestrator calls `report` inline
/// from its processing tasks.
///
/// # Example
///
/// ```ignore
/// struct ChannelReporter { http: Arc<ChatClient> }
///
/// impl StatusReporter for ChannelReporter {
///     fn report(&self, event: PlaybackEvent) {
///         let http = self.http.clone();
///         tokio::spawn(async move { http.post_status(event).await });
///     }
/// }
/// ```
pub trait StatusReporter: Send + Sync {
    /// Delivers one status event.
    fn report(&self, event: PlaybackEvent);
}

/// No-op reporter for headless use or testing.
pub struct NoopStatusReporter;

impl StatusReporter for NoopStatusReporter {
    fn report(&self, _event: PlaybackEvent) {
        // No-op
    }
}

/// Logging reporter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingStatusReporter;

impl StatusReporter for LoggingStatusReporter {
    fn report(&self, event: PlaybackEvent) {
        tracing::debug!(group_id = event.group_id(), ?event, "playback_event");
    }
}
