//! Status event system.
//!
//! This module provides:
//! - [`PlaybackEvent`], the typed status transitions the orchestrator emits
//! - [`StatusReporter`] trait for services to emit them without knowing the consumer
//! - [`BroadcastStatusBridge`] for fan-out to any number of subscribers

mod bridge;
mod reporter;

pub use bridge::BroadcastStatusBridge;
pub use reporter::{LoggingStatusReporter, NoopStatusReporter, StatusReporter};

use serde::Serialize;

use crate::media::MediaRef;

/// Status transitions emitted by the playback orchestrator and idle monitor.
///
/// Every variant carries the group it belongs to and a Unix timestamp in
/// milliseconds. Events for different groups never interleave within one
/// group's ordering guarantees.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// A request was accepted into the queue.
    QueuedAt {
        #[serde(rename = "groupId")]
        group_id: String,
        media: MediaRef,
        /// 1-based queue position.
        position: usize,
        timestamp: u64,
    },
    /// A voice connection is being opened.
    Connecting {
        #[serde(rename = "groupId")]
        group_id: String,
        destination: String,
        timestamp: u64,
    },
    /// The voice connection could not become ready. Processing stopped.
    ConnectionFailed {
        #[serde(rename = "groupId")]
        group_id: String,
        error: String,
        timestamp: u64,
    },
    /// Trying the streaming strategy.
    Streaming {
        #[serde(rename = "groupId")]
        group_id: String,
        media: MediaRef,
        timestamp: u64,
    },
    /// Streaming failed; trying download-then-play.
    Downloading {
        #[serde(rename = "groupId")]
        group_id: String,
        media: MediaRef,
        timestamp: u64,
    },
    /// Audio is being delivered to the transport.
    Playing {
        #[serde(rename = "groupId")]
        group_id: String,
        media: MediaRef,
        timestamp: u64,
    },
    /// The current track ended (naturally or by skip).
    Completed {
        #[serde(rename = "groupId")]
        group_id: String,
        media: MediaRef,
        timestamp: u64,
    },
    /// A request was skipped before playback started.
    Skipped {
        #[serde(rename = "groupId")]
        group_id: String,
        media: MediaRef,
        timestamp: u64,
    },
    /// A failed attempt will be retried after `delay_ms`.
    RetryScheduled {
        #[serde(rename = "groupId")]
        group_id: String,
        media: MediaRef,
        /// 1-based retry number.
        attempt: u32,
        #[serde(rename = "delayMs")]
        delay_ms: u64,
        error: String,
        timestamp: u64,
    },
    /// Retries exhausted; the request was dropped and will be skipped from now on.
    PermanentFailure {
        #[serde(rename = "groupId")]
        group_id: String,
        media: MediaRef,
        error: String,
        timestamp: u64,
    },
    /// Nothing left to play.
    QueueEmpty {
        #[serde(rename = "groupId")]
        group_id: String,
        timestamp: u64,
    },
    /// Playback paused.
    Paused {
        #[serde(rename = "groupId")]
        group_id: String,
        timestamp: u64,
    },
    /// Playback resumed.
    Resumed {
        #[serde(rename = "groupId")]
        group_id: String,
        timestamp: u64,
    },
    /// The session left its voice destination.
    Left {
        #[serde(rename = "groupId")]
        group_id: String,
        #[serde(rename = "queueCleared")]
        queue_cleared: bool,
        timestamp: u64,
    },
    /// The idle monitor left because only bots remained. The queue is preserved.
    AutoLeft {
        #[serde(rename = "groupId")]
        group_id: String,
        destination: String,
        timestamp: u64,
    },
}

impl PlaybackEvent {
    /// Returns the group this event belongs to.
    #[must_use]
    pub fn group_id(&self) -> &str {
        match self {
            Self::QueuedAt { group_id, .. }
            | Self::Connecting { group_id, .. }
            | Self::ConnectionFailed { group_id, .. }
            | Self::Streaming { group_id, .. }
            | Self::Downloading { group_id, .. }
            | Self::Playing { group_id, .. }
            | Self::Completed { group_id, .. }
            | Self::Skipped { group_id, .. }
            | Self::RetryScheduled { group_id, .. }
            | Self::PermanentFailure { group_id, .. }
            | Self::QueueEmpty { group_id, .. }
            | Self::Paused { group_id, .. }
            | Self::Resumed { group_id, .. }
            | Self::Left { group_id, .. }
            | Self::AutoLeft { group_id, .. } => group_id,
        }
    }

    /// Returns the media reference the event is about, if any.
    #[must_use]
    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            Self::QueuedAt { media, .. }
            | Self::Streaming { media, .. }
            | Self::Downloading { media, .. }
            | Self::Playing { media, .. }
            | Self::Completed { media, .. }
            | Self::Skipped { media, .. }
            | Self::RetryScheduled { media, .. }
            | Self::PermanentFailure { media, .. } => Some(media),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag_and_camel_case_fields() {
        let event = PlaybackEvent::RetryScheduled {
            group_id: "g1".into(),
            media: MediaRef::parse("https://media.test/v1", &[]).unwrap(),
            attempt: 2,
            delay_ms: 4000,
            error: "boom".into(),
            timestamp: 7,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "retryScheduled");
        assert_eq!(json["groupId"], "g1");
        assert_eq!(json["delayMs"], 4000);
        assert_eq!(json["media"], "https://media.test/v1");
    }

    #[test]
    fn accessors_expose_group_and_media() {
        let event = PlaybackEvent::QueueEmpty {
            group_id: "g2".into(),
            timestamp: 0,
        };
        assert_eq!(event.group_id(), "g2");
        assert!(event.media().is_none());
    }
}
