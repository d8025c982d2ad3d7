//! Voice transport abstractions.
//!
//! These traits enable dependency injection for testability and modularity.
//! The orchestrator depends on [`VoiceTransport`] and [`AudioSink`] rather than
//! a concrete voice library. Idempotent connects, destination switching and
//! readiness timeouts are layered on top by [`ConnectionManager`], so a
//! transport implementation only has to open, await, attach and close.

mod connection;

pub use connection::ConnectionManager;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::media::AudioInput;

/// Errors from the voice transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("connection not ready after {0:?}")]
    ReadyTimeout(Duration),
    #[error("not connected")]
    NotConnected,
    #[error("no voice destination set; join first")]
    NoDestination,
    #[error("audio sink error: {0}")]
    Sink(String),
}

/// Convenient Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Identifies one open voice connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHandle {
    /// Transport-assigned connection id.
    pub id: u64,
    /// Group the connection belongs to.
    pub group_id: String,
    /// Voice destination (channel) the connection is attached to.
    pub destination: String,
}

/// A participant present in a voice destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    /// Bots (including ourselves) do not keep a session alive.
    pub is_bot: bool,
}

/// How a track stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEnd {
    /// Reached end of input.
    Finished,
    /// Stopped on request (skip, leave).
    Stopped,
    /// Failed mid-track.
    Errored(String),
}

/// One-shot notification fired when the current track ends.
pub type TrackEndReceiver = oneshot::Receiver<TrackEnd>;

/// Per-session audio player.
///
/// Created once per group by [`VoiceTransport::create_sink`] and attached to
/// whichever connection the group currently has. Plays one track at a time.
pub trait AudioSink: Send + Sync {
    /// Starts playing `input` at `volume` (0.0 - 1.0), replacing any current track.
    ///
    /// The returned receiver fires exactly once when the track ends.
    fn play(&self, input: AudioInput, volume: f32) -> TransportResult<TrackEndReceiver>;

    /// Stops the current track. Returns false if nothing was playing.
    fn stop(&self) -> bool;

    /// Pauses the current track. Returns false if nothing was playing.
    fn pause(&self) -> bool;

    /// Resumes a paused track. Returns false if nothing was paused.
    fn resume(&self) -> bool;

    /// Applies `volume` (0.0 - 1.0) to the current track. Returns false if none.
    fn set_volume(&self, volume: f32) -> bool;
}

/// Raw voice transport operations.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Opens a connection for `group_id` to `destination`.
    async fn connect(&self, group_id: &str, destination: &str) -> TransportResult<ConnectionHandle>;

    /// Resolves once the connection reports readiness.
    ///
    /// May never resolve; callers bound it with a timeout.
    async fn wait_until_ready(&self, handle: &ConnectionHandle) -> TransportResult<()>;

    /// Creates the audio sink for a group's session.
    fn create_sink(&self, group_id: &str) -> Arc<dyn AudioSink>;

    /// Attaches `sink` as the connection's audio output. Must be idempotent.
    fn subscribe(&self, handle: &ConnectionHandle, sink: Arc<dyn AudioSink>) -> TransportResult<()>;

    /// Tears the connection down. Safe to call on an already-closed handle.
    async fn disconnect(&self, handle: &ConnectionHandle);

    /// Lists the participants currently present in `destination`.
    async fn members(&self, destination: &str) -> TransportResult<Vec<Member>>;
}
