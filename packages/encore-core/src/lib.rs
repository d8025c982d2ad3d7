//! Encore Core - per-group voice playback orchestration.
//!
//! This crate provides the playback engine behind Encore, a chat bot that
//! plays media into voice channels. Each community group gets its own queue
//! and session; requests are streamed when possible, downloaded as a
//! fallback, retried with backoff and skipped for good once they keep failing.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction
//! - [`events`]: Typed status events and their fan-out
//! - [`state`]: Configuration
//! - [`media`]: Media references and acquisition backends
//! - [`transport`]: Voice transport abstraction and connection lifecycle
//! - [`services`]: Queue store, sessions, orchestrator and idle monitor
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines traits to decouple the engine from concrete integrations:
//!
//! - [`VoiceTransport`](transport::VoiceTransport) and
//!   [`AudioSink`](transport::AudioSink): the voice connection and its player
//! - [`MediaSource`](media::MediaSource): turning references into audio
//! - [`StatusReporter`](events::StatusReporter): presenting status transitions
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks

#![warn(clippy::all)]

pub mod bootstrap;
pub mod constants;
pub mod error;
pub mod events;
pub mod media;
pub mod runtime;
pub mod services;
pub mod state;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export commonly used types at the crate root
pub use error::{ErrorCode, PlaybackError, PlaybackResult};
pub use events::{
    BroadcastStatusBridge, LoggingStatusReporter, NoopStatusReporter, PlaybackEvent,
    StatusReporter,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{Config, DuplicatePolicy, RetryPolicy};
pub use utils::{now_millis, validate_media_ref, MediaRefError};

// Re-export media and transport types
pub use media::{
    AudioInput, ByteStream, DownloadGuard, HttpMediaSource, MediaError, MediaRef, MediaResult,
    MediaSource, YtDlpSource,
};
pub use transport::{
    AudioSink, ConnectionHandle, ConnectionManager, Member, TrackEnd, TrackEndReceiver,
    TransportError, TransportResult, VoiceTransport,
};

// Re-export service types
pub use services::{
    ConnectionStatus, IdleMonitor, MembershipChange, PlaybackOrchestrator, PlaybackQueueStore,
    PlaybackRequest, QueueSnapshot, SessionPhase, SessionState,
};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};
