//! Application services layer.
//!
//! This module contains the playback business logic that sits between the
//! embedding application (chat commands, console) and the collaborators
//! (voice transport, media sources).

pub mod idle_monitor;
pub mod orchestrator;
pub mod queue_store;
pub mod session;

pub use idle_monitor::{IdleMonitor, MembershipChange};
pub use orchestrator::{PlaybackOrchestrator, QueueSnapshot};
pub use queue_store::{PlaybackQueueStore, PlaybackRequest};
pub use session::{ConnectionStatus, GroupSession, SessionPhase, SessionRegistry, SessionState};
