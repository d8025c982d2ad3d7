//! Bridge implementation that maps status events to a broadcast channel.
//!
//! The [`BroadcastStatusBridge`] lives at the boundary between the orchestrator
//! and whatever renders its status (chat messages, a console, a dashboard).

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::reporter::StatusReporter;
use super::PlaybackEvent;

/// Bridges status events to a `tokio::sync::broadcast` channel.
///
/// Consumers call [`subscribe`](Self::subscribe) to receive every event. An
/// optional external reporter can be attached after construction, which is
/// useful when the presentation surface is only available once a gateway has
/// connected.
///
/// # Thread Safety
///
/// The bridge is `Send + Sync` and can be shared across async tasks.
#[derive(Clone)]
pub struct BroadcastStatusBridge {
    tx: broadcast::Sender<PlaybackEvent>,
    external_reporter: Arc<RwLock<Option<Arc<dyn StatusReporter>>>>,
}

impl BroadcastStatusBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_reporter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external reporter that receives every event before broadcast.
    pub fn set_external_reporter(&self, reporter: Arc<dyn StatusReporter>) {
        *self.external_reporter.write() = Some(reporter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.tx.subscribe()
    }
}

impl StatusReporter for BroadcastStatusBridge {
    fn report(&self, event: PlaybackEvent) {
        if let Some(ref reporter) = *self.external_reporter.read() {
            reporter.report(event.clone());
        }
        if let Err(e) = self.tx.send(event) {
            log::trace!("[StatusBridge] No broadcast receivers: {}", e);
        }
    }
}
