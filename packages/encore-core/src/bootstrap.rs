//! Service bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. The embedding application
//! supplies the collaborators (voice transport, media source); everything
//! else is built here.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{PlaybackError, PlaybackResult};
use crate::events::{BroadcastStatusBridge, StatusReporter};
use crate::media::MediaSource;
use crate::runtime::TokioSpawner;
use crate::services::{IdleMonitor, PlaybackOrchestrator, PlaybackQueueStore};
use crate::state::Config;
use crate::transport::VoiceTransport;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Per-group playback queues.
    pub queue: Arc<PlaybackQueueStore>,
    /// Drives playback for every group.
    pub orchestrator: Arc<PlaybackOrchestrator>,
    /// Leaves destinations nobody is listening in.
    pub idle_monitor: Arc<IdleMonitor>,
    /// Status event fan-out. Subscribe to render events.
    pub event_bridge: Arc<BroadcastStatusBridge>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Stop pending idle checks before sessions start leaving
        self.cancel_token.cancel();
        self.idle_monitor.shutdown();

        self.orchestrator.shutdown().await;

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps all services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Shared infrastructure (spawner, event bridge, cancellation token)
/// 2. Queue store
/// 3. Orchestrator (depends on queue, transport, media source, event bridge)
/// 4. Idle monitor (depends on orchestrator, event bridge)
///
/// # Errors
///
/// Returns [`PlaybackError::Configuration`] if `config` fails validation.
///
/// # Panics
///
/// Panics if called outside of a Tokio runtime context.
pub fn bootstrap_services(
    config: &Config,
    transport: Arc<dyn VoiceTransport>,
    media: Arc<dyn MediaSource>,
) -> PlaybackResult<BootstrappedServices> {
    config.validate().map_err(PlaybackError::Configuration)?;

    let spawner = TokioSpawner::current();
    let event_bridge = Arc::new(BroadcastStatusBridge::new(config.event_channel_capacity));
    let cancel_token = CancellationToken::new();

    let queue = Arc::new(PlaybackQueueStore::new(
        config.history_capacity,
        config.duplicate_policy,
    ));

    let orchestrator = Arc::new(PlaybackOrchestrator::new(
        config.clone(),
        Arc::clone(&queue),
        transport,
        media,
        Arc::clone(&event_bridge) as Arc<dyn StatusReporter>,
        spawner.clone(),
    ));

    let idle_monitor = Arc::new(IdleMonitor::new(
        Arc::clone(&orchestrator),
        Arc::clone(&event_bridge) as Arc<dyn StatusReporter>,
        spawner.clone(),
        config.idle_debounce(),
        cancel_token.child_token(),
    ));

    log::info!(
        "[Bootstrap] Services ready (max_retries={}, history={}, duplicates={:?})",
        config.retry.max_retries,
        config.history_capacity,
        config.duplicate_policy
    );

    Ok(BootstrappedServices {
        queue,
        orchestrator,
        idle_monitor,
        event_bridge,
        spawner,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{FakeTransport, ScriptedMediaSource};

    fn collaborators() -> (Arc<dyn VoiceTransport>, Arc<dyn MediaSource>) {
        (FakeTransport::new(), ScriptedMediaSource::new())
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = Config::default();
        config.history_capacity = 0;
        let (transport, media) = collaborators();

        let err = bootstrap_services(&config, transport, media).err().unwrap();
        assert!(matches!(err, PlaybackError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn wires_orchestrator_events_into_bridge() {
        let (transport, media) = collaborators();
        let services = bootstrap_services(&Config::default(), transport, media).unwrap();
        let mut events = services.event_bridge.subscribe();

        services
            .orchestrator
            .enqueue("g1", "https://media.test/v1")
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.group_id(), "g1");
        assert_eq!(services.queue.len("g1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_token() {
        let (transport, media) = collaborators();
        let services = bootstrap_services(&Config::default(), transport, media).unwrap();

        services.shutdown().await;

        assert!(services.cancel_token.is_cancelled());
    }
}
