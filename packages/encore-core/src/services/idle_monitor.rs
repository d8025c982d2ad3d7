//! Auto-disconnect when a voice destination has no listeners left.
//!
//! The monitor is fed membership-change notifications by the embedding
//! application. Each notification (re)arms a debounced check for its group;
//! only the latest one per group actually inspects membership. If nobody but
//! bots remains, the group leaves without clearing its queue.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::events::{PlaybackEvent, StatusReporter};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::services::orchestrator::PlaybackOrchestrator;
use crate::utils::now_millis;

/// A participant joined or left a voice destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub group_id: String,
    pub destination: String,
    pub member_id: String,
    /// The change was caused by this bot itself (its own join/leave).
    pub is_self: bool,
}

/// Leaves voice destinations that only bots occupy.
pub struct IdleMonitor {
    orchestrator: Arc<PlaybackOrchestrator>,
    reporter: Arc<dyn StatusReporter>,
    spawner: TokioSpawner,
    debounce: Duration,
    /// Latest notification generation per group; stale checks bail out.
    generations: DashMap<String, u64>,
    cancel_token: CancellationToken,
}

impl IdleMonitor {
    pub fn new(
        orchestrator: Arc<PlaybackOrchestrator>,
        reporter: Arc<dyn StatusReporter>,
        spawner: TokioSpawner,
        debounce: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            reporter,
            spawner,
            debounce,
            generations: DashMap::new(),
            cancel_token,
        }
    }

    /// Handles one membership notification.
    ///
    /// Self-originated changes are ignored so the bot's own join or leave never
    /// triggers a check.
    pub fn on_membership_change(self: &Arc<Self>, change: MembershipChange) {
        if change.is_self {
            log::debug!(
                "[IdleMonitor] {}: ignoring own membership change",
                change.group_id
            );
            return;
        }

        let generation = {
            let mut entry = self.generations.entry(change.group_id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        let this = Arc::clone(self);
        self.spawner.spawn(async move {
            tokio::select! {
                () = this.cancel_token.cancelled() => return,
                () = tokio::time::sleep(this.debounce) => {}
            }
            let latest = this.generations.get(&change.group_id).map(|g| *g);
            if latest != Some(generation) {
                return;
            }
            this.check(&change.group_id, &change.destination).await;
        });
    }

    /// Leaves `group_id` if it is connected to `destination` and no non-bot
    /// participant remains there. Returns whether it left.
    pub async fn check(&self, group_id: &str, destination: &str) -> bool {
        if self.orchestrator.connected_destination(group_id).as_deref() != Some(destination) {
            return false;
        }

        let members = match self.orchestrator.transport().members(destination).await {
            Ok(members) => members,
            Err(e) => {
                log::warn!(
                    "[IdleMonitor] {}: cannot list members of {}: {}",
                    group_id,
                    destination,
                    e
                );
                return false;
            }
        };
        if members.iter().any(|m| !m.is_bot) {
            return false;
        }

        log::info!(
            "[IdleMonitor] {}: no listeners left in {}, leaving",
            group_id,
            destination
        );
        if !self.orchestrator.leave(group_id, false).await {
            return false;
        }
        self.reporter.report(PlaybackEvent::AutoLeft {
            group_id: group_id.to_string(),
            destination: destination.to_string(),
            timestamp: now_millis(),
        });
        true
    }

    /// Abandons all pending checks.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
