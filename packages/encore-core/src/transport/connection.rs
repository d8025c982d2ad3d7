//! Per-group voice connection lifecycle.
//!
//! [`ConnectionManager`] wraps a raw [`VoiceTransport`] and enforces the
//! connection rules the orchestrator relies on:
//!
//! - connecting to the destination a group is already ready on is a no-op
//! - connecting to a different destination tears the old one down and waits
//!   a settle delay first
//! - readiness is awaited with a timeout; a connection that misses it is torn down
//!
//! Operations for one group are serialized by a per-group async mutex.
//! Groups never contend with each other.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use super::{AudioSink, ConnectionHandle, TransportError, TransportResult, VoiceTransport};

/// Connection state tracked for one group.
#[derive(Debug, Default)]
struct Link {
    handle: Option<ConnectionHandle>,
    /// Set only after `wait_until_ready` succeeded for `handle`.
    ready: bool,
}

/// Enforces idempotent, timeout-bounded connections per group.
pub struct ConnectionManager {
    transport: Arc<dyn VoiceTransport>,
    links: DashMap<String, Arc<AsyncMutex<Link>>>,
    ready_timeout: Duration,
    reconnect_settle: Duration,
}

impl ConnectionManager {
    /// Creates a manager over `transport`.
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        ready_timeout: Duration,
        reconnect_settle: Duration,
    ) -> Self {
        Self {
            transport,
            links: DashMap::new(),
            ready_timeout,
            reconnect_settle,
        }
    }

    /// Returns the underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn VoiceTransport> {
        &self.transport
    }

    fn link(&self, group_id: &str) -> Arc<AsyncMutex<Link>> {
        self.links
            .entry(group_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Ensures `group_id` has a ready connection to `destination` with `sink` attached.
    ///
    /// `on_connecting` runs only when a new connection is actually opened, so an
    /// already-ready group produces no connecting notification.
    pub async fn ensure_ready<F>(
        &self,
        group_id: &str,
        destination: &str,
        sink: &Arc<dyn AudioSink>,
        on_connecting: F,
    ) -> TransportResult<ConnectionHandle>
    where
        F: FnOnce(),
    {
        let link = self.link(group_id);
        let mut link = link.lock().await;

        if let Some(handle) = link.handle.clone() {
            if link.ready && handle.destination == destination {
                self.transport.subscribe(&handle, Arc::clone(sink))?;
                return Ok(handle);
            }

            log::info!(
                "[Connection] {}: tearing down connection to {} before connecting to {}",
                group_id,
                handle.destination,
                destination
            );
            self.transport.disconnect(&handle).await;
            link.handle = None;
            link.ready = false;
            tokio::time::sleep(self.reconnect_settle).await;
        }

        on_connecting();
        let handle = self.transport.connect(group_id, destination).await?;
        // Stored before the readiness wait so a cancelled wait still leaves the
        // handle reachable for teardown.
        link.handle = Some(handle.clone());
        link.ready = false;

        let ready = tokio::time::timeout(
            self.ready_timeout,
            self.transport.wait_until_ready(&handle),
        )
        .await
        .unwrap_or(Err(TransportError::ReadyTimeout(self.ready_timeout)));

        if let Err(e) = ready.and_then(|()| self.transport.subscribe(&handle, Arc::clone(sink))) {
            log::warn!(
                "[Connection] {}: connection to {} failed: {}",
                group_id,
                destination,
                e
            );
            self.transport.disconnect(&handle).await;
            link.handle = None;
            return Err(e);
        }

        link.ready = true;
        log::info!("[Connection] {}: ready on {}", group_id, destination);
        Ok(handle)
    }

    /// Tears down the group's connection. Returns false if there was none.
    pub async fn disconnect(&self, group_id: &str) -> bool {
        let Some(link) = self.links.get(group_id).map(|r| r.value().clone()) else {
            return false;
        };
        let mut link = link.lock().await;
        link.ready = false;
        match link.handle.take() {
            Some(handle) => {
                self.transport.disconnect(&handle).await;
                log::info!("[Connection] {}: disconnected from {}", group_id, handle.destination);
                true
            }
            None => false,
        }
    }

    /// Returns the group's ready connection, if any.
    #[cfg(test)]
    pub(crate) async fn current(&self, group_id: &str) -> Option<ConnectionHandle> {
        let link = self.links.get(group_id).map(|r| r.value().clone())?;
        let link = link.lock().await;
        link.handle.clone().filter(|_| link.ready)
    }

    /// Drops bookkeeping for a group whose session was destroyed.
    pub fn forget(&self, group_id: &str) {
        self.links.remove(group_id);
    }
}
