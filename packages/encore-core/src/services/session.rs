//! Per-group playback session state.
//!
//! A [`GroupSession`] is the single authority over one group's playback: its
//! destination, connection status, current request, retry counter and the set
//! of permanently failed media. Sessions live in a [`SessionRegistry`] keyed
//! by group id, so groups are fully isolated from each other.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::media::MediaRef;
use crate::services::queue_store::PlaybackRequest;
use crate::transport::AudioSink;

/// Voice connection status as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Ready,
    /// The last connect attempt failed or timed out.
    Failed,
}

/// Processing phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    /// Acquiring media for the head request (stream setup, download, backoff).
    Preparing,
    Playing,
    Paused,
}

/// Mutable state of one group's session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Voice destination to play into. Set by join, cleared by leave.
    pub destination: Option<String>,
    pub connection_status: ConnectionStatus,
    pub phase: SessionPhase,
    /// The request whose audio is currently on the sink.
    pub current: Option<PlaybackRequest>,
    /// True only while audio is actively delivered to the transport.
    pub is_playing: bool,
    /// Failed attempts for the head request since it last started playing.
    pub retry_count: u32,
    /// Media that exhausted their retries; skipped when they reach the head.
    pub failed_ids: BTreeSet<MediaRef>,
    /// Session volume (0.0 - 1.0).
    pub volume: f32,
}

impl SessionState {
    fn new(volume: f32) -> Self {
        Self {
            destination: None,
            connection_status: ConnectionStatus::Disconnected,
            phase: SessionPhase::Idle,
            current: None,
            is_playing: false,
            retry_count: 0,
            failed_ids: BTreeSet::new(),
            volume,
        }
    }

    /// Returns to idle after playback stopped for any reason.
    pub(crate) fn clear_playback(&mut self) {
        self.phase = SessionPhase::Idle;
        self.current = None;
        self.is_playing = false;
    }
}

struct SessionInner {
    state: SessionState,
    /// Cancelled when the session leaves; replaced with a fresh token.
    token: CancellationToken,
    /// Cancelled to abandon the request being prepared.
    item: Option<CancellationToken>,
}

/// One group's playback session.
pub struct GroupSession {
    group_id: String,
    inner: Mutex<SessionInner>,
    sink: Arc<dyn AudioSink>,
    /// True while a processing task owns the session.
    running: watch::Sender<bool>,
    /// Set when a trigger arrived while processing was already running.
    retrigger: AtomicBool,
}

impl GroupSession {
    pub fn new(group_id: &str, sink: Arc<dyn AudioSink>, volume: f32) -> Self {
        Self {
            group_id: group_id.to_string(),
            inner: Mutex::new(SessionInner {
                state: SessionState::new(volume),
                token: CancellationToken::new(),
                item: None,
            }),
            sink,
            running: watch::channel(false).0,
            retrigger: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    #[must_use]
    pub fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.sink
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    /// Mutates the state unconditionally.
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.inner.lock().state)
    }

    /// Mutates the state only if `token` has not been cancelled.
    ///
    /// The check and the mutation happen under the same lock that
    /// [`reset`](Self::reset) cancels under, so a processing task that lost a
    /// race with leave can never write into the reset state.
    pub fn update_if_current<R>(
        &self,
        token: &CancellationToken,
        f: impl FnOnce(&mut SessionState) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        if token.is_cancelled() {
            return None;
        }
        Some(f(&mut inner.state))
    }

    /// Whether `media` exhausted its retries in this session.
    #[must_use]
    pub fn has_failed(&self, media: &MediaRef) -> bool {
        self.inner.lock().state.failed_ids.contains(media)
    }

    /// The token the current processing generation runs under.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.inner.lock().token.clone()
    }

    /// Cancels the processing generation and resets playback state.
    ///
    /// The destination is cleared; queue-related state (`failed_ids`) is kept
    /// unless `clear_failed` is set.
    pub fn reset(&self, clear_failed: bool) {
        let mut inner = self.inner.lock();
        inner.token.cancel();
        inner.token = CancellationToken::new();
        inner.item = None;

        let state = &mut inner.state;
        state.clear_playback();
        state.destination = None;
        state.connection_status = ConnectionStatus::Disconnected;
        state.retry_count = 0;
        if clear_failed {
            state.failed_ids.clear();
        }
        self.retrigger.store(false, Ordering::SeqCst);
    }

    /// Installs the token guarding the request being prepared.
    ///
    /// The retry counter starts over for each new request and is kept across
    /// that request's restarts.
    pub(crate) fn begin_item(&self, token: &CancellationToken, item: CancellationToken) -> bool {
        let mut inner = self.inner.lock();
        if token.is_cancelled() {
            return false;
        }
        inner.item = Some(item);
        inner.state.retry_count = 0;
        true
    }

    pub(crate) fn end_item(&self) {
        self.inner.lock().item = None;
    }

    /// Abandons the request being prepared. Returns false unless the session
    /// is currently preparing one.
    pub(crate) fn abandon_item(&self) -> bool {
        let inner = self.inner.lock();
        match (&inner.item, inner.state.phase) {
            (Some(item), SessionPhase::Preparing) => {
                item.cancel();
                true
            }
            _ => false,
        }
    }

    /// Claims the processing slot. Returns false if a task already holds it.
    pub(crate) fn try_claim(&self) -> bool {
        self.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        })
    }

    /// Releases the processing slot. Returns whether a trigger was missed meanwhile.
    pub(crate) fn release(&self) -> bool {
        self.running.send_modify(|running| *running = false);
        self.retrigger.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn mark_retrigger(&self) {
        self.retrigger.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_retrigger(&self) {
        self.retrigger.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn is_processing(&self) -> bool {
        *self.running.borrow()
    }

    /// Resolves once no processing task holds the session.
    pub async fn wait_idle(&self) {
        let mut rx = self.running.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|running| !*running).await;
    }
}

/// Registry of live sessions keyed by group id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<GroupSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, group_id: &str) -> Option<Arc<GroupSession>> {
        self.sessions.get(group_id).map(|s| Arc::clone(s.value()))
    }

    /// Returns the group's session, creating it with `make` on first use.
    pub fn get_or_create(
        &self,
        group_id: &str,
        make: impl FnOnce() -> GroupSession,
    ) -> Arc<GroupSession> {
        if let Some(session) = self.get(group_id) {
            return session;
        }
        Arc::clone(
            self.sessions
                .entry(group_id.to_string())
                .or_insert_with(|| Arc::new(make()))
                .value(),
        )
    }

    pub fn remove(&self, group_id: &str) -> Option<Arc<GroupSession>> {
        self.sessions.remove(group_id).map(|(_, s)| s)
    }

    #[must_use]
    pub fn group_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }
}
