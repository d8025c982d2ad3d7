//! Per-group playback orchestration.
//!
//! Responsibilities:
//! - Validate and enqueue playback requests
//! - Run at most one processing task per group, working the queue head by head
//! - Ensure a ready voice connection before each attempt
//! - Prefer streaming; fall back to download-then-play
//! - Retry failed requests with exponential backoff, then skip them permanently
//! - Skip, pause, resume, volume and leave controls
//!
//! The request being worked on stays at the head of the queue until it
//! finishes, is skipped or fails permanently; only then is it committed to
//! history. A leave therefore never loses the current request.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{PlaybackError, PlaybackResult};
use crate::events::{PlaybackEvent, StatusReporter};
use crate::media::{AudioInput, DownloadGuard, MediaRef, MediaSource};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::services::queue_store::{PlaybackQueueStore, PlaybackRequest};
use crate::services::session::{
    ConnectionStatus, GroupSession, SessionPhase, SessionRegistry, SessionState,
};
use crate::state::Config;
use crate::transport::{ConnectionManager, TrackEnd, TransportError, VoiceTransport};
use crate::utils::now_millis;

/// Point-in-time view of one group's queue and playback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub group_id: String,
    pub phase: SessionPhase,
    pub is_playing: bool,
    /// The request whose audio is on the sink. Also the head of `pending`.
    pub current: Option<PlaybackRequest>,
    pub pending: Vec<PlaybackRequest>,
    /// Most recent first.
    pub history: Vec<MediaRef>,
    pub failed: Vec<MediaRef>,
}

/// What the processing loop does after one request.
enum Flow {
    /// Move on to the next queue head.
    Next,
    /// Stop processing (cancelled, or the connection is unusable).
    Stop,
}

/// Coordinates queue, connection, media acquisition and playback per group.
pub struct PlaybackOrchestrator {
    config: Config,
    queue: Arc<PlaybackQueueStore>,
    sessions: SessionRegistry,
    connections: ConnectionManager,
    media: Arc<dyn MediaSource>,
    reporter: Arc<dyn StatusReporter>,
    spawner: TokioSpawner,
    /// Cancelled on shutdown; no new processing starts afterwards.
    closing: CancellationToken,
}

impl PlaybackOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(
        config: Config,
        queue: Arc<PlaybackQueueStore>,
        transport: Arc<dyn VoiceTransport>,
        media: Arc<dyn MediaSource>,
        reporter: Arc<dyn StatusReporter>,
        spawner: TokioSpawner,
    ) -> Self {
        let connections =
            ConnectionManager::new(transport, config.ready_timeout(), config.reconnect_settle());
        Self {
            config,
            queue,
            sessions: SessionRegistry::new(),
            connections,
            media,
            reporter,
            spawner,
            closing: CancellationToken::new(),
        }
    }

    /// Returns the queue store.
    #[must_use]
    pub fn queue(&self) -> &Arc<PlaybackQueueStore> {
        &self.queue
    }

    /// Returns the underlying voice transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn VoiceTransport> {
        self.connections.transport()
    }

    fn report(&self, event: PlaybackEvent) {
        self.reporter.report(event);
    }

    fn session_for(&self, group_id: &str) -> Arc<GroupSession> {
        self.sessions.get_or_create(group_id, || {
            GroupSession::new(
                group_id,
                self.connections.transport().create_sink(group_id),
                self.config.default_volume,
            )
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Validates `raw` and appends it to the group's queue.
    ///
    /// Returns the 1-based queue position. Does not start processing; call
    /// [`trigger_processing`](Self::trigger_processing) afterwards.
    pub fn enqueue(&self, group_id: &str, raw: &str) -> PlaybackResult<usize> {
        let media = MediaRef::parse(raw, &self.config.allowed_hosts)?;
        let position = self.queue.enqueue(group_id, media.clone());
        log::info!(
            "[Orchestrator] {}: queued {} at position {}",
            group_id,
            media,
            position
        );
        self.report(PlaybackEvent::QueuedAt {
            group_id: group_id.to_string(),
            media,
            position,
            timestamp: now_millis(),
        });
        Ok(position)
    }

    /// Removes the first pending occurrence of `media`.
    pub fn remove(&self, group_id: &str, media: &MediaRef) -> bool {
        self.queue.remove(group_id, media)
    }

    /// Clears pending requests. With `reset`, also history and failed media.
    pub fn clear_queue(&self, group_id: &str, reset: bool) {
        self.queue.clear(group_id, reset);
        if reset {
            if let Some(session) = self.sessions.get(group_id) {
                session.update(|s| s.failed_ids.clear());
            }
        }
        log::info!("[Orchestrator] {}: queue cleared (reset={})", group_id, reset);
    }

    /// Re-queues recent history at the front of the queue.
    pub fn restore_from_history(&self, group_id: &str) -> bool {
        self.queue.restore_from_history(group_id)
    }

    /// Returns the group's queue and playback view.
    #[must_use]
    pub fn snapshot(&self, group_id: &str) -> QueueSnapshot {
        let state = self.sessions.get(group_id).map(|s| s.state());
        let (phase, is_playing, current, failed) = match state {
            Some(state) => (
                state.phase,
                state.is_playing,
                state.current,
                state.failed_ids.into_iter().collect(),
            ),
            None => (SessionPhase::Idle, false, None, Vec::new()),
        };
        QueueSnapshot {
            group_id: group_id.to_string(),
            phase,
            is_playing,
            current,
            pending: self.queue.snapshot(group_id),
            history: self.queue.history(group_id),
            failed,
        }
    }

    /// Returns a copy of the group's session state, if a session exists.
    #[must_use]
    pub fn session(&self, group_id: &str) -> Option<SessionState> {
        self.sessions.get(group_id).map(|s| s.state())
    }

    /// Returns the destination the group is connected to, if ready.
    #[must_use]
    pub fn connected_destination(&self, group_id: &str) -> Option<String> {
        let state = self.sessions.get(group_id)?.state();
        match state.connection_status {
            ConnectionStatus::Ready => state.destination,
            _ => None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Records `destination` for the group without connecting.
    ///
    /// The next processing run connects to it.
    pub fn set_destination(&self, group_id: &str, destination: &str) {
        let session = self.session_for(group_id);
        session.update(|s| s.destination = Some(destination.to_string()));
    }

    /// Records `destination` for the group and connects to it now.
    pub async fn join(&self, group_id: &str, destination: &str) -> PlaybackResult<()> {
        let session = self.session_for(group_id);
        session.update(|s| s.destination = Some(destination.to_string()));

        let result = self
            .connections
            .ensure_ready(group_id, destination, session.sink(), || {
                session.update(|s| s.connection_status = ConnectionStatus::Connecting);
                self.report(PlaybackEvent::Connecting {
                    group_id: group_id.to_string(),
                    destination: destination.to_string(),
                    timestamp: now_millis(),
                });
            })
            .await;

        match result {
            Ok(_) => {
                session.update(|s| s.connection_status = ConnectionStatus::Ready);
                Ok(())
            }
            Err(e) => {
                session.update(|s| s.connection_status = ConnectionStatus::Failed);
                let error = PlaybackError::from(e);
                self.report(PlaybackEvent::ConnectionFailed {
                    group_id: group_id.to_string(),
                    error: error.to_string(),
                    timestamp: now_millis(),
                });
                Err(error)
            }
        }
    }

    /// Stops playback and disconnects the group.
    ///
    /// Waits for the group's processing task to exit first, so any in-flight
    /// media acquisition has been abandoned and its scratch files removed
    /// by the time this returns. With `clear_queue`, pending requests and
    /// failed media are dropped and the session is destroyed.
    ///
    /// Returns false if the group was not connected or connecting.
    pub async fn leave(&self, group_id: &str, clear_queue: bool) -> bool {
        let Some(session) = self.sessions.get(group_id) else {
            return false;
        };
        if matches!(
            session.state().connection_status,
            ConnectionStatus::Disconnected | ConnectionStatus::Failed
        ) {
            return false;
        }

        log::info!(
            "[Orchestrator] {}: leaving (clear_queue={})",
            group_id,
            clear_queue
        );
        session.reset(clear_queue);
        session.wait_idle().await;
        session.sink().stop();
        self.connections.disconnect(group_id).await;

        if clear_queue {
            self.queue.clear(group_id, false);
            self.sessions.remove(group_id);
            self.connections.forget(group_id);
        }

        self.report(PlaybackEvent::Left {
            group_id: group_id.to_string(),
            queue_cleared: clear_queue,
            timestamp: now_millis(),
        });
        true
    }

    /// Leaves every group without clearing queues. No processing starts afterwards.
    pub async fn shutdown(&self) {
        self.closing.cancel();
        for group_id in self.sessions.group_ids() {
            if !self.leave(&group_id, false).await {
                if let Some(session) = self.sessions.get(&group_id) {
                    session.reset(false);
                    session.wait_idle().await;
                }
            }
        }
        log::info!("[Orchestrator] Shutdown complete");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playback Controls
    // ─────────────────────────────────────────────────────────────────────────

    /// Skips the current request.
    ///
    /// While playing, the sink is stopped and completion advances the queue.
    /// While the request is still being prepared, the acquisition is
    /// abandoned and the request is reported as skipped.
    ///
    /// Returns false if nothing is playing or being prepared.
    pub fn skip(&self, group_id: &str) -> bool {
        let Some(session) = self.sessions.get(group_id) else {
            return false;
        };
        let skipped = match session.state().phase {
            SessionPhase::Playing | SessionPhase::Paused => session.sink().stop(),
            SessionPhase::Preparing => session.abandon_item(),
            SessionPhase::Idle | SessionPhase::Connecting => false,
        };
        if skipped {
            log::info!("[Orchestrator] {}: skip requested", group_id);
        }
        skipped
    }

    /// Pauses the current track. Only valid while playing.
    pub fn pause(&self, group_id: &str) -> bool {
        let Some(session) = self.sessions.get(group_id) else {
            return false;
        };
        if session.state().phase != SessionPhase::Playing || !session.sink().pause() {
            return false;
        }
        session.update(|s| {
            if s.phase == SessionPhase::Playing {
                s.phase = SessionPhase::Paused;
                s.is_playing = false;
            }
        });
        self.report(PlaybackEvent::Paused {
            group_id: group_id.to_string(),
            timestamp: now_millis(),
        });
        true
    }

    /// Resumes a paused track. Only valid while paused.
    pub fn resume(&self, group_id: &str) -> bool {
        let Some(session) = self.sessions.get(group_id) else {
            return false;
        };
        if session.state().phase != SessionPhase::Paused || !session.sink().resume() {
            return false;
        }
        session.update(|s| {
            if s.phase == SessionPhase::Paused {
                s.phase = SessionPhase::Playing;
                s.is_playing = true;
            }
        });
        self.report(PlaybackEvent::Resumed {
            group_id: group_id.to_string(),
            timestamp: now_millis(),
        });
        true
    }

    /// Sets the session volume from a 0-100 percentage (clamped).
    ///
    /// The volume is kept for later tracks. Returns whether it was applied
    /// to an active track.
    pub fn set_volume(&self, group_id: &str, percent: i32) -> bool {
        let Some(session) = self.sessions.get(group_id) else {
            return false;
        };
        let volume = percent.clamp(0, 100) as f32 / 100.0;
        session.update(|s| s.volume = volume);
        session.sink().set_volume(volume)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Processing
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts working the group's queue unless a processing task already is.
    ///
    /// Returns true if a new processing task was started. A trigger that
    /// arrives while processing is running is remembered and re-checked when
    /// that task exits.
    pub fn trigger_processing(self: &Arc<Self>, group_id: &str) -> bool {
        if self.closing.is_cancelled() {
            return false;
        }
        let session = self.session_for(group_id);
        if !session.try_claim() {
            session.mark_retrigger();
            log::debug!("[Orchestrator] {}: already processing", group_id);
            return false;
        }

        let this = Arc::clone(self);
        self.spawner.spawn(async move {
            this.run(session).await;
        });
        true
    }

    async fn run(self: Arc<Self>, session: Arc<GroupSession>) {
        let token = session.token();
        self.process_queue(&session, &token).await;

        if session.release() && !self.closing.is_cancelled() {
            log::debug!(
                "[Orchestrator] {}: re-checking queue after missed trigger",
                session.group_id()
            );
            self.trigger_processing(session.group_id());
        }
    }

    async fn process_queue(&self, session: &GroupSession, token: &CancellationToken) {
        let group_id = session.group_id();
        loop {
            session.clear_retrigger();

            let Some(request) = self.next_servable(session) else {
                if session
                    .update_if_current(token, SessionState::clear_playback)
                    .is_some()
                {
                    log::info!("[Orchestrator] {}: queue empty", group_id);
                    self.report(PlaybackEvent::QueueEmpty {
                        group_id: group_id.to_string(),
                        timestamp: now_millis(),
                    });
                }
                return;
            };

            if let Flow::Stop = self.serve(session, token, &request).await {
                return;
            }
        }
    }

    /// Peeks the queue head, dropping heads that already failed permanently.
    fn next_servable(&self, session: &GroupSession) -> Option<PlaybackRequest> {
        let group_id = session.group_id();
        loop {
            let head = self.queue.front(group_id)?;
            if !session.has_failed(&head.media) {
                return Some(head);
            }
            log::info!(
                "[Orchestrator] {}: dropping previously failed {}",
                group_id,
                head.media
            );
            self.queue.remove_ticket(group_id, head.ticket);
        }
    }

    /// Serves one request through retries until it completes, is skipped or fails.
    async fn serve(
        &self,
        session: &GroupSession,
        token: &CancellationToken,
        request: &PlaybackRequest,
    ) -> Flow {
        let item = token.child_token();
        if !session.begin_item(token, item.clone()) {
            return Flow::Stop;
        }
        let flow = self.serve_item(session, token, &item, request).await;
        session.end_item();
        flow
    }

    async fn serve_item(
        &self,
        session: &GroupSession,
        token: &CancellationToken,
        item: &CancellationToken,
        request: &PlaybackRequest,
    ) -> Flow {
        let group_id = session.group_id();
        let media = &request.media;

        loop {
            if !self.connect(session, token).await {
                return Flow::Stop;
            }
            if session
                .update_if_current(token, |s| s.phase = SessionPhase::Preparing)
                .is_none()
            {
                return Flow::Stop;
            }

            let outcome = tokio::select! {
                biased;
                () = item.cancelled() => None,
                result = self.attempt(session, token, request) => Some(result),
            };
            if token.is_cancelled() {
                return Flow::Stop;
            }

            let error = match outcome {
                None => return self.skipped(session, token, request),
                Some(Ok(())) => return self.completed(session, token, request).await,
                Some(Err(error)) => error,
            };

            log::warn!(
                "[Orchestrator] {}: attempt for {} failed: {}",
                group_id,
                media,
                error
            );
            let max_retries = self.config.retry.max_retries;
            let retry = session.update_if_current(token, |s| {
                s.clear_playback();
                if error.is_retryable() && s.retry_count < max_retries {
                    s.retry_count += 1;
                    s.phase = SessionPhase::Preparing;
                    Some(s.retry_count)
                } else {
                    s.retry_count = 0;
                    s.failed_ids.insert(media.clone());
                    None
                }
            });

            let attempt = match retry {
                None => return Flow::Stop,
                Some(None) => {
                    self.queue.take(group_id, request);
                    log::warn!(
                        "[Orchestrator] {}: giving up on {} after {} retries",
                        group_id,
                        media,
                        max_retries
                    );
                    self.report(PlaybackEvent::PermanentFailure {
                        group_id: group_id.to_string(),
                        media: media.clone(),
                        error: error.to_string(),
                        timestamp: now_millis(),
                    });
                    return Flow::Next;
                }
                Some(Some(attempt)) => attempt,
            };

            let delay = self.config.retry.delay_for(attempt);
            self.report(PlaybackEvent::RetryScheduled {
                group_id: group_id.to_string(),
                media: media.clone(),
                attempt,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error: error.to_string(),
                timestamp: now_millis(),
            });

            tokio::select! {
                biased;
                () = item.cancelled() => {
                    if token.is_cancelled() {
                        return Flow::Stop;
                    }
                    return self.skipped(session, token, request);
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Ensures the group's destination is connected and ready.
    ///
    /// Reports `ConnectionFailed` and returns false if it cannot be.
    async fn connect(&self, session: &GroupSession, token: &CancellationToken) -> bool {
        let group_id = session.group_id();
        let Some(destination) = session.update_if_current(token, |s| {
            s.phase = SessionPhase::Connecting;
            s.destination.clone()
        }) else {
            return false;
        };

        let result = match destination {
            None => Err(TransportError::NoDestination),
            Some(ref destination) => {
                let ensure =
                    self.connections
                        .ensure_ready(group_id, destination, session.sink(), || {
                            session.update_if_current(token, |s| {
                                s.connection_status = ConnectionStatus::Connecting;
                            });
                            self.report(PlaybackEvent::Connecting {
                                group_id: group_id.to_string(),
                                destination: destination.clone(),
                                timestamp: now_millis(),
                            });
                        });
                tokio::select! {
                    biased;
                    () = token.cancelled() => return false,
                    result = ensure => result.map(|_| ()),
                }
            }
        };

        match result {
            Ok(()) => session
                .update_if_current(token, |s| s.connection_status = ConnectionStatus::Ready)
                .is_some(),
            Err(e) => {
                let error = PlaybackError::from(e);
                log::warn!("[Orchestrator] {}: {}", group_id, error);
                let current = session.update_if_current(token, |s| {
                    s.connection_status = ConnectionStatus::Failed;
                    s.phase = SessionPhase::Idle;
                });
                if current.is_some() {
                    self.report(PlaybackEvent::ConnectionFailed {
                        group_id: group_id.to_string(),
                        error: error.to_string(),
                        timestamp: now_millis(),
                    });
                }
                false
            }
        }
    }

    /// One playback attempt: stream, else download, then play until the track ends.
    ///
    /// The download guard lives until this returns, so a downloaded file is
    /// removed before the caller reports the outcome.
    async fn attempt(
        &self,
        session: &GroupSession,
        token: &CancellationToken,
        request: &PlaybackRequest,
    ) -> PlaybackResult<()> {
        let group_id = session.group_id();
        let media = &request.media;
        let volume = session.state().volume;

        self.report(PlaybackEvent::Streaming {
            group_id: group_id.to_string(),
            media: media.clone(),
            timestamp: now_millis(),
        });
        let streamed = match self.media.open_stream(media).await {
            Ok(stream) => session
                .sink()
                .play(AudioInput::Stream(stream), volume)
                .map_err(PlaybackError::from),
            Err(e) => Err(PlaybackError::from(e)),
        };

        let mut scratch = None;
        let ended = match streamed {
            Ok(ended) => ended,
            Err(e) => {
                log::info!(
                    "[Orchestrator] {}: streaming {} failed ({}), downloading instead",
                    group_id,
                    media,
                    e
                );
                self.report(PlaybackEvent::Downloading {
                    group_id: group_id.to_string(),
                    media: media.clone(),
                    timestamp: now_millis(),
                });
                let guard = DownloadGuard::create(self.config.download_dir.as_deref())?;
                let file = self.media.download(media, guard.path()).await?;
                let file = guard.validate(&file).await?;
                let ended = session.sink().play(AudioInput::File(file), volume)?;
                scratch = Some(guard);
                ended
            }
        };

        let started = session.update_if_current(token, |s| {
            s.phase = SessionPhase::Playing;
            s.current = Some(request.clone());
            s.is_playing = true;
        });
        if started.is_some() {
            log::info!("[Orchestrator] {}: playing {}", group_id, media);
            self.report(PlaybackEvent::Playing {
                group_id: group_id.to_string(),
                media: media.clone(),
                timestamp: now_millis(),
            });
        }

        // A dropped sender means the sink was torn down; treat it as stopped.
        let end = ended.await.unwrap_or(TrackEnd::Stopped);
        drop(scratch);
        match end {
            TrackEnd::Finished | TrackEnd::Stopped => Ok(()),
            TrackEnd::Errored(message) => Err(PlaybackError::Playback(message)),
        }
    }

    async fn completed(
        &self,
        session: &GroupSession,
        token: &CancellationToken,
        request: &PlaybackRequest,
    ) -> Flow {
        let group_id = session.group_id();
        self.queue.take(group_id, request);
        let current = session.update_if_current(token, |s| {
            s.clear_playback();
            s.retry_count = 0;
        });
        if current.is_none() {
            return Flow::Stop;
        }
        log::info!("[Orchestrator] {}: completed {}", group_id, request.media);
        self.report(PlaybackEvent::Completed {
            group_id: group_id.to_string(),
            media: request.media.clone(),
            timestamp: now_millis(),
        });

        tokio::select! {
            biased;
            () = token.cancelled() => Flow::Stop,
            () = tokio::time::sleep(self.config.advance_settle()) => Flow::Next,
        }
    }

    fn skipped(
        &self,
        session: &GroupSession,
        token: &CancellationToken,
        request: &PlaybackRequest,
    ) -> Flow {
        let group_id = session.group_id();
        session.sink().stop();
        self.queue.take(group_id, request);
        let current = session.update_if_current(token, |s| {
            s.clear_playback();
            s.retry_count = 0;
        });
        if current.is_none() {
            return Flow::Stop;
        }
        log::info!("[Orchestrator] {}: skipped {}", group_id, request.media);
        self.report(PlaybackEvent::Skipped {
            group_id: group_id.to_string(),
            media: request.media.clone(),
            timestamp: now_millis(),
        });
        Flow::Next
    }
}
