//! Shared fakes for unit tests: transport, sink, media source and reporter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use crate::events::{PlaybackEvent, StatusReporter};
use crate::media::{AudioInput, ByteStream, MediaError, MediaRef, MediaResult, MediaSource};
use crate::transport::{
    AudioSink, ConnectionHandle, Member, TrackEnd, TrackEndReceiver, TransportError,
    TransportResult, VoiceTransport,
};

/// Builds a media reference on the test host, e.g. `media("v1")`.
pub(crate) fn media(name: &str) -> MediaRef {
    MediaRef::parse(&format!("https://media.test/{name}"), &[]).unwrap()
}

fn short_name(media: &MediaRef) -> String {
    media.as_str().rsplit('/').next().unwrap_or_default().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// How [`FakeTransport::wait_until_ready`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadyBehavior {
    Ready,
    Never,
    Fail,
}

pub(crate) struct FakeTransport {
    next_id: AtomicU64,
    connects: Mutex<Vec<(String, String)>>,
    disconnects: AtomicUsize,
    subscribes: AtomicUsize,
    ready: Mutex<ReadyBehavior>,
    sinks: Mutex<HashMap<String, Arc<FakeSink>>>,
    members: Mutex<HashMap<String, Vec<Member>>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            connects: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
            ready: Mutex::new(ReadyBehavior::Ready),
            sinks: Mutex::new(HashMap::new()),
            members: Mutex::new(HashMap::new()),
        })
    }

    /// The sink for `group_id`, created on first use.
    pub(crate) fn sink(&self, group_id: &str) -> Arc<FakeSink> {
        Arc::clone(
            self.sinks
                .lock()
                .entry(group_id.to_string())
                .or_insert_with(|| Arc::new(FakeSink::default())),
        )
    }

    pub(crate) fn set_ready(&self, behavior: ReadyBehavior) {
        *self.ready.lock() = behavior;
    }

    /// Sets the participants of `destination`: `humans` non-bot ids plus the bot itself.
    pub(crate) fn set_members(&self, destination: &str, humans: &[&str]) {
        let mut members: Vec<Member> = humans
            .iter()
            .map(|id| Member {
                id: (*id).to_string(),
                is_bot: false,
            })
            .collect();
        members.push(Member {
            id: "encore".into(),
            is_bot: true,
        });
        self.members.lock().insert(destination.to_string(), members);
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub(crate) fn connects_for(&self, group_id: &str) -> usize {
        self.connects.lock().iter().filter(|(g, _)| g == group_id).count()
    }

    pub(crate) fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(&self, group_id: &str, destination: &str) -> TransportResult<ConnectionHandle> {
        self.connects
            .lock()
            .push((group_id.to_string(), destination.to_string()));
        Ok(ConnectionHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            group_id: group_id.to_string(),
            destination: destination.to_string(),
        })
    }

    async fn wait_until_ready(&self, _handle: &ConnectionHandle) -> TransportResult<()> {
        let behavior = *self.ready.lock();
        match behavior {
            ReadyBehavior::Ready => Ok(()),
            ReadyBehavior::Never => std::future::pending().await,
            ReadyBehavior::Fail => Err(TransportError::ConnectFailed("gateway refused".into())),
        }
    }

    fn create_sink(&self, group_id: &str) -> Arc<dyn AudioSink> {
        self.sink(group_id)
    }

    fn subscribe(&self, _handle: &ConnectionHandle, _sink: Arc<dyn AudioSink>) -> TransportResult<()> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, _handle: &ConnectionHandle) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn members(&self, destination: &str) -> TransportResult<Vec<Member>> {
        Ok(self
            .members
            .lock()
            .get(destination)
            .cloned()
            .unwrap_or_default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sink
// ─────────────────────────────────────────────────────────────────────────────

/// What a [`FakeSink`] was asked to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Played {
    Stream,
    File(PathBuf),
}

pub(crate) struct FakeSink {
    current: Mutex<Option<oneshot::Sender<TrackEnd>>>,
    paused: AtomicBool,
    plays: Mutex<Vec<Played>>,
    volumes: Mutex<Vec<f32>>,
    reject_plays: AtomicUsize,
    started: watch::Sender<usize>,
}

impl Default for FakeSink {
    fn default() -> Self {
        Self {
            current: Mutex::new(None),
            paused: AtomicBool::new(false),
            plays: Mutex::new(Vec::new()),
            volumes: Mutex::new(Vec::new()),
            reject_plays: AtomicUsize::new(0),
            started: watch::channel(0).0,
        }
    }
}

impl FakeSink {
    /// Ends the current track naturally.
    pub(crate) fn finish(&self) -> bool {
        self.end(TrackEnd::Finished)
    }

    /// Ends the current track with an error.
    pub(crate) fn fail_track(&self, message: &str) -> bool {
        self.end(TrackEnd::Errored(message.to_string()))
    }

    /// Rejects the next `count` calls to `play`.
    pub(crate) fn reject_next_plays(&self, count: usize) {
        self.reject_plays.store(count, Ordering::SeqCst);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.current.lock().is_some()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn plays(&self) -> Vec<Played> {
        self.plays.lock().clone()
    }

    pub(crate) fn volumes(&self) -> Vec<f32> {
        self.volumes.lock().clone()
    }

    /// Waits until at least `count` tracks have started on this sink.
    pub(crate) async fn wait_for_plays(&self, count: usize) {
        let mut rx = self.started.subscribe();
        let waited = tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|n| *n >= count));
        assert!(
            matches!(waited.await, Ok(Ok(_))),
            "timed out waiting for {count} plays"
        );
    }

    fn end(&self, end: TrackEnd) -> bool {
        self.paused.store(false, Ordering::SeqCst);
        match self.current.lock().take() {
            Some(tx) => {
                let _ = tx.send(end);
                true
            }
            None => false,
        }
    }
}

impl AudioSink for FakeSink {
    fn play(&self, input: AudioInput, volume: f32) -> TransportResult<TrackEndReceiver> {
        let rejected = self
            .reject_plays
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(TransportError::Sink("decoder rejected input".into()));
        }

        let played = match input {
            AudioInput::Stream(_) => Played::Stream,
            AudioInput::File(path) => {
                assert!(path.exists(), "sink asked to play missing file");
                Played::File(path)
            }
        };
        self.end(TrackEnd::Stopped);
        let (tx, rx) = oneshot::channel();
        *self.current.lock() = Some(tx);
        self.plays.lock().push(played);
        self.volumes.lock().push(volume);
        self.started.send_modify(|n| *n += 1);
        Ok(rx)
    }

    fn stop(&self) -> bool {
        self.end(TrackEnd::Stopped)
    }

    fn pause(&self) -> bool {
        if self.is_active() && !self.paused.swap(true, Ordering::SeqCst) {
            return true;
        }
        false
    }

    fn resume(&self) -> bool {
        self.is_active() && self.paused.swap(false, Ordering::SeqCst)
    }

    fn set_volume(&self, volume: f32) -> bool {
        if !self.is_active() {
            return false;
        }
        self.volumes.lock().push(volume);
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Media source
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted outcome for one media name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    /// Streaming succeeds.
    Stream,
    /// Streaming fails, download succeeds.
    DownloadOnly,
    /// Streaming fails, download produces an empty file.
    EmptyDownload,
    /// Both strategies fail.
    Fail,
    /// Streaming never resolves.
    HangStream,
    /// Streaming fails; download writes its file and then never resolves.
    HangDownload,
}

#[derive(Default)]
pub(crate) struct ScriptedMediaSource {
    behaviors: Mutex<HashMap<String, Behavior>>,
    stream_calls: Mutex<Vec<String>>,
    download_calls: Mutex<Vec<String>>,
    downloaded: Mutex<Vec<PathBuf>>,
}

impl ScriptedMediaSource {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn script(&self, name: &str, behavior: Behavior) {
        self.behaviors.lock().insert(name.to_string(), behavior);
    }

    fn behavior(&self, media: &MediaRef) -> Behavior {
        self.behaviors
            .lock()
            .get(&short_name(media))
            .copied()
            .unwrap_or(Behavior::Stream)
    }

    pub(crate) fn stream_calls(&self, name: &str) -> usize {
        self.stream_calls.lock().iter().filter(|n| *n == name).count()
    }

    pub(crate) fn download_calls(&self, name: &str) -> usize {
        self.download_calls.lock().iter().filter(|n| *n == name).count()
    }

    /// Paths of every file written by `download`.
    pub(crate) fn downloaded(&self) -> Vec<PathBuf> {
        self.downloaded.lock().clone()
    }

    fn write_file(&self, media: &MediaRef, dir: &Path, contents: &[u8]) -> MediaResult<PathBuf> {
        let path = dir.join(format!("{}.opus", short_name(media)));
        std::fs::write(&path, contents)?;
        self.downloaded.lock().push(path.clone());
        Ok(path)
    }
}

#[async_trait]
impl MediaSource for ScriptedMediaSource {
    async fn open_stream(&self, media: &MediaRef) -> MediaResult<ByteStream> {
        self.stream_calls.lock().push(short_name(media));
        match self.behavior(media) {
            Behavior::Stream => {
                let chunk: std::io::Result<Bytes> = Ok(Bytes::from_static(b"OggS"));
                Ok(futures::stream::iter(vec![chunk]).boxed())
            }
            Behavior::HangStream => std::future::pending().await,
            _ => Err(MediaError::Http("stream refused".into())),
        }
    }

    async fn download(&self, media: &MediaRef, destination_dir: &Path) -> MediaResult<PathBuf> {
        self.download_calls.lock().push(short_name(media));
        match self.behavior(media) {
            Behavior::Stream | Behavior::DownloadOnly => {
                self.write_file(media, destination_dir, b"audio bytes")
            }
            Behavior::EmptyDownload => self.write_file(media, destination_dir, b""),
            Behavior::HangDownload => {
                self.write_file(media, destination_dir, b"partial")?;
                std::future::pending().await
            }
            Behavior::Fail | Behavior::HangStream => Err(MediaError::HttpStatus(404)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reporter
// ─────────────────────────────────────────────────────────────────────────────

/// Compact, assertion-friendly rendering of an event, e.g. `Playing(v1)`.
pub(crate) fn label(event: &PlaybackEvent) -> String {
    let name = || event.media().map(short_name).unwrap_or_default();
    match event {
        PlaybackEvent::QueuedAt { position, .. } => format!("QueuedAt({}@{position})", name()),
        PlaybackEvent::Connecting { destination, .. } => format!("Connecting({destination})"),
        PlaybackEvent::ConnectionFailed { .. } => "ConnectionFailed".into(),
        PlaybackEvent::Streaming { .. } => format!("Streaming({})", name()),
        PlaybackEvent::Downloading { .. } => format!("Downloading({})", name()),
        PlaybackEvent::Playing { .. } => format!("Playing({})", name()),
        PlaybackEvent::Completed { .. } => format!("Completed({})", name()),
        PlaybackEvent::Skipped { .. } => format!("Skipped({})", name()),
        PlaybackEvent::RetryScheduled { attempt, .. } => {
            format!("RetryScheduled({}#{attempt})", name())
        }
        PlaybackEvent::PermanentFailure { .. } => format!("PermanentFailure({})", name()),
        PlaybackEvent::QueueEmpty { .. } => "QueueEmpty".into(),
        PlaybackEvent::Paused { .. } => "Paused".into(),
        PlaybackEvent::Resumed { .. } => "Resumed".into(),
        PlaybackEvent::Left { queue_cleared, .. } => {
            if *queue_cleared {
                "Left(cleared)".into()
            } else {
                "Left(kept)".into()
            }
        }
        PlaybackEvent::AutoLeft { destination, .. } => format!("AutoLeft({destination})"),
    }
}

/// Records every reported event and lets tests await specific ones.
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<PlaybackEvent>>,
    seen: watch::Sender<usize>,
}

impl RecordingReporter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            seen: watch::channel(0).0,
        })
    }

    pub(crate) fn events(&self) -> Vec<PlaybackEvent> {
        self.events.lock().clone()
    }

    /// Labels of the events for one group, in emission order.
    pub(crate) fn labels_for(&self, group_id: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.group_id() == group_id)
            .map(label)
            .collect()
    }

    fn count_of(&self, group_id: &str, wanted: &str) -> usize {
        self.labels_for(group_id)
            .iter()
            .filter(|l| *l == wanted)
            .count()
    }

    /// Waits until `group_id` has reported `wanted` at least once.
    pub(crate) async fn wait_for_label(&self, group_id: &str, wanted: &str) {
        self.wait_for_count(group_id, wanted, 1).await;
    }

    /// Waits until `group_id` has reported `wanted` at least `count` times.
    pub(crate) async fn wait_for_count(&self, group_id: &str, wanted: &str, count: usize) {
        let mut rx = self.seen.subscribe();
        let wait = async {
            while self.count_of(group_id, wanted) < count {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(600), wait)
            .await
            .is_err()
        {
            panic!(
                "timed out waiting for {wanted} x{count} on {group_id}; saw {:?}",
                self.labels_for(group_id)
            );
        }
    }
}

impl StatusReporter for RecordingReporter {
    fn report(&self, event: PlaybackEvent) {
        self.events.lock().push(event);
        self.seen.send_modify(|n| *n += 1);
    }
}
