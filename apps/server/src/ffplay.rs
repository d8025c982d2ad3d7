//! Local voice transport backed by `ffplay`.
//!
//! There is no real voice network behind the console harness: "connecting" to
//! a destination always succeeds immediately, membership is whatever the
//! operator says it is, and audio goes to the local sound device through one
//! `ffplay` process per track.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use encore_core::{
    AudioInput, AudioSink, ConnectionHandle, Member, TaskSpawner, TokioSpawner, TrackEnd,
    TrackEndReceiver, TransportError, TransportResult, VoiceTransport,
};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::oneshot;

/// Member id the harness uses for itself.
pub const BOT_MEMBER_ID: &str = "encore";

/// Voice transport that plays through local `ffplay` processes.
pub struct FfplayTransport {
    binary: PathBuf,
    spawner: TokioSpawner,
    next_id: AtomicU64,
    /// Human participants per destination.
    members: RwLock<HashMap<String, HashSet<String>>>,
}

impl FfplayTransport {
    pub fn new(binary: impl Into<PathBuf>, spawner: TokioSpawner) -> Self {
        Self {
            binary: binary.into(),
            spawner,
            next_id: AtomicU64::new(1),
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Records `member_id` as present in `destination`. Returns false if it already was.
    pub fn add_member(&self, destination: &str, member_id: &str) -> bool {
        self.members
            .write()
            .entry(destination.to_string())
            .or_default()
            .insert(member_id.to_string())
    }

    /// Removes `member_id` from `destination`. Returns false if it was not present.
    pub fn remove_member(&self, destination: &str, member_id: &str) -> bool {
        let mut members = self.members.write();
        let Some(present) = members.get_mut(destination) else {
            return false;
        };
        let removed = present.remove(member_id);
        if present.is_empty() {
            members.remove(destination);
        }
        removed
    }
}

#[async_trait]
impl VoiceTransport for FfplayTransport {
    async fn connect(&self, group_id: &str, destination: &str) -> TransportResult<ConnectionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        log::debug!("[Ffplay] {}: connection #{} to {}", group_id, id, destination);
        Ok(ConnectionHandle {
            id,
            group_id: group_id.to_string(),
            destination: destination.to_string(),
        })
    }

    async fn wait_until_ready(&self, _handle: &ConnectionHandle) -> TransportResult<()> {
        Ok(())
    }

    fn create_sink(&self, group_id: &str) -> Arc<dyn AudioSink> {
        log::debug!("[Ffplay] {}: creating sink", group_id);
        Arc::new(FfplaySink::new(self.binary.clone(), self.spawner.clone()))
    }

    fn subscribe(&self, handle: &ConnectionHandle, _sink: Arc<dyn AudioSink>) -> TransportResult<()> {
        log::debug!(
            "[Ffplay] {}: sink attached to connection #{}",
            handle.group_id,
            handle.id
        );
        Ok(())
    }

    async fn disconnect(&self, handle: &ConnectionHandle) {
        log::debug!(
            "[Ffplay] {}: connection #{} closed",
            handle.group_id,
            handle.id
        );
    }

    async fn members(&self, destination: &str) -> TransportResult<Vec<Member>> {
        let mut members = vec![Member {
            id: BOT_MEMBER_ID.to_string(),
            is_bot: true,
        }];
        if let Some(present) = self.members.read().get(destination) {
            members.extend(present.iter().map(|id| Member {
                id: id.clone(),
                is_bot: false,
            }));
        }
        Ok(members)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sink
// ─────────────────────────────────────────────────────────────────────────────

struct Track {
    pid: Option<u32>,
    stop: oneshot::Sender<()>,
}

impl Track {
    fn is_running(&self) -> bool {
        !self.stop.is_closed()
    }
}

/// Plays one track at a time through an `ffplay` child process.
///
/// Volume is fixed per process, so [`set_volume`](AudioSink::set_volume)
/// only takes effect on the next track.
pub struct FfplaySink {
    binary: PathBuf,
    spawner: TokioSpawner,
    track: Mutex<Option<Track>>,
    paused: AtomicBool,
}

impl FfplaySink {
    pub fn new(binary: PathBuf, spawner: TokioSpawner) -> Self {
        Self {
            binary,
            spawner,
            track: Mutex::new(None),
            paused: AtomicBool::new(false),
        }
    }

    fn command(&self, volume: f32) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-nodisp", "-autoexit", "-loglevel", "error", "-volume"])
            .arg(ffplay_volume(volume).to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    fn running_pid(&self) -> Option<u32> {
        self.track
            .lock()
            .as_ref()
            .filter(|t| t.is_running())
            .and_then(|t| t.pid)
    }
}

/// Maps 0.0 - 1.0 onto ffplay's 0 - 100 volume scale.
fn ffplay_volume(volume: f32) -> u8 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u8
}

impl AudioSink for FfplaySink {
    fn play(&self, input: AudioInput, volume: f32) -> TransportResult<TrackEndReceiver> {
        self.stop();

        let mut cmd = self.command(volume);
        let stream = match input {
            AudioInput::Stream(stream) => {
                cmd.arg("-").stdin(Stdio::piped());
                Some(stream)
            }
            AudioInput::File(path) => {
                cmd.arg(path).stdin(Stdio::null());
                None
            }
        };

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Sink(format!("failed to spawn ffplay: {e}")))?;

        // The feeder reports a broken input before closing stdin, so the clean
        // exit ffplay makes on EOF is not mistaken for the end of the track.
        let mut input_failed = None;
        if let (Some(mut stream), Some(mut stdin)) = (stream, child.stdin.take()) {
            let (failed_tx, failed_rx) = oneshot::channel::<String>();
            input_failed = Some(failed_rx);
            self.spawner.spawn(async move {
                while let Some(chunk) = stream.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            log::warn!("[Ffplay] Input stream failed: {}", e);
                            let _ = failed_tx.send(format!("input stream failed: {e}"));
                            break;
                        }
                    };
                    // ffplay exited or was stopped
                    if stdin.write_all(&chunk).await.is_err() {
                        break;
                    }
                }
            });
        }

        let pid = child.id();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (end_tx, end_rx) = oneshot::channel();

        self.spawner.spawn(async move {
            let end = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => track_end(input_failed),
                    Ok(status) => TrackEnd::Errored(format!("ffplay exited with {status}")),
                    Err(e) => TrackEnd::Errored(format!("failed to wait for ffplay: {e}")),
                },
                _ = stop_rx => {
                    if let Err(e) = child.kill().await {
                        log::warn!("[Ffplay] Failed to kill ffplay: {}", e);
                    }
                    TrackEnd::Stopped
                }
            };
            let _ = end_tx.send(end);
        });

        self.paused.store(false, Ordering::SeqCst);
        *self.track.lock() = Some(Track { pid, stop: stop_tx });
        Ok(end_rx)
    }

    fn stop(&self) -> bool {
        let Some(track) = self.track.lock().take() else {
            return false;
        };
        if !track.is_running() {
            return false;
        }
        // A paused process would ignore the kill until resumed.
        if self.paused.swap(false, Ordering::SeqCst) {
            if let Some(pid) = track.pid {
                signal(pid, Signal::Continue);
            }
        }
        track.stop.send(()).is_ok()
    }

    fn pause(&self) -> bool {
        let Some(pid) = self.running_pid() else {
            return false;
        };
        if self.paused.load(Ordering::SeqCst) || !signal(pid, Signal::Stop) {
            return false;
        }
        self.paused.store(true, Ordering::SeqCst);
        true
    }

    fn resume(&self) -> bool {
        let Some(pid) = self.running_pid() else {
            return false;
        };
        if !self.paused.load(Ordering::SeqCst) || !signal(pid, Signal::Continue) {
            return false;
        }
        self.paused.store(false, Ordering::SeqCst);
        true
    }

    fn set_volume(&self, _volume: f32) -> bool {
        false
    }
}

/// Resolves a clean ffplay exit, which is an error if its input broke first.
fn track_end(input_failed: Option<oneshot::Receiver<String>>) -> TrackEnd {
    match input_failed.map(|mut rx| rx.try_recv()) {
        Some(Ok(message)) => TrackEnd::Errored(message),
        _ => TrackEnd::Finished,
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Stop,
    Continue,
}

#[cfg(unix)]
fn signal(pid: u32, signal: Signal) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let sig = match signal {
        Signal::Stop => libc::SIGSTOP,
        Signal::Continue => libc::SIGCONT,
    };
    // SAFETY: kill(2) has no memory-safety preconditions; pid is our own child.
    unsafe { libc::kill(pid, sig) == 0 }
}

#[cfg(not(unix))]
fn signal(_pid: u32, _signal: Signal) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn members_always_include_the_bot() {
        let transport = FfplayTransport::new("ffplay", TokioSpawner::current());
        let members = transport.members("vc-1").await.unwrap();
        assert_eq!(members.len(), 1);
        assert!(members[0].is_bot);
        assert_eq!(members[0].id, BOT_MEMBER_ID);
    }

    #[tokio::test]
    async fn added_members_are_listed_as_humans() {
        let transport = FfplayTransport::new("ffplay", TokioSpawner::current());
        assert!(transport.add_member("vc-1", "alice"));
        assert!(!transport.add_member("vc-1", "alice"));
        transport.add_member("vc-2", "bob");

        let members = transport.members("vc-1").await.unwrap();
        let humans: Vec<_> = members.iter().filter(|m| !m.is_bot).collect();
        assert_eq!(humans.len(), 1);
        assert_eq!(humans[0].id, "alice");

        assert!(transport.remove_member("vc-1", "alice"));
        assert!(!transport.remove_member("vc-1", "alice"));
        assert_eq!(transport.members("vc-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn connections_get_distinct_ids() {
        let transport = FfplayTransport::new("ffplay", TokioSpawner::current());
        let a = transport.connect("g1", "vc-1").await.unwrap();
        let b = transport.connect("g1", "vc-1").await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(transport.wait_until_ready(&a).await.is_ok());
    }

    #[test]
    fn volume_maps_to_percent() {
        assert_eq!(ffplay_volume(0.15), 15);
        assert_eq!(ffplay_volume(1.5), 100);
        assert_eq!(ffplay_volume(-1.0), 0);
    }

    #[test]
    fn clean_exit_after_broken_input_is_an_error() {
        let (tx, rx) = oneshot::channel();
        tx.send("input stream failed: reset".to_string()).unwrap();
        assert_eq!(
            track_end(Some(rx)),
            TrackEnd::Errored("input stream failed: reset".into())
        );

        let (tx, rx) = oneshot::channel::<String>();
        drop(tx);
        assert_eq!(track_end(Some(rx)), TrackEnd::Finished);
        assert_eq!(track_end(None), TrackEnd::Finished);
    }

    #[tokio::test]
    async fn missing_binary_fails_to_play() {
        let sink = FfplaySink::new(
            PathBuf::from("/nonexistent/ffplay-for-tests"),
            TokioSpawner::current(),
        );
        let err = sink
            .play(AudioInput::File(PathBuf::from("/tmp/x.opus")), 0.5)
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Sink(_)));
        assert!(!sink.stop());
        assert!(!sink.pause());
    }
}
