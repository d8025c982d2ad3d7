//! Line-oriented operator console.
//!
//! Reads commands from stdin, drives the orchestrator for the selected group
//! and prints every status event as it is broadcast.

use std::sync::Arc;

use encore_core::{BootstrappedServices, MediaRef, MembershipChange, PlaybackEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;

use crate::ffplay::{FfplayTransport, BOT_MEMBER_ID};

/// Group commands apply to until `group` selects another.
pub const DEFAULT_GROUP: &str = "console";

const HELP: &str = "\
commands:
  group <id>                   select the group later commands apply to
  join <destination>           connect the group to a voice destination
  play <url>                   queue media and start playback
  skip | pause | resume        control the current track
  volume <0-100>               set the session volume
  leave [clear]                disconnect, optionally dropping the queue
  queue                        show the group's queue
  replay                       re-queue recent history
  clear [reset]                drop pending requests (reset: history and failures too)
  remove <url>                 drop one pending request
  member join|leave <dest> <id>  simulate a listener joining or leaving
  help | quit";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Group(String),
    Join(String),
    Play(String),
    Skip,
    Pause,
    Resume,
    Volume(i32),
    Leave { clear: bool },
    Queue,
    Replay,
    Clear { reset: bool },
    Remove(String),
    Member {
        joined: bool,
        destination: String,
        member_id: String,
    },
    Help,
    Quit,
}

impl Command {
    /// Parses one input line. Blank lines parse to `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("group", [id]) => Self::Group((*id).to_string()),
            ("join", [destination]) => Self::Join((*destination).to_string()),
            ("play", [url]) => Self::Play((*url).to_string()),
            ("skip", []) => Self::Skip,
            ("pause", []) => Self::Pause,
            ("resume", []) => Self::Resume,
            ("volume", [value]) => Self::Volume(
                value
                    .parse()
                    .map_err(|_| format!("volume expects a number, got '{value}'"))?,
            ),
            ("leave", []) => Self::Leave { clear: false },
            ("leave", ["clear"]) => Self::Leave { clear: true },
            ("queue", []) => Self::Queue,
            ("replay", []) => Self::Replay,
            ("clear", []) => Self::Clear { reset: false },
            ("clear", ["reset"]) => Self::Clear { reset: true },
            ("remove", [url]) => Self::Remove((*url).to_string()),
            ("member", [action @ ("join" | "leave"), destination, member_id]) => Self::Member {
                joined: *action == "join",
                destination: (*destination).to_string(),
                member_id: (*member_id).to_string(),
            },
            ("help", []) => Self::Help,
            ("quit" | "exit", []) => Self::Quit,
            (other, _) => return Err(format!("unrecognized command '{other}' (try 'help')")),
        };
        Ok(Some(command))
    }
}

/// Executes console commands against the bootstrapped services.
pub struct Console {
    services: BootstrappedServices,
    transport: Arc<FfplayTransport>,
    group: String,
}

impl Console {
    pub fn new(services: BootstrappedServices, transport: Arc<FfplayTransport>) -> Self {
        Self {
            services,
            transport,
            group: DEFAULT_GROUP.to_string(),
        }
    }

    /// Reads and executes commands until `quit` or end of input.
    pub async fn run<R>(&mut self, input: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        println!("{HELP}");
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            match Command::parse(&line) {
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command).await,
                Ok(None) => {}
                Err(e) => println!("{e}"),
            }
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command) {
        let orchestrator = &self.services.orchestrator;
        let group = self.group.as_str();

        match command {
            Command::Group(id) => {
                println!("[{id}] selected");
                self.group = id;
            }
            Command::Join(destination) => match orchestrator.join(group, &destination).await {
                Ok(()) => {
                    println!("[{group}] joined {destination}");
                    orchestrator.trigger_processing(group);
                }
                Err(e) => println!("[{group}] join failed: {e}"),
            },
            Command::Play(url) => match orchestrator.enqueue(group, &url) {
                Ok(_) => {
                    orchestrator.trigger_processing(group);
                }
                Err(e) => println!("[{group}] rejected: {e}"),
            },
            Command::Skip => report(group, "skip", orchestrator.skip(group)),
            Command::Pause => report(group, "pause", orchestrator.pause(group)),
            Command::Resume => report(group, "resume", orchestrator.resume(group)),
            Command::Volume(percent) => {
                if orchestrator.session(group).is_none() {
                    println!("[{group}] no session; join first");
                } else if orchestrator.set_volume(group, percent) {
                    println!("[{group}] volume {}", percent.clamp(0, 100));
                } else {
                    println!(
                        "[{group}] volume {} from the next track",
                        percent.clamp(0, 100)
                    );
                }
            }
            Command::Leave { clear } => {
                if !orchestrator.leave(group, clear).await {
                    println!("[{group}] not connected");
                }
            }
            Command::Queue => {
                let snapshot = orchestrator.snapshot(group);
                println!("[{group}] {:?}", snapshot.phase);
                for (i, request) in snapshot.pending.iter().enumerate() {
                    println!("  {}. {}", i + 1, request.media);
                }
                if !snapshot.history.is_empty() {
                    println!("  recent:");
                    for media in &snapshot.history {
                        println!("    {media}");
                    }
                }
                for media in &snapshot.failed {
                    println!("  failed: {media}");
                }
            }
            Command::Replay => {
                if orchestrator.restore_from_history(group) {
                    orchestrator.trigger_processing(group);
                } else {
                    println!("[{group}] nothing to replay");
                }
            }
            Command::Clear { reset } => {
                orchestrator.clear_queue(group, reset);
                println!("[{group}] queue cleared");
            }
            Command::Remove(url) => match MediaRef::parse(&url, &[]) {
                Ok(media) => report(group, "remove", orchestrator.remove(group, &media)),
                Err(e) => println!("[{group}] {e}"),
            },
            Command::Member {
                joined,
                destination,
                member_id,
            } => {
                if joined {
                    self.transport.add_member(&destination, &member_id);
                } else {
                    self.transport.remove_member(&destination, &member_id);
                }
                self.services.idle_monitor.on_membership_change(MembershipChange {
                    group_id: group.to_string(),
                    is_self: member_id == BOT_MEMBER_ID,
                    destination,
                    member_id,
                });
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
    }
}

fn report(group: &str, action: &str, applied: bool) {
    if !applied {
        println!("[{group}] nothing to {action}");
    }
}

/// Prints broadcast events until the channel closes.
pub async fn print_events(mut events: broadcast::Receiver<PlaybackEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", describe(&event)),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("[Console] Dropped {} status events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Renders an event as one console line.
pub fn describe(event: &PlaybackEvent) -> String {
    let detail = match event {
        PlaybackEvent::QueuedAt {
            media, position, ..
        } => format!("queued {media} at position {position}"),
        PlaybackEvent::Connecting { destination, .. } => format!("connecting to {destination}"),
        PlaybackEvent::ConnectionFailed { error, .. } => format!("connection failed: {error}"),
        PlaybackEvent::Streaming { media, .. } => format!("streaming {media}"),
        PlaybackEvent::Downloading { media, .. } => {
            format!("stream unavailable, downloading {media}")
        }
        PlaybackEvent::Playing { media, .. } => format!("now playing {media}"),
        PlaybackEvent::Completed { media, .. } => format!("finished {media}"),
        PlaybackEvent::Skipped { media, .. } => format!("skipped {media}"),
        PlaybackEvent::RetryScheduled {
            media,
            attempt,
            delay_ms,
            error,
            ..
        } => format!("retry {attempt} for {media} in {delay_ms}ms ({error})"),
        PlaybackEvent::PermanentFailure { media, error, .. } => {
            format!("giving up on {media}: {error}")
        }
        PlaybackEvent::QueueEmpty { .. } => "queue finished".to_string(),
        PlaybackEvent::Paused { .. } => "paused".to_string(),
        PlaybackEvent::Resumed { .. } => "resumed".to_string(),
        PlaybackEvent::Left { queue_cleared, .. } => {
            if *queue_cleared {
                "left, queue cleared".to_string()
            } else {
                "left, queue kept".to_string()
            }
        }
        PlaybackEvent::AutoLeft { destination, .. } => {
            format!("left {destination}: no listeners")
        }
    };
    format!("[{}] {}", event.group_id(), detail)
}
