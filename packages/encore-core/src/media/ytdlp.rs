//! Media source that shells out to `yt-dlp`.
//!
//! Streaming pipes `yt-dlp -o -` stdout; downloading lets `yt-dlp` write into
//! the caller's directory and returns whatever file it produced.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::process::Command;
use tokio_util::io::ReaderStream;

use super::{ByteStream, MediaError, MediaRef, MediaResult, MediaSource};
use crate::runtime::{TaskSpawner, TokioSpawner};

/// Default executable name, resolved through `PATH`.
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";

/// Format selector preferring audio-only renditions.
const FORMAT_SELECTOR: &str = "bestaudio/best";

/// Resolves references through a local `yt-dlp` installation.
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    binary: PathBuf,
    spawner: TokioSpawner,
}

impl YtDlpSource {
    /// Creates a source invoking `binary`. Exited helpers are reaped on `spawner`.
    pub fn new(binary: impl Into<PathBuf>, spawner: TokioSpawner) -> Self {
        Self {
            binary: binary.into(),
            spawner,
        }
    }

    fn stream_args(media: &MediaRef) -> Vec<String> {
        vec![
            "--quiet".into(),
            "--no-warnings".into(),
            "--no-playlist".into(),
            "-f".into(),
            FORMAT_SELECTOR.into(),
            "-o".into(),
            "-".into(),
            media.as_str().into(),
        ]
    }

    fn download_args(media: &MediaRef, destination_dir: &Path) -> Vec<String> {
        let template = destination_dir.join("%(id)s.%(ext)s");
        vec![
            "--quiet".into(),
            "--no-warnings".into(),
            "--no-playlist".into(),
            "--no-part".into(),
            "-f".into(),
            FORMAT_SELECTOR.into(),
            "-o".into(),
            template.to_string_lossy().into_owned(),
            media.as_str().into(),
        ]
    }
}

#[async_trait]
impl MediaSource for YtDlpSource {
    async fn open_stream(&self, media: &MediaRef) -> MediaResult<ByteStream> {
        let mut child = Command::new(&self.binary)
            .args(Self::stream_args(media))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::Process(format!("failed to spawn yt-dlp: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Process("yt-dlp stdout not captured".into()))?;

        // Reap the child once it exits; a dropped reader ends it via SIGPIPE.
        self.spawner.spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    log::debug!("[Media] yt-dlp stream exited with {}", status);
                }
                Err(e) => log::warn!("[Media] Failed to reap yt-dlp: {}", e),
                _ => {}
            }
        });

        // yt-dlp reports failures only by closing stdout, so wait for real bytes.
        let mut stream = Box::pin(ReaderStream::new(stdout).peekable());
        let first_chunk = match stream.as_mut().peek().await {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(MediaError::Process(format!("yt-dlp stream failed: {e}"))),
            None => Err(MediaError::NoAudio(format!("yt-dlp produced no data for {media}"))),
        };
        first_chunk.map(|()| stream as ByteStream)
    }

    async fn download(&self, media: &MediaRef, destination_dir: &Path) -> MediaResult<PathBuf> {
        let output = Command::new(&self.binary)
            .args(Self::download_args(media, destination_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MediaError::Process(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Process(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        first_file_in(destination_dir)
            .await?
            .ok_or_else(|| MediaError::NoAudio(format!("yt-dlp wrote no file for {media}")))
    }
}

/// Returns the first regular file in `dir`, if any.
async fn first_file_in(dir: &Path) -> MediaResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media() -> MediaRef {
        MediaRef::parse("https://www.youtube.com/watch?v=abc123", &[]).unwrap()
    }

    #[test]
    fn stream_args_write_to_stdout() {
        let args = YtDlpSource::stream_args(&media());
        let o = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[o + 1], "-");
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abc123");
        assert!(args.contains(&"--no-playlist".to_string()));
    }

    #[test]
    fn download_args_target_destination_dir() {
        let dir = Path::new("/tmp/encore-dl-x");
        let args = YtDlpSource::download_args(&media(), dir);
        let o = args.iter().position(|a| a == "-o").unwrap();
        assert!(args[o + 1].starts_with("/tmp/encore-dl-x"));
        assert!(args[o + 1].ends_with("%(id)s.%(ext)s"));
    }

    #[tokio::test]
    async fn first_file_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(first_file_in(dir.path()).await.unwrap(), None);

        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("abc123.webm"), b"x").unwrap();
        assert_eq!(
            first_file_in(dir.path()).await.unwrap(),
            Some(dir.path().join("abc123.webm"))
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_process_error() {
        let source = YtDlpSource::new("/nonexistent/yt-dlp-for-tests", TokioSpawner::current());
        let err = source.open_stream(&media()).await.err().unwrap();
        assert!(matches!(err, MediaError::Process(_)));
    }
}
