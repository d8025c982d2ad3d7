//! Media acquisition: references, the [`MediaSource`] trait and its backends.
//!
//! A [`MediaSource`] turns a validated [`MediaRef`] into playable audio using
//! one of two strategies:
//!
//! - **Streaming** ([`MediaSource::open_stream`]): a live byte stream, lowest latency.
//! - **Download** ([`MediaSource::download`]): a file written into a directory the
//!   caller owns, used as the fallback when streaming fails.
//!
//! Both are expected to be slow (network-bound) and fallible.

mod download;
mod http;
mod ytdlp;

pub use download::DownloadGuard;
pub use http::HttpMediaSource;
pub use ytdlp::{YtDlpSource, DEFAULT_YTDLP_BIN};

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::{validate_media_ref, MediaRefError};

/// A chunked audio byte stream.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Errors from media acquisition.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The HTTP request could not be sent or the body failed mid-transfer.
    #[error("HTTP request failed: {0}")]
    Http(String),
    /// The server answered with a non-success status.
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    /// An external helper process failed to start or exited unsuccessfully.
    #[error("process failed: {0}")]
    Process(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The source completed but yielded no audio.
    #[error("no audio produced: {0}")]
    NoAudio(String),
}

/// Convenient Result alias for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// A validated media reference (an absolute http/https URL).
///
/// Construct through [`MediaRef::parse`]; the inner string is always normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(String);

impl MediaRef {
    /// Validates `raw` and wraps the normalized URL.
    ///
    /// `allowed_hosts` restricts accepted hosts; pass an empty slice to accept any.
    pub fn parse(raw: &str, allowed_hosts: &[String]) -> Result<Self, MediaRefError> {
        validate_media_ref(raw, allowed_hosts).map(Self)
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MediaRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Audio handed to an [`AudioSink`](crate::transport::AudioSink).
pub enum AudioInput {
    /// Live bytes from [`MediaSource::open_stream`].
    Stream(ByteStream),
    /// A downloaded file on local disk.
    File(PathBuf),
}

impl fmt::Debug for AudioInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("AudioInput::Stream(..)"),
            Self::File(path) => f.debug_tuple("AudioInput::File").field(path).finish(),
        }
    }
}

/// Resolves media references into playable audio.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Opens a live byte stream for `media`.
    ///
    /// An `Ok` result should be playable; sources that cannot tell up front
    /// should wait for the first chunk before returning.
    async fn open_stream(&self, media: &MediaRef) -> MediaResult<ByteStream>;

    /// Downloads `media` into `destination_dir` and returns the file path.
    ///
    /// The caller owns `destination_dir` and deletes it after playback.
    async fn download(&self, media: &MediaRef, destination_dir: &Path) -> MediaResult<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_ref_normalizes_and_displays() {
        let media = MediaRef::parse("https://Media.Example/a.mp3", &[]).unwrap();
        assert_eq!(media.as_str(), "https://media.example/a.mp3");
        assert_eq!(media.to_string(), "https://media.example/a.mp3");
    }

    #[test]
    fn media_ref_serializes_as_plain_string() {
        let media = MediaRef::parse("https://media.example/a.mp3", &[]).unwrap();
        assert_eq!(
            serde_json::to_string(&media).unwrap(),
            "\"https://media.example/a.mp3\""
        );
    }

    #[test]
    fn audio_input_debug_hides_stream() {
        let input = AudioInput::Stream(Box::pin(futures::stream::empty()));
        assert_eq!(format!("{input:?}"), "AudioInput::Stream(..)");
    }
}
