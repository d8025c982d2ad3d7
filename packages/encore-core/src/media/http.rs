//! Direct-URL media source backed by `reqwest`.
//!
//! Suitable for references that already point at an audio file or an
//! Icecast/Shoutcast style endpoint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use tokio::io::AsyncWriteExt;

use super::{ByteStream, MediaError, MediaRef, MediaResult, MediaSource};

/// Connect timeout for media requests. The body itself is unbounded.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Fallback file name when the URL path has no usable last segment.
const DEFAULT_FILE_NAME: &str = "media";

/// Streams or downloads media straight from its URL.
#[derive(Clone)]
pub struct HttpMediaSource {
    client: Client,
}

impl HttpMediaSource {
    /// Creates a source with its own HTTP client.
    pub fn new() -> MediaResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| MediaError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    /// Creates a source sharing an existing client (connection pooling).
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get(&self, media: &MediaRef) -> MediaResult<reqwest::Response> {
        let response = self
            .client
            .get(media.as_str())
            .send()
            .await
            .map_err(|e| MediaError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::HttpStatus(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn open_stream(&self, media: &MediaRef) -> MediaResult<ByteStream> {
        let response = self.get(media).await?;
        log::debug!("[Media] HTTP stream opened for {}", media);
        Ok(response.bytes_stream().map_err(std::io::Error::other).boxed())
    }

    async fn download(&self, media: &MediaRef, destination_dir: &Path) -> MediaResult<PathBuf> {
        let response = self.get(media).await?;
        let path = destination_dir.join(file_name_for(media));
        let mut file = tokio::fs::File::create(&path).await?;

        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| MediaError::Http(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(MediaError::NoAudio(format!("{} returned an empty body", media)));
        }
        log::debug!("[Media] Downloaded {} bytes from {}", written, media);
        Ok(path)
    }
}

/// Derives a filesystem-safe file name from the URL's last path segment.
fn file_name_for(media: &MediaRef) -> String {
    let last = url::Url::parse(media.as_str())
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .unwrap_or_default();

    let sanitized: String = last
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        DEFAULT_FILE_NAME.to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(raw: &str) -> MediaRef {
        MediaRef::parse(raw, &[]).unwrap()
    }

    #[test]
    fn file_name_uses_last_segment() {
        assert_eq!(file_name_for(&media("https://cdn.test/a/b/song.mp3")), "song.mp3");
    }

    #[test]
    fn file_name_strips_unsafe_characters() {
        assert_eq!(
            file_name_for(&media("https://cdn.test/a/we%20ird$name.ogg")),
            "we20irdname.ogg"
        );
    }

    #[test]
    fn file_name_falls_back_for_bare_hosts() {
        assert_eq!(file_name_for(&media("https://radio.test/")), "media");
        assert_eq!(file_name_for(&media("https://radio.test/..")), "media");
    }
}
