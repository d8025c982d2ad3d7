//! Scoped storage for download-then-play.
//!
//! Every download lands in its own temporary directory owned by a
//! [`DownloadGuard`]. Dropping the guard deletes the directory and everything
//! in it, so the file is removed on completion, error and cancellation alike.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::constants::DOWNLOAD_DIR_PREFIX;
use crate::error::{PlaybackError, PlaybackResult};

/// Owns a scoped download directory for the lifetime of one playback attempt.
#[derive(Debug)]
pub struct DownloadGuard {
    dir: TempDir,
}

impl DownloadGuard {
    /// Creates a fresh download directory under `parent`, or the system temp dir.
    pub fn create(parent: Option<&Path>) -> PlaybackResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(DOWNLOAD_DIR_PREFIX);
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| PlaybackError::Resource(format!("cannot create download dir: {e}")))?;
        Ok(Self { dir })
    }

    /// The directory handed to [`MediaSource::download`](super::MediaSource::download).
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Checks that `file` exists, lives inside this guard's directory and is non-empty.
    pub async fn validate(&self, file: &Path) -> PlaybackResult<PathBuf> {
        if !file.starts_with(self.dir.path()) {
            return Err(PlaybackError::Resource(format!(
                "download escaped its scratch directory: {}",
                file.display()
            )));
        }
        let metadata = tokio::fs::metadata(file).await.map_err(|e| {
            PlaybackError::Resource(format!("downloaded file unreadable: {e}"))
        })?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(PlaybackError::Resource(format!(
                "downloaded file is empty: {}",
                file.display()
            )));
        }
        Ok(file.to_path_buf())
    }
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        log::debug!("[Media] Removing download dir {}", self.dir.path().display());
    }
}
