//! General utilities shared across the library.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use url::Url;

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Media Reference Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Reasons a user-supplied media reference is rejected at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaRefError {
    #[error("media reference is empty")]
    Empty,
    #[error("not a valid URL: {0}")]
    Malformed(String),
    #[error("unsupported URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("host '{0}' is not in the allowed host list")]
    HostNotAllowed(String),
}

/// Validates a raw media reference and returns its normalized form.
///
/// Accepts absolute `http`/`https` URLs with a host. When `allowed_hosts` is
/// non-empty, the host (or any parent domain of it) must appear in the list,
/// so `youtube.com` admits `www.youtube.com` and `music.youtube.com`.
pub fn validate_media_ref(raw: &str, allowed_hosts: &[String]) -> Result<String, MediaRefError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MediaRefError::Empty);
    }

    let url = Url::parse(trimmed).map_err(|e| MediaRefError::Malformed(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(MediaRefError::UnsupportedScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(MediaRefError::MissingHost)?
        .to_ascii_lowercase();

    if !allowed_hosts.is_empty() && !host_is_allowed(&host, allowed_hosts) {
        return Err(MediaRefError::HostNotAllowed(host));
    }

    Ok(url.to_string())
}

fn host_is_allowed(host: &str, allowed_hosts: &[String]) -> bool {
    allowed_hosts.iter().any(|allowed| {
        let allowed = allowed.trim().to_ascii_lowercase();
        host == allowed || host.ends_with(&format!(".{allowed}"))
    })
}
