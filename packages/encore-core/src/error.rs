//! Centralized error types for the Encore core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Separates collaborator failures (transport, media) from the playback taxonomy
//! - Classifies which failures consume the per-item retry budget

use serde::Serialize;
use thiserror::Error;

use crate::media::MediaError;
use crate::transport::TransportError;
use crate::utils::MediaRefError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for status reporting.
    fn code(&self) -> &'static str;
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::ReadyTimeout(_) => "ready_timeout",
            Self::NotConnected => "not_connected",
            Self::NoDestination => "no_destination",
            Self::Sink(_) => "sink_error",
        }
    }
}

impl ErrorCode for MediaError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_) => "http_error_status",
            Self::Process(_) => "process_failed",
            Self::Io(_) => "io_error",
            Self::NoAudio(_) => "no_audio",
        }
    }
}

impl ErrorCode for MediaRefError {
    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "empty_media_ref",
            Self::Malformed(_) => "malformed_media_ref",
            Self::UnsupportedScheme(_) => "unsupported_scheme",
            Self::MissingHost => "missing_host",
            Self::HostNotAllowed(_) => "host_not_allowed",
        }
    }
}

/// Application-wide error type for playback orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum PlaybackError {
    /// Malformed media reference, rejected at enqueue and never retried.
    #[error("Invalid media reference: {0}")]
    Validation(String),

    /// The voice transport could not become ready.
    ///
    /// Reported immediately; the connection itself is not retried.
    #[error("Voice connection failed: {0}")]
    Connection(String),

    /// Neither streaming nor download produced playable media.
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// A local resource was unusable (empty or corrupt download, temp dir failure).
    #[error("Resource error: {0}")]
    Resource(String),

    /// The audio sink rejected the input or errored mid-track.
    #[error("Playback failed: {0}")]
    Playback(String),

    /// Invalid configuration detected at bootstrap.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PlaybackError {
    /// Returns a machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Connection(_) => "connection_error",
            Self::MediaUnavailable(_) => "media_unavailable",
            Self::Resource(_) => "resource_error",
            Self::Playback(_) => "playback_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Whether this failure counts against the per-item retry budget.
    ///
    /// Validation and connection errors are surfaced without consuming it.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MediaUnavailable(_) | Self::Resource(_) | Self::Playback(_)
        )
    }
}

/// Convenient Result alias for orchestrator operations.
pub type PlaybackResult<T> = Result<T, PlaybackError>;

impl From<TransportError> for PlaybackError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Sink(msg) => Self::Playback(msg),
            other => Self::Connection(other.to_string()),
        }
    }
}

impl From<MediaError> for PlaybackError {
    fn from(err: MediaError) -> Self {
        Self::MediaUnavailable(err.to_string())
    }
}

impl From<MediaRefError> for PlaybackError {
    fn from(err: MediaRefError) -> Self {
        Self::Validation(err.to_string())
    }
}
