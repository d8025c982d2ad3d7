//! Core configuration types.
//!
//! [`Config`] holds every tunable the orchestrator, queue store and idle
//! monitor read. It is constructed once at process start and handed to
//! [`bootstrap_services`](crate::bootstrap::bootstrap_services).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ADVANCE_SETTLE_MS, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS,
    DEFAULT_HISTORY_CAPACITY, DEFAULT_IDLE_DEBOUNCE_MS, DEFAULT_MAX_RETRIES,
    DEFAULT_READY_TIMEOUT_MS, DEFAULT_RECONNECT_SETTLE_MS, DEFAULT_VOLUME,
    EVENT_CHANNEL_CAPACITY,
};

/// How the queue treats a media reference that is already pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Duplicates are appended like any other request.
    #[default]
    Allow,
    /// A pending duplicate is not appended; its existing position is reported.
    Ignore,
}

/// Retry policy for media acquisition and playback failures.
///
/// Groups the retry budget with its exponential backoff schedule.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt before the item is marked failed.
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds).
    pub backoff_base_ms: u64,

    /// Maximum delay for any single retry (milliseconds).
    pub backoff_cap_ms: u64,
}

impl RetryPolicy {
    /// Returns the delay before retry number `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at `backoff_cap_ms`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_cap_ms);
        Duration::from_millis(delay)
    }

    /// Validates the policy values.
    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_base_ms == 0 {
            return Err("retry.backoff_base_ms must be >= 1".to_string());
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err("retry.backoff_cap_ms must be >= retry.backoff_base_ms".to_string());
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
        }
    }
}

/// Configuration for the Encore core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Retry
    /// Retry policy for failed playback attempts.
    pub retry: RetryPolicy,

    // Transport
    /// Timeout for a voice connection to become ready (milliseconds).
    pub ready_timeout_ms: u64,

    /// Settle delay after tearing down a connection before reconnecting (milliseconds).
    pub reconnect_settle_ms: u64,

    /// Settle delay after natural completion before advancing (milliseconds).
    pub advance_settle_ms: u64,

    /// Debounce delay before the idle monitor inspects membership (milliseconds).
    pub idle_debounce_ms: u64,

    // Queue
    /// Recent-history entries kept per group.
    pub history_capacity: usize,

    /// Treatment of media references that are already queued.
    pub duplicate_policy: DuplicatePolicy,

    /// Hosts accepted by enqueue validation. Empty accepts any http(s) host.
    pub allowed_hosts: Vec<String>,

    // Playback
    /// Initial volume for new sessions (0.0 - 1.0).
    pub default_volume: f32,

    /// Parent directory for scoped download directories.
    /// Falls back to the system temp directory when unset.
    pub download_dir: Option<PathBuf>,

    // Events
    /// Capacity of the status event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        self.retry.validate()?;
        if self.ready_timeout_ms == 0 {
            return Err("ready_timeout_ms must be >= 1".to_string());
        }
        if self.history_capacity == 0 {
            return Err("history_capacity must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err("default_volume must be within 0.0..=1.0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }

    /// Readiness timeout as a [`Duration`].
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Reconnect settle delay as a [`Duration`].
    #[must_use]
    pub fn reconnect_settle(&self) -> Duration {
        Duration::from_millis(self.reconnect_settle_ms)
    }

    /// Advance settle delay as a [`Duration`].
    #[must_use]
    pub fn advance_settle(&self) -> Duration {
        Duration::from_millis(self.advance_settle_ms)
    }

    /// Idle debounce delay as a [`Duration`].
    #[must_use]
    pub fn idle_debounce(&self) -> Duration {
        Duration::from_millis(self.idle_debounce_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            reconnect_settle_ms: DEFAULT_RECONNECT_SETTLE_MS,
            advance_settle_ms: DEFAULT_ADVANCE_SETTLE_MS,
            idle_debounce_ms: DEFAULT_IDLE_DEBOUNCE_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            duplicate_policy: DuplicatePolicy::default(),
            allowed_hosts: Vec::new(),
            default_volume: DEFAULT_VOLUME,
            download_dir: None,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}
