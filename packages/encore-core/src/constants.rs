//! Default tuning values for playback orchestration.
//!
//! These are the values [`Config::default`](crate::state::Config) starts from.
//! Deployments override them through configuration.

// ─────────────────────────────────────────────────────────────────────────────
// Retry Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Retries granted to a request after its first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry (milliseconds). Doubles per retry.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;

/// Upper bound for a single retry delay (milliseconds).
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 8_000;

// ─────────────────────────────────────────────────────────────────────────────
// Transport Timing
// ─────────────────────────────────────────────────────────────────────────────

/// How long to wait for a voice connection to report readiness (milliseconds).
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;

/// Pause after tearing down a connection before opening a new one (milliseconds).
pub const DEFAULT_RECONNECT_SETTLE_MS: u64 = 1_000;

/// Pause after a track completes before the next one starts (milliseconds).
///
/// Keeps end-of-track callbacks from re-entering the transport.
pub const DEFAULT_ADVANCE_SETTLE_MS: u64 = 1_000;

/// Debounce window for membership changes before the idle check runs (milliseconds).
pub const DEFAULT_IDLE_DEBOUNCE_MS: u64 = 2_000;

// ─────────────────────────────────────────────────────────────────────────────
// Session Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Entries kept in a group's recent-history buffer.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Initial playback volume for a new session (0.0 - 1.0).
pub const DEFAULT_VOLUME: f32 = 0.15;

/// Capacity of the status event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Prefix for scoped download directories.
pub const DOWNLOAD_DIR_PREFIX: &str = "encore-dl-";
