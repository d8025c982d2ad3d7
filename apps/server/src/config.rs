//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use encore_core::DuplicatePolicy;
use serde::Deserialize;

/// Which media backend resolves references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MediaBackend {
    /// `yt-dlp` for anything it can extract (video sites, podcasts, direct links).
    Ytdlp,
    /// Plain HTTP(S) for direct audio file links.
    Http,
}

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Media backend.
    /// Override: `ENCORE_BACKEND`
    pub backend: MediaBackend,

    /// Path to the `yt-dlp` executable.
    pub ytdlp_path: PathBuf,

    /// Path to the `ffplay` executable used for audio output.
    /// Override: `ENCORE_FFPLAY_PATH`
    pub ffplay_path: PathBuf,

    /// Retries granted to a failing request before it is skipped for good.
    /// Override: `ENCORE_MAX_RETRIES`
    pub max_retries: u32,

    /// Initial volume for new sessions, 0-100.
    /// Override: `ENCORE_DEFAULT_VOLUME`
    pub default_volume: u8,

    /// Seconds to wait after a membership change before checking for listeners.
    pub idle_debounce_secs: u64,

    /// Recent-history entries kept per group.
    pub history_capacity: usize,

    /// Treatment of media that is already queued.
    pub duplicate_policy: DuplicatePolicy,

    /// Hosts accepted for playback. Empty accepts any host.
    /// Override: `ENCORE_ALLOWED_HOSTS` (comma-separated)
    pub allowed_hosts: Vec<String>,

    /// Parent directory for temporary downloads.
    /// Override: `ENCORE_DOWNLOAD_DIR`
    pub download_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = encore_core::Config::default();
        Self {
            backend: MediaBackend::Ytdlp,
            ytdlp_path: PathBuf::from(encore_core::media::DEFAULT_YTDLP_BIN),
            ffplay_path: PathBuf::from("ffplay"),
            max_retries: core.retry.max_retries,
            default_volume: (core.default_volume * 100.0).round() as u8,
            idle_debounce_secs: core.idle_debounce_ms / 1_000,
            history_capacity: core.history_capacity,
            duplicate_policy: core.duplicate_policy,
            allowed_hosts: Vec::new(),
            download_dir: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies overrides looked up through `var` (the process environment in production).
    ///
    /// Unparseable values are ignored with a warning.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("ENCORE_BACKEND") {
            match val.to_ascii_lowercase().as_str() {
                "ytdlp" | "yt-dlp" => self.backend = MediaBackend::Ytdlp,
                "http" => self.backend = MediaBackend::Http,
                other => log::warn!("Ignoring unknown ENCORE_BACKEND '{}'", other),
            }
        }

        if let Some(val) = var("ENCORE_FFPLAY_PATH") {
            self.ffplay_path = PathBuf::from(val);
        }

        if let Some(val) = var("ENCORE_MAX_RETRIES") {
            match val.parse() {
                Ok(retries) => self.max_retries = retries,
                Err(_) => log::warn!("Ignoring invalid ENCORE_MAX_RETRIES '{}'", val),
            }
        }

        if let Some(val) = var("ENCORE_DEFAULT_VOLUME") {
            match val.parse::<u8>() {
                Ok(volume) => self.default_volume = volume.min(100),
                Err(_) => log::warn!("Ignoring invalid ENCORE_DEFAULT_VOLUME '{}'", val),
            }
        }

        if let Some(val) = var("ENCORE_ALLOWED_HOSTS") {
            self.allowed_hosts = val
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(val) = var("ENCORE_DOWNLOAD_DIR") {
            self.download_dir = Some(PathBuf::from(val));
        }
    }

    /// Converts to encore-core's Config type.
    pub fn to_core_config(&self) -> encore_core::Config {
        let mut config = encore_core::Config {
            idle_debounce_ms: self.idle_debounce_secs.saturating_mul(1_000),
            history_capacity: self.history_capacity,
            duplicate_policy: self.duplicate_policy,
            allowed_hosts: self.allowed_hosts.clone(),
            default_volume: f32::from(self.default_volume.min(100)) / 100.0,
            download_dir: self.download_dir.clone(),
            ..Default::default()
        };
        config.retry.max_retries = self.max_retries;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_produce_valid_core_config() {
        let config = ServerConfig::default();
        assert_eq!(config.backend, MediaBackend::Ytdlp);
        assert_eq!(config.default_volume, 15);

        let core = config.to_core_config();
        assert!(core.validate().is_ok());
        assert_eq!(core.retry.max_retries, 3);
        assert_eq!(core.idle_debounce_ms, 2_000);
        assert!((core.default_volume - 0.15).abs() < f32::EPSILON);
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = ServerConfig::from_yaml(
            "backend: http\nmax_retries: 5\nallowed_hosts: [media.example]\nduplicate_policy: ignore\n",
        )
        .unwrap();

        assert_eq!(config.backend, MediaBackend::Http);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.allowed_hosts, vec!["media.example"]);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Ignore);
        assert_eq!(config.history_capacity, 10);
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = ServerConfig::default();
        config.apply_overrides(env(&[
            ("ENCORE_BACKEND", "HTTP"),
            ("ENCORE_MAX_RETRIES", "1"),
            ("ENCORE_DEFAULT_VOLUME", "250"),
            ("ENCORE_ALLOWED_HOSTS", " a.example , ,b.example"),
            ("ENCORE_DOWNLOAD_DIR", "/var/tmp/encore"),
        ]));

        assert_eq!(config.backend, MediaBackend::Http);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.default_volume, 100);
        assert_eq!(config.allowed_hosts, vec!["a.example", "b.example"]);
        assert_eq!(config.download_dir, Some(PathBuf::from("/var/tmp/encore")));
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut config = ServerConfig::default();
        config.apply_overrides(env(&[
            ("ENCORE_BACKEND", "vinyl"),
            ("ENCORE_MAX_RETRIES", "many"),
        ]));

        assert_eq!(config.backend, MediaBackend::Ytdlp);
        assert_eq!(config.max_retries, 3);
    }
}
