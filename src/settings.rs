//! Engine settings.
//!
//! All fields have defaults so a minimal settings file (or none at all)
//! works. Settings are loaded from TOML and validated semantically before an
//! engine is built from them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Root settings for a configuration engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Backing file holding the configuration tree.
    pub file_path: PathBuf,

    /// Environment variable prefix for the overlay (e.g. "APP" → APP_*).
    pub env_prefix: Option<String>,

    /// Write a schema-defaulted file when the backing file is absent.
    pub create_if_missing: bool,

    /// Reject invalid candidates (true) or commit them with warnings (false).
    pub strict: bool,

    /// Rollback history size.
    pub max_backups: usize,

    /// Lifetime of cached path lookups in milliseconds.
    pub cache_ttl_ms: u64,

    /// Write every committed mutation to the backing file.
    pub persist_on_update: bool,

    /// Deadline for each listener or asynchronous validator.
    pub hook_timeout_ms: u64,

    /// Deepest nesting accepted from the backing file.
    pub max_depth: usize,

    /// Broadcast channel capacity for event subscribers.
    pub event_capacity: usize,

    /// File watcher settings.
    pub watch: WatchSettings,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Prometheus exporter bind address, disabled when unset.
    pub metrics_address: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            file_path: PathBuf::from("config.json"),
            env_prefix: None,
            create_if_missing: true,
            strict: true,
            max_backups: 10,
            cache_ttl_ms: 30_000,
            persist_on_update: true,
            hook_timeout_ms: 5_000,
            max_depth: 64,
            event_capacity: 256,
            watch: WatchSettings::default(),
            log_level: "info".to_string(),
            metrics_address: None,
        }
    }
}

impl EngineSettings {
    /// Default settings for a given backing file.
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: path.into(),
            ..Self::default()
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    /// Semantic checks serde cannot express. Returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.file_path.as_os_str().is_empty() {
            errors.push("file_path must not be empty".to_string());
        }
        if let Some(prefix) = &self.env_prefix {
            if prefix.trim_end_matches('_').is_empty() {
                errors.push("env_prefix must not be empty".to_string());
            }
        }
        if self.hook_timeout_ms == 0 {
            errors.push("hook_timeout_ms must be > 0".to_string());
        }
        if self.max_depth == 0 {
            errors.push("max_depth must be > 0".to_string());
        }
        if self.event_capacity == 0 {
            errors.push("event_capacity must be > 0".to_string());
        }
        if self.watch.enabled && self.watch.debounce_ms == 0 {
            errors.push("watch.debounce_ms must be > 0".to_string());
        }
        if self.watch.mode == WatchMode::Poll && self.watch.poll_interval_ms == 0 {
            errors.push("watch.poll_interval_ms must be > 0 in poll mode".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// How the watcher learns about file changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// OS notifications (inotify, FSEvents, ...).
    Native,
    /// Periodic metadata polling.
    Poll,
}

/// File watcher settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Start the watcher together with the engine.
    pub enabled: bool,

    pub mode: WatchMode,

    /// Quiet period that coalesces bursts of changes into one reload.
    pub debounce_ms: u64,

    /// Poll interval for [`WatchMode::Poll`].
    pub poll_interval_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: WatchMode::Native,
            debounce_ms: 200,
            poll_interval_ms: 1_000,
        }
    }
}

impl WatchSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load and validate engine settings from a TOML file.
pub fn load_settings(path: &Path) -> EngineResult<EngineSettings> {
    let content = fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: EngineSettings = toml::from_str(&content)
        .map_err(|e| EngineError::Settings(format!("{}: {e}", path.display())))?;

    settings
        .validate()
        .map_err(|errors| EngineError::Settings(errors.join(", ")))?;

    Ok(settings)
}
