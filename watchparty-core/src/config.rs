use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub sync: SyncConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Tuning knobs of the synchronization protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Viewers snap to the host position when further away than this
    pub drift_tolerance_secs: f64,
    /// How long a remote-caused play/pause is ignored by the local observers
    pub echo_suppression_ms: u64,
    /// Viewer presence announcement period while no link is accepted
    pub announce_interval_ms: u64,
    /// Upper bound of the delay before the host dials a viewer
    pub dial_jitter_ms: u64,
    /// How long a dial stays marked in flight after it was issued
    pub dial_cooldown_ms: u64,
    /// Frame rate requested from the capture pipeline
    pub capture_frame_rate: u32,
    /// How long a caller waits for the viewer to answer
    pub call_answer_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_tolerance_secs: 0.5,
            echo_suppression_ms: 300,
            announce_interval_ms: 2000,
            dial_jitter_ms: 500,
            dial_cooldown_ms: 2000,
            capture_frame_rate: 30,
            call_answer_timeout_ms: 5000,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_suppression_ms)
    }

    #[must_use]
    pub const fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    #[must_use]
    pub const fn dial_jitter(&self) -> Duration {
        Duration::from_millis(self.dial_jitter_ms)
    }

    #[must_use]
    pub const fn dial_cooldown(&self) -> Duration {
        Duration::from_millis(self.dial_cooldown_ms)
    }

    #[must_use]
    pub const fn call_answer_timeout(&self) -> Duration {
        Duration::from_millis(self.call_answer_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub max_participants_per_room: usize,
    pub max_chat_length: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_participants_per_room: 200,
            max_chat_length: 500,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // WATCHPARTY_SYNC__DRIFT_TOLERANCE_SECS, WATCHPARTY_LOGGING__LEVEL, ...
        builder = builder.add_source(
            Environment::with_prefix("WATCHPARTY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for values the protocol cannot work with.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let sync = &self.sync;

        if !(sync.drift_tolerance_secs.is_finite() && sync.drift_tolerance_secs > 0.0) {
            errors.push(format!(
                "sync.drift_tolerance_secs must be a positive number, got {}",
                sync.drift_tolerance_secs
            ));
        }
        if !(50..=2000).contains(&sync.echo_suppression_ms) {
            errors.push(format!(
                "sync.echo_suppression_ms must be within 50..=2000, got {}",
                sync.echo_suppression_ms
            ));
        }
        if sync.announce_interval_ms == 0 {
            errors.push("sync.announce_interval_ms must be greater than 0".to_string());
        }
        if sync.dial_cooldown_ms == 0 {
            errors.push("sync.dial_cooldown_ms must be greater than 0".to_string());
        }
        if sync.capture_frame_rate == 0 {
            errors.push("sync.capture_frame_rate must be greater than 0".to_string());
        }
        if sync.call_answer_timeout_ms == 0 {
            errors.push("sync.call_answer_timeout_ms must be greater than 0".to_string());
        }
        if self.relay.max_participants_per_room < 2 {
            errors.push(
                "relay.max_participants_per_room must allow a host and a viewer".to_string(),
            );
        }
        if self.relay.max_chat_length == 0 {
            errors.push("relay.max_chat_length must be greater than 0".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
