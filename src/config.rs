use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// Which file-open instant the rotation age is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReference {
    /// Elapsed time since the open before the current one (legacy cadence).
    PreviousOpen,
    /// Elapsed time since the current file was opened.
    CurrentOpen,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_directory: Option<String>,
    #[serde(default = "default_parameter_directory")]
    pub parameter_directory: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_timeout_threshold")]
    pub timeout_threshold: u32,
    #[serde(default = "default_reopen_backoff_ms")]
    pub reopen_backoff_ms: u64,
    #[serde(default = "default_max_destinations")]
    pub max_destinations: usize,
    #[serde(default = "default_broadcast_pattern")]
    pub broadcast_pattern: String,
    #[serde(default = "default_pacing_micros_per_byte")]
    pub pacing_micros_per_byte: u64,
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
    #[serde(default = "default_rotation_reference")]
    pub rotation_reference: RotationReference,
}

fn default_service_name() -> String {
    "aesoplite-relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_parameter_directory() -> String {
    "./params".to_string()
}

fn default_baud_rate() -> u32 {
    19200
}

// One AL frame.
fn default_frame_size() -> usize {
    34
}

// Longer than the instrument's housekeeping interval.
fn default_read_timeout_ms() -> u64 {
    5100
}

fn default_timeout_threshold() -> u32 {
    10
}

fn default_reopen_backoff_ms() -> u64 {
    1000
}

fn default_max_destinations() -> usize {
    8
}

fn default_broadcast_pattern() -> String {
    ".255".to_string()
}

fn default_pacing_micros_per_byte() -> u64 {
    100
}

fn default_heartbeat_seconds() -> u64 {
    60
}

fn default_rotation_reference() -> RotationReference {
    RotationReference::PreviousOpen
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_directory: None,
            parameter_directory: default_parameter_directory(),
            baud_rate: default_baud_rate(),
            frame_size: default_frame_size(),
            read_timeout_ms: default_read_timeout_ms(),
            timeout_threshold: default_timeout_threshold(),
            reopen_backoff_ms: default_reopen_backoff_ms(),
            max_destinations: default_max_destinations(),
            broadcast_pattern: default_broadcast_pattern(),
            pacing_micros_per_byte: default_pacing_micros_per_byte(),
            heartbeat_seconds: default_heartbeat_seconds(),
            rotation_reference: default_rotation_reference(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> &'static str {
        "config/aesoplite-relay.toml"
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref)
            .with_context(|| format!("failed to read configuration from {}", path_ref.display()))?;
        let mut config: Self = toml::from_str(&raw).with_context(|| {
            format!("failed to parse configuration from {}", path_ref.display())
        })?;
        if config.service_name.trim().is_empty() {
            config.service_name = default_service_name();
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            anyhow::bail!("frame_size must be at least one byte");
        }
        if self.read_timeout_ms == 0 {
            anyhow::bail!("read_timeout_ms must be positive");
        }
        if self.timeout_threshold == 0 {
            anyhow::bail!("timeout_threshold must be positive");
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reopen_backoff(&self) -> Duration {
        Duration::from_millis(self.reopen_backoff_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_seconds)
    }
}
