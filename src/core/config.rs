//! Configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HID enumeration filter
///
/// GPK firmware exposes its raw channel on the QMK vendor usage pair; the
/// filter narrows the OS device table to interfaces that speak it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HidFilterConfig {
    /// HID Usage Page
    #[serde(default = "default_usage_page")]
    pub usage_page: u16,
    /// HID Usage ID
    #[serde(default = "default_usage_id")]
    pub usage_id: u16,
}

fn default_usage_page() -> u16 {
    0xFF60
}
fn default_usage_id() -> u16 {
    0x61
}

impl Default for HidFilterConfig {
    fn default() -> Self {
        Self {
            usage_page: default_usage_page(),
            usage_id: default_usage_id(),
        }
    }
}

/// Retry, backoff, and sweep timings
///
/// Defaults are the values the firmware was tuned against. Tests inject
/// millisecond-scale copies instead of sleeping the real intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Enumeration attempts before a connect gives up
    #[serde(default = "default_enumeration_attempts")]
    pub enumeration_attempts: u32,
    /// Linear backoff step between enumeration attempts, in milliseconds
    #[serde(default = "default_enumeration_backoff")]
    pub enumeration_backoff_ms: u64,
    /// Write retries after the initial failed attempt
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    /// Linear backoff step between write retries, in milliseconds
    #[serde(default = "default_write_backoff")]
    pub write_backoff_ms: u64,
    /// Delay before the post-connect device-info probe, in milliseconds
    #[serde(default = "default_probe_delay")]
    pub probe_delay_ms: u64,
    /// Settle time after a config save before the device is touched again
    #[serde(default = "default_save_settle")]
    pub save_settle_ms: u64,
    /// How long a session may sit in INITIALIZING before being degraded
    #[serde(default = "default_init_timeout")]
    pub init_timeout_ms: u64,
    /// Health monitor sweep interval, in milliseconds
    #[serde(default = "default_health_interval")]
    pub health_interval_ms: u64,
    /// Reader thread poll timeout, in milliseconds
    #[serde(default = "default_reader_poll")]
    pub reader_poll_ms: u64,
}

fn default_enumeration_attempts() -> u32 {
    3
}
fn default_enumeration_backoff() -> u64 {
    200
}
fn default_write_retries() -> u32 {
    2
}
fn default_write_backoff() -> u64 {
    500
}
fn default_probe_delay() -> u64 {
    200
}
fn default_save_settle() -> u64 {
    500
}
fn default_init_timeout() -> u64 {
    10_000
}
fn default_health_interval() -> u64 {
    10_000
}
fn default_reader_poll() -> u64 {
    50
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            enumeration_attempts: default_enumeration_attempts(),
            enumeration_backoff_ms: default_enumeration_backoff(),
            write_retries: default_write_retries(),
            write_backoff_ms: default_write_backoff(),
            probe_delay_ms: default_probe_delay(),
            save_settle_ms: default_save_settle(),
            init_timeout_ms: default_init_timeout(),
            health_interval_ms: default_health_interval(),
            reader_poll_ms: default_reader_poll(),
        }
    }
}

impl TimingConfig {
    /// Backoff before enumeration attempt `attempt + 1` (0-based failed attempt).
    pub fn enumeration_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.enumeration_backoff_ms * (attempt + 1) as u64)
    }

    /// Backoff before write retry `attempt` (0-based retry index).
    pub fn write_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.write_backoff_ms * (attempt + 1) as u64)
    }

    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }

    pub fn save_settle(&self) -> Duration {
        Duration::from_millis(self.save_settle_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpkConfig {
    /// HID enumeration filter
    #[serde(default)]
    pub hid: HidFilterConfig,
    /// Retry and sweep timings
    #[serde(default)]
    pub timing: TimingConfig,
}

impl GpkConfig {
    /// Load configuration from the per-user config file
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, defaulting when absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            let config: GpkConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            Ok(config)
        } else {
            Ok(GpkConfig::default())
        }
    }

    /// Save configuration to the per-user config file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "gpk", "GpkCompanion")
            .context("Failed to determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Get the default configuration embedded in the binary
    pub fn default_config_str() -> &'static str {
        include_str!("../../config/default.toml")
    }
}
