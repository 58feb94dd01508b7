//! TOML-based engine configuration.
//!
//! Stores the tunable policy knobs:
//! - Pomodoro durations and long-break cadence
//! - Reminder snooze budget and expiry window
//! - Delivery retry policy
//!
//! Configuration is stored at `~/.config/focuskit/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::StorageError;
use crate::reminder::delivery::RetryPolicy;

use super::data_dir;

/// Pomodoro schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PomodoroConfig {
    #[serde(default = "default_work_minutes")]
    pub work_minutes: u32,
    #[serde(default = "default_short_break_minutes")]
    pub short_break_minutes: u32,
    #[serde(default = "default_long_break_minutes")]
    pub long_break_minutes: u32,
    #[serde(default = "default_sessions_before_long_break")]
    pub sessions_before_long_break: u32,
}

/// Reminder policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderPolicy {
    #[serde(default = "default_max_snoozes")]
    pub max_snoozes: u32,
    /// Hours past the effective due time before a sweep may expire a
    /// reminder.
    #[serde(default = "default_expire_after_hours")]
    pub expire_after_hours: u32,
}

/// Delivery retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,
}

impl DeliveryPolicy {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
            backoff_jitter_ms: self.backoff_jitter_ms,
        }
    }
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/focuskit/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub pomodoro: PomodoroConfig,
    #[serde(default)]
    pub reminders: ReminderPolicy,
    #[serde(default)]
    pub delivery: DeliveryPolicy,
}

// Default functions
fn default_work_minutes() -> u32 {
    25
}
fn default_short_break_minutes() -> u32 {
    5
}
fn default_long_break_minutes() -> u32 {
    15
}
fn default_sessions_before_long_break() -> u32 {
    4
}
fn default_max_snoozes() -> u32 {
    3
}
fn default_expire_after_hours() -> u32 {
    24
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_jitter_ms() -> u64 {
    250
}

impl Default for PomodoroConfig {
    fn default() -> Self {
        Self {
            work_minutes: default_work_minutes(),
            short_break_minutes: default_short_break_minutes(),
            long_break_minutes: default_long_break_minutes(),
            sessions_before_long_break: default_sessions_before_long_break(),
        }
    }
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            max_snoozes: default_max_snoozes(),
            expire_after_hours: default_expire_after_hours(),
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pomodoro: PomodoroConfig::default(),
            reminders: ReminderPolicy::default(),
            delivery: DeliveryPolicy::default(),
        }
    }
}

impl EngineConfig {
    fn path() -> Result<PathBuf, StorageError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load the configuration, falling back to defaults when the file
    /// does not exist yet.
    pub fn load() -> Result<Self, StorageError> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| StorageError::QueryFailed(format!("invalid config: {e}")))
    }

    pub fn save(&self) -> Result<(), StorageError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), StorageError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StorageError::QueryFailed(format!("config serialization: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.pomodoro.work_minutes, 25);
        assert_eq!(config.reminders.max_snoozes, 3);
        assert_eq!(config.delivery.max_retries, 3);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [pomodoro]
            work_minutes = 50

            [reminders]
            max_snoozes = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.pomodoro.work_minutes, 50);
        assert_eq!(config.pomodoro.short_break_minutes, 5);
        assert_eq!(config.reminders.max_snoozes, 1);
        assert_eq!(config.reminders.expire_after_hours, 24);
        assert_eq!(config.delivery.backoff_base_ms, 500);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = EngineConfig::default();
        config.reminders.max_snoozes = 5;
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.reminders.max_snoozes, 5);
    }
}
