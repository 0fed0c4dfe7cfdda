//! Global settings shared by every table.
//!
//! Consolidates all environment variable reads and provides validated settings.

use crate::{
    geometry::DEFAULT_DRIFT_TOLERANCE_PX,
    round::{
        DEFAULT_DRIFT_CHECK_ROUNDS, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_SCORE_DROP, MachineConfig,
    },
    schedule::Cadence,
    status::DEFAULT_STATUS_CAPACITY,
    supervisor::RecoveryPolicy,
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Settings loaded from environment variables.
///
/// Durations are kept as plain numbers so the snapshot written into the
/// session folder stays readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Root folder for session directories
    pub data_dir: PathBuf,
    /// Scores above this are implausible (0 disables the check)
    pub target_score: u32,
    /// Process CPU percentage above which cadence is slowed
    pub cpu_threshold: f32,
    /// Seconds between CPU samples
    pub cpu_sample_secs: u64,
    /// Tick interval while the table is clickable
    pub interval_normal_ms: u64,
    /// Tick interval during the terminal countdown
    pub interval_fast_ms: u64,
    /// Tick interval while results settle
    pub interval_slow_ms: u64,
    /// In-memory outcome history per table
    pub history_limit: usize,
    pub drift_check_rounds: u32,
    pub drift_tolerance_px: u32,
    /// Timeout applied to every collaborator call
    pub op_timeout_ms: u64,
    pub max_retries: u32,
    pub stuck_threshold: u32,
    /// Largest score decrease against the round start read from one sample
    pub max_score_drop: u32,
    pub status_capacity: usize,
    /// Bounds of the random delay between the team click and the confirm click
    pub confirm_delay_min_ms: u64,
    pub confirm_delay_max_ms: u64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/sessions"),
            target_score: 0,
            cpu_threshold: 80.0,
            cpu_sample_secs: 2,
            interval_normal_ms: 200,
            interval_fast_ms: 100,
            interval_slow_ms: 1000,
            history_limit: DEFAULT_HISTORY_LIMIT,
            drift_check_rounds: DEFAULT_DRIFT_CHECK_ROUNDS,
            drift_tolerance_px: DEFAULT_DRIFT_TOLERANCE_PX,
            op_timeout_ms: 5000,
            max_retries: 2,
            stuck_threshold: 3,
            max_score_drop: DEFAULT_MAX_SCORE_DROP,
            status_capacity: DEFAULT_STATUS_CAPACITY,
            confirm_delay_min_ms: 50,
            confirm_delay_max_ms: 100,
        }
    }
}

impl GlobalSettings {
    /// Load settings from environment variables
    ///
    /// # Arguments
    ///
    /// * `data_dir_override` - Optional storage root override (from CLI args)
    ///
    /// # Returns
    ///
    /// * `Result<GlobalSettings, ConfigError>` - Loaded and validated settings
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range
    pub fn from_env(data_dir_override: Option<PathBuf>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let data_dir = data_dir_override
            .or_else(|| std::env::var("TP_DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or(defaults.data_dir);

        let settings = Self {
            data_dir,
            target_score: parse_env_or("TP_TARGET_SCORE", defaults.target_score),
            cpu_threshold: parse_env_or("TP_CPU_THRESHOLD", defaults.cpu_threshold),
            cpu_sample_secs: parse_env_or("TP_CPU_SAMPLE_SECS", defaults.cpu_sample_secs),
            interval_normal_ms: parse_env_or("TP_INTERVAL_NORMAL_MS", defaults.interval_normal_ms),
            interval_fast_ms: parse_env_or("TP_INTERVAL_FAST_MS", defaults.interval_fast_ms),
            interval_slow_ms: parse_env_or("TP_INTERVAL_SLOW_MS", defaults.interval_slow_ms),
            history_limit: parse_env_or("TP_HISTORY_LIMIT", defaults.history_limit),
            drift_check_rounds: parse_env_or("TP_DRIFT_CHECK_ROUNDS", defaults.drift_check_rounds),
            drift_tolerance_px: parse_env_or("TP_DRIFT_TOLERANCE_PX", defaults.drift_tolerance_px),
            op_timeout_ms: parse_env_or("TP_OP_TIMEOUT_MS", defaults.op_timeout_ms),
            max_retries: parse_env_or("TP_MAX_RETRIES", defaults.max_retries),
            stuck_threshold: parse_env_or("TP_STUCK_THRESHOLD", defaults.stuck_threshold),
            max_score_drop: parse_env_or("TP_MAX_SCORE_DROP", defaults.max_score_drop),
            status_capacity: parse_env_or("TP_STATUS_CAPACITY", defaults.status_capacity),
            ..defaults
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading
    ///
    /// # Returns
    ///
    /// * `Result<(), ConfigError>` - Success or validation error
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cpu_threshold > 0.0 && self.cpu_threshold <= 100.0) {
            return Err(ConfigError::Invalid {
                var: "TP_CPU_THRESHOLD".to_string(),
                reason: format!("Must be within (0, 100], got {}", self.cpu_threshold),
            });
        }

        if self.cpu_sample_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "TP_CPU_SAMPLE_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        for (var, value) in [
            ("TP_INTERVAL_NORMAL_MS", self.interval_normal_ms),
            ("TP_INTERVAL_FAST_MS", self.interval_fast_ms),
            ("TP_INTERVAL_SLOW_MS", self.interval_slow_ms),
            ("TP_OP_TIMEOUT_MS", self.op_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: "Must be greater than 0".to_string(),
                });
            }
        }

        if self.interval_fast_ms > self.interval_normal_ms {
            return Err(ConfigError::Invalid {
                var: "TP_INTERVAL_FAST_MS".to_string(),
                reason: format!(
                    "Must not exceed the normal interval ({} ms)",
                    self.interval_normal_ms
                ),
            });
        }

        if self.history_limit < 3 {
            return Err(ConfigError::Invalid {
                var: "TP_HISTORY_LIMIT".to_string(),
                reason: "Must hold at least the 3 outcomes a rule looks at".to_string(),
            });
        }

        if self.drift_check_rounds == 0 {
            return Err(ConfigError::Invalid {
                var: "TP_DRIFT_CHECK_ROUNDS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.stuck_threshold == 0 {
            return Err(ConfigError::Invalid {
                var: "TP_STUCK_THRESHOLD".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.status_capacity == 0 {
            return Err(ConfigError::Invalid {
                var: "TP_STATUS_CAPACITY".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.confirm_delay_min_ms > self.confirm_delay_max_ms {
            return Err(ConfigError::Invalid {
                var: "confirm_delay_min_ms".to_string(),
                reason: format!(
                    "Must not exceed confirm_delay_max_ms ({})",
                    self.confirm_delay_max_ms
                ),
            });
        }

        Ok(())
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            target_score: self.target_score,
            max_score_drop: self.max_score_drop,
            history_limit: self.history_limit,
            drift_check_rounds: self.drift_check_rounds,
            ..MachineConfig::default()
        }
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            max_retries: self.max_retries,
            stuck_threshold: self.stuck_threshold,
            op_timeout: self.op_timeout(),
            ..RecoveryPolicy::default()
        }
    }

    pub fn cadence(&self) -> Cadence {
        Cadence {
            normal: Duration::from_millis(self.interval_normal_ms),
            fast: Duration::from_millis(self.interval_fast_ms),
            slow: Duration::from_millis(self.interval_slow_ms),
        }
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn cpu_sample_interval(&self) -> Duration {
        Duration::from_secs(self.cpu_sample_secs)
    }

    pub fn confirm_delay_range(&self) -> std::ops::RangeInclusive<u64> {
        self.confirm_delay_min_ms..=self.confirm_delay_max_ms
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error("Cannot read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = GlobalSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.cadence().normal, Duration::from_millis(200));
        assert_eq!(settings.cadence().fast, Duration::from_millis(100));
        assert_eq!(settings.cadence().slow, Duration::from_millis(1000));
        assert_eq!(settings.recovery_policy().op_timeout, Duration::from_secs(5));
        assert_eq!(settings.machine_config().max_score_drop, DEFAULT_MAX_SCORE_DROP);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid {
            var: "TP_CPU_THRESHOLD".to_string(),
            reason: "Must be within (0, 100]".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("TP_CPU_THRESHOLD"));
        assert!(msg.contains("(0, 100]"));
    }

    #[test]
    fn test_validation_cpu_threshold() {
        let settings = GlobalSettings {
            cpu_threshold: 0.0,
            ..GlobalSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { var, .. }) if var == "TP_CPU_THRESHOLD"
        ));
    }

    #[test]
    fn test_validation_interval_order() {
        let settings = GlobalSettings {
            interval_fast_ms: 500,
            ..GlobalSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_history_limit() {
        let settings = GlobalSettings {
            history_limit: 2,
            ..GlobalSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_machine_config_carries_limits() {
        let settings = GlobalSettings {
            target_score: 150,
            max_score_drop: 4,
            ..GlobalSettings::default()
        };
        let machine = settings.machine_config();
        assert_eq!(machine.target_score, 150);
        assert_eq!(machine.max_score_drop, 4);
        assert_eq!(machine.low_timer, 6);
    }

    #[test]
    fn test_settings_snapshot_is_json() {
        let json = serde_json::to_value(GlobalSettings::default()).unwrap();
        assert_eq!(json["interval_normal_ms"], 200);
        assert_eq!(json["data_dir"], "data/sessions");
    }
}
