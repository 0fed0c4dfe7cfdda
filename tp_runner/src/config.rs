//! Runner configuration.
//!
//! Core settings come from [`GlobalSettings::from_env`]; this file holds the
//! options that only matter to the simulated run itself.

use std::{path::PathBuf, time::Duration};
use tablepilot::{
    ConfigError, GlobalSettings, MAX_TABLES, store::session::SESSION_CONFIG_FILE,
    table::RosterConfig,
};

/// Complete runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Core orchestrator settings
    pub settings: GlobalSettings,

    /// Roster file; a generated roster is used when absent
    pub roster_path: Option<PathBuf>,

    /// Number of generated tables when no roster file is given
    pub tables: usize,

    /// Simulation behavior
    pub sim: SimConfig,

    /// Stop after this long; run until Ctrl-C when `None`
    pub duration: Option<Duration>,

    /// Existing session folder to continue instead of starting a new one
    pub resume_dir: Option<PathBuf>,
}

/// Simulated surface behavior
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Probability that any single capture, reading or click fails
    pub fail_rate: f64,

    /// Length of one simulated round
    pub round_length: Duration,

    /// Simulate a surface reload this often
    pub reload_every: Option<Duration>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fail_rate: 0.0,
            round_length: Duration::from_secs(30),
            reload_every: None,
        }
    }
}

/// Values given on the command line; each overrides its environment variable
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub roster_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub tables: Option<usize>,
    pub fail_rate: Option<f64>,
    pub duration_secs: Option<u64>,
    pub reload_every_secs: Option<u64>,
    pub resume_dir: Option<PathBuf>,
}

impl RunnerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `overrides` - Values parsed from the command line
    ///
    /// # Returns
    ///
    /// * `Result<RunnerConfig, ConfigError>` - Loaded configuration or error
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range, or if the core settings are invalid
    pub fn from_env(overrides: Overrides) -> Result<Self, ConfigError> {
        let settings = GlobalSettings::from_env(overrides.data_dir)?;

        let roster_path = overrides
            .roster_path
            .or_else(|| std::env::var("TP_ROSTER").ok().map(PathBuf::from));

        let tables = overrides
            .tables
            .unwrap_or_else(|| parse_env_or("TP_SIM_TABLES", 2));

        let defaults = SimConfig::default();
        let sim = SimConfig {
            fail_rate: overrides
                .fail_rate
                .unwrap_or_else(|| parse_env_or("TP_SIM_FAIL_RATE", defaults.fail_rate)),
            round_length: Duration::from_secs(parse_env_or(
                "TP_SIM_ROUND_SECS",
                defaults.round_length.as_secs(),
            )),
            reload_every: overrides
                .reload_every_secs
                .or_else(|| std::env::var("TP_SIM_RELOAD_SECS").ok().and_then(|v| v.parse().ok()))
                .map(Duration::from_secs),
        };

        let duration = overrides
            .duration_secs
            .or_else(|| std::env::var("TP_RUN_SECS").ok().and_then(|v| v.parse().ok()))
            .map(Duration::from_secs);

        let resume_dir = overrides
            .resume_dir
            .or_else(|| std::env::var("TP_RESUME_DIR").ok().map(PathBuf::from));

        let config = Self {
            settings,
            roster_path,
            tables,
            sim,
            duration,
            resume_dir,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tables == 0 || self.tables > MAX_TABLES {
            return Err(ConfigError::Invalid {
                var: "TP_SIM_TABLES".to_string(),
                reason: format!("Must be between 1 and {MAX_TABLES}, got {}", self.tables),
            });
        }

        if !(0.0..=1.0).contains(&self.sim.fail_rate) {
            return Err(ConfigError::Invalid {
                var: "TP_SIM_FAIL_RATE".to_string(),
                reason: format!("Must be between 0 and 1, got {}", self.sim.fail_rate),
            });
        }

        if self.sim.round_length < Duration::from_secs(6) {
            return Err(ConfigError::Invalid {
                var: "TP_SIM_ROUND_SECS".to_string(),
                reason: "Rounds shorter than 6 seconds cannot be followed".to_string(),
            });
        }

        if let Some(dir) = &self.resume_dir {
            if !dir.join(SESSION_CONFIG_FILE).is_file() {
                return Err(ConfigError::Unreadable {
                    path: dir.clone(),
                    reason: format!("No {SESSION_CONFIG_FILE} in session folder"),
                });
            }
        }

        Ok(())
    }

    /// Roster from the configured file, or generated side by side
    pub fn roster(&self) -> Result<RosterConfig, ConfigError> {
        match &self.roster_path {
            Some(path) => RosterConfig::load(path),
            None => Ok(crate::sim::generated_roster(self.tables)),
        }
    }
}

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

    fn config() -> RunnerConfig {
        RunnerConfig {
            settings: GlobalSettings::default(),
            roster_path: None,
            tables: 2,
            sim: SimConfig::default(),
            duration: None,
            resume_dir: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_table_count_bounds() {
        let mut c = config();
        c.tables = 0;
        assert!(c.validate().is_err());
        c.tables = MAX_TABLES + 1;
        assert!(c.validate().is_err());
        c.tables = MAX_TABLES;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_fail_rate_bounds() {
        let mut c = config();
        c.sim.fail_rate = 1.5;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Invalid { var, .. }) if var == "TP_SIM_FAIL_RATE"
        ));
    }

    #[test]
    fn test_generated_roster_when_no_file() {
        let mut c = config();
        c.tables = 4;
        let roster = c.roster().unwrap();
        assert_eq!(roster.tables.len(), 4);
        roster.validate().unwrap();
    }

    #[test]
    fn test_roster_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        let roster = serde_json::to_string(&crate::sim::generated_roster(3)).unwrap();
        std::fs::write(&path, roster).unwrap();

        let mut c = config();
        c.roster_path = Some(path);
        assert_eq!(c.roster().unwrap().tables.len(), 3);
    }

    #[test]
    fn test_resume_dir_needs_session_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = config();
        c.resume_dir = Some(dir.path().to_path_buf());
        assert!(matches!(c.validate(), Err(ConfigError::Unreadable { .. })));

        std::fs::write(dir.path().join(SESSION_CONFIG_FILE), "{}").unwrap();
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_roster_file_missing() {
        let mut c = config();
        c.roster_path = Some(PathBuf::from("/nonexistent/roster.json"));
        assert!(matches!(c.roster(), Err(ConfigError::Unreadable { .. })));
    }
}
