use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Config file read when no explicit path is given
pub const DEFAULT_CONFIG_FILE: &str = "thermotune.yaml";

/// Prefix for environment overrides; `__` separates nested keys
pub const ENV_PREFIX: &str = "THERMOTUNE_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Zone id cannot be empty")]
    EmptyZoneId,

    #[error("Invalid zone geometry: {0}")]
    InvalidZoneGeometry(String),

    #[error("Invalid gains override: {0}")]
    InvalidGainsOverride(String),

    #[error("Invalid output range [{0}, {1}]. Must satisfy 0 <= min < max <= 1")]
    InvalidOutputRange(f64, f64),

    #[error("Invalid demand thresholds: off ({off}) must be below on ({on}) and both inside the output range")]
    InvalidDemandThresholds { on: f64, off: f64 },

    #[error("Invalid dead_time_integral_scale: {0}. Must be in (0, 1]")]
    InvalidDeadTimeScale(f64),

    #[error("Invalid derivative_window: {0}. Must be at least 2")]
    InvalidDerivativeWindow(usize),

    #[error("stall_window_secs cannot be 0")]
    InvalidStallWindow,

    #[error("Invalid safety_output: {0}. Must lie within the output range")]
    InvalidSafetyOutput(f64),

    #[error("Invalid pause_decay: {0}. Must be in [0, 1]")]
    InvalidPauseDecay(f64),

    #[error("Invalid degradation_threshold: {0}. Must be in (0, 1)")]
    InvalidDegradationThreshold(f64),

    #[error("Invalid {name}: {value}. Must be at least 1")]
    InvalidCapacity { name: &'static str, value: usize },

    #[error("analysis_window ({window}) cannot exceed history_capacity ({capacity})")]
    WindowExceedsHistory { window: usize, capacity: usize },

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. `thermotune.yaml` in the working directory (optional)
    /// 3. Environment variables (THERMOTUNE_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        Self::load_with(None)
    }

    /// Same precedence as [`ConfigLoader::load`] with an explicit file in
    /// place of the default one
    pub fn load_with(path: Option<&Path>) -> Result<Config> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config: Config = Self::figment(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, ignoring the environment
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Self::figment(path.as_ref())
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(file))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let zone = &config.zone;
        if zone.id.trim().is_empty() {
            return Err(ConfigError::EmptyZoneId);
        }
        if !(zone.area_m2.is_finite() && zone.area_m2 > 0.0) {
            return Err(ConfigError::InvalidZoneGeometry(format!(
                "area_m2 must be positive, got {}",
                zone.area_m2
            )));
        }
        if !(zone.ceiling_height_m.is_finite() && zone.ceiling_height_m > 0.0) {
            return Err(ConfigError::InvalidZoneGeometry(format!(
                "ceiling_height_m must be positive, got {}",
                zone.ceiling_height_m
            )));
        }
        if let Some(gains) = &zone.gains_override {
            gains
                .validate()
                .map_err(|e| ConfigError::InvalidGainsOverride(e.to_string()))?;
        }

        // Controller
        let c = &config.controller;
        if !(0.0..=1.0).contains(&c.output_min)
            || !(0.0..=1.0).contains(&c.output_max)
            || c.output_min >= c.output_max
        {
            return Err(ConfigError::InvalidOutputRange(c.output_min, c.output_max));
        }
        if !(c.demand_off_threshold < c.demand_on_threshold
            && c.demand_off_threshold >= c.output_min
            && c.demand_on_threshold <= c.output_max)
        {
            return Err(ConfigError::InvalidDemandThresholds {
                on: c.demand_on_threshold,
                off: c.demand_off_threshold,
            });
        }
        if !(c.dead_time_integral_scale > 0.0 && c.dead_time_integral_scale <= 1.0) {
            return Err(ConfigError::InvalidDeadTimeScale(c.dead_time_integral_scale));
        }
        if c.derivative_window < 2 {
            return Err(ConfigError::InvalidDerivativeWindow(c.derivative_window));
        }
        if c.stall_window_secs == 0 {
            return Err(ConfigError::InvalidStallWindow);
        }
        if !(c.output_min..=c.output_max).contains(&c.safety_output) {
            return Err(ConfigError::InvalidSafetyOutput(c.safety_output));
        }
        if !(0.0..=1.0).contains(&c.pause_decay) {
            return Err(ConfigError::InvalidPauseDecay(c.pause_decay));
        }

        // Learning
        let l = &config.learning;
        for (name, value) in [
            ("history_capacity", l.history_capacity),
            ("analysis_window", l.analysis_window),
            ("sample_capacity", l.sample_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidCapacity { name, value });
            }
        }
        if l.analysis_window > l.history_capacity {
            return Err(ConfigError::WindowExceedsHistory {
                window: l.analysis_window,
                capacity: l.history_capacity,
            });
        }
        if l.settle_minutes <= 0 {
            return Err(ConfigError::ValidationFailed(format!(
                "settle_minutes must be positive, got {}",
                l.settle_minutes
            )));
        }
        if !(l.tolerance.is_finite() && l.tolerance > 0.0) {
            return Err(ConfigError::ValidationFailed(format!(
                "tolerance must be positive, got {}",
                l.tolerance
            )));
        }

        // Governor
        let g = &config.governor;
        if !(g.degradation_threshold > 0.0 && g.degradation_threshold < 1.0) {
            return Err(ConfigError::InvalidDegradationThreshold(
                g.degradation_threshold,
            ));
        }
        if g.validation_cycles == 0 {
            return Err(ConfigError::InvalidCapacity {
                name: "validation_cycles",
                value: 0,
            });
        }
        if g.apply_history_capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                name: "apply_history_capacity",
                value: 0,
            });
        }
        if g.min_validation_samples > g.validation_cycles {
            return Err(ConfigError::ValidationFailed(format!(
                "min_validation_samples ({}) cannot exceed validation_cycles ({})",
                g.min_validation_samples, g.validation_cycles
            )));
        }

        // Persistence
        if config.persistence.state_dir.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "persistence.state_dir cannot be empty".to_string(),
            ));
        }

        // Logging
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{GainSet, HeatingType};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.zone.id, "zone");
        assert_eq!(config.zone.heating_type, HeatingType::Radiator);
        assert_eq!(config.learning.history_capacity, 50);
        assert_eq!(config.governor.apply_history_capacity, 3);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
zone:
  id: living_room
  heating_type: floor_hydronic
  area_m2: 35.0
  envelope: good
controller:
  stall_window_secs: 900
governor:
  auto_apply: false
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.zone.id, "living_room");
        assert_eq!(config.zone.heating_type, HeatingType::FloorHydronic);
        assert!((config.zone.area_m2 - 35.0).abs() < f64::EPSILON);
        assert!((config.zone.ceiling_height_m - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.controller.stall_window_secs, 900);
        assert!(!config.governor.auto_apply);
        assert_eq!(config.governor.validation_cycles, 5);
        assert_eq!(config.logging.format, "json");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_output_range() {
        let mut config = Config::default();
        config.controller.output_min = 0.8;
        config.controller.output_max = 0.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidOutputRange(_, _))
        ));
    }

    #[test]
    fn test_validate_demand_thresholds() {
        let mut config = Config::default();
        config.controller.demand_off_threshold = 0.2;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidDemandThresholds { .. })
        ));
    }

    #[test]
    fn test_validate_dead_time_scale() {
        let mut config = Config::default();
        config.controller.dead_time_integral_scale = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidDeadTimeScale(_))
        ));
    }

    #[test]
    fn test_validate_safety_output() {
        let mut config = Config::default();
        config.controller.safety_output = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidSafetyOutput(_))
        ));
    }

    #[test]
    fn test_validate_geometry() {
        let mut config = Config::default();
        config.zone.area_m2 = -3.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidZoneGeometry(_))
        ));
    }

    #[test]
    fn test_validate_negative_override() {
        let mut config = Config::default();
        config.zone.gains_override = Some(GainSet::new(-0.1, 0.1, 0.1, 0.01, 1.0));
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidGainsOverride(_))
        ));
    }

    #[test]
    fn test_validate_window_exceeds_history() {
        let mut config = Config::default();
        config.learning.analysis_window = 60;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::WindowExceedsHistory { .. })
        ));
    }

    #[test]
    fn test_validate_degradation_threshold() {
        let mut config = Config::default();
        config.governor.degradation_threshold = 1.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidDegradationThreshold(_))
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "zone:\n  id: env_test").unwrap();
        file.flush().unwrap();
        temp_env::with_vars(
            [
                ("THERMOTUNE_ZONE__HEATING_TYPE", Some("convector")),
                ("THERMOTUNE_GOVERNOR__SEASON_APPLY_LIMIT", Some("3")),
                ("THERMOTUNE_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_with(Some(file.path())).unwrap();
                assert_eq!(config.zone.id, "env_test");
                assert_eq!(config.zone.heating_type, HeatingType::Convector);
                assert_eq!(config.governor.season_apply_limit, 3);
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "zone:\n  id: attic\n  area_m2: 12.0\nlogging:\n  level: warn\n  format: json"
        )
        .unwrap();
        file.flush().unwrap();

        temp_env::with_vars([("THERMOTUNE_LOGGING__LEVEL", Some("error"))], || {
            let config = ConfigLoader::load_with(Some(file.path())).unwrap();
            assert_eq!(config.zone.id, "attic", "File should override defaults");
            assert_eq!(config.logging.level, "error", "Env should override file");
            assert_eq!(
                config.logging.format, "json",
                "File value should persist when env is silent"
            );
            assert_eq!(config.learning.analysis_window, 20);
        });
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "controller:\n  stall_window_secs: 0").unwrap();
        file.flush().unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }
}
