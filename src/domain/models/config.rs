use serde::{Deserialize, Serialize};

use super::gains::{EnvelopeClass, GainSet, HeatingType, ZoneProperties};

/// Main configuration structure for a thermotune zone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Static zone description
    #[serde(default)]
    pub zone: ZoneConfig,

    /// Control output computation
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Cycle tracking and convergence analysis
    #[serde(default)]
    pub learning: LearningConfig,

    /// Auto-apply governance
    #[serde(default)]
    pub governor: GovernorConfig,

    /// State persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Zone configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ZoneConfig {
    /// Stable identifier, also the persisted state file name
    #[serde(default = "default_zone_id")]
    pub id: String,

    #[serde(default = "default_heating_type")]
    pub heating_type: HeatingType,

    /// Floor area in square meters
    #[serde(default = "default_area")]
    pub area_m2: f64,

    #[serde(default = "default_ceiling_height")]
    pub ceiling_height_m: f64,

    #[serde(default = "default_envelope")]
    pub envelope: EnvelopeClass,

    /// Replaces the physics baseline as the starting gains when set
    #[serde(default)]
    pub gains_override: Option<GainSet>,
}

fn default_zone_id() -> String {
    "zone".to_string()
}

const fn default_heating_type() -> HeatingType {
    HeatingType::Radiator
}

const fn default_area() -> f64 {
    20.0
}

const fn default_ceiling_height() -> f64 {
    2.5
}

const fn default_envelope() -> EnvelopeClass {
    EnvelopeClass::Average
}

impl ZoneConfig {
    pub fn properties(&self) -> ZoneProperties {
        ZoneProperties {
            area_m2: self.area_m2,
            ceiling_height_m: self.ceiling_height_m,
            envelope: self.envelope,
            heating_type: self.heating_type,
        }
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            id: default_zone_id(),
            heating_type: default_heating_type(),
            area_m2: default_area(),
            ceiling_height_m: default_ceiling_height(),
            envelope: default_envelope(),
            gains_override: None,
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ControllerConfig {
    #[serde(default = "default_output_min")]
    pub output_min: f64,

    #[serde(default = "default_output_max")]
    pub output_max: f64,

    /// Number of measurements the derivative slope is taken across
    #[serde(default = "default_derivative_window")]
    pub derivative_window: usize,

    /// Integral rate multiplier while dead time is active
    #[serde(default = "default_dead_time_integral_scale")]
    pub dead_time_integral_scale: f64,

    /// Seconds without a valid sample before the safety output takes over
    #[serde(default = "default_stall_window_secs")]
    pub stall_window_secs: u64,

    /// Output used while the sensor feed is stalled
    #[serde(default = "default_safety_output")]
    pub safety_output: f64,

    /// Integral decay per tick while paused when the detector gives no hint
    #[serde(default = "default_pause_decay")]
    pub pause_decay: f64,

    /// Output at or above which the actuator is asked to turn on
    #[serde(default = "default_demand_on_threshold")]
    pub demand_on_threshold: f64,

    /// Output at or below which the actuator is asked to turn off
    #[serde(default = "default_demand_off_threshold")]
    pub demand_off_threshold: f64,
}

const fn default_output_min() -> f64 {
    0.0
}

const fn default_output_max() -> f64 {
    1.0
}

const fn default_derivative_window() -> usize {
    5
}

const fn default_dead_time_integral_scale() -> f64 {
    0.25
}

const fn default_stall_window_secs() -> u64 {
    1800
}

const fn default_safety_output() -> f64 {
    0.0
}

const fn default_pause_decay() -> f64 {
    0.95
}

const fn default_demand_on_threshold() -> f64 {
    0.10
}

const fn default_demand_off_threshold() -> f64 {
    0.02
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            output_min: default_output_min(),
            output_max: default_output_max(),
            derivative_window: default_derivative_window(),
            dead_time_integral_scale: default_dead_time_integral_scale(),
            stall_window_secs: default_stall_window_secs(),
            safety_output: default_safety_output(),
            pause_decay: default_pause_decay(),
            demand_on_threshold: default_demand_on_threshold(),
            demand_off_threshold: default_demand_off_threshold(),
        }
    }
}

/// Learning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LearningConfig {
    /// Completed cycles retained (oldest evicted)
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Newest cycles considered by the convergence analysis
    #[serde(default = "default_analysis_window")]
    pub analysis_window: usize,

    /// Minutes after the actuator turns off before a cycle completes
    #[serde(default = "default_settle_minutes")]
    pub settle_minutes: i64,

    /// Samples retained per cycle
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,

    /// Band around the setpoint counted as reached/settled, in °C
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Let preempted cycles contribute partial metrics to learning
    #[serde(default)]
    pub include_preempted_cycles: bool,
}

const fn default_history_capacity() -> usize {
    50
}

const fn default_analysis_window() -> usize {
    20
}

const fn default_settle_minutes() -> i64 {
    60
}

const fn default_sample_capacity() -> usize {
    720
}

const fn default_tolerance() -> f64 {
    0.2
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            analysis_window: default_analysis_window(),
            settle_minutes: default_settle_minutes(),
            sample_capacity: default_sample_capacity(),
            tolerance: default_tolerance(),
            include_preempted_cycles: false,
        }
    }
}

/// Governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GovernorConfig {
    /// Commit learned adjustments without operator action
    #[serde(default = "default_true")]
    pub auto_apply: bool,

    #[serde(default = "default_validation_cycles")]
    pub validation_cycles: u32,

    /// Validation cycles observed before a rollback may trigger
    #[serde(default = "default_min_validation_samples")]
    pub min_validation_samples: u32,

    /// Fractional degradation of settling MAE that triggers rollback
    #[serde(default = "default_degradation_threshold")]
    pub degradation_threshold: f64,

    /// ApplyRecords retained for audit and rollback
    #[serde(default = "default_apply_history_capacity")]
    pub apply_history_capacity: usize,

    #[serde(default = "default_season_apply_limit")]
    pub season_apply_limit: u32,

    #[serde(default = "default_lifetime_apply_limit")]
    pub lifetime_apply_limit: u32,
}

const fn default_true() -> bool {
    true
}

const fn default_validation_cycles() -> u32 {
    5
}

const fn default_min_validation_samples() -> u32 {
    2
}

const fn default_degradation_threshold() -> f64 {
    0.30
}

const fn default_apply_history_capacity() -> usize {
    3
}

const fn default_season_apply_limit() -> u32 {
    5
}

const fn default_lifetime_apply_limit() -> u32 {
    20
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            auto_apply: true,
            validation_cycles: default_validation_cycles(),
            min_validation_samples: default_min_validation_samples(),
            degradation_threshold: default_degradation_threshold(),
            apply_history_capacity: default_apply_history_capacity(),
            season_apply_limit: default_season_apply_limit(),
            lifetime_apply_limit: default_lifetime_apply_limit(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PersistenceConfig {
    /// Directory holding one state file per zone
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Completed cycles between state snapshots
    #[serde(default = "default_snapshot_every_cycles")]
    pub snapshot_every_cycles: u32,
}

fn default_state_dir() -> String {
    ".thermotune/state".to_string()
}

const fn default_snapshot_every_cycles() -> u32 {
    1
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            snapshot_every_cycles: default_snapshot_every_cycles(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rotated log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}
