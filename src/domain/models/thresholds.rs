//! Per-heating-type constant tables for convergence and auto-apply gating.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::gains::HeatingType;

/// Cycles required before confidence may rise above zero.
pub const MIN_CONFIDENCE_CYCLES: usize = 6;

/// Convergence limits for one heating type.
///
/// The first five fields decide convergence. Rise and settling time limits
/// are only consulted by the slow-response and slow-settling rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceThresholds {
    /// Limit on |inter_cycle_drift| in °C.
    pub max_inter_cycle_drift: f64,
    pub max_settling_mae: f64,
    pub max_undershoot: f64,
    pub max_overshoot: f64,
    pub max_oscillations: f64,
    pub max_rise_time_minutes: f64,
    pub max_settling_time_minutes: f64,
}

impl ConvergenceThresholds {
    pub const fn for_heating_type(heating_type: HeatingType) -> Self {
        match heating_type {
            HeatingType::FloorHydronic => Self {
                max_inter_cycle_drift: 0.30,
                max_settling_mae: 0.30,
                max_undershoot: 0.30,
                max_overshoot: 0.30,
                max_oscillations: 1.0,
                max_rise_time_minutes: 180.0,
                max_settling_time_minutes: 240.0,
            },
            HeatingType::Radiator => Self {
                max_inter_cycle_drift: 0.25,
                max_settling_mae: 0.25,
                max_undershoot: 0.25,
                max_overshoot: 0.25,
                max_oscillations: 2.0,
                max_rise_time_minutes: 60.0,
                max_settling_time_minutes: 90.0,
            },
            HeatingType::Convector => Self {
                max_inter_cycle_drift: 0.20,
                max_settling_mae: 0.20,
                max_undershoot: 0.25,
                max_overshoot: 0.20,
                max_oscillations: 2.0,
                max_rise_time_minutes: 30.0,
                max_settling_time_minutes: 45.0,
            },
            HeatingType::ForcedAir => Self {
                max_inter_cycle_drift: 0.20,
                max_settling_mae: 0.15,
                max_undershoot: 0.20,
                max_overshoot: 0.15,
                max_oscillations: 3.0,
                max_rise_time_minutes: 15.0,
                max_settling_time_minutes: 20.0,
            },
        }
    }
}

/// Gates the Governor applies before committing a learned adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoApplyLimits {
    /// Confidence (0-100) required for the first auto-apply of a zone.
    pub first_apply_confidence: f64,
    /// Confidence required once at least one apply has happened.
    pub subsequent_apply_confidence: f64,
    /// Analyzed (non-interrupted) cycles required in the window.
    pub min_cycles: usize,
    pub cooldown_hours: i64,
}

impl AutoApplyLimits {
    pub const fn for_heating_type(heating_type: HeatingType) -> Self {
        match heating_type {
            HeatingType::FloorHydronic => Self {
                first_apply_confidence: 80.0,
                subsequent_apply_confidence: 70.0,
                min_cycles: 8,
                cooldown_hours: 96,
            },
            HeatingType::Radiator => Self {
                first_apply_confidence: 70.0,
                subsequent_apply_confidence: 60.0,
                min_cycles: 8,
                cooldown_hours: 48,
            },
            HeatingType::Convector => Self {
                first_apply_confidence: 65.0,
                subsequent_apply_confidence: 55.0,
                min_cycles: 6,
                cooldown_hours: 24,
            },
            HeatingType::ForcedAir => Self {
                first_apply_confidence: 60.0,
                subsequent_apply_confidence: 50.0,
                min_cycles: 6,
                cooldown_hours: 12,
            },
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::hours(self.cooldown_hours)
    }

    /// Confidence bar for the next apply given how many have already happened.
    pub fn required_confidence(&self, applies_lifetime: u32) -> f64 {
        if applies_lifetime == 0 {
            self.first_apply_confidence
        } else {
            self.subsequent_apply_confidence
        }
    }
}
