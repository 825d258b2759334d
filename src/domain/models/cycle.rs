//! Heating-cycle state and the per-cycle performance record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the cycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    #[default]
    Idle,
    Heating,
    Settling,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Settling => "settling",
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cycle was excluded from learning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum InterruptReason {
    /// A disturbance detector paused control during the cycle.
    Paused(Option<String>),
    /// The next heating demand started before settling finished.
    Preempted,
    /// The setpoint moved while the cycle was running.
    SetpointChanged,
    /// Control mode changed mid-cycle.
    ModeChanged,
    /// The sensor feed stalled mid-cycle.
    SensorStale,
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused(Some(reason)) => write!(f, "paused ({reason})"),
            Self::Paused(None) => f.write_str("paused"),
            Self::Preempted => f.write_str("preempted"),
            Self::SetpointChanged => f.write_str("setpoint changed"),
            Self::ModeChanged => f.write_str("mode changed"),
            Self::SensorStale => f.write_str("sensor stale"),
        }
    }
}

/// Performance of one completed cycle. Immutable once produced.
///
/// Temperatures are in °C, durations in minutes. Deviations are measured in
/// the direction of demand, so cooling cycles report overshoot as going too
/// cold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub setpoint: f64,
    pub start_temp: f64,
    pub end_temp: f64,
    pub overshoot: f64,
    pub undershoot: f64,
    pub rise_time: Option<f64>,
    pub settling_time: Option<f64>,
    pub oscillation_count: u32,
    pub dead_time: Option<f64>,
    pub settling_mae: Option<f64>,
    /// `start_temp` of this cycle minus `end_temp` of the previous one.
    pub inter_cycle_drift: Option<f64>,
    pub interrupted: Option<InterruptReason>,
}

impl CycleMetrics {
    /// Only uninterrupted cycles feed the learning aggregation.
    pub fn is_learnable(&self) -> bool {
        self.interrupted.is_none()
    }
}
