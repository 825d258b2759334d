//! Inputs delivered to a zone by external collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One temperature reading with the setpoint in force when it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub measured_temp: f64,
    pub outdoor_temp: Option<f64>,
    pub setpoint: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, measured_temp: f64, setpoint: f64) -> Self {
        Self {
            timestamp,
            measured_temp,
            outdoor_temp: None,
            setpoint,
        }
    }

    pub fn with_outdoor(mut self, outdoor_temp: f64) -> Self {
        self.outdoor_temp = Some(outdoor_temp);
        self
    }

    /// Measured temperature and setpoint are usable numbers.
    ///
    /// A non-finite outdoor reading does not invalidate the sample; the
    /// outdoor term is simply dropped.
    pub fn is_finite(&self) -> bool {
        self.measured_temp.is_finite() && self.setpoint.is_finite()
    }

    pub fn usable_outdoor(&self) -> Option<f64> {
        self.outdoor_temp.filter(|t| t.is_finite())
    }
}

/// Direction of control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    #[default]
    Heat,
    Cool,
    Off,
}

impl ControlMode {
    /// +1 for heating, -1 for cooling, 0 when off.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Heat => 1.0,
            Self::Cool => -1.0,
            Self::Off => 0.0,
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::Off => "off",
        })
    }
}

/// Normalized pause input from any disturbance detector.
///
/// Detectors (open window, humidity, contact) are unified into this shape at
/// the boundary so the controller never knows which one fired.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PauseSignal {
    pub active: bool,
    pub reason: Option<String>,
    /// Suggested multiplicative integral decay per tick while paused.
    pub decay_hint: Option<f64>,
}

impl PauseSignal {
    pub fn active(reason: impl Into<String>) -> Self {
        Self {
            active: true,
            reason: Some(reason.into()),
            decay_hint: None,
        }
    }

    pub fn with_decay(mut self, decay: f64) -> Self {
        self.decay_hint = Some(decay);
        self
    }

    pub fn cleared() -> Self {
        Self::default()
    }

    /// Merge several detector outputs into one signal.
    ///
    /// Active if any is active; the strongest (smallest) decay hint wins and
    /// reasons are joined.
    pub fn merge<'a>(signals: impl IntoIterator<Item = &'a PauseSignal>) -> Self {
        let mut merged = Self::default();
        let mut reasons = Vec::new();
        for signal in signals.into_iter().filter(|s| s.active) {
            merged.active = true;
            if let Some(reason) = &signal.reason {
                reasons.push(reason.clone());
            }
            if let Some(hint) = signal.decay_hint.filter(|h| h.is_finite()) {
                merged.decay_hint = Some(merged.decay_hint.map_or(hint, |h| h.min(hint)));
            }
        }
        if !reasons.is_empty() {
            merged.reason = Some(reasons.join(","));
        }
        merged
    }
}
