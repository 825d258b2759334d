//! Controller gains and the static zone properties they are derived from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::{DomainError, DomainResult};

/// Maximum relative drift of kp/ki/kd from the physics baseline.
pub const MAX_GAIN_DRIFT: f64 = 0.50;

/// The five tunable controller coefficients.
///
/// Units: `kp` is output fraction per °C, `ki` per °C·h, `kd` per °C/h,
/// `ke` per °C of indoor/outdoor difference, `kf` is a unitless multiplier
/// on the externally supplied feedforward bias.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainSet {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub ke: f64,
    #[serde(default = "default_kf")]
    pub kf: f64,
}

const fn default_kf() -> f64 {
    1.0
}

impl GainSet {
    pub const fn new(kp: f64, ki: f64, kd: f64, ke: f64, kf: f64) -> Self {
        Self { kp, ki, kd, ke, kf }
    }

    /// Check that every coefficient is finite and non-negative.
    pub fn validate(&self) -> DomainResult<()> {
        let named = [
            ("kp", self.kp),
            ("ki", self.ki),
            ("kd", self.kd),
            ("ke", self.ke),
            ("kf", self.kf),
        ];
        for (name, value) in named {
            if !value.is_finite() || value < 0.0 {
                return Err(DomainError::InvalidGains(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// True when the PID part of the set is entirely zero.
    pub fn is_pid_zero(&self) -> bool {
        self.kp == 0.0 && self.ki == 0.0 && self.kd == 0.0
    }

    /// Multiply kp/ki/kd by the given factors, leaving ke and kf alone.
    pub fn scaled(&self, kp_factor: f64, ki_factor: f64, kd_factor: f64) -> Self {
        Self {
            kp: self.kp * kp_factor,
            ki: self.ki * ki_factor,
            kd: self.kd * kd_factor,
            ke: self.ke,
            kf: self.kf,
        }
    }

    /// Largest relative deviation of kp/ki/kd from `baseline`.
    ///
    /// A zero baseline coefficient only tolerates a zero value.
    pub fn max_drift_from(&self, baseline: &Self) -> f64 {
        [
            (self.kp, baseline.kp),
            (self.ki, baseline.ki),
            (self.kd, baseline.kd),
        ]
        .into_iter()
        .map(|(value, base)| {
            if base == 0.0 {
                if value == 0.0 {
                    0.0
                } else {
                    f64::INFINITY
                }
            } else {
                ((value - base) / base).abs()
            }
        })
        .fold(0.0, f64::max)
    }

    /// Whether kp/ki/kd all sit inside the ±50% envelope around `baseline`.
    pub fn within_drift_envelope(&self, baseline: &Self) -> bool {
        // Tolerance absorbs float noise from composed multiplicative factors.
        self.max_drift_from(baseline) <= MAX_GAIN_DRIFT + 1e-9
    }
}

impl fmt::Display for GainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kp={:.4} ki={:.4} kd={:.4} ke={:.4} kf={:.2}",
            self.kp, self.ki, self.kd, self.ke, self.kf
        )
    }
}

/// Heat emitter class of the zone. Drives every per-type constant table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatingType {
    FloorHydronic,
    Radiator,
    Convector,
    ForcedAir,
}

impl HeatingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FloorHydronic => "floor_hydronic",
            Self::Radiator => "radiator",
            Self::Convector => "convector",
            Self::ForcedAir => "forced_air",
        }
    }

    pub fn all() -> [Self; 4] {
        [
            Self::FloorHydronic,
            Self::Radiator,
            Self::Convector,
            Self::ForcedAir,
        ]
    }
}

impl fmt::Display for HeatingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeatingType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "floor_hydronic" | "floor" => Ok(Self::FloorHydronic),
            "radiator" => Ok(Self::Radiator),
            "convector" => Ok(Self::Convector),
            "forced_air" => Ok(Self::ForcedAir),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown heating type: {other}"
            ))),
        }
    }
}

/// Thermal envelope (insulation) quality of the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeClass {
    Poor,
    Average,
    Good,
    Passive,
}

impl EnvelopeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Average => "average",
            Self::Good => "good",
            Self::Passive => "passive",
        }
    }
}

impl fmt::Display for EnvelopeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poor" => Ok(Self::Poor),
            "average" => Ok(Self::Average),
            "good" => Ok(Self::Good),
            "passive" => Ok(Self::Passive),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown envelope class: {other}"
            ))),
        }
    }
}

/// Static properties of a zone used to derive the physics baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneProperties {
    pub area_m2: f64,
    pub ceiling_height_m: f64,
    pub envelope: EnvelopeClass,
    pub heating_type: HeatingType,
}

impl ZoneProperties {
    pub fn volume_m3(&self) -> f64 {
        self.area_m2 * self.ceiling_height_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_negative_and_nan() {
        assert!(GainSet::new(0.3, 0.1, 0.2, 0.01, 1.0).validate().is_ok());
        assert!(GainSet::new(-0.1, 0.1, 0.2, 0.01, 1.0).validate().is_err());
        assert!(GainSet::new(0.3, f64::NAN, 0.2, 0.01, 1.0).validate().is_err());
        assert!(GainSet::new(0.3, 0.1, 0.2, 0.01, f64::INFINITY)
            .validate()
            .is_err());
    }

    #[test]
    fn test_drift_envelope() {
        let base = GainSet::new(0.4, 0.1, 0.2, 0.01, 1.0);
        assert!(base.scaled(1.5, 0.5, 1.0).within_drift_envelope(&base));
        assert!(!base.scaled(1.51, 1.0, 1.0).within_drift_envelope(&base));
        assert!(!base.scaled(1.0, 0.49, 1.0).within_drift_envelope(&base));
        // ke/kf are outside the envelope check
        let mut other = base;
        other.ke = 10.0;
        assert!(other.within_drift_envelope(&base));
    }

    #[test]
    fn test_heating_type_parse() {
        assert_eq!(
            "floor-hydronic".parse::<HeatingType>().unwrap(),
            HeatingType::FloorHydronic
        );
        assert_eq!("Radiator".parse::<HeatingType>().unwrap(), HeatingType::Radiator);
        assert!("geothermal".parse::<HeatingType>().is_err());
    }

    #[test]
    fn test_kf_defaults_when_missing() {
        let gains: GainSet =
            serde_json::from_str(r#"{"kp":0.3,"ki":0.1,"kd":0.2,"ke":0.01}"#).unwrap();
        assert!((gains.kf - 1.0).abs() < f64::EPSILON);
    }
}
