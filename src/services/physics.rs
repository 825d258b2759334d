//! Physics-based starting gains.
//!
//! Derives a thermal time constant from zone volume, envelope quality and
//! emitter class, then scales per-type reference gains so slower zones get
//! gentler proportional action and a longer integral time.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EnvelopeClass, GainSet, HeatingType, ZoneProperties, MAX_GAIN_DRIFT};

/// Reference volume (m³) at which the volume factor is 1.
const REFERENCE_VOLUME_M3: f64 = 75.0;

/// Derivative time as a fraction of tau.
const DERIVATIVE_TIME_FRACTION: f64 = 0.1;

/// Baseline output of the physics initializer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsBaseline {
    pub gains: GainSet,
    pub tau_hours: f64,
    pub dead_time_minutes: i64,
}

impl PhysicsBaseline {
    pub fn dead_time(&self) -> Duration {
        Duration::minutes(self.dead_time_minutes)
    }

    /// Inclusive kp/ki/kd bounds allowed by the drift envelope.
    pub fn envelope(&self) -> (GainSet, GainSet) {
        let lo = 1.0 - MAX_GAIN_DRIFT;
        let hi = 1.0 + MAX_GAIN_DRIFT;
        (self.gains.scaled(lo, lo, lo), self.gains.scaled(hi, hi, hi))
    }
}

const fn base_tau_hours(heating_type: HeatingType) -> f64 {
    match heating_type {
        HeatingType::FloorHydronic => 8.0,
        HeatingType::Radiator => 4.0,
        HeatingType::Convector => 2.5,
        HeatingType::ForcedAir => 1.5,
    }
}

const fn reference_kp(heating_type: HeatingType) -> f64 {
    match heating_type {
        HeatingType::FloorHydronic => 0.25,
        HeatingType::Radiator => 0.35,
        HeatingType::Convector => 0.45,
        HeatingType::ForcedAir => 0.60,
    }
}

const fn reference_ke(heating_type: HeatingType) -> f64 {
    match heating_type {
        HeatingType::FloorHydronic => 0.015,
        HeatingType::Radiator => 0.012,
        HeatingType::Convector => 0.010,
        HeatingType::ForcedAir => 0.008,
    }
}

const fn typical_dead_time_minutes(heating_type: HeatingType) -> i64 {
    match heating_type {
        HeatingType::FloorHydronic => 45,
        HeatingType::Radiator => 10,
        HeatingType::Convector => 5,
        HeatingType::ForcedAir => 2,
    }
}

/// Better insulation slows heat loss and stretches the time constant.
const fn envelope_tau_factor(envelope: EnvelopeClass) -> f64 {
    match envelope {
        EnvelopeClass::Poor => 0.7,
        EnvelopeClass::Average => 1.0,
        EnvelopeClass::Good => 1.3,
        EnvelopeClass::Passive => 1.6,
    }
}

/// Leaky envelopes need more outdoor compensation.
const fn envelope_loss_factor(envelope: EnvelopeClass) -> f64 {
    match envelope {
        EnvelopeClass::Poor => 1.4,
        EnvelopeClass::Average => 1.0,
        EnvelopeClass::Good => 0.75,
        EnvelopeClass::Passive => 0.5,
    }
}

/// Estimated thermal time constant in hours.
pub fn estimate_tau_hours(props: &ZoneProperties) -> f64 {
    let volume_factor = (props.volume_m3() / REFERENCE_VOLUME_M3).sqrt().clamp(0.5, 2.0);
    base_tau_hours(props.heating_type) * volume_factor * envelope_tau_factor(props.envelope)
}

/// Compute baseline gains for a zone. Pure; no state.
pub fn compute_baseline(props: &ZoneProperties) -> DomainResult<PhysicsBaseline> {
    if !(props.area_m2.is_finite() && props.area_m2 > 0.0) {
        return Err(DomainError::ValidationFailed(format!(
            "area must be positive, got {}",
            props.area_m2
        )));
    }
    if !(props.ceiling_height_m.is_finite() && props.ceiling_height_m > 0.0) {
        return Err(DomainError::ValidationFailed(format!(
            "ceiling height must be positive, got {}",
            props.ceiling_height_m
        )));
    }

    let heating_type = props.heating_type;
    let tau = estimate_tau_hours(props);
    let kp = reference_kp(heating_type) * (base_tau_hours(heating_type) / tau).sqrt();
    let ki = kp / tau;
    let kd = kp * DERIVATIVE_TIME_FRACTION * tau;
    let ke = reference_ke(heating_type) * envelope_loss_factor(props.envelope);

    let gains = GainSet::new(kp, ki, kd, ke, 1.0);
    gains.validate()?;

    tracing::debug!(
        heating_type = %heating_type,
        tau_hours = tau,
        %gains,
        "computed physics baseline"
    );

    Ok(PhysicsBaseline {
        gains,
        tau_hours: tau,
        dead_time_minutes: typical_dead_time_minutes(heating_type),
    })
}
