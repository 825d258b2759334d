//! Shared fixtures for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use thermotune::domain::models::{Config, CycleMetrics, HeatingType};

/// Fixed start of the heating season used by scenarios.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 6, 0, 0).unwrap()
}

pub fn config_for(heating_type: HeatingType) -> Config {
    let mut config = Config::default();
    config.zone.id = format!("{heating_type}_zone");
    config.zone.heating_type = heating_type;
    config
}

/// A completed, uninterrupted cycle; cycle `index` starts `3 h × index` after [`t0`].
#[derive(Debug, Clone)]
pub struct CycleBuilder {
    metrics: CycleMetrics,
}

impl CycleBuilder {
    pub fn new(index: i64) -> Self {
        let started_at = t0() + Duration::hours(3 * index);
        Self {
            metrics: CycleMetrics {
                started_at,
                ended_at: started_at + Duration::minutes(150),
                setpoint: 21.0,
                start_temp: 20.2,
                end_temp: 21.0,
                overshoot: 0.1,
                undershoot: 0.05,
                rise_time: Some(25.0),
                settling_time: Some(30.0),
                oscillation_count: 0,
                dead_time: Some(6.0),
                settling_mae: Some(0.10),
                inter_cycle_drift: Some(0.0),
                interrupted: None,
            },
        }
    }

    pub fn overshoot(mut self, value: f64) -> Self {
        self.metrics.overshoot = value;
        self
    }

    pub fn settling_mae(mut self, value: f64) -> Self {
        self.metrics.settling_mae = Some(value);
        self
    }

    pub fn drift(mut self, value: f64) -> Self {
        self.metrics.inter_cycle_drift = Some(value);
        self
    }

    pub fn build(self) -> CycleMetrics {
        self.metrics
    }
}
