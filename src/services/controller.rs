//! P+I+D+E+F output computation for one zone.
//!
//! - P acts on measurement (accumulated from measurement deltas after an
//!   initial seed), so setpoint changes never kick the output
//! - I accumulates `error × Δt_hours × ki`, throttled while dead time is
//!   active and blocked in the saturated direction
//! - D is the negative measurement slope over a short window
//! - E compensates for the indoor/outdoor difference
//! - F is an opaque external bias scaled by `kf`
//!
//! Invalid input never raises: the tick is skipped, the previous output is
//! held and a [`ControllerFault`] is reported until valid input returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ControlMode, ControllerConfig, GainSet, Sample};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Reportable input fault. Clears on the next valid sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerFault {
    /// Measured temperature or setpoint was NaN/infinite.
    InvalidMeasurement,
    /// Sample timestamp did not advance.
    NonPositiveInterval,
    /// No valid sample within the stall window.
    SensorStale,
}

impl fmt::Display for ControllerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidMeasurement => "invalid_measurement",
            Self::NonPositiveInterval => "non_positive_interval",
            Self::SensorStale => "sensor_stale",
        })
    }
}

/// Per-tick inputs that are not part of the sample itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInputs {
    pub mode: ControlMode,
    /// Heat is in transit through an unmodeled delay.
    pub dead_time_active: bool,
    /// External bias for the F term (coupled zone, scheduled preheat).
    pub feedforward: f64,
    /// A disturbance detector has paused control.
    pub paused: bool,
}

impl Default for ControlInputs {
    fn default() -> Self {
        Self {
            mode: ControlMode::Heat,
            dead_time_active: false,
            feedforward: 0.0,
            paused: false,
        }
    }
}

/// Contribution of each term on the last computed tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TermBreakdown {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

/// Mutable controller state, updated in place once per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub gains: GainSet,
    /// Accumulated `error × Δt × ki`, already in output units.
    pub integral: f64,
    pub last_error: Option<f64>,
    pub last_measurement: Option<f64>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub output: f64,
    pub dead_time_active: bool,
    /// Proportional-on-measurement accumulator; `None` reseeds on next sample.
    proportional: Option<f64>,
    last_mode: ControlMode,
    window: VecDeque<(DateTime<Utc>, f64)>,
}

/// Stateful P+I+D+E+F controller.
#[derive(Debug, Clone)]
pub struct Controller {
    config: ControllerConfig,
    state: ControllerState,
    terms: TermBreakdown,
    fault: Option<ControllerFault>,
}

impl Controller {
    pub fn new(gains: GainSet, config: ControllerConfig) -> DomainResult<Self> {
        Self::restore(gains, 0.0, config)
    }

    /// Rebuild from persisted gains and integral.
    pub fn restore(gains: GainSet, integral: f64, config: ControllerConfig) -> DomainResult<Self> {
        gains.validate()?;
        let integral = if integral.is_finite() { integral } else { 0.0 };
        let output = config.output_min;
        Ok(Self {
            state: ControllerState {
                gains,
                integral,
                last_error: None,
                last_measurement: None,
                last_timestamp: None,
                output,
                dead_time_active: false,
                proportional: None,
                last_mode: ControlMode::Heat,
                window: VecDeque::with_capacity(config.derivative_window.max(2)),
            },
            config,
            terms: TermBreakdown::default(),
            fault: None,
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn gains(&self) -> &GainSet {
        &self.state.gains
    }

    pub fn integral(&self) -> f64 {
        self.state.integral
    }

    pub fn output(&self) -> f64 {
        self.state.output
    }

    pub fn terms(&self) -> &TermBreakdown {
        &self.terms
    }

    pub fn fault(&self) -> Option<ControllerFault> {
        self.fault
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Compute the output for one sample.
    ///
    /// Returns the (possibly held) output, always within
    /// `[output_min, output_max]`.
    pub fn compute(&mut self, sample: &Sample, inputs: &ControlInputs) -> f64 {
        if !sample.is_finite() {
            return self.skip(ControllerFault::InvalidMeasurement);
        }

        let dt_hours = match self.state.last_timestamp {
            Some(last) => {
                let secs = (sample.timestamp - last).num_milliseconds() as f64 / 1000.0;
                if secs <= 0.0 {
                    return self.skip(ControllerFault::NonPositiveInterval);
                }
                // A gap longer than the stall window is not integrated across.
                let cap = self.config.stall_window_secs as f64;
                (secs <= cap).then_some(secs / SECONDS_PER_HOUR)
            }
            None => None,
        };

        if let Some(fault) = self.fault.take() {
            tracing::info!(%fault, "valid sample received, controller fault cleared");
        }

        self.state.dead_time_active = inputs.dead_time_active;
        let measured = sample.measured_temp;
        let sign = inputs.mode.sign();

        if inputs.mode != self.state.last_mode {
            self.state.proportional = None;
            self.state.last_mode = inputs.mode;
        }

        self.push_measurement(sample.timestamp, measured);

        if inputs.mode == ControlMode::Off {
            self.state.proportional = None;
            self.state.last_measurement = Some(measured);
            self.state.last_timestamp = Some(sample.timestamp);
            self.state.last_error = None;
            self.terms = TermBreakdown::default();
            self.state.output = self.config.output_min;
            return self.state.output;
        }

        let gains = self.state.gains;
        let error = sign * (sample.setpoint - measured);

        let p = match (self.state.proportional, self.state.last_measurement) {
            (Some(p), Some(last)) => p - gains.kp * sign * (measured - last),
            _ => gains.kp * error,
        };

        let d = -gains.kd * sign * self.measurement_slope();

        let e = sample
            .usable_outdoor()
            .map_or(0.0, |outdoor| gains.ke * sign * (sample.setpoint - outdoor));

        let f = if inputs.feedforward.is_finite() {
            gains.kf * inputs.feedforward
        } else {
            0.0
        };

        let mut integral = self.state.integral;
        if let (Some(dt), false) = (dt_hours, inputs.paused) {
            let rate = if inputs.dead_time_active {
                self.config.dead_time_integral_scale
            } else {
                1.0
            };
            let increment = error * dt * gains.ki * rate;
            let unclamped = p + integral + increment + d + e + f;
            let winds_up = (unclamped > self.config.output_max && increment > 0.0)
                || (unclamped < self.config.output_min && increment < 0.0);
            if !winds_up {
                integral += increment;
            }
        }

        let raw = p + integral + d + e + f;
        if !raw.is_finite() || !integral.is_finite() || !p.is_finite() {
            return self.skip(ControllerFault::InvalidMeasurement);
        }

        let output = if inputs.paused {
            self.config.output_min
        } else {
            raw.clamp(self.config.output_min, self.config.output_max)
        };

        self.state.proportional = Some(p);
        self.state.integral = integral;
        self.state.last_error = Some(error);
        self.state.last_measurement = Some(measured);
        self.state.last_timestamp = Some(sample.timestamp);
        self.state.output = output;
        self.terms = TermBreakdown {
            p,
            i: integral,
            d,
            e,
            f,
        };

        tracing::trace!(
            error,
            p,
            i = integral,
            d,
            e,
            f,
            output,
            dead_time = inputs.dead_time_active,
            "controller tick"
        );

        output
    }

    /// Multiply the integral by `factor`, clamped to `[0, 1]`.
    ///
    /// Never increases the integral's magnitude; non-finite factors are ignored.
    pub fn apply_integral_decay(&mut self, factor: f64) {
        if !factor.is_finite() {
            return;
        }
        self.state.integral *= factor.clamp(0.0, 1.0);
    }

    /// Replace the gains, zero the integral and reseed the proportional term.
    pub fn set_gains(&mut self, gains: GainSet) -> DomainResult<()> {
        gains.validate()?;
        self.state.gains = gains;
        self.reset();
        Ok(())
    }

    /// Explicit reset: integral zeroed, P reseeded, derivative history dropped.
    pub fn reset(&mut self) {
        self.state.integral = 0.0;
        self.state.proportional = None;
        self.state.last_error = None;
        self.state.window.clear();
    }

    /// Flag a sensor stall without touching the output or the integral.
    ///
    /// The next sample is treated as the first after a gap so nothing is
    /// integrated across the stall.
    pub fn mark_sensor_stale(&mut self) {
        if self.fault != Some(ControllerFault::SensorStale) {
            tracing::warn!(integral = self.state.integral, "sensor feed stalled");
        }
        self.fault = Some(ControllerFault::SensorStale);
        self.state.last_timestamp = None;
        self.state.window.clear();
    }

    /// Switch to the configured safety output after a sensor stall.
    pub fn enter_safety_output(&mut self) -> f64 {
        self.mark_sensor_stale();
        self.state.output = self
            .config
            .safety_output
            .clamp(self.config.output_min, self.config.output_max);
        self.state.output
    }

    /// Force the output to the minimum (pause, mode off) without touching the integral.
    pub fn force_min_output(&mut self) -> f64 {
        self.state.output = self.config.output_min;
        self.state.output
    }

    fn skip(&mut self, fault: ControllerFault) -> f64 {
        if self.fault != Some(fault) {
            tracing::warn!(%fault, held_output = self.state.output, "skipping controller tick");
        }
        self.fault = Some(fault);
        self.state.output
    }

    fn push_measurement(&mut self, at: DateTime<Utc>, measured: f64) {
        let cap = self.config.derivative_window.max(2);
        while self.state.window.len() >= cap {
            self.state.window.pop_front();
        }
        self.state.window.push_back((at, measured));
    }

    /// Slope across the derivative window in °C per hour.
    fn measurement_slope(&self) -> f64 {
        let (Some(first), Some(last)) = (self.state.window.front(), self.state.window.back())
        else {
            return 0.0;
        };
        let hours = (last.0 - first.0).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_HOUR;
        if hours <= 0.0 {
            return 0.0;
        }
        (last.1 - first.1) / hours
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, 6, 0, 0).unwrap()
    }

    fn gains() -> GainSet {
        GainSet::new(0.3, 0.1, 0.0, 0.0, 1.0)
    }

    fn controller() -> Controller {
        Controller::new(gains(), ControllerConfig::default()).unwrap()
    }

    fn sample(minutes: i64, temp: f64, setpoint: f64) -> Sample {
        Sample::new(t0() + Duration::minutes(minutes), temp, setpoint)
    }

    #[test]
    fn test_first_sample_is_proportional_only() {
        let mut c = controller();
        let out = c.compute(&sample(0, 19.0, 20.0), &ControlInputs::default());
        assert!((out - 0.3).abs() < 1e-12);
        assert_eq!(c.integral(), 0.0);
        assert!(c.fault().is_none());
    }

    #[test]
    fn test_integral_accumulates_error_times_hours() {
        let mut c = controller();
        let inputs = ControlInputs::default();
        c.compute(&sample(0, 19.0, 20.0), &inputs);
        c.compute(&sample(15, 19.0, 20.0), &inputs);
        c.compute(&sample(30, 19.0, 20.0), &inputs);
        // 1 °C × 0.5 h × ki 0.1
        assert!((c.integral() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_gap_longer_than_stall_window_is_not_integrated() {
        let mut c = controller();
        let inputs = ControlInputs::default();
        c.compute(&sample(0, 19.0, 20.0), &inputs);
        c.compute(&sample(15, 19.0, 20.0), &inputs);
        let before = c.integral();
        assert!(before > 0.0);

        // 31 minutes exceeds the default 30 minute stall window.
        c.compute(&sample(46, 19.0, 20.0), &inputs);
        assert_eq!(c.integral(), before);
        assert!(c.fault().is_none());

        // Integration resumes on the next regular interval.
        c.compute(&sample(61, 19.0, 20.0), &inputs);
        assert!((c.integral() - 2.0 * before).abs() < 1e-12);
    }

    #[test]
    fn test_dead_time_throttles_integral_to_quarter() {
        let mut c = controller();
        let inputs = ControlInputs {
            dead_time_active: true,
            ..Default::default()
        };
        c.compute(&sample(0, 19.0, 20.0), &inputs);
        c.compute(&sample(15, 19.0, 20.0), &inputs);
        c.compute(&sample(30, 19.0, 20.0), &inputs);
        // 0.05 at full rate, scaled by 0.25
        assert!((c.integral() - 0.0125).abs() < 1e-12);
        assert!(c.state().dead_time_active);
    }

    #[test]
    fn test_setpoint_change_does_not_kick_proportional() {
        let mut c = controller();
        let inputs = ControlInputs::default();
        c.compute(&sample(0, 19.0, 20.0), &inputs);
        let before = c.terms().p;
        c.compute(&sample(1, 19.0, 22.0), &inputs);
        assert!((c.terms().p - before).abs() < 1e-12);
    }

    #[test]
    fn test_proportional_follows_measurement() {
        let mut c = controller();
        let inputs = ControlInputs::default();
        c.compute(&sample(0, 19.0, 20.0), &inputs);
        c.compute(&sample(1, 19.5, 20.0), &inputs);
        assert!((c.terms().p - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_derivative_opposes_rising_measurement() {
        let mut c = Controller::new(
            GainSet::new(0.0, 0.0, 0.5, 0.0, 1.0),
            ControllerConfig::default(),
        )
        .unwrap();
        let inputs = ControlInputs::default();
        c.compute(&sample(0, 19.0, 20.0), &inputs);
        c.compute(&sample(30, 19.5, 20.0), &inputs);
        // slope 1 °C/h → D = -0.5
        assert!((c.terms().d + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_outdoor_term_only_with_reading() {
        let mut c = Controller::new(
            GainSet::new(0.0, 0.0, 0.0, 0.01, 1.0),
            ControllerConfig::default(),
        )
        .unwrap();
        let inputs = ControlInputs::default();
        let out = c.compute(&sample(0, 20.0, 20.0).with_outdoor(0.0), &inputs);
        assert!((out - 0.2).abs() < 1e-12);
        let out = c.compute(&sample(1, 20.0, 20.0), &inputs);
        assert!(out.abs() < 1e-12);
    }

    #[test]
    fn test_feedforward_added() {
        let mut c = Controller::new(
            GainSet::new(0.0, 0.0, 0.0, 0.0, 0.5),
            ControllerConfig::default(),
        )
        .unwrap();
        let inputs = ControlInputs {
            feedforward: 0.4,
            ..Default::default()
        };
        let out = c.compute(&sample(0, 20.0, 20.0), &inputs);
        assert!((out - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_anti_windup_blocks_growth_when_saturated() {
        let mut c = Controller::new(
            GainSet::new(2.0, 0.5, 0.0, 0.0, 1.0),
            ControllerConfig::default(),
        )
        .unwrap();
        let inputs = ControlInputs::default();
        c.compute(&sample(0, 15.0, 20.0), &inputs);
        for minute in 1..=120 {
            let out = c.compute(&sample(minute, 15.0, 20.0), &inputs);
            assert!((out - 1.0).abs() < 1e-12);
        }
        assert_eq!(c.integral(), 0.0);
    }

    #[test]
    fn test_invalid_sample_holds_output_and_flags_fault() {
        let mut c = controller();
        let inputs = ControlInputs::default();
        let first = c.compute(&sample(0, 19.0, 20.0), &inputs);
        let held = c.compute(&sample(1, f64::NAN, 20.0), &inputs);
        assert_eq!(first, held);
        assert_eq!(c.fault(), Some(ControllerFault::InvalidMeasurement));

        let held = c.compute(&sample(0, 19.0, 20.0), &inputs);
        assert_eq!(first, held);
        assert_eq!(c.fault(), Some(ControllerFault::NonPositiveInterval));

        c.compute(&sample(2, 19.0, 20.0), &inputs);
        assert!(c.fault().is_none());
    }

    #[test]
    fn test_decay_never_grows_magnitude() {
        let mut c = Controller::restore(gains(), -0.4, ControllerConfig::default()).unwrap();
        c.apply_integral_decay(1.7);
        assert!((c.integral() + 0.4).abs() < 1e-12);
        c.apply_integral_decay(0.5);
        assert!((c.integral() + 0.2).abs() < 1e-12);
        c.apply_integral_decay(f64::NAN);
        assert!((c.integral() + 0.2).abs() < 1e-12);
        c.apply_integral_decay(-3.0);
        assert_eq!(c.integral(), 0.0);
    }

    #[test]
    fn test_paused_outputs_min_and_freezes_integral() {
        let mut c = controller();
        c.compute(&sample(0, 19.0, 20.0), &ControlInputs::default());
        let paused = ControlInputs {
            paused: true,
            ..Default::default()
        };
        let out = c.compute(&sample(15, 18.0, 20.0), &paused);
        assert_eq!(out, 0.0);
        assert_eq!(c.integral(), 0.0);
    }

    #[test]
    fn test_cooling_flips_error_sign() {
        let mut c = controller();
        let inputs = ControlInputs {
            mode: ControlMode::Cool,
            ..Default::default()
        };
        let out = c.compute(&sample(0, 26.0, 24.0), &inputs);
        assert!((out - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_safety_output_keeps_integral() {
        let mut c = controller();
        let inputs = ControlInputs::default();
        c.compute(&sample(0, 19.0, 20.0), &inputs);
        c.compute(&sample(15, 19.0, 20.0), &inputs);
        let integral = c.integral();
        assert!(integral > 0.0);
        assert_eq!(c.enter_safety_output(), 0.0);
        assert_eq!(c.fault(), Some(ControllerFault::SensorStale));
        c.compute(&sample(600, 19.0, 20.0), &inputs);
        assert!(c.fault().is_none());
        assert!((c.integral() - integral).abs() < 1e-12);
    }

    #[test]
    fn test_stale_flag_leaves_output_alone() {
        let config = ControllerConfig {
            safety_output: 0.3,
            ..ControllerConfig::default()
        };
        let mut c = Controller::new(gains(), config).unwrap();
        c.compute(&sample(0, 20.0, 20.0), &ControlInputs::default());
        c.force_min_output();
        c.mark_sensor_stale();
        assert_eq!(c.fault(), Some(ControllerFault::SensorStale));
        assert_eq!(c.output(), 0.0);
        assert!((c.enter_safety_output() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_set_gains_resets_integral() {
        let mut c = Controller::restore(gains(), 0.3, ControllerConfig::default()).unwrap();
        c.set_gains(GainSet::new(0.2, 0.05, 0.0, 0.0, 1.0)).unwrap();
        assert_eq!(c.integral(), 0.0);
        assert!(c.set_gains(GainSet::new(-1.0, 0.0, 0.0, 0.0, 1.0)).is_err());
    }
}
