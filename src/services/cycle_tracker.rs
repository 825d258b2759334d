//! Segments the continuous sample stream into heating cycles.
//!
//! IDLE → HEATING on actuator on, HEATING → SETTLING on actuator off,
//! SETTLING → IDLE when the settle period elapses or a new demand preempts
//! it. Each completed cycle yields one [`CycleMetrics`].

use chrono::{DateTime, Duration, Utc};

use crate::domain::models::{
    BoundedHistory, ControlMode, CycleMetrics, CycleState, InterruptReason, LearningConfig,
};

/// Rise over the start temperature that counts as the zone responding, in °C.
const RESPONSE_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
struct TrackedSample {
    at: DateTime<Utc>,
    temp: f64,
    phase: CycleState,
    dead_time: bool,
}

/// Cycle state machine and per-cycle sample buffer.
#[derive(Debug, Clone)]
pub struct CycleTracker {
    config: LearningConfig,
    state: CycleState,
    cycle_start_time: Option<DateTime<Utc>>,
    device_off_time: Option<DateTime<Utc>>,
    setpoint: f64,
    mode_sign: f64,
    start_temp: Option<f64>,
    samples: BoundedHistory<TrackedSample>,
    prev_cycle_end_temp: Option<f64>,
    interrupted: Option<InterruptReason>,
    last_temp: Option<f64>,
}

impl CycleTracker {
    pub fn new(config: LearningConfig) -> Self {
        let capacity = config.sample_capacity;
        Self {
            config,
            state: CycleState::Idle,
            cycle_start_time: None,
            device_off_time: None,
            setpoint: 0.0,
            mode_sign: 1.0,
            start_temp: None,
            samples: BoundedHistory::new(capacity),
            prev_cycle_end_temp: None,
            interrupted: None,
            last_temp: None,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn cycle_start_time(&self) -> Option<DateTime<Utc>> {
        self.cycle_start_time
    }

    pub fn prev_cycle_end_temp(&self) -> Option<f64> {
        self.prev_cycle_end_temp
    }

    /// Seed the drift reference, e.g. from persisted history after a restart.
    pub fn set_prev_cycle_end_temp(&mut self, temp: Option<f64>) {
        self.prev_cycle_end_temp = temp;
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.is_some()
    }

    /// Feed an actuator transition.
    ///
    /// Returns the metrics of a settling cycle that this demand preempted.
    pub fn on_actuator(
        &mut self,
        on: bool,
        at: DateTime<Utc>,
        setpoint: f64,
        mode: ControlMode,
    ) -> Option<CycleMetrics> {
        match (self.state, on) {
            (CycleState::Idle, true) => {
                self.start_cycle(at, setpoint, mode);
                None
            }
            (CycleState::Settling, true) => {
                if self.interrupted.is_none() {
                    self.interrupted = Some(InterruptReason::Preempted);
                }
                tracing::debug!("new demand preempted settling cycle");
                let metrics = self.finish_cycle(at);
                self.start_cycle(at, setpoint, mode);
                metrics
            }
            (CycleState::Heating, false) => {
                self.state = CycleState::Settling;
                self.device_off_time = Some(at);
                tracing::debug!(at = %at, "cycle entered settling");
                None
            }
            _ => None,
        }
    }

    /// Feed a valid temperature reading.
    ///
    /// Returns metrics when this sample completes the settle period.
    pub fn on_sample(
        &mut self,
        at: DateTime<Utc>,
        temp: f64,
        dead_time_active: bool,
    ) -> Option<CycleMetrics> {
        if !temp.is_finite() {
            return None;
        }
        self.last_temp = Some(temp);
        if self.state == CycleState::Idle {
            return None;
        }
        if self.start_temp.is_none() {
            self.start_temp = Some(temp);
        }
        self.samples.push(TrackedSample {
            at,
            temp,
            phase: self.state,
            dead_time: dead_time_active,
        });
        self.tick(at)
    }

    /// Complete a settling cycle whose settle period has elapsed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<CycleMetrics> {
        let off = self.device_off_time?;
        if self.state == CycleState::Settling
            && now - off >= Duration::minutes(self.config.settle_minutes)
        {
            self.finish_cycle(now)
        } else {
            None
        }
    }

    /// Flag the running cycle so it is excluded from learning.
    ///
    /// The first reason sticks. No effect while idle.
    pub fn interrupt(&mut self, reason: InterruptReason) {
        if self.state != CycleState::Idle && self.interrupted.is_none() {
            tracing::debug!(%reason, "cycle interrupted");
            self.interrupted = Some(reason);
        }
    }

    fn start_cycle(&mut self, at: DateTime<Utc>, setpoint: f64, mode: ControlMode) {
        self.state = CycleState::Heating;
        self.cycle_start_time = Some(at);
        self.device_off_time = None;
        self.setpoint = setpoint;
        self.mode_sign = if mode == ControlMode::Cool { -1.0 } else { 1.0 };
        self.interrupted = None;
        self.samples.clear();
        self.start_temp = self.last_temp;
        if let Some(temp) = self.last_temp {
            self.samples.push(TrackedSample {
                at,
                temp,
                phase: CycleState::Heating,
                dead_time: false,
            });
        }
        tracing::debug!(at = %at, setpoint, "cycle started");
    }

    fn finish_cycle(&mut self, ended_at: DateTime<Utc>) -> Option<CycleMetrics> {
        let metrics = self.compute_metrics(ended_at);
        if let Some(m) = &metrics {
            self.prev_cycle_end_temp = Some(m.end_temp);
        }
        self.state = CycleState::Idle;
        self.cycle_start_time = None;
        self.device_off_time = None;
        self.start_temp = None;
        self.interrupted = None;
        self.samples.clear();
        metrics
    }

    /// Signed deviation in the direction of demand: positive means past the setpoint.
    fn deviation(&self, temp: f64) -> f64 {
        self.mode_sign * (temp - self.setpoint)
    }

    fn compute_metrics(&self, ended_at: DateTime<Utc>) -> Option<CycleMetrics> {
        let started_at = self.cycle_start_time?;
        let start_temp = self.start_temp?;
        let samples: Vec<TrackedSample> = self.samples.iter().copied().collect();
        let end_temp = samples.last().map_or(start_temp, |s| s.temp);
        let tolerance = self.config.tolerance;

        let overshoot = samples
            .iter()
            .map(|s| self.deviation(s.temp))
            .fold(0.0, f64::max);

        let reached = samples
            .iter()
            .position(|s| self.deviation(s.temp) >= -tolerance);

        let undershoot = match reached {
            Some(idx) => samples[idx..]
                .iter()
                .map(|s| -self.deviation(s.temp))
                .fold(0.0, f64::max),
            None => samples
                .iter()
                .map(|s| -self.deviation(s.temp))
                .fold(f64::INFINITY, f64::min)
                .max(0.0),
        };

        let rise_time = reached.map(|idx| {
            let mut dead = 0.0;
            for pair in samples[..=idx].windows(2) {
                if pair[0].dead_time {
                    dead += minutes_between(pair[0].at, pair[1].at);
                }
            }
            (minutes_between(started_at, samples[idx].at) - dead).max(0.0)
        });

        let dead_time = samples
            .iter()
            .find(|s| self.mode_sign * (s.temp - start_temp) >= RESPONSE_THRESHOLD)
            .map(|s| minutes_between(started_at, s.at));

        let settling: Vec<&TrackedSample> = samples
            .iter()
            .filter(|s| s.phase == CycleState::Settling)
            .collect();

        let settling_mae = if settling.is_empty() {
            None
        } else {
            Some(
                settling.iter().map(|s| (s.temp - self.setpoint).abs()).sum::<f64>()
                    / settling.len() as f64,
            )
        };

        let mut oscillation_count = 0;
        let mut last_sign = 0.0;
        for s in &settling {
            let sign = (s.temp - self.setpoint).signum();
            if s.temp == self.setpoint {
                continue;
            }
            if last_sign != 0.0 && sign != last_sign {
                oscillation_count += 1;
            }
            last_sign = sign;
        }

        let settling_time = self.device_off_time.and_then(|off| {
            let last_outside = settling
                .iter()
                .rposition(|s| (s.temp - self.setpoint).abs() > tolerance);
            match last_outside {
                None if settling.is_empty() => None,
                None => Some(0.0),
                Some(idx) if idx + 1 == settling.len() => None,
                Some(idx) => Some(minutes_between(off, settling[idx + 1].at)),
            }
        });

        let inter_cycle_drift = self.prev_cycle_end_temp.map(|prev| start_temp - prev);

        let metrics = CycleMetrics {
            started_at,
            ended_at,
            setpoint: self.setpoint,
            start_temp,
            end_temp,
            overshoot,
            undershoot,
            rise_time,
            settling_time,
            oscillation_count,
            dead_time,
            settling_mae,
            inter_cycle_drift,
            interrupted: self.interrupted.clone(),
        };

        tracing::info!(
            overshoot = metrics.overshoot,
            undershoot = metrics.undershoot,
            settling_mae = ?metrics.settling_mae,
            oscillations = metrics.oscillation_count,
            drift = ?metrics.inter_cycle_drift,
            interrupted = ?metrics.interrupted,
            "cycle completed"
        );

        Some(metrics)
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 60.0
}
