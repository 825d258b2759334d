//! Offline simulation against a first-order thermal plant with transport delay.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CycleMetrics, Sample};
use crate::services::governor::{GovernorDecision, ValidationOutcome};
use crate::services::physics::PhysicsBaseline;
use crate::services::zone::{ZoneController, ZoneEvent, ZoneStatus};

/// Steady-state rise over outdoor at full output, °C.
const DEFAULT_FULL_OUTPUT_RISE: f64 = 25.0;

/// Lumped single-node zone model.
#[derive(Debug, Clone)]
pub struct ThermalPlant {
    temperature: f64,
    pub outdoor_temp: f64,
    pub tau_hours: f64,
    pub full_output_rise: f64,
    pub dead_time: Duration,
    pending: VecDeque<(DateTime<Utc>, f64)>,
    applied: f64,
}

impl ThermalPlant {
    pub fn new(
        initial_temp: f64,
        outdoor_temp: f64,
        tau_hours: f64,
        full_output_rise: f64,
        dead_time: Duration,
    ) -> Self {
        Self {
            temperature: initial_temp,
            outdoor_temp,
            tau_hours,
            full_output_rise,
            dead_time,
            pending: VecDeque::new(),
            applied: 0.0,
        }
    }

    /// Plant whose dynamics match the physics estimate for a zone.
    pub fn from_baseline(baseline: &PhysicsBaseline, initial_temp: f64, outdoor_temp: f64) -> Self {
        Self::new(
            initial_temp,
            outdoor_temp,
            baseline.tau_hours,
            DEFAULT_FULL_OUTPUT_RISE,
            baseline.dead_time(),
        )
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Advance by `dt` with `output` requested at `now`.
    ///
    /// Output reaches the zone only after the dead time has elapsed.
    pub fn step(&mut self, now: DateTime<Utc>, output: f64, dt: Duration) -> f64 {
        self.pending.push_back((now, output.clamp(0.0, 1.0)));
        while let Some(&(at, value)) = self.pending.front() {
            if at + self.dead_time > now {
                break;
            }
            self.applied = value;
            self.pending.pop_front();
        }

        let dt_hours = dt.num_seconds() as f64 / 3600.0;
        let equilibrium = self.outdoor_temp + self.full_output_rise * self.applied;
        let alpha = 1.0 - (-dt_hours / self.tau_hours).exp();
        self.temperature += (equilibrium - self.temperature) * alpha;
        self.temperature
    }
}

/// Parameters for one simulated run.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub duration: Duration,
    pub step: Duration,
    pub setpoint: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub steps: u64,
    pub final_temp: f64,
    /// Mean |setpoint − temperature| over the last quarter of the run.
    pub tail_mean_abs_error: f64,
    pub cycles: Vec<CycleMetrics>,
    pub commits: usize,
    pub rejections: usize,
    pub rollbacks: usize,
    pub status: ZoneStatus,
}

/// Drive `zone` against `plant`, one sample and one tick per step.
pub fn run_simulation(
    zone: &mut ZoneController,
    plant: &mut ThermalPlant,
    plan: &SimulationPlan,
    start: DateTime<Utc>,
    mut on_step: impl FnMut(u64),
) -> DomainResult<SimulationSummary> {
    if plan.step.num_seconds() <= 0 {
        return Err(DomainError::ValidationFailed(
            "simulation step must be at least one second".to_string(),
        ));
    }
    let total_steps = u64::try_from(plan.duration.num_seconds() / plan.step.num_seconds())
        .unwrap_or_default();
    let tail_from = total_steps - total_steps / 4;

    let mut cycles = Vec::new();
    let (mut commits, mut rejections, mut rollbacks) = (0, 0, 0);
    let (mut tail_error, mut tail_count) = (0.0, 0u64);
    let mut now = start;

    for step in 0..total_steps {
        let sample = Sample::new(now, plant.temperature(), plan.setpoint)
            .with_outdoor(plant.outdoor_temp);
        let mut outcomes = vec![zone.handle(ZoneEvent::Sample(sample))?];
        outcomes.push(zone.handle(ZoneEvent::Tick(now))?);

        for outcome in &outcomes {
            cycles.extend(outcome.completed_cycles.iter().cloned());
            for decision in &outcome.decisions {
                match decision {
                    GovernorDecision::Committed(_) => commits += 1,
                    GovernorDecision::Rejected(_) => rejections += 1,
                }
            }
            rollbacks += outcome
                .validations
                .iter()
                .filter(|v| matches!(v, ValidationOutcome::RolledBack(_)))
                .count();
        }

        let command = outcomes
            .last()
            .map(|o| o.command)
            .ok_or_else(|| DomainError::ValidationFailed("no command produced".to_string()))?;
        let drive = if command.on { command.output } else { 0.0 };
        plant.step(now, drive, plan.step);

        if step >= tail_from {
            tail_error += (plan.setpoint - plant.temperature()).abs();
            tail_count += 1;
        }
        now += plan.step;
        on_step(step + 1);
    }

    Ok(SimulationSummary {
        steps: total_steps,
        final_temp: plant.temperature(),
        tail_mean_abs_error: if tail_count > 0 {
            tail_error / tail_count as f64
        } else {
            0.0
        },
        cycles,
        commits,
        rejections,
        rollbacks,
        status: zone.status(),
    })
}
