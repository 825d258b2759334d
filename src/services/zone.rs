//! Per-zone pipeline.
//!
//! One `ZoneController` owns every stateful piece of a zone and processes
//! events strictly in order:
//!
//! ```text
//! Sample → Controller → CycleTracker → ConvergenceModel → RuleEngine → Governor
//!                                                                        │
//!                        Controller ◄──── set_gains (commit / rollback) ─┘
//! ```
//!
//! Nothing here does I/O. Actuator commands and persistence snapshots are
//! returned in [`ZoneOutcome`] for the runner to hand off.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ApplyRecord, Config, ControlMode, ControllerConfig, CycleMetrics, CycleState, GainSet,
    HeatingType, InterruptReason, LearningStatus, PauseSignal, PersistedZoneState, Sample,
    CURRENT_STATE_VERSION, MIN_CONFIDENCE_CYCLES,
};
use crate::domain::ports::ActuatorCommand;
use crate::services::controller::{ControlInputs, Controller, ControllerFault};
use crate::services::convergence::ConvergenceModel;
use crate::services::cycle_tracker::CycleTracker;
use crate::services::governor::{Governor, GovernorDecision, GovernorPhase, ValidationOutcome};
use crate::services::physics::{compute_baseline, PhysicsBaseline};
use crate::services::rule_engine;

/// Operator commands. They bypass rate limits but not the drift cap.
#[derive(Debug, Clone, PartialEq)]
pub enum ManualCommand {
    ForceApply { gains: GainSet, reason: String },
    ForceRollback,
    ResetToPhysics,
    ResetIntegral,
    ClearCounters,
}

/// Everything that can happen to a zone.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneEvent {
    Sample(Sample),
    Tick(DateTime<Utc>),
    SetpointChanged {
        at: DateTime<Utc>,
        setpoint: f64,
    },
    ModeChanged {
        at: DateTime<Utc>,
        mode: ControlMode,
    },
    Pause {
        at: DateTime<Utc>,
        signal: PauseSignal,
    },
    Feedforward {
        at: DateTime<Utc>,
        bias: f64,
    },
    TransportDelay {
        at: DateTime<Utc>,
        active: bool,
    },
    Manual {
        at: DateTime<Utc>,
        command: ManualCommand,
    },
}

impl ZoneEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Sample(sample) => sample.timestamp,
            Self::Tick(at)
            | Self::SetpointChanged { at, .. }
            | Self::ModeChanged { at, .. }
            | Self::Pause { at, .. }
            | Self::Feedforward { at, .. }
            | Self::TransportDelay { at, .. }
            | Self::Manual { at, .. } => *at,
        }
    }
}

/// What a completed cycle led to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CycleLearning {
    pub validation: Option<ValidationOutcome>,
    pub decision: Option<GovernorDecision>,
}

/// Result of processing one event.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneOutcome {
    pub command: ActuatorCommand,
    pub completed_cycles: Vec<CycleMetrics>,
    pub validations: Vec<ValidationOutcome>,
    pub decisions: Vec<GovernorDecision>,
    /// Learned state changed enough that it should be persisted now.
    pub snapshot_due: bool,
}

impl ZoneOutcome {
    fn new(command: ActuatorCommand) -> Self {
        Self {
            command,
            completed_cycles: Vec::new(),
            validations: Vec::new(),
            decisions: Vec::new(),
            snapshot_due: false,
        }
    }

    fn absorb(&mut self, metrics: CycleMetrics, learning: CycleLearning) {
        self.completed_cycles.push(metrics);
        self.validations.extend(learning.validation);
        self.decisions.extend(learning.decision);
    }
}

/// Read-only snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneStatus {
    pub zone_id: String,
    pub heating_type: HeatingType,
    pub output: f64,
    pub actuator_on: bool,
    pub mode: ControlMode,
    pub paused: bool,
    pub fault: Option<ControllerFault>,
    pub gains: GainSet,
    pub physics_baseline: GainSet,
    pub integral: f64,
    pub cycle_state: CycleState,
    pub learning_status: LearningStatus,
    pub confidence: f64,
    pub cycle_count: usize,
    pub converged: bool,
    pub failing_metrics: Vec<&'static str>,
    pub governor_phase: GovernorPhase,
    pub validation_cycles_remaining: u32,
    pub applies_this_season: u32,
    pub applies_lifetime: u32,
    pub apply_history: Vec<ApplyRecord>,
}

pub struct ZoneController {
    zone_id: String,
    heating_type: HeatingType,
    controller_config: ControllerConfig,
    snapshot_every: u32,
    physics: PhysicsBaseline,
    controller: Controller,
    tracker: CycleTracker,
    convergence: ConvergenceModel,
    governor: Governor,
    mode: ControlMode,
    setpoint: Option<f64>,
    pause: PauseSignal,
    feedforward: f64,
    transport_delay: bool,
    actuator_on: bool,
    actuator_on_since: Option<DateTime<Utc>>,
    last_valid_sample_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    cycles_since_snapshot: u32,
}

impl ZoneController {
    /// Fresh zone starting from physics (or overridden) gains.
    pub fn new(config: &Config, now: DateTime<Utc>) -> DomainResult<Self> {
        Self::restore(config, None, now)
    }

    /// Resume from a persisted record when it belongs to this zone and is
    /// still usable; otherwise start fresh.
    pub fn restore(
        config: &Config,
        persisted: Option<PersistedZoneState>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let zone = &config.zone;
        let physics = compute_baseline(&zone.properties())?;

        let initial = match zone.gains_override {
            Some(gains) => {
                gains.validate()?;
                if !gains.within_drift_envelope(&physics.gains) {
                    return Err(DomainError::ValidationFailed(format!(
                        "gains override {gains} is outside ±50% of physics baseline {}",
                        physics.gains
                    )));
                }
                gains
            }
            None => physics.gains,
        };

        let persisted = persisted.filter(|state| {
            let usable = state.zone_id == zone.id
                && state.heating_type == zone.heating_type
                && state.gains.validate().is_ok()
                && state.gains.within_drift_envelope(&physics.gains);
            if !usable {
                tracing::warn!(
                    zone = %zone.id,
                    stored_zone = %state.zone_id,
                    stored_type = %state.heating_type,
                    "persisted state does not match this zone, starting from physics defaults"
                );
            }
            usable
        });

        let mut tracker = CycleTracker::new(config.learning.clone());

        let (controller, convergence, governor) = match persisted {
            Some(state) => {
                tracing::info!(
                    zone = %zone.id,
                    gains = %state.gains,
                    cycles = state.cycle_history.len(),
                    saved_at = %state.saved_at,
                    "resuming from persisted state"
                );
                tracker.set_prev_cycle_end_temp(state.last_cycle_end_temp());
                let controller =
                    Controller::restore(state.gains, state.integral, config.controller.clone())?;
                let convergence = ConvergenceModel::restore(
                    zone.heating_type,
                    &config.learning,
                    state.cycle_history,
                    state.analysis_since,
                );
                let governor = Governor::restore(
                    config.governor.clone(),
                    zone.heating_type,
                    physics.gains,
                    state.counters,
                    state.apply_history,
                );
                (controller, convergence, governor)
            }
            None => (
                Controller::new(initial, config.controller.clone())?,
                ConvergenceModel::new(zone.heating_type, &config.learning),
                Governor::new(config.governor.clone(), zone.heating_type, physics.gains, now),
            ),
        };

        Ok(Self {
            zone_id: zone.id.clone(),
            heating_type: zone.heating_type,
            controller_config: config.controller.clone(),
            snapshot_every: config.persistence.snapshot_every_cycles.max(1),
            physics,
            controller,
            tracker,
            convergence,
            governor,
            mode: ControlMode::Heat,
            setpoint: None,
            pause: PauseSignal::cleared(),
            feedforward: 0.0,
            transport_delay: false,
            actuator_on: false,
            actuator_on_since: None,
            last_valid_sample_at: None,
            created_at: now,
            cycles_since_snapshot: 0,
        })
    }

    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    pub fn physics(&self) -> &PhysicsBaseline {
        &self.physics
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn tracker(&self) -> &CycleTracker {
        &self.tracker
    }

    pub fn convergence(&self) -> &ConvergenceModel {
        &self.convergence
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn actuator_on(&self) -> bool {
        self.actuator_on
    }

    /// Process one event. Only manual commands can fail.
    pub fn handle(&mut self, event: ZoneEvent) -> DomainResult<ZoneOutcome> {
        let at = event.at();
        let mut outcome = ZoneOutcome::new(self.command(at));

        match event {
            ZoneEvent::Sample(sample) => self.on_sample(&sample, &mut outcome),
            ZoneEvent::Tick(now) => self.on_tick(now, &mut outcome),
            ZoneEvent::SetpointChanged { setpoint, .. } => {
                if setpoint.is_finite() {
                    self.change_setpoint(setpoint);
                } else {
                    tracing::warn!(zone = %self.zone_id, setpoint, "ignoring non-finite setpoint");
                }
            }
            ZoneEvent::ModeChanged { at, mode } => self.on_mode(at, mode, &mut outcome),
            ZoneEvent::Pause { at, signal } => self.on_pause(at, signal, &mut outcome),
            ZoneEvent::Feedforward { bias, .. } => {
                self.feedforward = if bias.is_finite() { bias } else { 0.0 };
            }
            ZoneEvent::TransportDelay { active, .. } => self.transport_delay = active,
            ZoneEvent::Manual { at, command } => {
                self.on_manual(at, command)?;
                outcome.snapshot_due = true;
            }
        }

        if self.cycles_since_snapshot >= self.snapshot_every {
            self.cycles_since_snapshot = 0;
            outcome.snapshot_due = true;
        }
        outcome.command = self.command(at);
        Ok(outcome)
    }

    fn command(&self, at: DateTime<Utc>) -> ActuatorCommand {
        ActuatorCommand {
            issued_at: at,
            output: self.controller.output(),
            on: self.actuator_on,
        }
    }

    fn dead_time_active(&self, at: DateTime<Utc>) -> bool {
        self.transport_delay
            || self
                .actuator_on_since
                .is_some_and(|since| at - since < self.physics.dead_time())
    }

    fn on_sample(&mut self, sample: &Sample, outcome: &mut ZoneOutcome) {
        if sample.setpoint.is_finite() && self.setpoint != Some(sample.setpoint) {
            self.change_setpoint(sample.setpoint);
        }

        let inputs = ControlInputs {
            mode: self.mode,
            dead_time_active: self.dead_time_active(sample.timestamp),
            feedforward: self.feedforward,
            paused: self.pause.active,
        };
        self.controller.compute(sample, &inputs);

        if matches!(
            self.controller.fault(),
            Some(ControllerFault::InvalidMeasurement | ControllerFault::NonPositiveInterval)
        ) {
            return;
        }
        self.last_valid_sample_at = Some(sample.timestamp);

        if let Some(metrics) =
            self.tracker
                .on_sample(sample.timestamp, sample.measured_temp, inputs.dead_time_active)
        {
            let learning = self.record_cycle(metrics.clone(), sample.timestamp);
            outcome.absorb(metrics, learning);
        }
        self.update_demand(sample.timestamp, outcome);
    }

    fn on_tick(&mut self, now: DateTime<Utc>, outcome: &mut ZoneOutcome) {
        let reference = self.last_valid_sample_at.unwrap_or(self.created_at);
        let stall_secs = i64::try_from(self.controller_config.stall_window_secs).unwrap_or(i64::MAX);
        if (now - reference).num_seconds() > stall_secs {
            if self.controller.fault() != Some(ControllerFault::SensorStale) {
                self.tracker.interrupt(InterruptReason::SensorStale);
            }
            if self.pause.active || self.mode == ControlMode::Off {
                self.controller.mark_sensor_stale();
                self.controller.force_min_output();
            } else {
                self.controller.enter_safety_output();
            }
        }

        if self.pause.active {
            let factor = self
                .pause
                .decay_hint
                .unwrap_or(self.controller_config.pause_decay);
            self.controller.apply_integral_decay(factor);
        }

        if let Some(metrics) = self.tracker.tick(now) {
            let learning = self.record_cycle(metrics.clone(), now);
            outcome.absorb(metrics, learning);
        }
        self.update_demand(now, outcome);
    }

    fn change_setpoint(&mut self, setpoint: f64) {
        if self.setpoint.is_some() {
            self.tracker.interrupt(InterruptReason::SetpointChanged);
            tracing::debug!(zone = %self.zone_id, setpoint, "setpoint changed");
        }
        self.setpoint = Some(setpoint);
    }

    fn on_mode(&mut self, at: DateTime<Utc>, mode: ControlMode, outcome: &mut ZoneOutcome) {
        if mode == self.mode {
            return;
        }
        tracing::info!(zone = %self.zone_id, from = ?self.mode, to = ?mode, "control mode changed");
        self.tracker.interrupt(InterruptReason::ModeChanged);
        self.mode = mode;
        if mode == ControlMode::Off {
            self.controller.force_min_output();
        }
        self.update_demand(at, outcome);
    }

    fn on_pause(&mut self, at: DateTime<Utc>, signal: PauseSignal, outcome: &mut ZoneOutcome) {
        if signal.active {
            if !self.pause.active {
                tracing::info!(
                    zone = %self.zone_id,
                    reason = signal.reason.as_deref().unwrap_or("unspecified"),
                    "control paused"
                );
            }
            self.tracker
                .interrupt(InterruptReason::Paused(signal.reason.clone()));
            self.controller.force_min_output();
        } else if self.pause.active {
            tracing::info!(zone = %self.zone_id, "control resumed");
        }
        self.pause = signal;
        self.update_demand(at, outcome);
    }

    fn on_manual(&mut self, at: DateTime<Utc>, command: ManualCommand) -> DomainResult<()> {
        let current = *self.controller.gains();
        match command {
            ManualCommand::ForceApply { gains, reason } => {
                let report = self.convergence.evaluate();
                let record = self.governor.force_apply(gains, reason, &current, &report, at)?;
                self.commit_gains(record.new_gains, at);
            }
            ManualCommand::ForceRollback => {
                let event = self.governor.force_rollback(at)?;
                self.commit_gains(event.restored_gains, at);
            }
            ManualCommand::ResetToPhysics => {
                let record = self.governor.reset_to_baseline(&current, at);
                self.commit_gains(record.new_gains, at);
            }
            ManualCommand::ResetIntegral => {
                tracing::info!(zone = %self.zone_id, "integral reset by operator");
                self.controller.reset();
            }
            ManualCommand::ClearCounters => self.governor.clear_counters(at),
        }
        Ok(())
    }

    /// Turn the actuator on or off with hysteresis on the output.
    fn update_demand(&mut self, at: DateTime<Utc>, outcome: &mut ZoneOutcome) {
        let output = self.controller.output();
        let cfg = &self.controller_config;
        let want = if self.pause.active || self.mode == ControlMode::Off {
            false
        } else if self.actuator_on {
            output > cfg.demand_off_threshold
        } else {
            output >= cfg.demand_on_threshold
        };
        if want == self.actuator_on {
            return;
        }

        self.actuator_on = want;
        self.actuator_on_since = want.then_some(at);
        let setpoint = self.setpoint.unwrap_or_default();
        if let Some(metrics) = self.tracker.on_actuator(want, at, setpoint, self.mode) {
            let learning = self.record_cycle(metrics.clone(), at);
            outcome.absorb(metrics, learning);
        }
    }

    /// Learn from one completed cycle: record it, advance validation, and
    /// consider an auto-apply when no validation is open.
    pub fn record_cycle(&mut self, metrics: CycleMetrics, at: DateTime<Utc>) -> CycleLearning {
        self.convergence.record(metrics.clone());
        self.cycles_since_snapshot += 1;

        let validation = self.governor.observe_cycle(&metrics, at);
        let mut learning = CycleLearning::default();
        match &validation {
            ValidationOutcome::RolledBack(event) => self.commit_gains(event.restored_gains, at),
            ValidationOutcome::NotValidating => learning.decision = self.try_auto_apply(at),
            ValidationOutcome::InProgress { .. } | ValidationOutcome::Passed => {}
        }
        if validation != ValidationOutcome::NotValidating {
            learning.validation = Some(validation);
        }
        learning
    }

    fn try_auto_apply(&mut self, at: DateTime<Utc>) -> Option<GovernorDecision> {
        let report = self.convergence.evaluate();
        if report.converged || report.cycle_count < MIN_CONFIDENCE_CYCLES {
            return None;
        }
        let averaged = report.averaged?;
        let current = *self.controller.gains();
        let proposals =
            rule_engine::evaluate(&averaged, self.convergence.thresholds(), &current);
        if proposals.is_empty() {
            return None;
        }

        let decision = self.governor.consider(&proposals, &report, &current, at);
        if let GovernorDecision::Committed(record) = &decision {
            self.commit_gains(record.new_gains, at);
        }
        Some(decision)
    }

    /// Single commit point for new gains. Resets the integral and restarts
    /// the analysis window so older cycles stop counting.
    fn commit_gains(&mut self, gains: GainSet, at: DateTime<Utc>) {
        if let Err(err) = self.controller.set_gains(gains) {
            tracing::error!(zone = %self.zone_id, error = %err, "failed to commit gains");
            return;
        }
        self.convergence.reset_window(at);
        self.cycles_since_snapshot = self.snapshot_every;
    }

    pub fn status(&self) -> ZoneStatus {
        let report = self.convergence.evaluate();
        let counters = self.governor.counters();
        let learning_status = if counters.is_validating() {
            LearningStatus::Active
        } else {
            report.status()
        };
        ZoneStatus {
            zone_id: self.zone_id.clone(),
            heating_type: self.heating_type,
            output: self.controller.output(),
            actuator_on: self.actuator_on,
            mode: self.mode,
            paused: self.pause.active,
            fault: self.controller.fault(),
            gains: *self.controller.gains(),
            physics_baseline: self.physics.gains,
            integral: self.controller.integral(),
            cycle_state: self.tracker.state(),
            learning_status,
            confidence: report.confidence,
            cycle_count: report.cycle_count,
            converged: report.converged,
            failing_metrics: report.failing,
            governor_phase: self.governor.phase(),
            validation_cycles_remaining: counters.validation_cycles_remaining,
            applies_this_season: counters.applies_this_season,
            applies_lifetime: counters.applies_lifetime,
            apply_history: self.governor.apply_history(),
        }
    }

    pub fn to_persisted(&self, saved_at: DateTime<Utc>) -> PersistedZoneState {
        PersistedZoneState {
            version: CURRENT_STATE_VERSION,
            zone_id: self.zone_id.clone(),
            heating_type: self.heating_type,
            saved_at,
            gains: *self.controller.gains(),
            physics_baseline: self.physics.gains,
            integral: self.controller.integral(),
            cycle_history: self.convergence.history().to_vec(),
            apply_history: self.governor.apply_history(),
            counters: self.governor.counters().clone(),
            analysis_since: self.convergence.analysis_since(),
        }
    }
}
