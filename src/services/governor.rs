//! Auto-apply governance: gates, validation window and rollback.
//!
//! The governor never touches the controller. It decides, records, and
//! returns the gains to commit; the zone pipeline performs the commit so the
//! controller keeps a single owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AdjustmentProposal, ApplyRecord, ApplyTrigger, AutoApplyLimits, BoundedHistory, CycleMetrics,
    GainSet, GovernorConfig, GovernorCounters, HeatingType,
};
use crate::services::convergence::ConvergenceReport;
use crate::services::rule_engine;

/// Floor for the pre-apply baseline so a near-perfect window does not turn
/// ordinary noise into a degradation.
const MIN_BASELINE_METRIC: f64 = 0.05;

/// Why an auto-apply did not happen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    AutoApplyDisabled,
    Validating { cycles_remaining: u32 },
    NoProposals,
    InsufficientCycles { have: usize, need: usize },
    LowConfidence { have: f64, need: f64 },
    Cooldown { remaining_minutes: i64 },
    SeasonLimit { limit: u32 },
    LifetimeLimit { limit: u32 },
    DriftExceeded { drift: f64 },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoApplyDisabled => write!(f, "auto-apply disabled"),
            Self::Validating { cycles_remaining } => {
                write!(f, "validating previous change ({cycles_remaining} cycles left)")
            }
            Self::NoProposals => write!(f, "no rule fired"),
            Self::InsufficientCycles { have, need } => {
                write!(f, "{have} cycles observed, {need} required")
            }
            Self::LowConfidence { have, need } => {
                write!(f, "confidence {have:.1} below {need:.1}")
            }
            Self::Cooldown { remaining_minutes } => {
                write!(f, "cooldown active for {remaining_minutes} more minutes")
            }
            Self::SeasonLimit { limit } => write!(f, "season limit of {limit} applies reached"),
            Self::LifetimeLimit { limit } => {
                write!(f, "lifetime limit of {limit} applies reached")
            }
            Self::DriftExceeded { drift } => write!(
                f,
                "proposed gains drift {:.0}% from physics baseline",
                drift * 100.0
            ),
        }
    }
}

/// Outcome of an auto-apply attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernorDecision {
    Committed(ApplyRecord),
    Rejected(RejectionReason),
}

/// A validation failure that restored the previous gains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEvent {
    pub at: DateTime<Utc>,
    pub abandoned_gains: GainSet,
    pub restored_gains: GainSet,
    pub baseline_metric: f64,
    pub observed_metric: f64,
}

/// Result of feeding one completed cycle to an open validation window.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    NotValidating,
    InProgress { cycles_remaining: u32 },
    Passed,
    RolledBack(RollbackEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorPhase {
    Idle,
    Validating,
}

pub struct Governor {
    config: GovernorConfig,
    limits: AutoApplyLimits,
    baseline: GainSet,
    counters: GovernorCounters,
    history: BoundedHistory<ApplyRecord>,
}

impl Governor {
    pub fn new(
        config: GovernorConfig,
        heating_type: HeatingType,
        baseline: GainSet,
        now: DateTime<Utc>,
    ) -> Self {
        let history = BoundedHistory::new(config.apply_history_capacity);
        Self {
            limits: AutoApplyLimits::for_heating_type(heating_type),
            config,
            baseline,
            counters: GovernorCounters::new(now),
            history,
        }
    }

    /// Rebuild from persisted counters and apply history.
    pub fn restore(
        config: GovernorConfig,
        heating_type: HeatingType,
        baseline: GainSet,
        counters: GovernorCounters,
        history: Vec<ApplyRecord>,
    ) -> Self {
        let history = BoundedHistory::from_items(config.apply_history_capacity, history);
        Self {
            limits: AutoApplyLimits::for_heating_type(heating_type),
            config,
            baseline,
            counters,
            history,
        }
    }

    pub fn phase(&self) -> GovernorPhase {
        if self.counters.is_validating() {
            GovernorPhase::Validating
        } else {
            GovernorPhase::Idle
        }
    }

    pub fn counters(&self) -> &GovernorCounters {
        &self.counters
    }

    pub fn limits(&self) -> &AutoApplyLimits {
        &self.limits
    }

    pub fn baseline(&self) -> &GainSet {
        &self.baseline
    }

    /// Oldest first.
    pub fn apply_history(&self) -> Vec<ApplyRecord> {
        self.history.to_vec()
    }

    /// Run the gates in order; commit on the first pass through all of them.
    pub fn consider(
        &mut self,
        proposals: &[AdjustmentProposal],
        report: &ConvergenceReport,
        current: &GainSet,
        now: DateTime<Utc>,
    ) -> GovernorDecision {
        if self.counters.roll_season(now) {
            tracing::info!(season = self.counters.season_id, "new heating season, season counter reset");
        }

        match self.check_gates(proposals, report, current, now) {
            Ok((new_gains, reason)) => {
                let record = ApplyRecord::new(now, *current, new_gains, reason, ApplyTrigger::Auto);
                self.commit_auto(&record, report, now);
                GovernorDecision::Committed(record)
            }
            Err(reason) => {
                tracing::info!(%reason, "auto-apply rejected");
                GovernorDecision::Rejected(reason)
            }
        }
    }

    fn check_gates(
        &self,
        proposals: &[AdjustmentProposal],
        report: &ConvergenceReport,
        current: &GainSet,
        now: DateTime<Utc>,
    ) -> Result<(GainSet, String), RejectionReason> {
        if self.counters.is_validating() {
            return Err(RejectionReason::Validating {
                cycles_remaining: self.counters.validation_cycles_remaining,
            });
        }
        if !self.config.auto_apply {
            return Err(RejectionReason::AutoApplyDisabled);
        }
        let composed = rule_engine::compose(proposals).ok_or(RejectionReason::NoProposals)?;

        if report.cycle_count < self.limits.min_cycles {
            return Err(RejectionReason::InsufficientCycles {
                have: report.cycle_count,
                need: self.limits.min_cycles,
            });
        }
        let need = self.limits.required_confidence(self.counters.applies_lifetime);
        if report.confidence < need {
            return Err(RejectionReason::LowConfidence {
                have: report.confidence,
                need,
            });
        }
        if let Some(last) = self.counters.last_apply_time {
            let ready_at = last + self.limits.cooldown();
            if now < ready_at {
                return Err(RejectionReason::Cooldown {
                    remaining_minutes: (ready_at - now).num_minutes(),
                });
            }
        }
        if self.counters.applies_this_season >= self.config.season_apply_limit {
            return Err(RejectionReason::SeasonLimit {
                limit: self.config.season_apply_limit,
            });
        }
        if self.counters.applies_lifetime >= self.config.lifetime_apply_limit {
            return Err(RejectionReason::LifetimeLimit {
                limit: self.config.lifetime_apply_limit,
            });
        }

        let new_gains = composed.apply_to(current);
        if !new_gains.within_drift_envelope(&self.baseline) {
            return Err(RejectionReason::DriftExceeded {
                drift: new_gains.max_drift_from(&self.baseline),
            });
        }
        Ok((new_gains, composed.reason))
    }

    fn commit_auto(&mut self, record: &ApplyRecord, report: &ConvergenceReport, now: DateTime<Utc>) {
        self.history.push(record.clone());
        self.counters.applies_this_season += 1;
        self.counters.applies_lifetime += 1;
        self.counters.last_apply_time = Some(now);
        self.open_validation(report);

        tracing::info!(
            previous = %record.previous_gains,
            new = %record.new_gains,
            reason = %record.reason,
            confidence = report.confidence,
            applies_this_season = self.counters.applies_this_season,
            "auto-applied gain adjustment"
        );
    }

    /// Start watching the next cycles against the window's settling error.
    fn open_validation(&mut self, report: &ConvergenceReport) {
        self.counters.end_validation();
        if self.config.validation_cycles == 0 {
            return;
        }
        let baseline_metric = report
            .averaged
            .and_then(|m| m.settling_mae)
            .unwrap_or(MIN_BASELINE_METRIC)
            .max(MIN_BASELINE_METRIC);
        self.counters.validation_cycles_remaining = self.config.validation_cycles;
        self.counters.pre_apply_baseline_metric = Some(baseline_metric);
    }

    /// Feed a completed cycle into the validation window, if one is open.
    pub fn observe_cycle(&mut self, metrics: &CycleMetrics, now: DateTime<Utc>) -> ValidationOutcome {
        if !self.counters.is_validating() {
            return ValidationOutcome::NotValidating;
        }
        // Cycles without a settling error cannot be compared and do not use up a slot.
        let mae = match metrics.settling_mae {
            Some(mae) if metrics.is_learnable() => mae,
            _ => {
                return ValidationOutcome::InProgress {
                    cycles_remaining: self.counters.validation_cycles_remaining,
                }
            }
        };

        self.counters.validation_cycles_remaining -= 1;
        self.counters.validation_observations.push(mae);

        let observations = &self.counters.validation_observations;
        if observations.len() >= self.config.min_validation_samples.max(1) as usize {
            let observed = observations.iter().sum::<f64>() / observations.len() as f64;
            let baseline = self
                .counters
                .pre_apply_baseline_metric
                .unwrap_or(MIN_BASELINE_METRIC);
            if observed > baseline * (1.0 + self.config.degradation_threshold) {
                return self.rollback(baseline, observed, now);
            }
        }

        if self.counters.validation_cycles_remaining == 0 {
            tracing::info!("validation window passed, keeping applied gains");
            self.counters.end_validation();
            ValidationOutcome::Passed
        } else {
            ValidationOutcome::InProgress {
                cycles_remaining: self.counters.validation_cycles_remaining,
            }
        }
    }

    fn rollback(&mut self, baseline: f64, observed: f64, now: DateTime<Utc>) -> ValidationOutcome {
        self.counters.end_validation();
        let Some(record) = self.history.pop_newest() else {
            tracing::error!("validation failed but apply history is empty; keeping current gains");
            return ValidationOutcome::NotValidating;
        };

        tracing::warn!(
            baseline_metric = baseline,
            observed_metric = observed,
            restored = %record.previous_gains,
            abandoned = %record.new_gains,
            "settling error degraded after apply, rolling back"
        );

        ValidationOutcome::RolledBack(RollbackEvent {
            at: now,
            abandoned_gains: record.new_gains,
            restored_gains: record.previous_gains,
            baseline_metric: baseline,
            observed_metric: observed,
        })
    }

    /// Operator-supplied gains. Bypasses rate limits, not the drift cap.
    ///
    /// Not counted against the auto-apply limits, but validated like an auto
    /// apply so a degrading manual change is rolled back.
    pub fn force_apply(
        &mut self,
        gains: GainSet,
        reason: impl Into<String>,
        current: &GainSet,
        report: &ConvergenceReport,
        now: DateTime<Utc>,
    ) -> DomainResult<ApplyRecord> {
        gains.validate()?;
        self.ensure_within_envelope(&gains)?;
        let record = ApplyRecord::new(now, *current, gains, reason, ApplyTrigger::Manual);
        self.history.push(record.clone());
        self.open_validation(report);
        tracing::info!(
            new = %gains,
            validation_cycles = self.counters.validation_cycles_remaining,
            "manually applied gains"
        );
        Ok(record)
    }

    /// Undo the newest apply and return the gains to restore.
    pub fn force_rollback(&mut self, now: DateTime<Utc>) -> DomainResult<RollbackEvent> {
        let record = self.history.newest().ok_or(DomainError::NothingToRollback)?;
        self.ensure_within_envelope(&record.previous_gains)?;
        let record = self.history.pop_newest().ok_or(DomainError::NothingToRollback)?;
        self.counters.end_validation();
        tracing::info!(restored = %record.previous_gains, "manual rollback");
        Ok(RollbackEvent {
            at: now,
            abandoned_gains: record.new_gains,
            restored_gains: record.previous_gains,
            baseline_metric: 0.0,
            observed_metric: 0.0,
        })
    }

    /// Return to the physics baseline, recorded as a manual apply.
    pub fn reset_to_baseline(&mut self, current: &GainSet, now: DateTime<Utc>) -> ApplyRecord {
        let record = ApplyRecord::new(
            now,
            *current,
            self.baseline,
            "reset to physics baseline",
            ApplyTrigger::Manual,
        );
        self.counters.end_validation();
        self.history.push(record.clone());
        tracing::info!(baseline = %self.baseline, "reset to physics baseline");
        record
    }

    /// Reset season and lifetime counters and any open validation.
    pub fn clear_counters(&mut self, now: DateTime<Utc>) {
        self.counters.clear(now);
        tracing::info!("governor counters cleared");
    }

    fn ensure_within_envelope(&self, gains: &GainSet) -> DomainResult<()> {
        if gains.within_drift_envelope(&self.baseline) {
            Ok(())
        } else {
            Err(DomainError::GovernanceViolation(format!(
                "gains {gains} drift {:.0}% from physics baseline {}",
                gains.max_drift_from(&self.baseline) * 100.0,
                self.baseline
            )))
        }
    }
}
