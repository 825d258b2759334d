//! Learned gain adjustments and the audit trail of applied ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::gains::GainSet;

/// The fixed set of tuning rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    Oscillation,
    Overshoot,
    Undershoot,
    InterCycleDrift,
    SlowSettling,
    SlowResponse,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oscillation => "oscillation",
            Self::Overshoot => "overshoot",
            Self::Undershoot => "undershoot",
            Self::InterCycleDrift => "inter_cycle_drift",
            Self::SlowSettling => "slow_settling",
            Self::SlowResponse => "slow_response",
        }
    }

    /// Lower value means more important.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Oscillation => 1,
            Self::Overshoot => 2,
            Self::Undershoot => 3,
            Self::InterCycleDrift => 4,
            Self::SlowSettling => 5,
            Self::SlowResponse => 6,
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rule's multiplicative suggestion. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentProposal {
    pub rule_id: RuleId,
    pub kp_factor: f64,
    pub ki_factor: f64,
    pub kd_factor: f64,
    pub reason: String,
    pub priority: u8,
}

/// How an apply happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyTrigger {
    Auto,
    Manual,
}

impl fmt::Display for ApplyTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        })
    }
}

/// Audit entry for a committed gain change; also the rollback source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub previous_gains: GainSet,
    pub new_gains: GainSet,
    pub reason: String,
    pub trigger: ApplyTrigger,
}

impl ApplyRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        previous_gains: GainSet,
        new_gains: GainSet,
        reason: impl Into<String>,
        trigger: ApplyTrigger,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            previous_gains,
            new_gains,
            reason: reason.into(),
            trigger,
        }
    }
}
