//! Versioned persisted-state record for one zone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::adjustment::ApplyRecord;
use super::cycle::CycleMetrics;
use super::gains::{GainSet, HeatingType};
use super::governance::GovernorCounters;

/// Version written by this build. Older records go through the migration chain.
pub const CURRENT_STATE_VERSION: u32 = 3;

/// Everything a zone needs to resume learning after a restart.
///
/// Field order is the serialized order; keep it stable so load→serialize is
/// byte-for-byte reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedZoneState {
    pub version: u32,
    pub zone_id: String,
    pub heating_type: HeatingType,
    pub saved_at: DateTime<Utc>,
    pub gains: GainSet,
    pub physics_baseline: GainSet,
    pub integral: f64,
    pub cycle_history: Vec<CycleMetrics>,
    pub apply_history: Vec<ApplyRecord>,
    pub counters: GovernorCounters,
    /// Cycles that started earlier ran under superseded gains.
    #[serde(default)]
    pub analysis_since: Option<DateTime<Utc>>,
}

impl PersistedZoneState {
    /// End temperature of the newest completed cycle, if any.
    pub fn last_cycle_end_temp(&self) -> Option<f64> {
        self.cycle_history.last().map(|m| m.end_temp)
    }
}
