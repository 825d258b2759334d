//! Per-zone governance counters and the externally visible learning status.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Month (1-based) on which a new heating season begins.
pub const SEASON_START_MONTH: u32 = 9;

/// Heating season identifier: the calendar year in which the season started.
pub fn season_id(at: DateTime<Utc>) -> i32 {
    if at.month() >= SEASON_START_MONTH {
        at.year()
    } else {
        at.year() - 1
    }
}

/// Rate-limit and validation bookkeeping, explicitly owned by one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorCounters {
    pub season_id: i32,
    pub applies_this_season: u32,
    pub applies_lifetime: u32,
    pub last_apply_time: Option<DateTime<Utc>>,
    pub validation_cycles_remaining: u32,
    pub pre_apply_baseline_metric: Option<f64>,
    /// Settling MAE of each cycle observed during the current validation.
    #[serde(default)]
    pub validation_observations: Vec<f64>,
}

impl GovernorCounters {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            season_id: season_id(now),
            applies_this_season: 0,
            applies_lifetime: 0,
            last_apply_time: None,
            validation_cycles_remaining: 0,
            pre_apply_baseline_metric: None,
            validation_observations: Vec::new(),
        }
    }

    /// Reset the season counter when `now` falls in a later season.
    ///
    /// Returns true if a season boundary was crossed.
    pub fn roll_season(&mut self, now: DateTime<Utc>) -> bool {
        let current = season_id(now);
        if current > self.season_id {
            self.season_id = current;
            self.applies_this_season = 0;
            true
        } else {
            false
        }
    }

    pub fn is_validating(&self) -> bool {
        self.validation_cycles_remaining > 0
    }

    pub fn end_validation(&mut self) {
        self.validation_cycles_remaining = 0;
        self.pre_apply_baseline_metric = None;
        self.validation_observations.clear();
    }

    /// Explicit clear: all counters, including lifetime, start over.
    pub fn clear(&mut self, now: DateTime<Utc>) {
        *self = Self::new(now);
    }
}

/// Learning progress exposed to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStatus {
    /// Fewer than the minimum analyzed cycles.
    Collecting,
    /// Enough cycles, not converged, no change in flight.
    Ready,
    /// An applied change is being validated.
    Active,
    /// All convergence thresholds met.
    Converged,
}

impl LearningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Converged => "converged",
        }
    }
}

impl fmt::Display for LearningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_season_boundary_is_september() {
        let august = Utc.with_ymd_and_hms(2026, 8, 31, 23, 0, 0).unwrap();
        let september = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        assert_eq!(season_id(august), 2025);
        assert_eq!(season_id(september), 2026);
    }

    #[test]
    fn test_roll_season_resets_season_count_only() {
        let start = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        let mut counters = GovernorCounters::new(start);
        counters.applies_this_season = 4;
        counters.applies_lifetime = 9;

        assert!(!counters.roll_season(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(counters.applies_this_season, 4);

        assert!(counters.roll_season(Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()));
        assert_eq!(counters.applies_this_season, 0);
        assert_eq!(counters.applies_lifetime, 9);
    }

    #[test]
    fn test_clear_resets_everything() {
        let now = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        let mut counters = GovernorCounters::new(now);
        counters.applies_this_season = 2;
        counters.applies_lifetime = 7;
        counters.validation_cycles_remaining = 3;
        counters.clear(now);
        assert_eq!(counters.applies_this_season, 0);
        assert_eq!(counters.applies_lifetime, 0);
        assert!(!counters.is_validating());
    }
}
