//! Rolling-window convergence verdict and confidence score.
//!
//! Confidence answers "how much should we trust what the window says", not
//! "how good is the zone": it rises with sample count, with consistency
//! between cycles, and with how clearly each metric sits on one side of its
//! threshold. It is pinned to zero below [`MIN_CONFIDENCE_CYCLES`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::{
    BoundedHistory, ConvergenceThresholds, CycleMetrics, HeatingType, InterruptReason,
    LearningConfig, LearningStatus, MIN_CONFIDENCE_CYCLES,
};

/// Confidence ceiling at exactly the minimum cycle count.
const BASE_CEILING: f64 = 70.0;
/// Ceiling gained per additional cycle.
const CEILING_STEP: f64 = 5.0;
const STABILITY_WEIGHT: f64 = 0.6;
const CLARITY_WEIGHT: f64 = 0.4;

/// Window averages over learnable cycles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AveragedMetrics {
    pub overshoot: f64,
    pub undershoot: f64,
    pub oscillation_count: f64,
    pub settling_mae: Option<f64>,
    pub inter_cycle_drift: Option<f64>,
    pub rise_time: Option<f64>,
    pub settling_time: Option<f64>,
    pub dead_time: Option<f64>,
    pub sample_count: usize,
}

/// Result of one `evaluate()` pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceReport {
    pub averaged: Option<AveragedMetrics>,
    /// Learnable cycles in the analysis window.
    pub cycle_count: usize,
    pub converged: bool,
    /// 0-100.
    pub confidence: f64,
    /// Names of metrics currently above threshold.
    pub failing: Vec<&'static str>,
}

impl ConvergenceReport {
    /// Status ignoring any in-flight validation.
    pub fn status(&self) -> LearningStatus {
        if self.cycle_count < MIN_CONFIDENCE_CYCLES {
            LearningStatus::Collecting
        } else if self.converged {
            LearningStatus::Converged
        } else {
            LearningStatus::Ready
        }
    }
}

/// Owns the cycle history and evaluates the newest window of it.
#[derive(Debug, Clone)]
pub struct ConvergenceModel {
    heating_type: HeatingType,
    thresholds: ConvergenceThresholds,
    history: BoundedHistory<CycleMetrics>,
    analysis_window: usize,
    include_preempted: bool,
    /// Cycles that started before this instant ran under older gains.
    analysis_since: Option<DateTime<Utc>>,
}

impl ConvergenceModel {
    pub fn new(heating_type: HeatingType, config: &LearningConfig) -> Self {
        Self {
            heating_type,
            thresholds: ConvergenceThresholds::for_heating_type(heating_type),
            history: BoundedHistory::new(config.history_capacity),
            analysis_window: config.analysis_window.max(1),
            include_preempted: config.include_preempted_cycles,
            analysis_since: None,
        }
    }

    /// Rebuild from persisted history.
    pub fn restore(
        heating_type: HeatingType,
        config: &LearningConfig,
        history: Vec<CycleMetrics>,
        analysis_since: Option<DateTime<Utc>>,
    ) -> Self {
        let mut model = Self::new(heating_type, config);
        model.history = BoundedHistory::from_items(config.history_capacity, history);
        model.analysis_since = analysis_since;
        model
    }

    pub fn heating_type(&self) -> HeatingType {
        self.heating_type
    }

    pub fn thresholds(&self) -> &ConvergenceThresholds {
        &self.thresholds
    }

    pub fn history(&self) -> &BoundedHistory<CycleMetrics> {
        &self.history
    }

    pub fn analysis_since(&self) -> Option<DateTime<Utc>> {
        self.analysis_since
    }

    /// Append a completed cycle, evicting the oldest when full.
    pub fn record(&mut self, metrics: CycleMetrics) {
        if let Some(evicted) = self.history.push(metrics) {
            tracing::trace!(started_at = %evicted.started_at, "evicted oldest cycle metrics");
        }
    }

    /// Restart analysis from `at`; earlier cycles stay in history for audit only.
    pub fn reset_window(&mut self, at: DateTime<Utc>) {
        self.analysis_since = Some(at);
    }

    fn counts_for_learning(&self, metrics: &CycleMetrics) -> bool {
        match &metrics.interrupted {
            None => true,
            Some(InterruptReason::Preempted) => self.include_preempted,
            Some(_) => false,
        }
    }

    /// Learnable cycles within the newest `analysis_window` records.
    pub fn window(&self) -> Vec<&CycleMetrics> {
        self.history
            .newest_n(self.analysis_window)
            .filter(|m| self.analysis_since.map_or(true, |since| m.started_at >= since))
            .filter(|m| self.counts_for_learning(m))
            .collect()
    }

    pub fn evaluate(&self) -> ConvergenceReport {
        let window = self.window();
        let cycle_count = window.len();
        let Some(averaged) = average(&window) else {
            return ConvergenceReport {
                averaged: None,
                cycle_count,
                converged: false,
                confidence: 0.0,
                failing: Vec::new(),
            };
        };

        let t = &self.thresholds;
        let checks = [
            (
                "inter_cycle_drift",
                averaged.inter_cycle_drift.map_or(0.0, f64::abs),
                t.max_inter_cycle_drift,
            ),
            (
                "settling_mae",
                averaged.settling_mae.unwrap_or(0.0),
                t.max_settling_mae,
            ),
            ("undershoot", averaged.undershoot, t.max_undershoot),
            ("overshoot", averaged.overshoot, t.max_overshoot),
            (
                "oscillation_count",
                averaged.oscillation_count,
                t.max_oscillations,
            ),
        ];

        let failing: Vec<&'static str> = checks
            .iter()
            .filter(|(_, value, limit)| value > limit)
            .map(|(name, _, _)| *name)
            .collect();

        let converged = cycle_count >= MIN_CONFIDENCE_CYCLES && failing.is_empty();
        let confidence = self.confidence(&window, &checks);

        ConvergenceReport {
            averaged: Some(averaged),
            cycle_count,
            converged,
            confidence,
            failing,
        }
    }

    fn confidence(&self, window: &[&CycleMetrics], checks: &[(&str, f64, f64); 5]) -> f64 {
        let n = window.len();
        if n < MIN_CONFIDENCE_CYCLES {
            return 0.0;
        }
        let ceiling =
            (BASE_CEILING + CEILING_STEP * (n - MIN_CONFIDENCE_CYCLES) as f64).min(100.0);

        let t = &self.thresholds;
        let spreads = [
            (
                std_dev(window.iter().filter_map(|m| m.inter_cycle_drift)),
                t.max_inter_cycle_drift,
            ),
            (
                std_dev(window.iter().filter_map(|m| m.settling_mae)),
                t.max_settling_mae,
            ),
            (std_dev(window.iter().map(|m| m.undershoot)), t.max_undershoot),
            (std_dev(window.iter().map(|m| m.overshoot)), t.max_overshoot),
            (
                std_dev(window.iter().map(|m| f64::from(m.oscillation_count))),
                t.max_oscillations,
            ),
        ];
        let stability = (1.0
            - spreads
                .iter()
                .map(|(spread, limit)| spread / limit)
                .sum::<f64>()
                / spreads.len() as f64)
            .clamp(0.0, 1.0);

        let clarity = checks
            .iter()
            .map(|(_, value, limit)| ((value - limit).abs() / limit).min(1.0))
            .sum::<f64>()
            / checks.len() as f64;

        (ceiling * (STABILITY_WEIGHT * stability + CLARITY_WEIGHT * clarity)).clamp(0.0, 100.0)
    }

    /// Learning status, with `validating` taking precedence.
    pub fn learning_status(&self, validating: bool) -> LearningStatus {
        if validating {
            LearningStatus::Active
        } else {
            self.evaluate().status()
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Population standard deviation; zero for fewer than two values.
fn std_dev(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.len() < 2 {
        return 0.0;
    }
    let m = values.iter().sum::<f64>() / values.len() as f64;
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn average(window: &[&CycleMetrics]) -> Option<AveragedMetrics> {
    if window.is_empty() {
        return None;
    }
    Some(AveragedMetrics {
        overshoot: mean(window.iter().map(|m| m.overshoot))?,
        undershoot: mean(window.iter().map(|m| m.undershoot))?,
        oscillation_count: mean(window.iter().map(|m| f64::from(m.oscillation_count)))?,
        settling_mae: mean(window.iter().filter_map(|m| m.settling_mae)),
        inter_cycle_drift: mean(window.iter().filter_map(|m| m.inter_cycle_drift)),
        rise_time: mean(window.iter().filter_map(|m| m.rise_time)),
        settling_time: mean(window.iter().filter_map(|m| m.settling_time)),
        dead_time: mean(window.iter().filter_map(|m| m.dead_time)),
        sample_count: window.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn metrics(index: i64, overshoot: f64, mae: f64) -> CycleMetrics {
        let start = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap() + Duration::hours(index * 6);
        CycleMetrics {
            started_at: start,
            ended_at: start + Duration::hours(2),
            setpoint: 20.0,
            start_temp: 19.5,
            end_temp: 20.0,
            overshoot,
            undershoot: 0.05,
            rise_time: Some(30.0),
            settling_time: Some(20.0),
            oscillation_count: 0,
            dead_time: Some(5.0),
            settling_mae: Some(mae),
            inter_cycle_drift: Some(0.0),
            interrupted: None,
        }
    }

    fn model() -> ConvergenceModel {
        ConvergenceModel::new(HeatingType::Radiator, &LearningConfig::default())
    }

    #[test]
    fn test_confidence_zero_below_minimum() {
        let mut m = model();
        for i in 0..5 {
            m.record(metrics(i, 0.0, 0.05));
        }
        let report = m.evaluate();
        assert_eq!(report.cycle_count, 5);
        assert_eq!(report.confidence, 0.0);
        assert!(!report.converged);
        assert_eq!(report.status(), LearningStatus::Collecting);

        m.record(metrics(5, 0.0, 0.05));
        let report = m.evaluate();
        assert!(report.confidence > 0.0);
        assert!(report.converged);
        assert_eq!(report.status(), LearningStatus::Converged);
    }

    #[test]
    fn test_single_failing_metric_blocks_convergence() {
        let mut m = model();
        for i in 0..8 {
            m.record(metrics(i, 0.6, 0.1));
        }
        let report = m.evaluate();
        assert!(!report.converged);
        assert_eq!(report.failing, vec!["overshoot"]);
        assert_eq!(report.status(), LearningStatus::Ready);
    }

    #[test]
    fn test_report_serializes_failing_names() {
        let mut m = model();
        for i in 0..8 {
            m.record(metrics(i, 0.6, 0.1));
        }
        let json = serde_json::to_value(m.evaluate()).unwrap();
        assert_eq!(json["failing"], serde_json::json!(["overshoot"]));
        assert_eq!(json["cycle_count"], 8);
        assert_eq!(json["averaged"]["sample_count"], 8);
    }

    #[test]
    fn test_interrupted_cycles_are_excluded() {
        let mut m = model();
        for i in 0..6 {
            let mut cycle = metrics(i, 0.0, 0.05);
            if i % 2 == 0 {
                cycle.interrupted = Some(InterruptReason::Paused(None));
            }
            m.record(cycle);
        }
        assert_eq!(m.evaluate().cycle_count, 3);
    }

    #[test]
    fn test_preempted_policy_is_configurable() {
        let config = LearningConfig {
            include_preempted_cycles: true,
            ..Default::default()
        };
        let mut m = ConvergenceModel::new(HeatingType::Radiator, &config);
        let mut cycle = metrics(0, 0.0, 0.05);
        cycle.interrupted = Some(InterruptReason::Preempted);
        m.record(cycle);
        assert_eq!(m.evaluate().cycle_count, 1);
    }

    #[test]
    fn test_confidence_grows_with_samples() {
        let mut m = model();
        let mut last = 0.0;
        for i in 0..12 {
            m.record(metrics(i, 0.6, 0.1));
            let confidence = m.evaluate().confidence;
            assert!(confidence >= last);
            assert!((0.0..=100.0).contains(&confidence));
            last = confidence;
        }
    }

    #[test]
    fn test_noisy_metrics_lower_confidence() {
        let mut steady = model();
        let mut noisy = model();
        for i in 0..8 {
            steady.record(metrics(i, 0.6, 0.1));
            let overshoot = if i % 2 == 0 { 0.1 } else { 1.1 };
            noisy.record(metrics(i, overshoot, 0.1));
        }
        assert!(noisy.evaluate().confidence < steady.evaluate().confidence);
    }

    #[test]
    fn test_reset_window_drops_older_cycles_from_analysis() {
        let mut m = model();
        for i in 0..8 {
            m.record(metrics(i, 0.6, 0.1));
        }
        let cut = m.history().newest().unwrap().ended_at;
        m.reset_window(cut);
        assert_eq!(m.evaluate().cycle_count, 0);
        assert_eq!(m.history().len(), 8);
    }

    #[test]
    fn test_window_limits_analysis() {
        let config = LearningConfig {
            analysis_window: 6,
            ..Default::default()
        };
        let mut m = ConvergenceModel::new(HeatingType::Radiator, &config);
        for i in 0..4 {
            m.record(metrics(i, 1.0, 0.1));
        }
        for i in 4..10 {
            m.record(metrics(i, 0.0, 0.05));
        }
        let report = m.evaluate();
        assert_eq!(report.cycle_count, 6);
        assert!(report.converged);
    }
}
