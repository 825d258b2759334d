//! Heuristic gain-adjustment rules.
//!
//! Each rule maps one failing window metric to multiplicative factors on
//! kp/ki/kd. Rules are evaluated independently and returned in priority
//! order; [`compose`] multiplies every firing rule's factors and clamps the
//! product once.

use serde::{Deserialize, Serialize};

use crate::domain::models::{AdjustmentProposal, ConvergenceThresholds, GainSet, RuleId};
use crate::services::convergence::AveragedMetrics;

/// Bounds applied to the composed product of all firing rules.
pub const MIN_COMPOSED_FACTOR: f64 = 0.5;
pub const MAX_COMPOSED_FACTOR: f64 = 1.5;

/// Ratio of measured to limit above which a violation counts as severe.
const SEVERE_RATIO: f64 = 2.0;

/// Combined factors from every firing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedAdjustment {
    pub kp_factor: f64,
    pub ki_factor: f64,
    pub kd_factor: f64,
    pub rules: Vec<RuleId>,
    pub reason: String,
}

impl ComposedAdjustment {
    pub fn apply_to(&self, gains: &GainSet) -> GainSet {
        gains.scaled(self.kp_factor, self.ki_factor, self.kd_factor)
    }
}

fn proposal(
    rule_id: RuleId,
    (kp_factor, ki_factor, kd_factor): (f64, f64, f64),
    reason: String,
) -> AdjustmentProposal {
    AdjustmentProposal {
        rule_id,
        kp_factor,
        ki_factor,
        kd_factor,
        reason,
        priority: rule_id.priority(),
    }
}

/// Evaluate all rules against averaged window metrics.
///
/// Returns nothing for an all-zero PID set; scaling zero gains is a no-op.
pub fn evaluate(
    averaged: &AveragedMetrics,
    thresholds: &ConvergenceThresholds,
    gains: &GainSet,
) -> Vec<AdjustmentProposal> {
    if gains.is_pid_zero() {
        return Vec::new();
    }

    let mut proposals = Vec::new();

    if averaged.oscillation_count > thresholds.max_oscillations {
        proposals.push(proposal(
            RuleId::Oscillation,
            (0.90, 1.0, 1.20),
            format!(
                "{:.1} oscillations per cycle exceeds {:.0}",
                averaged.oscillation_count, thresholds.max_oscillations
            ),
        ));
    }

    let overshoot_fired = averaged.overshoot > thresholds.max_overshoot;
    if overshoot_fired {
        let factors = if averaged.overshoot > SEVERE_RATIO * thresholds.max_overshoot {
            (0.85, 0.90, 1.10)
        } else {
            (0.90, 1.0, 1.10)
        };
        proposals.push(proposal(
            RuleId::Overshoot,
            factors,
            format!(
                "overshoot {:.2}°C exceeds {:.2}°C",
                averaged.overshoot, thresholds.max_overshoot
            ),
        ));
    }

    if averaged.undershoot > thresholds.max_undershoot {
        let ki = if averaged.undershoot > SEVERE_RATIO * thresholds.max_undershoot {
            1.20
        } else {
            1.10
        };
        proposals.push(proposal(
            RuleId::Undershoot,
            (1.0, ki, 1.0),
            format!(
                "undershoot {:.2}°C exceeds {:.2}°C",
                averaged.undershoot, thresholds.max_undershoot
            ),
        ));
    }

    if let Some(drift) = averaged.inter_cycle_drift {
        if drift < -thresholds.max_inter_cycle_drift {
            proposals.push(proposal(
                RuleId::InterCycleDrift,
                (1.0, 1.15, 1.0),
                format!(
                    "cycles end {:.2}°C colder each time (limit {:.2}°C)",
                    -drift, thresholds.max_inter_cycle_drift
                ),
            ));
        } else if drift > thresholds.max_inter_cycle_drift {
            proposals.push(proposal(
                RuleId::InterCycleDrift,
                (1.0, 0.90, 1.0),
                format!(
                    "cycles end {:.2}°C warmer each time (limit {:.2}°C)",
                    drift, thresholds.max_inter_cycle_drift
                ),
            ));
        }
    }

    let mae_slow = averaged
        .settling_mae
        .is_some_and(|mae| mae > thresholds.max_settling_mae);
    let time_slow = averaged
        .settling_time
        .is_some_and(|t| t > thresholds.max_settling_time_minutes);
    if mae_slow || time_slow {
        proposals.push(proposal(
            RuleId::SlowSettling,
            (1.0, 0.95, 1.10),
            format!(
                "settling mae {} / time {} min beyond {:.2}°C / {:.0} min",
                fmt_opt(averaged.settling_mae, 2),
                fmt_opt(averaged.settling_time, 0),
                thresholds.max_settling_mae,
                thresholds.max_settling_time_minutes
            ),
        ));
    }

    // More kp against overshoot would undo the overshoot correction.
    if !overshoot_fired {
        if let Some(rise) = averaged.rise_time {
            if rise > thresholds.max_rise_time_minutes {
                proposals.push(proposal(
                    RuleId::SlowResponse,
                    (1.10, 1.0, 1.0),
                    format!(
                        "rise time {:.0} min exceeds {:.0} min",
                        rise, thresholds.max_rise_time_minutes
                    ),
                ));
            }
        }
    }

    proposals.sort_by_key(|p| p.priority);
    proposals
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.precision$}"))
}

/// Multiply all firing rules' factors, then clamp the product once.
pub fn compose(proposals: &[AdjustmentProposal]) -> Option<ComposedAdjustment> {
    if proposals.is_empty() {
        return None;
    }
    let (kp, ki, kd) = proposals.iter().fold((1.0, 1.0, 1.0), |(kp, ki, kd), p| {
        (kp * p.kp_factor, ki * p.ki_factor, kd * p.kd_factor)
    });
    let clamp = |f: f64| f.clamp(MIN_COMPOSED_FACTOR, MAX_COMPOSED_FACTOR);

    Some(ComposedAdjustment {
        kp_factor: clamp(kp),
        ki_factor: clamp(ki),
        kd_factor: clamp(kd),
        rules: proposals.iter().map(|p| p.rule_id).collect(),
        reason: proposals
            .iter()
            .map(|p| format!("{}: {}", p.rule_id, p.reason))
            .collect::<Vec<_>>()
            .join("; "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::HeatingType;

    fn passing() -> AveragedMetrics {
        AveragedMetrics {
            overshoot: 0.05,
            undershoot: 0.05,
            oscillation_count: 0.0,
            settling_mae: Some(0.05),
            inter_cycle_drift: Some(0.0),
            rise_time: Some(20.0),
            settling_time: Some(15.0),
            dead_time: Some(5.0),
            sample_count: 8,
        }
    }

    fn gains() -> GainSet {
        GainSet::new(0.35, 0.0875, 0.14, 0.012, 1.0)
    }

    fn radiator() -> ConvergenceThresholds {
        ConvergenceThresholds::for_heating_type(HeatingType::Radiator)
    }

    #[test]
    fn test_passing_metrics_fire_nothing() {
        assert!(evaluate(&passing(), &radiator(), &gains()).is_empty());
    }

    #[test]
    fn test_zero_gains_fire_nothing() {
        let mut m = passing();
        m.overshoot = 2.0;
        let zero = GainSet::new(0.0, 0.0, 0.0, 0.01, 1.0);
        assert!(evaluate(&m, &radiator(), &zero).is_empty());
    }

    #[test]
    fn test_severe_overshoot_cuts_kp() {
        let mut m = passing();
        m.overshoot = 0.6;
        let proposals = evaluate(&m, &radiator(), &gains());
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].rule_id, RuleId::Overshoot);
        assert!((proposals[0].kp_factor - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_negative_drift_raises_ki_fifteen_percent() {
        let mut m = passing();
        m.inter_cycle_drift = Some(-0.4);
        let thresholds = ConvergenceThresholds::for_heating_type(HeatingType::FloorHydronic);
        let proposals = evaluate(&m, &thresholds, &gains());
        assert_eq!(proposals.len(), 1);
        let composed = compose(&proposals).unwrap();
        assert!((composed.ki_factor - 1.15).abs() < 1e-12);
        assert!((composed.kp_factor - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_positive_drift_lowers_ki() {
        let mut m = passing();
        m.inter_cycle_drift = Some(0.4);
        let proposals = evaluate(&m, &radiator(), &gains());
        assert!((proposals[0].ki_factor - 0.90).abs() < f64::EPSILON);
    }

    #[test]
    fn test_proposals_are_priority_ordered() {
        let m = AveragedMetrics {
            overshoot: 0.3,
            undershoot: 0.6,
            oscillation_count: 4.0,
            settling_mae: Some(0.5),
            inter_cycle_drift: Some(-0.5),
            rise_time: Some(500.0),
            settling_time: Some(500.0),
            dead_time: None,
            sample_count: 8,
        };
        let proposals = evaluate(&m, &radiator(), &gains());
        let order: Vec<u8> = proposals.iter().map(|p| p.priority).collect();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(order, sorted);
        // overshoot suppresses slow response
        assert!(!proposals.iter().any(|p| p.rule_id == RuleId::SlowResponse));
        for p in &proposals {
            for f in [p.kp_factor, p.ki_factor, p.kd_factor] {
                assert!((0.8..=1.25).contains(&f));
            }
        }
    }

    #[test]
    fn test_slow_response_raises_kp() {
        let mut m = passing();
        m.rise_time = Some(90.0);
        let proposals = evaluate(&m, &radiator(), &gains());
        assert_eq!(proposals[0].rule_id, RuleId::SlowResponse);
        assert!((proposals[0].kp_factor - 1.10).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compose_clamps_product_once() {
        let big = |rule_id| proposal(rule_id, (1.25, 1.25, 0.8), String::new());
        let proposals = vec![
            big(RuleId::Oscillation),
            big(RuleId::Overshoot),
            big(RuleId::Undershoot),
            big(RuleId::InterCycleDrift),
        ];
        let composed = compose(&proposals).unwrap();
        assert_eq!(composed.kp_factor, MAX_COMPOSED_FACTOR);
        assert_eq!(composed.kd_factor, MIN_COMPOSED_FACTOR);
        assert_eq!(composed.rules.len(), 4);
    }

    #[test]
    fn test_compose_empty_is_none() {
        assert!(compose(&[]).is_none());
    }
}
