//! End-to-end learning scenarios driven through `ZoneController`.

mod common;

use chrono::Duration;
use common::{config_for, t0, CycleBuilder};
use thermotune::domain::models::{
    ApplyTrigger, CycleState, HeatingType, LearningConfig, LearningStatus, RuleId, Sample,
};
use thermotune::services::controller::ControllerFault;
use thermotune::services::convergence::ConvergenceModel;
use thermotune::services::governor::{
    GovernorDecision, GovernorPhase, RejectionReason, ValidationOutcome,
};
use thermotune::services::rule_engine;
use thermotune::services::zone::{ZoneController, ZoneEvent};

fn radiator_zone() -> ZoneController {
    ZoneController::new(&config_for(HeatingType::Radiator), t0()).unwrap()
}

/// Feed eight overshooting radiator cycles; the eighth commits.
fn commit_overshoot_fix(zone: &mut ZoneController) {
    for i in 0..8 {
        let cycle = CycleBuilder::new(i).overshoot(0.6).build();
        let at = cycle.ended_at;
        let learning = zone.record_cycle(cycle, at);
        assert!(learning.validation.is_none());

        match (i, learning.decision) {
            (0..=4, None) => {}
            (5 | 6, Some(GovernorDecision::Rejected(RejectionReason::InsufficientCycles { need, .. }))) => {
                assert_eq!(need, 8);
            }
            (7, Some(GovernorDecision::Committed(record))) => {
                assert_eq!(record.trigger, ApplyTrigger::Auto);
                assert!(record.reason.contains("overshoot"));
            }
            (i, other) => panic!("unexpected decision after cycle {}: {other:?}", i + 1),
        }
    }
}

#[test]
fn radiator_overshoot_commits_after_eight_cycles() {
    let mut zone = radiator_zone();
    let physics = zone.physics().gains;
    commit_overshoot_fix(&mut zone);

    let status = zone.status();
    assert_eq!(status.governor_phase, GovernorPhase::Validating);
    assert_eq!(status.validation_cycles_remaining, 5);
    assert_eq!(status.learning_status, LearningStatus::Active);
    assert_eq!(status.applies_lifetime, 1);
    assert_eq!(status.apply_history.len(), 1);
    assert!((status.gains.kp - physics.kp * 0.85).abs() < 1e-9);
    assert!((status.gains.ki - physics.ki * 0.90).abs() < 1e-9);
    assert!((status.gains.kd - physics.kd * 1.10).abs() < 1e-9);
    assert_eq!(status.integral, 0.0);

    // The analysis window restarts at the commit; history is kept for audit.
    assert_eq!(status.cycle_count, 0);
    assert_eq!(zone.convergence().history().len(), 8);
}

#[test]
fn radiator_confidence_at_eight_cycles() {
    let mut model = ConvergenceModel::new(HeatingType::Radiator, &LearningConfig::default());
    for i in 0..8 {
        model.record(CycleBuilder::new(i).overshoot(0.6).build());
        let report = model.evaluate();
        if i < 5 {
            assert_eq!(report.confidence, 0.0);
        }
    }
    // ceiling 80 × (0.6 × stability 1.0 + 0.4 × clarity 0.88)
    let report = model.evaluate();
    assert!((report.confidence - 76.16).abs() < 1e-6, "{}", report.confidence);
    assert!(!report.converged);
    assert_eq!(report.failing, vec!["overshoot"]);
}

#[test]
fn validation_passes_with_steady_error() {
    let mut zone = radiator_zone();
    commit_overshoot_fix(&mut zone);
    let committed = zone.status().gains;

    for (n, i) in (8..13).enumerate() {
        let cycle = CycleBuilder::new(i).overshoot(0.2).settling_mae(0.11).build();
        let at = cycle.ended_at;
        let learning = zone.record_cycle(cycle, at);
        let expected = if n == 4 {
            ValidationOutcome::Passed
        } else {
            ValidationOutcome::InProgress {
                cycles_remaining: 4 - n as u32,
            }
        };
        assert_eq!(learning.validation, Some(expected));
        assert!(learning.decision.is_none());
    }

    let status = zone.status();
    assert_eq!(status.governor_phase, GovernorPhase::Idle);
    assert_eq!(status.gains, committed);
}

#[test]
fn degraded_settling_error_rolls_back() {
    let mut zone = radiator_zone();
    let physics = zone.physics().gains;
    commit_overshoot_fix(&mut zone);

    // Baseline mae 0.10, rollback above 0.13 once two samples are in.
    let first = CycleBuilder::new(8).settling_mae(0.135).build();
    let at = first.ended_at;
    let learning = zone.record_cycle(first, at);
    assert_eq!(
        learning.validation,
        Some(ValidationOutcome::InProgress { cycles_remaining: 4 })
    );

    let second = CycleBuilder::new(9).settling_mae(0.135).build();
    let at = second.ended_at;
    let learning = zone.record_cycle(second, at);
    let Some(ValidationOutcome::RolledBack(event)) = learning.validation else {
        panic!("expected rollback, got {:?}", learning.validation);
    };
    assert!((event.baseline_metric - 0.10).abs() < 1e-9);
    assert!((event.observed_metric - 0.135).abs() < 1e-9);
    assert_eq!(event.restored_gains, physics);

    let status = zone.status();
    assert_eq!(status.gains, physics);
    assert_eq!(status.governor_phase, GovernorPhase::Idle);
    assert!(status.apply_history.is_empty());
}

#[test]
fn floor_drift_is_not_converged_and_raises_ki() {
    let mut zone = ZoneController::new(&config_for(HeatingType::FloorHydronic), t0()).unwrap();
    let mut last_decision = None;
    for i in 0..8 {
        let cycle = CycleBuilder::new(i).drift(-0.4).build();
        let at = cycle.ended_at;
        last_decision = zone.record_cycle(cycle, at).decision;
    }

    let report = zone.convergence().evaluate();
    assert!(!report.converged);
    assert_eq!(report.failing, vec!["inter_cycle_drift"]);
    // ceiling 80 × (0.6 + 0.4 × 0.7) stays below the 80 bar for floors
    assert!((report.confidence - 70.4).abs() < 1e-6, "{}", report.confidence);
    assert!(matches!(
        last_decision,
        Some(GovernorDecision::Rejected(RejectionReason::LowConfidence { .. }))
    ));

    let averaged = report.averaged.unwrap();
    let proposals = rule_engine::evaluate(
        &averaged,
        zone.convergence().thresholds(),
        zone.controller().gains(),
    );
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].rule_id, RuleId::InterCycleDrift);
    assert!((proposals[0].ki_factor - 1.15).abs() < 1e-9);
    assert!((proposals[0].kp_factor - 1.0).abs() < 1e-9);
}

#[test]
fn sensor_stall_uses_safety_output_and_keeps_integral() {
    let mut config = config_for(HeatingType::Radiator);
    config.controller.safety_output = 0.3;
    let mut zone = ZoneController::new(&config, t0()).unwrap();

    let sample = |minute: i64, temp: f64| {
        ZoneEvent::Sample(Sample::new(t0() + Duration::minutes(minute), temp, 21.0))
    };
    zone.handle(sample(0, 20.0)).unwrap();
    zone.handle(sample(5, 20.1)).unwrap();
    let integral = zone.controller().integral();
    assert!(integral > 0.0);

    // 31 minutes without data exceeds the 30 minute stall window.
    let outcome = zone
        .handle(ZoneEvent::Tick(t0() + Duration::minutes(36)))
        .unwrap();
    assert_eq!(zone.controller().fault(), Some(ControllerFault::SensorStale));
    assert!((outcome.command.output - 0.3).abs() < 1e-12);
    assert!(outcome.command.on);
    assert_eq!(zone.controller().integral(), integral);

    // Recovery clears the fault without resetting or integrating across the gap.
    zone.handle(sample(40, 20.2)).unwrap();
    assert_eq!(zone.controller().fault(), None);
    assert_eq!(zone.controller().integral(), integral);
    assert_eq!(zone.status().fault, None);
}

#[test]
fn raw_samples_produce_a_recorded_cycle() {
    let mut zone = radiator_zone();
    let sample = |minute: i64, temp: f64| {
        ZoneEvent::Sample(Sample::new(t0() + Duration::minutes(minute), temp, 21.0))
    };

    // Cold start turns the actuator on and opens a cycle.
    let outcome = zone.handle(sample(0, 18.0)).unwrap();
    assert!(outcome.command.on);
    assert_eq!(zone.tracker().state(), CycleState::Heating);

    // Overshooting the setpoint drives the output to zero and the actuator off.
    let outcome = zone.handle(sample(10, 21.3)).unwrap();
    assert!(!outcome.command.on);
    assert_eq!(zone.tracker().state(), CycleState::Settling);

    // Hold above the setpoint through the 60 minute settle period.
    for minute in (20..70).step_by(10) {
        let outcome = zone.handle(sample(minute, 21.3)).unwrap();
        assert!(outcome.completed_cycles.is_empty());
        assert!(!outcome.command.on);
    }
    let outcome = zone.handle(sample(70, 21.3)).unwrap();
    assert_eq!(outcome.completed_cycles.len(), 1);
    assert_eq!(zone.tracker().state(), CycleState::Idle);

    let metrics = &outcome.completed_cycles[0];
    assert_eq!(metrics.started_at, t0());
    assert_eq!(metrics.ended_at, t0() + Duration::minutes(70));
    assert!((metrics.start_temp - 18.0).abs() < 1e-9);
    assert!((metrics.end_temp - 21.3).abs() < 1e-9);
    assert!((metrics.overshoot - 0.3).abs() < 1e-9);
    assert_eq!(metrics.undershoot, 0.0);
    assert_eq!(metrics.oscillation_count, 0);
    assert!((metrics.settling_mae.unwrap() - 0.3).abs() < 1e-9);
    assert!(metrics.rise_time.is_some());
    assert_eq!(metrics.inter_cycle_drift, None);
    assert_eq!(metrics.interrupted, None);

    assert_eq!(zone.convergence().history().len(), 1);
    assert_eq!(zone.status().cycle_count, 1);
    assert_eq!(zone.tracker().prev_cycle_end_temp(), Some(metrics.end_temp));
}
