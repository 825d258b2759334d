//! Service layer: the per-zone control and learning pipeline.

pub mod controller;
pub mod convergence;
pub mod cycle_tracker;
pub mod governor;
pub mod physics;
pub mod rule_engine;
pub mod simulation;
pub mod zone;
pub mod zone_runner;

pub use controller::{ControlInputs, Controller, ControllerFault, ControllerState, TermBreakdown};
pub use convergence::{AveragedMetrics, ConvergenceModel, ConvergenceReport};
pub use cycle_tracker::CycleTracker;
pub use governor::{
    Governor, GovernorDecision, GovernorPhase, RejectionReason, RollbackEvent, ValidationOutcome,
};
pub use physics::{compute_baseline, estimate_tau_hours, PhysicsBaseline};
pub use rule_engine::ComposedAdjustment;
pub use simulation::{run_simulation, SimulationPlan, SimulationSummary, ThermalPlant};
pub use zone::{CycleLearning, ManualCommand, ZoneController, ZoneEvent, ZoneOutcome, ZoneStatus};
pub use zone_runner::{RunnerConfig, ZoneHandle, ZoneRunner};
