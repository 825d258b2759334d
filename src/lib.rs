//! Thermotune - self-tuning PID control for a single heating zone
//!
//! A zone starts from physics-derived gains, measures every heating cycle,
//! and adjusts its gains under a governor that rate-limits changes, keeps
//! them near the physics baseline and rolls back changes that make control
//! worse.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and collaborator ports
//! - **Service Layer** (`services`): controller, cycle tracking, learning and
//!   the per-zone pipeline
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging and
//!   state persistence
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use thermotune::{Config, ZoneController, ZoneEvent};
//!
//! let mut zone = ZoneController::new(&Config::default(), chrono::Utc::now())?;
//! let outcome = zone.handle(ZoneEvent::Sample(sample))?;
//! dispatch(outcome.command);
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    ApplyRecord, Config, ControlMode, CycleMetrics, GainSet, HeatingType, LearningStatus,
    PauseSignal, PersistedZoneState, Sample,
};
pub use domain::ports::{ActuatorCommand, ActuatorDispatcher, StateStore};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::persistence::JsonStateStore;
pub use services::{ManualCommand, ZoneController, ZoneEvent, ZoneHandle, ZoneRunner, ZoneStatus};
