pub mod adjustment;
pub mod config;
pub mod cycle;
pub mod gains;
pub mod governance;
pub mod history;
pub mod persisted;
pub mod sample;
pub mod thresholds;

pub use adjustment::{AdjustmentProposal, ApplyRecord, ApplyTrigger, RuleId};
pub use config::{
    Config, ControllerConfig, GovernorConfig, LearningConfig, LoggingConfig, PersistenceConfig,
    ZoneConfig,
};
pub use cycle::{CycleMetrics, CycleState, InterruptReason};
pub use gains::{EnvelopeClass, GainSet, HeatingType, ZoneProperties, MAX_GAIN_DRIFT};
pub use governance::{season_id, GovernorCounters, LearningStatus};
pub use history::BoundedHistory;
pub use persisted::{PersistedZoneState, CURRENT_STATE_VERSION};
pub use sample::{ControlMode, PauseSignal, Sample};
pub use thresholds::{AutoApplyLimits, ConvergenceThresholds, MIN_CONFIDENCE_CYCLES};
