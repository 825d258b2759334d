//! Domain errors for the thermotune controller.

use thiserror::Error;

/// Domain-level errors that can occur in a zone's control pipeline.
///
/// Input faults (bad or stale sensor data) and governance rejections are not
/// errors; they are reported through `ControllerFault` and
/// `GovernorDecision` respectively.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid gains: {0}")]
    InvalidGains(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Governance violation: {0}")]
    GovernanceViolation(String),

    #[error("No applied change to roll back")]
    NothingToRollback,

    #[error("Unsupported state version {found} (newest known is {supported})")]
    UnsupportedStateVersion { found: u32, supported: u32 },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Zone {0} is not running")]
    ZoneUnavailable(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Persistence(err.to_string())
    }
}
