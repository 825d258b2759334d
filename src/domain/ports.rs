use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainResult;
use super::models::PersistedZoneState;

/// Desired actuator state emitted once per processed event.
///
/// The core never touches hardware; it only states what it wants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub issued_at: DateTime<Utc>,
    /// Drive fraction within the configured output bounds
    pub output: f64,
    /// Desired on/off state for switched actuators
    pub on: bool,
}

/// Hand-off point to whatever drives valves, relays or blowers.
///
/// Implementations must not block: the zone loop calls this inline and moves
/// on to the next event.
pub trait ActuatorDispatcher: Send + Sync {
    fn dispatch(&self, zone_id: &str, command: ActuatorCommand);
}

/// Persistence interface for per-zone learned state
///
/// The zone loop hands snapshots over on a spawned task and never waits for
/// the write to finish.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the newest record for a zone
    ///
    /// # Returns
    /// * `Ok(Some(state))` if a readable record exists (already migrated)
    /// * `Ok(None)` if nothing is stored or the record is unusable
    /// * `Err(DomainError)` on I/O failure
    async fn load(&self, zone_id: &str) -> DomainResult<Option<PersistedZoneState>>;

    /// Replace the stored record for `state.zone_id`
    async fn save(&self, state: &PersistedZoneState) -> DomainResult<()>;
}
