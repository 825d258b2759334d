//! Upgrade chain for persisted zone records.
//!
//! Each step rewrites a raw JSON document one version forward, so a record
//! written by any earlier release reaches [`CURRENT_STATE_VERSION`] before it
//! is deserialized into [`PersistedZoneState`].
//!
//! | version | shape |
//! |---------|-------|
//! | 1 | flat `kp`/`ki`/`kd`/`ke` and `integral` |
//! | 2 | nested `gains` plus `cycle_history` |
//! | 3 | adds `kf`, `apply_history`, governor `counters`, `physics_baseline` |

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{GovernorCounters, PersistedZoneState, CURRENT_STATE_VERSION};

/// Read the record's version; records without one predate versioning.
pub fn version_of(value: &Value) -> DomainResult<u32> {
    match value.get("version") {
        None => Ok(1),
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                DomainError::SerializationError(format!("invalid version field: {v}"))
            }),
    }
}

/// Bring `value` up to the current version and deserialize it.
///
/// `zone_id` fills in the id for early records that did not store one.
pub fn migrate(mut value: Value, zone_id: &str) -> DomainResult<PersistedZoneState> {
    let mut version = version_of(&value)?;
    if version > CURRENT_STATE_VERSION {
        return Err(DomainError::UnsupportedStateVersion {
            found: version,
            supported: CURRENT_STATE_VERSION,
        });
    }
    if version == 0 {
        return Err(DomainError::SerializationError(
            "state version 0 does not exist".to_string(),
        ));
    }

    while version < CURRENT_STATE_VERSION {
        value = match version {
            1 => v1_to_v2(value, zone_id)?,
            2 => v2_to_v3(value)?,
            found => {
                return Err(DomainError::UnsupportedStateVersion {
                    found,
                    supported: CURRENT_STATE_VERSION,
                })
            }
        };
        version += 1;
        tracing::debug!(zone = zone_id, version, "migrated state record");
    }

    Ok(serde_json::from_value(value)?)
}

fn object(value: Value) -> DomainResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DomainError::SerializationError(format!(
            "state record must be an object, got {other}"
        ))),
    }
}

fn take_number(map: &mut Map<String, Value>, key: &str) -> DomainResult<Value> {
    match map.remove(key) {
        Some(v @ Value::Number(_)) => Ok(v),
        Some(other) => Err(DomainError::SerializationError(format!(
            "{key} must be a number, got {other}"
        ))),
        None => Err(DomainError::SerializationError(format!("missing {key}"))),
    }
}

/// Flat gains move under `gains`; an empty `cycle_history` appears.
fn v1_to_v2(value: Value, zone_id: &str) -> DomainResult<Value> {
    let mut map = object(value)?;
    let gains = json!({
        "kp": take_number(&mut map, "kp")?,
        "ki": take_number(&mut map, "ki")?,
        "kd": take_number(&mut map, "kd")?,
        "ke": take_number(&mut map, "ke")?,
    });
    map.insert("gains".to_string(), gains);
    map.entry("integral").or_insert(json!(0.0));
    map.entry("zone_id").or_insert_with(|| json!(zone_id));
    map.insert("cycle_history".to_string(), json!([]));
    map.insert("version".to_string(), json!(2));
    Ok(Value::Object(map))
}

/// Adds kf, governance state and the physics reference.
///
/// The physics baseline of a v2 record is unknown; the stored gains stand in
/// for it, and the zone recomputes the real baseline from its config anyway.
fn v2_to_v3(value: Value) -> DomainResult<Value> {
    let mut map = object(value)?;

    let saved_at = match map.get("saved_at") {
        Some(v) => serde_json::from_value::<DateTime<Utc>>(v.clone())?,
        None => {
            let now = Utc::now();
            map.insert("saved_at".to_string(), serde_json::to_value(now)?);
            now
        }
    };

    let gains = map
        .get_mut("gains")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| DomainError::SerializationError("missing gains".to_string()))?;
    gains.entry("kf").or_insert(json!(1.0));
    let gains = Value::Object(gains.clone());

    map.entry("physics_baseline").or_insert(gains);
    map.entry("apply_history").or_insert(json!([]));
    map.entry("counters")
        .or_insert(serde_json::to_value(GovernorCounters::new(saved_at))?);
    map.entry("analysis_since").or_insert(Value::Null);
    map.insert("version".to_string(), json!(3));
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::HeatingType;

    fn v1() -> Value {
        json!({
            "version": 1,
            "heating_type": "radiator",
            "saved_at": "2025-10-01T00:00:00Z",
            "kp": 0.3,
            "ki": 0.05,
            "kd": 0.1,
            "ke": 0.01,
            "integral": 0.12
        })
    }

    #[test]
    fn test_v1_migrates_to_current() {
        let state = migrate(v1(), "kitchen").unwrap();
        assert_eq!(state.version, CURRENT_STATE_VERSION);
        assert_eq!(state.zone_id, "kitchen");
        assert_eq!(state.heating_type, HeatingType::Radiator);
        assert!((state.gains.kp - 0.3).abs() < f64::EPSILON);
        assert!((state.gains.kf - 1.0).abs() < f64::EPSILON);
        assert!((state.integral - 0.12).abs() < f64::EPSILON);
        assert!(state.cycle_history.is_empty());
        assert!(state.apply_history.is_empty());
        assert_eq!(state.counters.applies_lifetime, 0);
        assert_eq!(state.counters.season_id, 2025);
    }

    #[test]
    fn test_unversioned_record_is_v1() {
        let mut value = v1();
        value.as_object_mut().unwrap().remove("version");
        assert_eq!(version_of(&value).unwrap(), 1);
        assert!(migrate(value, "kitchen").is_ok());
    }

    #[test]
    fn test_v2_keeps_history_and_zone() {
        let value = json!({
            "version": 2,
            "zone_id": "hall",
            "heating_type": "convector",
            "saved_at": "2025-12-01T00:00:00Z",
            "gains": { "kp": 0.4, "ki": 0.1, "kd": 0.05, "ke": 0.01 },
            "integral": 0.0,
            "cycle_history": []
        });
        let state = migrate(value, "ignored").unwrap();
        assert_eq!(state.zone_id, "hall");
        assert_eq!(state.physics_baseline, state.gains);
        assert_eq!(state.analysis_since, None);
    }

    #[test]
    fn test_future_version_is_rejected() {
        let value = json!({ "version": 9 });
        assert!(matches!(
            migrate(value, "z"),
            Err(DomainError::UnsupportedStateVersion { found: 9, supported: 3 })
        ));
    }

    #[test]
    fn test_missing_gain_is_an_error() {
        let mut value = v1();
        value.as_object_mut().unwrap().remove("kd");
        assert!(matches!(
            migrate(value, "z"),
            Err(DomainError::SerializationError(_))
        ));
    }
}
