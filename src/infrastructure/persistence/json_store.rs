//! File-backed [`StateStore`]: one pretty-printed JSON document per zone.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::migration;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::PersistedZoneState;
use crate::domain::ports::StateStore;

/// Serialize a record exactly as it is written to disk.
pub fn encode(state: &PersistedZoneState) -> DomainResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(state)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse and migrate a record. `zone_id` backfills records that predate it.
pub fn decode(bytes: &[u8], zone_id: &str) -> DomainResult<PersistedZoneState> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    migration::migrate(value, zone_id)
}

/// Read and migrate a record file, surfacing every failure.
pub fn read_file(path: &Path) -> DomainResult<PersistedZoneState> {
    let bytes = std::fs::read(path)?;
    decode(&bytes, &zone_id_from_path(path))
}

/// Write through a temp file and rename so readers never see a torn record.
pub fn write_file(path: &Path, state: &PersistedZoneState) -> DomainResult<()> {
    let bytes = encode(state)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn zone_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Directory of `<zone_id>.json` records.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for a zone. Characters outside `[A-Za-z0-9_-]` become `_`.
    pub fn path_for(&self, zone_id: &str) -> PathBuf {
        let safe: String = zone_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self, zone_id: &str) -> DomainResult<Option<PersistedZoneState>> {
        let path = self.path_for(zone_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(zone = zone_id, path = %path.display(), "no persisted state");
                return Ok(None);
            }
            Err(err) => {
                tracing::warn!(
                    zone = zone_id,
                    path = %path.display(),
                    error = %err,
                    "persisted state could not be read, starting from physics defaults"
                );
                return Ok(None);
            }
        };

        match decode(&bytes, zone_id) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                tracing::warn!(
                    zone = zone_id,
                    path = %path.display(),
                    error = %err,
                    "persisted state unreadable, starting from physics defaults"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, state: &PersistedZoneState) -> DomainResult<()> {
        let bytes = encode(state)?;
        let path = self.path_for(&state.zone_id);
        tokio::fs::create_dir_all(&self.dir).await?;
        // Unique per write so overlapping snapshots never share a temp file.
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await.map_err(|err| {
            DomainError::Persistence(format!("rename to {} failed: {err}", path.display()))
        })?;
        tracing::trace!(zone = %state.zone_id, path = %path.display(), "state saved");
        Ok(())
    }
}
