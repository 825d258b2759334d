//! State CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::output::{fmt_num, fmt_opt, list_table, output, CommandOutput};
use crate::domain::models::{Config, PersistedZoneState, CURRENT_STATE_VERSION};
use crate::infrastructure::persistence::{self, migration, JsonStateStore};

/// Cycles shown by `state show`.
const RECENT_CYCLES: usize = 10;

#[derive(Args, Debug)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommands,
}

#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show a persisted zone record
    Show {
        /// Record file (defaults to the configured zone's file)
        file: Option<PathBuf>,
    },
    /// Upgrade a record to the current version in place
    Migrate {
        /// Record file (defaults to the configured zone's file)
        file: Option<PathBuf>,
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct StateShowOutput {
    pub path: String,
    #[serde(flatten)]
    pub state: PersistedZoneState,
}

impl CommandOutput for StateShowOutput {
    fn to_human(&self) -> String {
        let s = &self.state;
        let c = &s.counters;
        let mut lines = vec![
            format!("Zone {} ({}) from {}", s.zone_id, s.heating_type, self.path),
            format!(
                "Version {}, saved {}, integral {}",
                s.version,
                s.saved_at.format("%Y-%m-%d %H:%M:%S UTC"),
                fmt_num(s.integral, 4)
            ),
            format!(
                "Applies: {} this season ({}), {} lifetime; last {}",
                c.applies_this_season,
                c.season_id,
                c.applies_lifetime,
                c.last_apply_time
                    .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
            ),
        ];
        if c.is_validating() {
            lines.push(format!(
                "Validating: {} cycle(s) remaining, baseline {}",
                c.validation_cycles_remaining,
                fmt_opt(c.pre_apply_baseline_metric, 3)
            ));
        }

        let mut gains = list_table(&["gain", "current", "physics"]);
        let rows = [
            ("kp", s.gains.kp, s.physics_baseline.kp),
            ("ki", s.gains.ki, s.physics_baseline.ki),
            ("kd", s.gains.kd, s.physics_baseline.kd),
            ("ke", s.gains.ke, s.physics_baseline.ke),
            ("kf", s.gains.kf, s.physics_baseline.kf),
        ];
        for (name, current, physics) in rows {
            gains.add_row(vec![name.to_string(), fmt_num(current, 4), fmt_num(physics, 4)]);
        }
        lines.push(String::new());
        lines.push(gains.to_string());

        if !s.apply_history.is_empty() {
            let mut applies = list_table(&["when", "trigger", "kp", "ki", "kd", "reason"]);
            for record in &s.apply_history {
                applies.add_row(vec![
                    record.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                    record.trigger.to_string(),
                    fmt_num(record.new_gains.kp, 4),
                    fmt_num(record.new_gains.ki, 4),
                    fmt_num(record.new_gains.kd, 4),
                    record.reason.clone(),
                ]);
            }
            lines.push(String::new());
            lines.push(format!("{} apply record(s):", s.apply_history.len()));
            lines.push(applies.to_string());
        }

        let total = s.cycle_history.len();
        if total > 0 {
            let mut cycles = list_table(&["ended", "overshoot", "undershoot", "osc", "mae", "drift"]);
            for m in s.cycle_history.iter().skip(total.saturating_sub(RECENT_CYCLES)) {
                cycles.add_row(vec![
                    m.ended_at.format("%m-%d %H:%M").to_string(),
                    fmt_num(m.overshoot, 2),
                    fmt_num(m.undershoot, 2),
                    m.oscillation_count.to_string(),
                    fmt_opt(m.settling_mae, 3),
                    fmt_opt(m.inter_cycle_drift, 2),
                ]);
            }
            lines.push(String::new());
            lines.push(format!(
                "{} cycle(s) recorded, newest {}:",
                total,
                total.min(RECENT_CYCLES)
            ));
            lines.push(cycles.to_string());
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StateMigrateOutput {
    pub path: String,
    pub from_version: u32,
    pub to_version: u32,
    pub written: bool,
}

impl CommandOutput for StateMigrateOutput {
    fn to_human(&self) -> String {
        if self.from_version == self.to_version {
            format!("{} is already at version {}", self.path, self.to_version)
        } else if self.written {
            format!(
                "Migrated {} from version {} to {}",
                self.path, self.from_version, self.to_version
            )
        } else {
            format!(
                "{} would migrate from version {} to {} (dry run)",
                self.path, self.from_version, self.to_version
            )
        }
    }
}

fn resolve_path(file: Option<PathBuf>, config: &Config) -> PathBuf {
    file.unwrap_or_else(|| {
        JsonStateStore::new(&config.persistence.state_dir).path_for(&config.zone.id)
    })
}

/// Upgrade the record at `path`, rewriting it only when the version changes.
pub fn migrate_file(path: &Path, dry_run: bool) -> Result<StateMigrateOutput> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).context("State file is not valid JSON")?;
    let from_version = migration::version_of(&value)?;
    let zone_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let state = migration::migrate(value, &zone_id).context("Failed to migrate state")?;

    let written = !dry_run && from_version != state.version;
    if written {
        persistence::write_file(path, &state)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), from_version, to_version = state.version, "state migrated");
    }

    Ok(StateMigrateOutput {
        path: path.display().to_string(),
        from_version,
        to_version: CURRENT_STATE_VERSION,
        written,
    })
}

pub async fn execute(args: StateArgs, config: &Config, json: bool) -> Result<()> {
    match args.command {
        StateCommands::Show { file } => {
            let path = resolve_path(file, config);
            let state = persistence::read_file(&path)
                .with_context(|| format!("Failed to load state from {}", path.display()))?;
            let result = StateShowOutput {
                path: path.display().to_string(),
                state,
            };
            output(&result, json);
        }
        StateCommands::Migrate { file, dry_run } => {
            let path = resolve_path(file, config);
            let result = migrate_file(&path, dry_run)?;
            output(&result, json);
        }
    }
    Ok(())
}
