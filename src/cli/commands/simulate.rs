//! Simulate CLI command.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::cli::output::{fmt_num, fmt_opt, list_table, output, CommandOutput};
use crate::domain::models::{Config, GainSet, HeatingType};
use crate::domain::ports::StateStore;
use crate::infrastructure::persistence::JsonStateStore;
use crate::services::simulation::{run_simulation, SimulationPlan, SimulationSummary, ThermalPlant};
use crate::services::zone::ZoneController;

const PROGRESS_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";
const PROGRESS_CHARS: &str = "█▓▒░ ";

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Simulated duration in hours
    #[arg(long, default_value = "48")]
    pub hours: u32,

    /// Control step in minutes
    #[arg(long, default_value = "5")]
    pub step_minutes: u32,

    /// Target temperature in °C
    #[arg(long, default_value = "21.0")]
    pub setpoint: f64,

    /// Outdoor temperature in °C
    #[arg(long, default_value = "5.0")]
    pub outdoor: f64,

    /// Starting indoor temperature in °C
    #[arg(long, default_value = "16.0")]
    pub initial: f64,

    /// Override the configured emitter class
    #[arg(long)]
    pub heating_type: Option<HeatingType>,

    /// Write the learned state to the configured state directory
    #[arg(long)]
    pub save: bool,

    /// List every completed cycle
    #[arg(long)]
    pub show_cycles: bool,
}

#[derive(Debug, Serialize)]
pub struct SimulateOutput {
    pub heating_type: HeatingType,
    pub physics_gains: GainSet,
    #[serde(flatten)]
    pub summary: SimulationSummary,
    pub saved_to: Option<String>,
    #[serde(skip)]
    pub show_cycles: bool,
}

impl CommandOutput for SimulateOutput {
    fn to_human(&self) -> String {
        let s = &self.summary;
        let status = &s.status;
        let mut lines = vec![
            format!(
                "Simulated {} steps of a {} zone; final temperature {} °C (tail error {} °C)",
                s.steps,
                self.heating_type,
                fmt_num(s.final_temp, 2),
                fmt_num(s.tail_mean_abs_error, 3)
            ),
            format!(
                "Cycles: {} completed, learning {} (confidence {})",
                s.cycles.len(),
                status.learning_status,
                fmt_num(status.confidence, 1)
            ),
            format!(
                "Governor: {} commit(s), {} rejection(s), {} rollback(s)",
                s.commits, s.rejections, s.rollbacks
            ),
            format!("Physics gains: {}", self.physics_gains),
            format!("Final gains:   {}", status.gains),
        ];
        if !status.failing_metrics.is_empty() {
            lines.push(format!("Failing: {}", status.failing_metrics.join(", ")));
        }
        if let Some(path) = &self.saved_to {
            lines.push(format!("State written to {path}"));
        }

        if self.show_cycles && !s.cycles.is_empty() {
            let mut table = list_table(&[
                "#", "started", "overshoot", "undershoot", "osc", "mae", "drift", "rise", "note",
            ]);
            for (i, c) in s.cycles.iter().enumerate() {
                table.add_row(vec![
                    (i + 1).to_string(),
                    c.started_at.format("%d %H:%M").to_string(),
                    fmt_num(c.overshoot, 2),
                    fmt_num(c.undershoot, 2),
                    c.oscillation_count.to_string(),
                    fmt_opt(c.settling_mae, 3),
                    fmt_opt(c.inter_cycle_drift, 2),
                    fmt_opt(c.rise_time, 0),
                    c.interrupted.as_ref().map(ToString::to_string).unwrap_or_default(),
                ]);
            }
            lines.push(String::new());
            lines.push(table.to_string());
        }
        lines.join("\n")
    }
}

fn progress_bar(total: u64, json: bool) -> Result<ProgressBar> {
    if json {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .context("Invalid progress bar template")?
            .progress_chars(PROGRESS_CHARS),
    );
    Ok(pb)
}

pub async fn execute(args: SimulateArgs, config: &Config, json: bool) -> Result<()> {
    if args.step_minutes == 0 {
        anyhow::bail!("--step-minutes must be at least 1");
    }
    let mut config = config.clone();
    if let Some(heating_type) = args.heating_type {
        config.zone.heating_type = heating_type;
    }

    let start = Utc::now();
    let mut zone = ZoneController::new(&config, start).context("Failed to build zone")?;
    let mut plant = ThermalPlant::from_baseline(zone.physics(), args.initial, args.outdoor);
    let plan = SimulationPlan {
        duration: Duration::hours(i64::from(args.hours)),
        step: Duration::minutes(i64::from(args.step_minutes)),
        setpoint: args.setpoint,
    };

    let total = u64::from(args.hours) * 60 / u64::from(args.step_minutes);
    let pb = progress_bar(total, json)?;
    pb.set_message(format!("{} zone", config.zone.heating_type));
    let summary = run_simulation(&mut zone, &mut plant, &plan, start, |step| pb.set_position(step))
        .context("Simulation failed")?;
    pb.finish_and_clear();

    let saved_to = if args.save {
        let store = JsonStateStore::new(&config.persistence.state_dir);
        let end = start + plan.duration;
        store
            .save(&zone.to_persisted(end))
            .await
            .context("Failed to save simulated state")?;
        Some(store.path_for(zone.zone_id()).display().to_string())
    } else {
        None
    };

    tracing::info!(
        zone = zone.zone_id(),
        cycles = summary.cycles.len(),
        commits = summary.commits,
        rollbacks = summary.rollbacks,
        "simulation finished"
    );

    let result = SimulateOutput {
        heating_type: config.zone.heating_type,
        physics_gains: zone.physics().gains,
        summary,
        saved_to,
        show_cycles: args.show_cycles,
    };
    output(&result, json);
    Ok(())
}
