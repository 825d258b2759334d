//! Command-line interface
//!
//! Every command prints through [`output::CommandOutput`], so `--json`
//! switches any of them to machine-readable output.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "thermotune")]
#[command(about = "Thermotune - self-tuning PID control for heating zones", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to ./thermotune.yaml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute physics-based starting gains for a zone
    Baseline(commands::baseline::BaselineArgs),

    /// Run the controller against a simulated zone
    Simulate(commands::simulate::SimulateArgs),

    /// Inspect or upgrade persisted zone state
    State(commands::state::StateArgs),

    /// Print the effective configuration
    Config(commands::config::ConfigArgs),
}

/// Report a failed command and exit non-zero.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "error": err.to_string(),
            "causes": causes,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| err.to_string())
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
