//! Baseline CLI command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::{fmt_num, list_table, output, CommandOutput};
use crate::domain::models::{Config, EnvelopeClass, GainSet, HeatingType, ZoneProperties};
use crate::services::physics::compute_baseline;

#[derive(Args, Debug)]
pub struct BaselineArgs {
    /// Emitter class (floor_hydronic, radiator, convector, forced_air)
    #[arg(long)]
    pub heating_type: Option<HeatingType>,

    /// Floor area in m²
    #[arg(long)]
    pub area: Option<f64>,

    /// Ceiling height in m
    #[arg(long)]
    pub ceiling_height: Option<f64>,

    /// Insulation quality (poor, average, good, passive)
    #[arg(long)]
    pub envelope: Option<EnvelopeClass>,
}

#[derive(Debug, Serialize)]
pub struct BaselineOutput {
    pub properties: ZoneProperties,
    pub volume_m3: f64,
    pub tau_hours: f64,
    pub dead_time_minutes: i64,
    pub gains: GainSet,
    pub envelope_min: GainSet,
    pub envelope_max: GainSet,
}

impl CommandOutput for BaselineOutput {
    fn to_human(&self) -> String {
        let p = &self.properties;
        let mut lines = vec![
            format!(
                "{} zone, {} m² x {} m ({} m³), {} envelope",
                p.heating_type,
                fmt_num(p.area_m2, 1),
                fmt_num(p.ceiling_height_m, 2),
                fmt_num(self.volume_m3, 1),
                p.envelope
            ),
            format!(
                "Time constant {} h, dead time {} min\n",
                fmt_num(self.tau_hours, 2),
                self.dead_time_minutes
            ),
        ];

        let mut table = list_table(&["gain", "baseline", "min", "max"]);
        let rows = [
            ("kp", self.gains.kp, self.envelope_min.kp, self.envelope_max.kp),
            ("ki", self.gains.ki, self.envelope_min.ki, self.envelope_max.ki),
            ("kd", self.gains.kd, self.envelope_min.kd, self.envelope_max.kd),
        ];
        for (name, value, lo, hi) in rows {
            table.add_row(vec![
                name.to_string(),
                fmt_num(value, 4),
                fmt_num(lo, 4),
                fmt_num(hi, 4),
            ]);
        }
        table.add_row(vec![
            "ke".to_string(),
            fmt_num(self.gains.ke, 4),
            "-".to_string(),
            "-".to_string(),
        ]);
        table.add_row(vec![
            "kf".to_string(),
            fmt_num(self.gains.kf, 4),
            "-".to_string(),
            "-".to_string(),
        ]);
        lines.push(table.to_string());
        lines.join("\n")
    }
}

/// Flags override the configured zone.
pub fn properties_from(args: &BaselineArgs, config: &Config) -> ZoneProperties {
    let mut props = config.zone.properties();
    if let Some(heating_type) = args.heating_type {
        props.heating_type = heating_type;
    }
    if let Some(area) = args.area {
        props.area_m2 = area;
    }
    if let Some(height) = args.ceiling_height {
        props.ceiling_height_m = height;
    }
    if let Some(envelope) = args.envelope {
        props.envelope = envelope;
    }
    props
}

pub async fn execute(args: BaselineArgs, config: &Config, json: bool) -> Result<()> {
    let properties = properties_from(&args, config);
    let baseline = compute_baseline(&properties).context("Failed to compute physics baseline")?;
    let (envelope_min, envelope_max) = baseline.envelope();

    let result = BaselineOutput {
        properties,
        volume_m3: properties.volume_m3(),
        tau_hours: baseline.tau_hours,
        dead_time_minutes: baseline.dead_time_minutes,
        gains: baseline.gains,
        envelope_min,
        envelope_max,
    };
    output(&result, json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let config = Config::default();
        let args = BaselineArgs {
            heating_type: Some(HeatingType::ForcedAir),
            area: Some(40.0),
            ceiling_height: None,
            envelope: Some(EnvelopeClass::Passive),
        };
        let props = properties_from(&args, &config);
        assert_eq!(props.heating_type, HeatingType::ForcedAir);
        assert_eq!(props.envelope, EnvelopeClass::Passive);
        assert!((props.area_m2 - 40.0).abs() < f64::EPSILON);
        assert!((props.ceiling_height_m - config.zone.ceiling_height_m).abs() < f64::EPSILON);
    }

    #[test]
    fn test_human_output_lists_gains() {
        let props = Config::default().zone.properties();
        let baseline = compute_baseline(&props).unwrap();
        let (envelope_min, envelope_max) = baseline.envelope();
        let out = BaselineOutput {
            properties: props,
            volume_m3: props.volume_m3(),
            tau_hours: baseline.tau_hours,
            dead_time_minutes: baseline.dead_time_minutes,
            gains: baseline.gains,
            envelope_min,
            envelope_max,
        };
        let text = out.to_human();
        assert!(text.contains("KP") || text.contains("kp"));
        assert!(text.contains("Time constant"));
        assert_eq!(out.to_json()["dead_time_minutes"], baseline.dead_time_minutes);
    }
}
