//! Config CLI command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the built-in defaults instead of the merged configuration
    #[arg(long)]
    pub defaults: bool,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigOutput {
    pub config: Config,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config)
            .unwrap_or_else(|err| format!("# failed to render configuration: {err}"))
    }
}

pub async fn execute(args: ConfigArgs, config: &Config, json: bool) -> Result<()> {
    let config = if args.defaults {
        Config::default()
    } else {
        config.clone()
    };
    // Round-trip through YAML so what is printed is known to load back.
    let rendered = serde_yaml::to_string(&config).context("Failed to render configuration")?;
    serde_yaml::from_str::<Config>(&rendered).context("Rendered configuration does not parse")?;

    output(&ConfigOutput { config }, json);
    Ok(())
}
