//! Thermotune CLI entry point.

use clap::Parser;

use thermotune::cli::{Cli, Commands};
use thermotune::infrastructure::config::ConfigLoader;
use thermotune::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load_with(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => thermotune::cli::handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Baseline(args) => {
            thermotune::cli::commands::baseline::execute(args, &config, cli.json).await
        }
        Commands::Simulate(args) => {
            thermotune::cli::commands::simulate::execute(args, &config, cli.json).await
        }
        Commands::State(args) => {
            thermotune::cli::commands::state::execute(args, &config, cli.json).await
        }
        Commands::Config(args) => {
            thermotune::cli::commands::config::execute(args, &config, cli.json).await
        }
    };

    if let Err(err) = result {
        thermotune::cli::handle_error(err, cli.json);
    }
}
