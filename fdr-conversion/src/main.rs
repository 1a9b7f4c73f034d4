mod config;
mod telemetry;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig};
use forwarder::errors::ForwarderError;
use std::path::PathBuf;
use std::process::ExitCode;
use telemetry::TelemetryError;

#[derive(Parser)]
#[command(name = "fdr-conversion", version, about = "Forwards FdR3 flows to the FdR1 conversion API")]
struct Cli {
    /// YAML config file; environment variables override its values
    #[arg(long, env = "FDR_CONVERSION_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the forwarder and the admin listener
    Serve,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Forwarder(#[from] ForwarderError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Serve => serve(cli.config),
        CliCommand::CheckConfig => check_config(cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fdr-conversion: {e}");
            ExitCode::FAILURE
        }
    }
}

fn check_config(path: Option<PathBuf>) -> Result<(), StartupError> {
    let config = Config::load(path.as_deref())?;
    println!("Config ok: {:#?}", config.forwarder);
    Ok(())
}

fn serve(path: Option<PathBuf>) -> Result<(), StartupError> {
    let config = Config::load(path.as_deref())?;

    let logging = config.logging.clone().unwrap_or_default();
    let _sentry = telemetry::init_logging(&logging)?;
    if let Some(metrics) = &config.metrics {
        telemetry::init_metrics(metrics)?;
    }

    tracing::info!("Starting fdr-conversion forwarder");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(forwarder::run(config.forwarder))?;
    Ok(())
}
