use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use telemetry_relay::config::RelayConfig;
use telemetry_relay::error::Result;
use telemetry_relay::service;
use telemetry_relay::utils::logging;

/// Relay multicast telemetry to WebSocket subscribers
#[derive(Debug, Parser)]
#[command(name = "telemetry-relay", version, about)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    config.apply_env()?;
    config.validate_strict()?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", RelayConfig::example_config());
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging);

    // All relay state lives on this one thread.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(service::serve(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Relay terminated");
            ExitCode::FAILURE
        }
    }
}
