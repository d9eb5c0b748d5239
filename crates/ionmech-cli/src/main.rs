//! # ionmech CLI
//!
//! Runs single-compartment simulations from TOML configs and inspects
//! the mechanism schemas and rate tables they are built from.

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ionmech_cli::config::CliConfig;
use ionmech_cli::IonmechCli;

fn main() {
    let cli = IonmechCli::parse();

    // The user config may set the default log level, so load it before logging starts
    let user = cli.user_config();
    let default_level = if cli.verbose {
        "debug".to_string()
    } else {
        user.as_ref()
            .ok()
            .and_then(|c| c.log_level.clone())
            .unwrap_or_else(|| "info".to_string())
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let user = user.unwrap_or_else(|err| {
        warn!("Ignoring user config, using defaults: {}", err);
        CliConfig::default()
    });

    if let Err(err) = cli.execute(&user) {
        error!("Command failed: {}", err);
        std::process::exit(1);
    }
}
