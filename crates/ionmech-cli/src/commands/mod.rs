//! CLI command implementations for ionmech

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::CliConfig;
use crate::error::CliResult;

pub mod describe;
pub mod init;
pub mod run;
pub mod table;

/// ionmech - mechanism kernels for compartmental simulation
#[derive(Parser, Debug)]
#[command(
    name = "ionmech",
    version,
    about = "Run and inspect ion-channel, synapse and stimulus kernels",
    long_about = "ionmech runs single-compartment simulations built from Hodgkin-Huxley \
                  channels, NMDA synapses, current clamps and variable-rate event \
                  generators, and prints the schemas and rate tables behind them."
)]
pub struct IonmechCli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// User configuration file path
    #[arg(short, long, global = true, env = "IONMECH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a simulation config template
    #[command(alias = "new")]
    Init(init::InitCommand),

    /// Run a simulation config
    Run(run::RunCommand),

    /// Show mechanism schemas
    Describe(describe::DescribeCommand),

    /// Dump the rate table of a voltage-gated channel
    Table(table::TableCommand),
}

impl IonmechCli {
    /// Load the user configuration this invocation points at
    pub fn user_config(&self) -> CliResult<CliConfig> {
        CliConfig::resolve(self.config.as_deref())
    }

    /// Execute the CLI command with the resolved user configuration
    pub fn execute(self, config: &CliConfig) -> CliResult<()> {
        match self.command {
            Commands::Init(cmd) => cmd.execute(),
            Commands::Run(cmd) => cmd.execute(config),
            Commands::Describe(cmd) => cmd.execute(),
            Commands::Table(cmd) => cmd.execute(),
        }
    }
}
