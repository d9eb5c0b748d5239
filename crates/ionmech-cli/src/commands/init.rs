//! Simulation config initialization command

use clap::Args;
use std::path::PathBuf;
use tracing::info;

use crate::config::SimulationConfig;
use crate::error::{CliError, CliResult};

const HEADER: &str = "\
# ionmech simulation config
#
# [compartment]  cm (uF/cm2), area (um2)
# [run]          dt, tstop (ms), celsius, v_init (mV), record_every
# [kernel]       seed, tables, domain, q10 = { factor, reference_celsius }
# [ions]         ena, ek (mV)
# [[mechanisms]] kind = leak | na | k | nmda | iclamp | netstim, parameters = { ... }
# [[events]]     target (mechanism index), time (ms), weight

";

/// Write a simulation config template
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Output path
    #[arg(default_value = "simulation.toml")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    pub fn execute(self) -> CliResult<()> {
        if self.path.exists() && !self.force {
            return Err(CliError::invalid_args(format!(
                "{} already exists (use --force to overwrite)",
                self.path.display()
            )));
        }

        let body = SimulationConfig::template().to_toml()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, format!("{}{}", HEADER, body))?;

        info!("Wrote simulation config to {}", self.path.display());
        info!("Run 'ionmech run {}' to simulate it", self.path.display());
        Ok(())
    }
}
