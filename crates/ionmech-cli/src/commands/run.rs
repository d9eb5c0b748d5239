//! Simulation run command

use anyhow::Context;
use clap::{Args, ValueEnum};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use ionmech_core::{Compartment, Kernel, Trace};

use crate::config::{CliConfig, SimulationConfig};
use crate::error::CliResult;

/// Trace output format
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Full trace as JSON
    Json,
    /// Time, voltage and state columns
    Csv,
}

impl OutputFormat {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// Run a simulation config
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Simulation config (TOML)
    #[arg(value_name = "SIMULATION")]
    pub simulation: PathBuf,

    /// Write the trace to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Trace format (defaults to the file extension, then the user preference)
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Override the stop time (ms)
    #[arg(long)]
    pub tstop: Option<f64>,

    /// Override the step size (ms)
    #[arg(long)]
    pub dt: Option<f64>,

    /// Override the temperature (degC)
    #[arg(long)]
    pub celsius: Option<f64>,

    /// Override the random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Evaluate rates directly instead of through tables
    #[arg(long)]
    pub no_tables: bool,

    /// Collect per-step timings
    #[arg(long)]
    pub perf: bool,
}

impl RunCommand {
    pub fn execute(self, user: &CliConfig) -> CliResult<()> {
        let mut config = SimulationConfig::load(&self.simulation)?;
        self.apply_overrides(&mut config);

        info!("Building compartment from {}", self.simulation.display());
        let mut cell = config.build()?;
        let trace = cell.run()?;

        print_summary(&cell, &trace, user.preferences.spike_threshold);

        if let Some(path) = &self.output {
            let format = self.resolve_format(path, user);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let body = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&trace)?,
                OutputFormat::Csv => trace_to_csv(&cell, &trace),
            };
            std::fs::write(path, body)
                .with_context(|| format!("Failed to write trace to {}", path.display()))?;
            info!("Wrote trace to {}", path.display());
        }
        Ok(())
    }

    fn apply_overrides(&self, config: &mut SimulationConfig) {
        if let Some(tstop) = self.tstop {
            config.run.tstop = tstop;
        }
        if let Some(dt) = self.dt {
            config.run.dt = dt;
        }
        if let Some(celsius) = self.celsius {
            config.run.celsius = celsius;
        }
        if let Some(seed) = self.seed {
            config.kernel.seed = seed;
        }
        if self.no_tables {
            config.kernel.tables = false;
        }
        if self.perf {
            config.run.perf_enabled = true;
        }
    }

    fn resolve_format(&self, path: &Path, user: &CliConfig) -> OutputFormat {
        if let Some(format) = self.format {
            return format;
        }
        if let Some(format) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(OutputFormat::from_name)
        {
            return format;
        }
        OutputFormat::from_name(&user.preferences.output_format).unwrap_or_else(|| {
            warn!(
                "Unknown output format '{}' in user config, using json",
                user.preferences.output_format
            );
            OutputFormat::Json
        })
    }
}

fn print_summary(cell: &Compartment, trace: &Trace, threshold: f64) {
    println!(
        "Run complete: {} steps to t={:.3} ms ({} instances)",
        trace.steps_executed,
        cell.time(),
        trace.labels.len()
    );
    println!("  final v: {:.3} mV", cell.voltage());
    if let Some(peak) = trace.peak_voltage() {
        println!("  peak v: {:.3} mV", peak);
    }
    println!(
        "  action potentials (> {} mV): {}",
        threshold,
        trace.threshold_crossings(threshold).len()
    );
    println!("  output events: {}", trace.events.len());
    if let Some(perf) = &trace.perf {
        println!(
            "  step time: avg {} ns, max {} ns over {} steps",
            perf.avg_step_ns, perf.max_step_ns, perf.steps
        );
    }
}

/// `t,v` followed by one column per instance state, named `<index>.<mechanism>.<state>`
pub fn trace_to_csv(cell: &Compartment, trace: &Trace) -> String {
    let mut out = String::from("t,v");
    for (i, instance) in cell.instances().iter().enumerate() {
        let schema = instance.schema();
        for state in schema.states {
            let _ = write!(out, ",{}.{}.{}", i, schema.name, state.name);
        }
    }
    out.push('\n');

    for sample in &trace.samples {
        let _ = write!(out, "{},{}", sample.t, sample.v);
        for value in sample.states.iter().flatten() {
            let _ = write!(out, ",{}", value);
        }
        out.push('\n');
    }
    out
}
