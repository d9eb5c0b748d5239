//! Rate table dump for voltage-gated channels

use anyhow::Context;
use clap::Args;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::info;

use ionmech_core::{ChannelKinetics, MechanismKind, TableSettings, DEFAULT_CELSIUS};

use crate::error::{CliError, CliResult};

/// Largest table the command will print
pub const MAX_ROWS: usize = 100_000;

/// Dump the rate table of a voltage-gated channel
#[derive(Args, Debug)]
pub struct TableCommand {
    /// Channel name or alias (`k`, `na`)
    pub mechanism: String,

    /// Temperature (degC)
    #[arg(long, default_value_t = DEFAULT_CELSIUS)]
    pub celsius: f64,

    /// First voltage (mV)
    #[arg(long, default_value_t = -100.0, allow_hyphen_values = true)]
    pub from: f64,

    /// Last voltage (mV)
    #[arg(long, default_value_t = 100.0, allow_hyphen_values = true)]
    pub to: f64,

    /// Voltage increment (mV)
    #[arg(long, default_value_t = 10.0)]
    pub step: f64,

    /// Evaluate the rate functions directly instead of interpolating
    #[arg(long)]
    pub direct: bool,

    /// Write CSV to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl TableCommand {
    pub fn execute(self) -> CliResult<()> {
        if !(self.step > 0.0) || self.to < self.from {
            return Err(CliError::invalid_args(format!(
                "Need from <= to and step > 0 (got {}..{} by {})",
                self.from, self.to, self.step
            )));
        }

        let span = ((self.to - self.from) / self.step).floor();
        if !span.is_finite() || span >= MAX_ROWS as f64 {
            return Err(CliError::invalid_args(format!(
                "{}..{} by {} gives more than {} rows",
                self.from, self.to, self.step, MAX_ROWS
            )));
        }
        let rows = span as usize + 1;

        let settings = if self.direct {
            TableSettings::disabled()
        } else {
            TableSettings::default()
        };
        let kinetics = match MechanismKind::from_name(&self.mechanism) {
            Some(MechanismKind::KConductance) => ChannelKinetics::potassium(settings)?,
            Some(MechanismKind::NaConductance) => ChannelKinetics::sodium(settings)?,
            _ => {
                return Err(CliError::invalid_args(format!(
                    "'{}' is not a voltage-gated channel",
                    self.mechanism
                )))
            }
        };

        let mut out = String::from("v");
        for gate in kinetics.gates() {
            let _ = write!(out, ",{0}_inf,{0}_tau", gate.name);
        }
        out.push('\n');

        for i in 0..rows {
            let v = self.from + i as f64 * self.step;
            let _ = write!(out, "{}", v);
            for value in kinetics.rates(v, self.celsius)? {
                let _ = write!(out, ",{:.6e}", value);
            }
            out.push('\n');
        }

        match &self.output {
            Some(path) => {
                std::fs::write(path, out)
                    .with_context(|| format!("Failed to write table to {}", path.display()))?;
                info!("Wrote {} rows to {}", rows, path.display());
            }
            None => print!("{}", out),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(from: f64, to: f64, step: f64) -> TableCommand {
        TableCommand {
            mechanism: "k".to_string(),
            celsius: DEFAULT_CELSIUS,
            from,
            to,
            step,
            direct: false,
            output: None,
        }
    }

    #[test]
    fn test_row_count_is_capped() {
        let err = command(-100.0, 100.0, 1e-300).execute().unwrap_err();
        assert!(matches!(err, CliError::InvalidArgs(_)));
        let err = command(0.0, MAX_ROWS as f64, 1.0).execute().unwrap_err();
        assert!(matches!(err, CliError::InvalidArgs(_)));
    }

    #[test]
    fn test_table_written_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.csv");
        let cmd = TableCommand {
            output: Some(path.clone()),
            ..command(-80.0, -60.0, 10.0)
        };
        cmd.execute().unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().count(), 4);
        assert!(body.starts_with("v,n_inf,n_tau\n"));
    }
}
