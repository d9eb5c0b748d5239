//! ionmech CLI crate
//!
//! Purpose:
//! - Provide a command-line front end to the `ionmech-core` mechanism kernels.
//! - Expose the commands as a library so tests and scripts can drive them without a subprocess.
//!
//! Commands (see [commands]):
//! - init: write a commented simulation config template.
//! - run: build a compartment from a config, integrate it and write the trace as JSON or CSV.
//! - describe: print mechanism schemas (parameters, units, limits, states).
//! - table: dump steady-state and time-constant tables of the voltage-gated channels.
//!
//! Notes:
//! - The binary (src/main.rs) wires up logging and argument parsing, calling IonmechCli::execute().
//! - User preferences live in `<config dir>/ionmech/config.toml`, or the file named by `--config`.

pub mod commands;
pub mod config;
pub mod error;

pub use commands::IonmechCli;
