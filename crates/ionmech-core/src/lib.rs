//! Mechanism kernels for compartmental neuron simulation
//!
//! This crate provides the per-instance numerical kernels a compartmental
//! simulator calls at every step: interpolated rate tables, Hodgkin-Huxley
//! gating variables, voltage-gated channels, a dual-exponential NMDA synapse,
//! a current clamp and a variable-rate event generator. Kernels talk to the
//! host only through the narrow traits in [`host`]; [`compartment`] is a small
//! single-compartment driver built on those traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod error;
pub mod table;
pub mod gating;
pub mod rates;
pub mod host;
pub mod mechanism;
pub mod config;

// Kernels
pub mod channels;
pub mod synapse;
pub mod stimulus;
pub mod netstim;
pub mod instance;

// Driver
pub mod compartment;

// Re-export essential types
pub use error::{MechanismError, Result};
pub use table::{RateTable, TableCache, TableDomain};
pub use gating::GatingVariable;
pub use rates::{vtrap, GateKinetics, RateForm, Q10};
pub use host::{
    Event, EventFlag, EventQueue, EventSink, HostView, InstanceId, IonPool, IonPools, IonSpecies,
    RandomSource, SeededRandom, SimClock,
};
pub use mechanism::{
    linearize, Category, CurrentOutput, Kernel, Linearization, MechanismKind, MechanismSchema,
    ParameterSet,
};
pub use config::{KernelConfig, TableSettings};
pub use channels::{leak::LeakChannel, voltage_gated::{ChannelKinetics, VoltageGatedChannel}};
pub use synapse::NmdaSynapse;
pub use stimulus::{ClampWaveform, CurrentClamp};
pub use netstim::{FrequencyProfile, VariableNetStim};
pub use instance::{MechanismInstance, MechanismRegistry};
pub use compartment::{Compartment, DriverParams, Geometry, Trace};

/// Default temperature for squid-axon kinetics (degC)
pub const DEFAULT_CELSIUS: f64 = 6.3;
