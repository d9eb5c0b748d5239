//! Membrane conductances

pub mod leak;
pub mod voltage_gated;
