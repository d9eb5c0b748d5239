//! Passive leak conductance

use crate::{
    error::*,
    host::{EventSink, HostView},
    mechanism::{
        Category, CurrentOutput, Kernel, MechanismKind, MechanismSchema, ParameterSet,
        ParameterSpec,
    },
};

/// Schema of the leak conductance
pub static SCHEMA: MechanismSchema = MechanismSchema {
    kind: MechanismKind::Leak,
    name: "LeakConductance",
    category: Category::Density,
    ion: None,
    parameters: &[
        ParameterSpec {
            name: "gmax",
            unit: "S/cm2",
            default: 0.0003,
            limits: None,
        },
        ParameterSpec {
            name: "e",
            unit: "mV",
            default: -54.3,
            limits: None,
        },
    ],
    states: &[],
    derived: &["i"],
};

/// Stateless ohmic leak, `i = gmax (v - e)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakChannel {
    /// Maximal conductance (S/cm^2)
    pub gmax: f64,
    /// Reversal potential (mV)
    pub e: f64,
}

impl Default for LeakChannel {
    fn default() -> Self {
        Self {
            gmax: 0.0003,
            e: -54.3,
        }
    }
}

impl LeakChannel {
    /// Leak with explicit values
    pub fn new(gmax: f64, e: f64) -> Self {
        Self { gmax, e }
    }

    /// Leak from a parameter set of the leak schema
    pub fn from_parameters(params: &ParameterSet) -> Result<Self> {
        params.expect_kind(MechanismKind::Leak)?;
        Ok(Self {
            gmax: params.get("gmax")?,
            e: params.get("e")?,
        })
    }
}

impl Kernel for LeakChannel {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Leak
    }

    fn init(&mut self, _v: f64, _host: &HostView<'_>, _events: &mut EventSink<'_>) -> Result<()> {
        Ok(())
    }

    fn current(&self, v: f64, _host: &HostView<'_>) -> CurrentOutput {
        CurrentOutput {
            current: self.gmax * (v - self.e),
            conductance: self.gmax,
            ionic: None,
        }
    }

    fn advance_state(&mut self, _v: f64, _dt: f64, _host: &HostView<'_>) -> Result<()> {
        Ok(())
    }
}
