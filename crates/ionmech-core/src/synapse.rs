//! Dual-exponential NMDA synapse with voltage-dependent magnesium block

use smallvec::smallvec;

use crate::{
    error::*,
    gating::{exponential_step, implicit_step, safe_tau},
    host::{Event, EventSink, HostView},
    mechanism::{
        check_event_order, Category, CurrentOutput, Kernel, MechanismKind, MechanismSchema,
        ParameterSet, ParameterSpec, StateSpec, StateValues, NO_EVENT_YET,
    },
};

/// Largest allowed `tau_rise / tau_decay` before the two time constants are
/// pulled apart
pub const MAX_TAU_RATIO: f64 = 0.999999;

/// Schema of the NMDA synapse
pub static SCHEMA: MechanismSchema = MechanismSchema {
    kind: MechanismKind::Nmda,
    name: "NMDA",
    category: Category::PointProcess,
    ion: None,
    parameters: &[
        ParameterSpec { name: "gmax", unit: "uS", default: 0.000187309, limits: None },
        ParameterSpec { name: "tau_rise", unit: "ms", default: 1.0, limits: Some((1e-9, 1e9)) },
        ParameterSpec { name: "tau_decay", unit: "ms", default: 13.3333, limits: Some((1e-9, 1e9)) },
        ParameterSpec { name: "e", unit: "mV", default: 0.0, limits: None },
        ParameterSpec { name: "mg_conc", unit: "mM", default: 1.2, limits: None },
        ParameterSpec { name: "eta", unit: "1/mM", default: 0.520686, limits: None },
        ParameterSpec { name: "gamma", unit: "1/mV", default: 0.062, limits: None },
    ],
    states: &[
        StateSpec { name: "A", unit: "1", initial: 0.0, abs_tol: None },
        StateSpec { name: "B", unit: "1", initial: 0.0, abs_tol: None },
    ],
    derived: &["i", "g", "gblock", "factor"],
};

/// NMDA receptor synapse.
///
/// Conductance is `gmax * gblock(v) * (B - A)`, with `A` decaying at
/// `tau_rise` and `B` at `tau_decay`. `factor` normalizes a unit-weight
/// event so the difference peaks at exactly 1.
#[derive(Debug, Clone, PartialEq)]
pub struct NmdaSynapse {
    /// Maximal conductance (uS)
    pub gmax: f64,
    /// Rise time constant (ms)
    pub tau_rise: f64,
    /// Decay time constant (ms)
    pub tau_decay: f64,
    /// Reversal potential (mV)
    pub e: f64,
    /// Extracellular magnesium (mM)
    pub mg_conc: f64,
    /// Block sensitivity to magnesium (1/mM)
    pub eta: f64,
    /// Block voltage sensitivity (1/mV)
    pub gamma: f64,
    a: f64,
    b: f64,
    factor: f64,
    last_event: f64,
}

impl Default for NmdaSynapse {
    fn default() -> Self {
        Self {
            gmax: 0.000187309,
            tau_rise: 1.0,
            tau_decay: 13.3333,
            e: 0.0,
            mg_conc: 1.2,
            eta: 0.520686,
            gamma: 0.062,
            a: 0.0,
            b: 0.0,
            factor: 1.0,
            last_event: NO_EVENT_YET,
        }
    }
}

impl NmdaSynapse {
    /// Synapse from a parameter set of the NMDA schema
    pub fn from_parameters(params: &ParameterSet) -> Result<Self> {
        params.expect_kind(MechanismKind::Nmda)?;
        Ok(Self {
            gmax: params.get("gmax")?,
            tau_rise: params.get("tau_rise")?,
            tau_decay: params.get("tau_decay")?,
            e: params.get("e")?,
            mg_conc: params.get("mg_conc")?,
            eta: params.get("eta")?,
            gamma: params.get("gamma")?,
            ..Self::default()
        })
    }

    /// Set the maximal conductance
    pub fn with_gmax(mut self, gmax: f64) -> Self {
        self.gmax = gmax;
        self
    }

    /// Set the rise and decay time constants
    pub fn with_time_constants(mut self, tau_rise: f64, tau_decay: f64) -> Self {
        self.tau_rise = tau_rise;
        self.tau_decay = tau_decay;
        self
    }

    /// Peak normalization computed at init
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Time from a unit event to the conductance peak (ms)
    pub fn time_to_peak(&self) -> f64 {
        let (tr, td) = (self.tau_rise, self.tau_decay);
        tr * td / (td - tr) * (td / tr).ln()
    }

    /// Fraction of channels not blocked by magnesium at `v`
    pub fn gblock(&self, v: f64) -> f64 {
        1.0 / (1.0 + self.mg_conc * self.eta * (-self.gamma * v).exp())
    }

    fn prepare_time_constants(&mut self) {
        self.tau_rise = SCHEMA.clamp("tau_rise", self.tau_rise);
        self.tau_decay = SCHEMA.clamp("tau_decay", self.tau_decay);
        if self.tau_rise == 0.0 {
            self.tau_rise = 1e-9;
        }
        if self.tau_rise / self.tau_decay > MAX_TAU_RATIO {
            let nudged = MAX_TAU_RATIO * self.tau_decay;
            log::debug!(
                "NMDA: tau_rise {} too close to tau_decay {}, using {}",
                self.tau_rise,
                self.tau_decay,
                nudged
            );
            self.tau_rise = nudged;
        }
    }
}

impl Kernel for NmdaSynapse {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Nmda
    }

    fn init(&mut self, _v: f64, _host: &HostView<'_>, _events: &mut EventSink<'_>) -> Result<()> {
        self.prepare_time_constants();
        self.a = 0.0;
        self.b = 0.0;
        let tp = self.time_to_peak();
        self.factor = 1.0 / ((-tp / self.tau_decay).exp() - (-tp / self.tau_rise).exp());
        self.last_event = NO_EVENT_YET;
        Ok(())
    }

    fn current(&self, v: f64, _host: &HostView<'_>) -> CurrentOutput {
        let g = self.gmax * self.gblock(v) * (self.b - self.a);
        CurrentOutput {
            current: g * (v - self.e),
            conductance: g,
            ionic: None,
        }
    }

    fn advance_state(&mut self, _v: f64, dt: f64, _host: &HostView<'_>) -> Result<()> {
        let a = exponential_step(self.a, 0.0, safe_tau(self.tau_rise), dt);
        let b = exponential_step(self.b, 0.0, safe_tau(self.tau_decay), dt);
        if !a.is_finite() || !b.is_finite() {
            return Err(MechanismError::integration_failure(
                SCHEMA.name,
                "state",
                format!("A={} B={}", a, b),
            ));
        }
        self.a = a;
        self.b = b;
        Ok(())
    }

    fn on_event(&mut self, event: &Event, _events: &mut EventSink<'_>) -> Result<()> {
        check_event_order(SCHEMA.name, &mut self.last_event, event.time)?;
        self.a += event.weight * self.factor;
        self.b += event.weight * self.factor;
        Ok(())
    }

    fn states(&self) -> StateValues {
        smallvec![self.a, self.b]
    }

    fn state_derivatives(&self, _v: f64, _host: &HostView<'_>) -> Result<StateValues> {
        Ok(smallvec![
            -self.a / safe_tau(self.tau_rise),
            -self.b / safe_tau(self.tau_decay)
        ])
    }

    fn implicit_derivatives(&self, v: f64, dt: f64, host: &HostView<'_>) -> Result<StateValues> {
        let d = self.state_derivatives(v, host)?;
        Ok(smallvec![
            implicit_step(d[0], safe_tau(self.tau_rise), dt),
            implicit_step(d[1], safe_tau(self.tau_decay), dt)
        ])
    }
}
