//! The contract every mechanism kernel satisfies
//!
//! Mechanism kinds form a closed set ([`MechanismKind`]). Each kind has a
//! static [`MechanismSchema`] describing its parameters, states and derived
//! outputs, and a concrete kernel type implementing [`Kernel`].

use std::fmt;

use smallvec::SmallVec;

use crate::{
    error::*,
    host::{Event, EventSink, HostView, IonSpecies},
};

/// Step used for the finite-difference conductance (mV)
pub const FD_EPSILON: f64 = 0.001;

/// Per-state values in schema order
pub type StateValues = SmallVec<[f64; 4]>;

/// Closed set of mechanism kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MechanismKind {
    /// Passive leak conductance
    Leak,
    /// Delayed-rectifier potassium conductance
    KConductance,
    /// Transient sodium conductance
    NaConductance,
    /// Two-exponential synapse with magnesium block
    Nmda,
    /// Time-varying current clamp
    CurrentClamp,
    /// Variable-rate event generator
    VariableNetStim,
}

impl MechanismKind {
    /// Every kind, in declaration order
    pub const ALL: [MechanismKind; 6] = [
        MechanismKind::Leak,
        MechanismKind::KConductance,
        MechanismKind::NaConductance,
        MechanismKind::Nmda,
        MechanismKind::CurrentClamp,
        MechanismKind::VariableNetStim,
    ];

    /// Static schema of the kind
    pub fn schema(&self) -> &'static MechanismSchema {
        match self {
            MechanismKind::Leak => &crate::channels::leak::SCHEMA,
            MechanismKind::KConductance => &crate::channels::voltage_gated::K_SCHEMA,
            MechanismKind::NaConductance => &crate::channels::voltage_gated::NA_SCHEMA,
            MechanismKind::Nmda => &crate::synapse::SCHEMA,
            MechanismKind::CurrentClamp => &crate::stimulus::SCHEMA,
            MechanismKind::VariableNetStim => &crate::netstim::SCHEMA,
        }
    }

    /// Mechanism name as registered with the host
    pub fn name(&self) -> &'static str {
        self.schema().name
    }

    /// Look a kind up by registered name or short alias, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let alias = match lower.as_str() {
            "leak" | "pas" => Some(MechanismKind::Leak),
            "k" | "kdr" => Some(MechanismKind::KConductance),
            "na" | "naf" => Some(MechanismKind::NaConductance),
            "clamp" | "iclamp" => Some(MechanismKind::CurrentClamp),
            "netstim" => Some(MechanismKind::VariableNetStim),
            _ => None,
        };
        alias.or_else(|| {
            Self::ALL
                .into_iter()
                .find(|kind| kind.name().eq_ignore_ascii_case(name))
        })
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a mechanism's current enters the compartment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Category {
    /// Distributed over membrane area, current in mA/cm^2
    Density,
    /// Located at a point, current in nA
    PointProcess,
    /// Point current injected into the cell, nA, positive depolarizes
    Electrode,
    /// No continuous current, events only
    ArtificialCell,
}

impl Category {
    /// Whether currents are absolute (nA) and need area scaling
    pub fn is_point(&self) -> bool {
        !matches!(self, Category::Density)
    }
}

/// Declared parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSpec {
    /// Parameter name
    pub name: &'static str,
    /// Physical unit
    pub unit: &'static str,
    /// Value used when the caller does not override it
    pub default: f64,
    /// Legal closed range, if any
    pub limits: Option<(f64, f64)>,
}

/// Declared state variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSpec {
    /// State name
    pub name: &'static str,
    /// Physical unit
    pub unit: &'static str,
    /// Value before init
    pub initial: f64,
    /// Absolute tolerance for adaptive integrators
    pub abs_tol: Option<f64>,
}

/// Static description of one mechanism kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MechanismSchema {
    /// Kind described
    pub kind: MechanismKind,
    /// Registered name
    pub name: &'static str,
    /// Placement category
    pub category: Category,
    /// Ion the mechanism reads and writes
    pub ion: Option<IonSpecies>,
    /// Parameters in storage order
    pub parameters: &'static [ParameterSpec],
    /// States in storage order
    pub states: &'static [StateSpec],
    /// Outputs recomputed on every current evaluation
    pub derived: &'static [&'static str],
}

impl MechanismSchema {
    /// Declared parameter named `name`
    pub fn parameter(&self, name: &str) -> Option<&'static ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Index of a parameter in storage order
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    /// Number of scalar slots one instance occupies
    pub fn storage_size(&self) -> usize {
        self.parameters.len() + self.states.len() + self.derived.len()
    }

    /// Clamp `value` of parameter `name` into its legal range.
    ///
    /// Out-of-range values are corrected in place and logged, never rejected.
    pub fn clamp(&self, name: &str, value: f64) -> f64 {
        let Some((lo, hi)) = self.parameter(name).and_then(|p| p.limits) else {
            return value;
        };
        let clamped = if value.is_nan() { lo } else { value.clamp(lo, hi) };
        if clamped != value {
            log::warn!(
                "{}: parameter {}={} outside [{}, {}], using {}",
                self.name,
                name,
                value,
                lo,
                hi,
                clamped
            );
        }
        clamped
    }
}

/// Parameter values bound to a schema
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    schema: &'static MechanismSchema,
    values: SmallVec<[f64; 8]>,
}

impl ParameterSet {
    /// Defaults of `kind`
    pub fn defaults(kind: MechanismKind) -> Self {
        let schema = kind.schema();
        Self {
            schema,
            values: schema.parameters.iter().map(|p| p.default).collect(),
        }
    }

    /// Schema the values belong to
    pub fn schema(&self) -> &'static MechanismSchema {
        self.schema
    }

    /// Fail unless the values belong to `kind`
    pub fn expect_kind(&self, kind: MechanismKind) -> Result<()> {
        if self.schema.kind != kind {
            return Err(MechanismError::invalid_config(format!(
                "parameters of {} cannot configure {}",
                self.schema.name,
                kind.name()
            )));
        }
        Ok(())
    }

    /// Value of `name`
    pub fn get(&self, name: &str) -> Result<f64> {
        self.schema
            .parameter_index(name)
            .map(|i| self.values[i])
            .ok_or_else(|| MechanismError::unknown_parameter(self.schema.name, name))
    }

    /// Override `name`
    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        let index = self
            .schema
            .parameter_index(name)
            .ok_or_else(|| MechanismError::unknown_parameter(self.schema.name, name))?;
        if !value.is_finite() {
            return Err(MechanismError::invalid_parameter(
                name,
                value.to_string(),
                "finite",
            ));
        }
        self.values[index] = value;
        Ok(())
    }

    /// Builder form of [`ParameterSet::set`]
    pub fn with(mut self, name: &str, value: f64) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// `(name, value)` pairs in storage order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.schema
            .parameters
            .iter()
            .zip(self.values.iter())
            .map(|(p, v)| (p.name, *v))
    }
}

/// Result of one current evaluation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CurrentOutput {
    /// Total current (mA/cm^2 for density mechanisms, nA for point processes)
    pub current: f64,
    /// Physical conductance (S/cm^2 or uS)
    pub conductance: f64,
    /// Part of `current` carried by a specific ion
    pub ionic: Option<(IonSpecies, f64)>,
}

impl CurrentOutput {
    /// Output carrying no current at all
    pub fn none() -> Self {
        Self::default()
    }
}

/// Ionic part of a linearization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IonContribution {
    /// Ion species
    pub species: IonSpecies,
    /// Ionic current at `v` (mA/cm^2)
    pub current: f64,
    /// dI/dV (S/cm^2)
    pub di_dv: f64,
}

/// Local linearization handed to the host's matrix assembly.
///
/// The host subtracts `rhs` from the node right-hand side and adds `d` to the
/// node diagonal; both are in density units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Linearization {
    /// Current at `v` (mA/cm^2), outward positive
    pub rhs: f64,
    /// d(current)/dv (S/cm^2)
    pub d: f64,
    /// Ionic part, if the mechanism writes an ion
    pub ion: Option<IonContribution>,
}

/// Linearize `kernel` at `v` by evaluating its current at `v + FD_EPSILON` and `v`.
///
/// State is not touched. Point currents are converted to density with
/// `1e2 / area`; electrode currents flip sign because they are injected.
pub fn linearize<K: Kernel + ?Sized>(kernel: &K, v: f64, host: &HostView<'_>) -> Linearization {
    let category = kernel.schema().category;
    if category == Category::ArtificialCell {
        return Linearization::default();
    }

    let hi = kernel.current(v + FD_EPSILON, host);
    let lo = kernel.current(v, host);

    let mut rhs = lo.current;
    let mut d = (hi.current - lo.current) / FD_EPSILON;
    let ion = lo.ionic.map(|(species, current)| {
        let di_dv = hi
            .ionic
            .map_or(0.0, |(_, shifted)| (shifted - current) / FD_EPSILON);
        IonContribution {
            species,
            current,
            di_dv,
        }
    });

    if category.is_point() {
        let scale = 1.0e2 / host.area;
        rhs *= scale;
        d *= scale;
    }
    if category == Category::Electrode {
        rhs = -rhs;
        d = -d;
    }

    Linearization { rhs, d, ion }
}

/// Operations the host invokes on a placed mechanism
pub trait Kernel: fmt::Debug + Send + Sync {
    /// Kind of this kernel
    fn kind(&self) -> MechanismKind;

    /// Static schema
    fn schema(&self) -> &'static MechanismSchema {
        self.kind().schema()
    }

    /// Reset to the t=0 baseline at membrane voltage `v`
    fn init(&mut self, v: f64, host: &HostView<'_>, events: &mut EventSink<'_>) -> Result<()>;

    /// Current and conductance at `v`, without mutating state
    fn current(&self, v: f64, host: &HostView<'_>) -> CurrentOutput;

    /// Integrate states forward by `dt` at voltage `v`
    fn advance_state(&mut self, v: f64, dt: f64, host: &HostView<'_>) -> Result<()>;

    /// Deliver an event
    fn on_event(&mut self, event: &Event, events: &mut EventSink<'_>) -> Result<()> {
        let _ = (event, events);
        Err(MechanismError::events_not_supported(self.schema().name))
    }

    /// State values in schema order
    fn states(&self) -> StateValues {
        StateValues::new()
    }

    /// `dx/dt` of each state, for variable-step hosts
    fn state_derivatives(&self, v: f64, host: &HostView<'_>) -> Result<StateValues> {
        let _ = (v, host);
        Ok(StateValues::new())
    }

    /// Derivatives corrected for an implicit solve of step `dt`
    fn implicit_derivatives(&self, v: f64, dt: f64, host: &HostView<'_>) -> Result<StateValues> {
        let _ = (v, dt, host);
        Ok(StateValues::new())
    }

    /// Times at which the current is discontinuous
    fn discontinuities(&self) -> SmallVec<[f64; 2]> {
        SmallVec::new()
    }
}

/// Reject events older than the last one processed, then record `time`
pub(crate) fn check_event_order(mechanism: &str, last: &mut f64, time: f64) -> Result<()> {
    if time < *last {
        return Err(MechanismError::out_of_order(mechanism, time, *last));
    }
    *last = time;
    Ok(())
}

/// Last-event time an instance starts from
pub(crate) const NO_EVENT_YET: f64 = -1e20;
