//! Hodgkin-Huxley style voltage-gated conductances
//!
//! A [`ChannelKinetics`] holds everything shared by all instances of one
//! channel kind: the gate rate functions, the table settings and the lazily
//! rebuilt rate table. Instances ([`VoltageGatedChannel`]) only own `gmax`
//! and their gate values.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::{
    config::TableSettings,
    error::*,
    gating::{implicit_step, GatingVariable},
    host::{EventSink, HostView, IonSpecies},
    mechanism::{
        Category, CurrentOutput, Kernel, MechanismKind, MechanismSchema, ParameterSet,
        ParameterSpec, StateSpec, StateValues,
    },
    rates::{GateKinetics, RateForm},
    table::{RateTable, Samples, TableCache},
};

/// Schema of the potassium conductance
pub static K_SCHEMA: MechanismSchema = MechanismSchema {
    kind: MechanismKind::KConductance,
    name: "KConductance",
    category: Category::Density,
    ion: Some(IonSpecies::K),
    parameters: &[ParameterSpec {
        name: "gmax",
        unit: "S/cm2",
        default: 0.036,
        limits: None,
    }],
    states: &[StateSpec {
        name: "n",
        unit: "1",
        initial: 0.0,
        abs_tol: None,
    }],
    derived: &["gion", "ninf", "ntau", "ik"],
};

/// Schema of the sodium conductance
pub static NA_SCHEMA: MechanismSchema = MechanismSchema {
    kind: MechanismKind::NaConductance,
    name: "NaConductance",
    category: Category::Density,
    ion: Some(IonSpecies::Na),
    parameters: &[ParameterSpec {
        name: "gmax",
        unit: "S/cm2",
        default: 0.12,
        limits: None,
    }],
    states: &[
        StateSpec {
            name: "m",
            unit: "1",
            initial: 0.0,
            abs_tol: None,
        },
        StateSpec {
            name: "h",
            unit: "1",
            initial: 0.0,
            abs_tol: None,
        },
    ],
    derived: &["gion", "minf", "mtau", "hinf", "htau", "ina"],
};

/// Gate kinetics and rate table shared by every instance of one channel kind
#[derive(Debug)]
pub struct ChannelKinetics {
    kind: MechanismKind,
    ion: IonSpecies,
    gates: SmallVec<[GateKinetics; 3]>,
    table: TableSettings,
    cache: TableCache,
}

impl ChannelKinetics {
    /// Classic squid-axon delayed rectifier, `gmax n^4`
    pub fn potassium(table: TableSettings) -> Result<Self> {
        let n = GateKinetics::new(
            "n",
            4,
            RateForm::ExpLinear {
                rate: 0.1,
                scale: 0.1,
                midpoint: -55.0,
            },
            RateForm::Exponential {
                rate: 0.125,
                scale: -0.0125,
                midpoint: -65.0,
            },
        );
        Self::custom(MechanismKind::KConductance, smallvec![n], table)
    }

    /// Classic squid-axon transient sodium, `gmax m^3 h`
    pub fn sodium(table: TableSettings) -> Result<Self> {
        let m = GateKinetics::new(
            "m",
            3,
            RateForm::ExpLinear {
                rate: 1.0,
                scale: 0.1,
                midpoint: -40.0,
            },
            RateForm::Exponential {
                rate: 4.0,
                scale: -0.0555555555,
                midpoint: -65.0,
            },
        );
        let h = GateKinetics::new(
            "h",
            1,
            RateForm::Exponential {
                rate: 0.07,
                scale: -0.05,
                midpoint: -65.0,
            },
            RateForm::Sigmoid {
                rate: 1.0,
                scale: -0.1,
                midpoint: -35.0,
            },
        );
        Self::custom(MechanismKind::NaConductance, smallvec![m, h], table)
    }

    /// Kinetics for `kind` with caller-supplied gates.
    ///
    /// Gate names and count must match the kind's schema.
    pub fn custom(
        kind: MechanismKind,
        gates: SmallVec<[GateKinetics; 3]>,
        table: TableSettings,
    ) -> Result<Self> {
        let schema = kind.schema();
        let ion = schema.ion.ok_or_else(|| {
            MechanismError::invalid_config(format!("{} is not a voltage-gated channel", schema.name))
        })?;
        if gates.len() != schema.states.len()
            || gates.iter().zip(schema.states).any(|(g, s)| g.name != s.name)
        {
            return Err(MechanismError::invalid_config(format!(
                "{} expects gates {:?}",
                schema.name,
                schema.states.iter().map(|s| s.name).collect::<Vec<_>>()
            )));
        }
        for gate in &gates {
            gate.validate()?;
        }
        table.validate()?;

        Ok(Self {
            kind,
            ion,
            gates,
            table,
            cache: TableCache::new(),
        })
    }

    /// Kind these kinetics belong to
    pub fn kind(&self) -> MechanismKind {
        self.kind
    }

    /// Ion carried by the channel
    pub fn ion(&self) -> IonSpecies {
        self.ion
    }

    /// Gate definitions in schema order
    pub fn gates(&self) -> &[GateKinetics] {
        &self.gates
    }

    /// Same gates with a Q10 scaling on every rate, and a fresh table cache
    pub fn with_q10(&self, factor: f64, reference_celsius: f64) -> Result<Self> {
        let gates = self
            .gates
            .iter()
            .cloned()
            .map(|g| g.with_q10(factor, reference_celsius))
            .collect();
        Self::custom(self.kind, gates, self.table)
    }

    /// Table settings in force
    pub fn table_settings(&self) -> TableSettings {
        self.table
    }

    /// Direct evaluation: `[inf_0, tau_0, inf_1, tau_1, ...]`
    pub fn evaluate(&self, v: f64, celsius: f64) -> Samples {
        let mut out = Samples::new();
        for gate in &self.gates {
            let (inf, tau) = gate.steady_state(v, celsius);
            out.push(inf);
            out.push(tau);
        }
        out
    }

    /// Rate table for `celsius`, built on first use or after a temperature change
    pub fn table(&self, celsius: f64) -> Result<Arc<RateTable>> {
        self.cache.get_or_build(celsius, || {
            RateTable::build(self.table.domain, celsius, |v| self.evaluate(v, celsius))
        })
    }

    /// `[inf, tau]` per gate at `v`, from the table when enabled
    pub fn rates(&self, v: f64, celsius: f64) -> Result<Samples> {
        if !self.table.enabled {
            return Ok(self.evaluate(v, celsius));
        }
        Ok(self.table(celsius)?.lookup(v))
    }
}

/// One placed voltage-gated conductance
#[derive(Debug, Clone)]
pub struct VoltageGatedChannel {
    kinetics: Arc<ChannelKinetics>,
    /// Maximal conductance (S/cm^2)
    pub gmax: f64,
    gates: SmallVec<[GatingVariable; 3]>,
}

impl VoltageGatedChannel {
    /// Instance with schema defaults
    pub fn new(kinetics: Arc<ChannelKinetics>) -> Self {
        let schema = kinetics.kind().schema();
        let gmax = schema.parameters[0].default;
        let gates = schema
            .states
            .iter()
            .map(|s| GatingVariable::new(s.initial))
            .collect();
        Self {
            kinetics,
            gmax,
            gates,
        }
    }

    /// Instance configured from a parameter set of the same kind
    pub fn from_parameters(kinetics: Arc<ChannelKinetics>, params: &ParameterSet) -> Result<Self> {
        params.expect_kind(kinetics.kind())?;
        let mut channel = Self::new(kinetics);
        channel.gmax = params.get("gmax")?;
        Ok(channel)
    }

    /// Shared kinetics
    pub fn kinetics(&self) -> &Arc<ChannelKinetics> {
        &self.kinetics
    }

    /// Current gate values in schema order
    pub fn gate_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.gates.iter().map(|g| g.value)
    }

    /// Open fraction `prod(gate^power)`
    pub fn open_fraction(&self) -> f64 {
        self.gates
            .iter()
            .zip(self.kinetics.gates())
            .map(|(g, k)| g.value.powi(k.power))
            .product()
    }
}

impl Kernel for VoltageGatedChannel {
    fn kind(&self) -> MechanismKind {
        self.kinetics.kind()
    }

    fn init(&mut self, v: f64, host: &HostView<'_>, _events: &mut EventSink<'_>) -> Result<()> {
        let rates = self.kinetics.rates(v, host.celsius)?;
        for (i, gate) in self.gates.iter_mut().enumerate() {
            gate.settle(rates[2 * i]);
        }
        Ok(())
    }

    fn current(&self, v: f64, host: &HostView<'_>) -> CurrentOutput {
        let ion = self.kinetics.ion();
        let g = self.gmax * self.open_fraction();
        let i = g * (v - host.ions.reversal(ion));
        CurrentOutput {
            current: i,
            conductance: g,
            ionic: Some((ion, i)),
        }
    }

    fn advance_state(&mut self, v: f64, dt: f64, host: &HostView<'_>) -> Result<()> {
        let rates = self.kinetics.rates(v, host.celsius)?;
        let mechanism = self.kinetics.kind().name();
        for (i, (gate, kin)) in self.gates.iter_mut().zip(self.kinetics.gates()).enumerate() {
            gate.advance(rates[2 * i], rates[2 * i + 1], dt, mechanism, &kin.name)?;
        }
        Ok(())
    }

    fn states(&self) -> StateValues {
        self.gate_values().collect()
    }

    fn state_derivatives(&self, v: f64, host: &HostView<'_>) -> Result<StateValues> {
        let rates = self.kinetics.rates(v, host.celsius)?;
        Ok(self
            .gates
            .iter()
            .enumerate()
            .map(|(i, g)| g.derivative(rates[2 * i], rates[2 * i + 1]))
            .collect())
    }

    fn implicit_derivatives(&self, v: f64, dt: f64, host: &HostView<'_>) -> Result<StateValues> {
        let rates = self.kinetics.rates(v, host.celsius)?;
        let derivatives = self.state_derivatives(v, host)?;
        Ok(derivatives
            .iter()
            .enumerate()
            .map(|(i, d)| implicit_step(*d, rates[2 * i + 1], dt))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{IonPools, NullQueue, InstanceId};
    use crate::mechanism::linearize;

    fn host(pools: &IonPools) -> HostView<'_> {
        HostView { t: 0.0, dt: 0.025, celsius: 6.3, area: 1000.0, ions: pools }
    }

    fn init_at(channel: &mut VoltageGatedChannel, v: f64, pools: &IonPools) {
        let mut queue = NullQueue;
        let mut sink = EventSink::new(InstanceId(0), &mut queue);
        channel.init(v, &host(pools), &mut sink).unwrap();
    }

    #[test]
    fn test_potassium_init_is_steady_state() {
        let pools = IonPools::new();
        let kinetics = Arc::new(ChannelKinetics::potassium(TableSettings::disabled()).unwrap());
        let mut k = VoltageGatedChannel::new(kinetics);
        assert_eq!(k.gmax, 0.036);
        init_at(&mut k, -65.0, &pools);
        let n = k.states()[0];
        assert!((n - 0.3177).abs() < 1e-3);

        // Steady state does not drift
        k.advance_state(-65.0, 0.025, &host(&pools)).unwrap();
        assert!((k.states()[0] - n).abs() < 1e-12);
    }

    #[test]
    fn test_table_close_to_direct_evaluation() {
        let direct = ChannelKinetics::sodium(TableSettings::disabled()).unwrap();
        let tabled = ChannelKinetics::sodium(TableSettings::default()).unwrap();
        for i in 0..200 {
            let v = -90.0 + i as f64 * 0.73;
            let a = direct.rates(v, 6.3).unwrap();
            let b = tabled.rates(v, 6.3).unwrap();
            for (x, y) in a.iter().zip(b.iter()) {
                assert!((x - y).abs() < 2e-3 * x.abs().max(1.0), "v={} {} vs {}", v, x, y);
            }
        }
    }

    #[test]
    fn test_current_uses_pool_reversal() {
        let pools = IonPools::new().with_reversal(IonSpecies::Na, 55.0);
        let kinetics = Arc::new(ChannelKinetics::sodium(TableSettings::default()).unwrap());
        let mut na = VoltageGatedChannel::new(kinetics);
        init_at(&mut na, -65.0, &pools);
        let values: Vec<f64> = na.gate_values().collect();
        let g = 0.12 * values[0].powi(3) * values[1];
        let out = na.current(-20.0, &host(&pools));
        assert!((out.conductance - g).abs() < 1e-15);
        assert!((out.current - g * (-20.0 - 55.0)).abs() < 1e-15);
        assert_eq!(out.ionic, Some((IonSpecies::Na, out.current)));
    }

    #[test]
    fn test_linearization_matches_frozen_conductance() {
        let pools = IonPools::new();
        let kinetics = Arc::new(ChannelKinetics::potassium(TableSettings::default()).unwrap());
        let mut k = VoltageGatedChannel::new(kinetics);
        init_at(&mut k, -50.0, &pools);
        let lin = linearize(&k, -50.0, &host(&pools));
        let g = k.gmax * k.open_fraction();
        assert!((lin.d - g).abs() < 1e-9);
        let ion = lin.ion.unwrap();
        assert!((ion.di_dv - g).abs() < 1e-9);
        assert!((ion.current - lin.rhs).abs() < 1e-15);
    }

    #[test]
    fn test_custom_rejects_wrong_gates() {
        let k = ChannelKinetics::potassium(TableSettings::default()).unwrap();
        let gates: SmallVec<[GateKinetics; 3]> = k.gates().iter().cloned().collect();
        assert!(ChannelKinetics::custom(MechanismKind::NaConductance, gates.clone(), TableSettings::default()).is_err());
        assert!(ChannelKinetics::custom(MechanismKind::Leak, gates, TableSettings::default()).is_err());
    }

    #[test]
    fn test_implicit_derivatives() {
        let pools = IonPools::new();
        let kinetics = Arc::new(ChannelKinetics::potassium(TableSettings::disabled()).unwrap());
        let mut k = VoltageGatedChannel::new(kinetics.clone());
        init_at(&mut k, -65.0, &pools);
        let d = k.state_derivatives(-30.0, &host(&pools)).unwrap();
        let di = k.implicit_derivatives(-30.0, 0.025, &host(&pools)).unwrap();
        let tau = kinetics.evaluate(-30.0, 6.3)[1];
        assert!(d[0] > 0.0);
        assert!((di[0] - d[0] / (1.0 + 0.025 / tau)).abs() < 1e-12);
    }

    #[test]
    fn test_q10_scales_time_constants() {
        let base = ChannelKinetics::sodium(TableSettings::default()).unwrap();
        let warm = base.with_q10(3.0, 6.3).unwrap();
        assert!(warm.gates().iter().all(|g| g.q10.is_some()));
        for v in [-80.0, -40.0, 10.0] {
            let cold = base.rates(v, 16.3).unwrap();
            let hot = warm.rates(v, 16.3).unwrap();
            // inf unchanged, tau divided by 3^1
            assert!((cold[0] - hot[0]).abs() < 1e-12);
            assert!((cold[1] / 3.0 - hot[1]).abs() < 1e-9 * cold[1]);
            assert!((cold[3] / 3.0 - hot[3]).abs() < 1e-9 * cold[3]);
        }
        assert!(base.with_q10(0.0, 6.3).is_err());
    }
}
