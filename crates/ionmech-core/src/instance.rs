//! Placed mechanism instances and the registry that creates them

use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    channels::{
        leak::LeakChannel,
        voltage_gated::{ChannelKinetics, VoltageGatedChannel},
    },
    config::KernelConfig,
    error::*,
    host::{Event, EventSink, HostView},
    mechanism::{CurrentOutput, Kernel, MechanismKind, ParameterSet, StateValues},
    netstim::VariableNetStim,
    stimulus::{ClampWaveform, CurrentClamp},
    synapse::NmdaSynapse,
};

/// One placed mechanism of any kind
#[derive(Debug, Clone)]
pub enum MechanismInstance {
    /// Passive leak
    Leak(LeakChannel),
    /// Potassium or sodium conductance
    VoltageGated(VoltageGatedChannel),
    /// NMDA synapse
    Nmda(NmdaSynapse),
    /// Current clamp electrode
    CurrentClamp(CurrentClamp),
    /// Variable-rate generator
    NetStim(VariableNetStim),
}

macro_rules! dispatch {
    ($self:expr, $k:ident => $body:expr) => {
        match $self {
            MechanismInstance::Leak($k) => $body,
            MechanismInstance::VoltageGated($k) => $body,
            MechanismInstance::Nmda($k) => $body,
            MechanismInstance::CurrentClamp($k) => $body,
            MechanismInstance::NetStim($k) => $body,
        }
    };
}

impl Kernel for MechanismInstance {
    fn kind(&self) -> MechanismKind {
        dispatch!(self, k => k.kind())
    }

    fn init(&mut self, v: f64, host: &HostView<'_>, events: &mut EventSink<'_>) -> Result<()> {
        dispatch!(self, k => k.init(v, host, events))
    }

    fn current(&self, v: f64, host: &HostView<'_>) -> CurrentOutput {
        dispatch!(self, k => k.current(v, host))
    }

    fn advance_state(&mut self, v: f64, dt: f64, host: &HostView<'_>) -> Result<()> {
        dispatch!(self, k => k.advance_state(v, dt, host))
    }

    fn on_event(&mut self, event: &Event, events: &mut EventSink<'_>) -> Result<()> {
        dispatch!(self, k => k.on_event(event, events))
    }

    fn states(&self) -> StateValues {
        dispatch!(self, k => k.states())
    }

    fn state_derivatives(&self, v: f64, host: &HostView<'_>) -> Result<StateValues> {
        dispatch!(self, k => k.state_derivatives(v, host))
    }

    fn implicit_derivatives(&self, v: f64, dt: f64, host: &HostView<'_>) -> Result<StateValues> {
        dispatch!(self, k => k.implicit_derivatives(v, dt, host))
    }

    fn discontinuities(&self) -> SmallVec<[f64; 2]> {
        dispatch!(self, k => k.discontinuities())
    }
}

impl From<LeakChannel> for MechanismInstance {
    fn from(k: LeakChannel) -> Self {
        MechanismInstance::Leak(k)
    }
}

impl From<VoltageGatedChannel> for MechanismInstance {
    fn from(k: VoltageGatedChannel) -> Self {
        MechanismInstance::VoltageGated(k)
    }
}

impl From<NmdaSynapse> for MechanismInstance {
    fn from(k: NmdaSynapse) -> Self {
        MechanismInstance::Nmda(k)
    }
}

impl From<CurrentClamp> for MechanismInstance {
    fn from(k: CurrentClamp) -> Self {
        MechanismInstance::CurrentClamp(k)
    }
}

impl From<VariableNetStim> for MechanismInstance {
    fn from(k: VariableNetStim) -> Self {
        MechanismInstance::NetStim(k)
    }
}

/// Creates instances that share per-kind kinetics and tables
#[derive(Debug, Clone)]
pub struct MechanismRegistry {
    config: KernelConfig,
    potassium: Arc<ChannelKinetics>,
    sodium: Arc<ChannelKinetics>,
    created: usize,
}

impl MechanismRegistry {
    /// Registry for a validated configuration
    pub fn new(config: KernelConfig) -> Result<Self> {
        config.validate()?;
        let potassium = Arc::new(ChannelKinetics::potassium(
            config.table(MechanismKind::KConductance),
        )?);
        let sodium = Arc::new(ChannelKinetics::sodium(
            config.table(MechanismKind::NaConductance),
        )?);
        log::debug!(
            "Registry ready (K table {}, Na table {})",
            potassium.table_settings().enabled,
            sodium.table_settings().enabled
        );
        Ok(Self {
            config,
            potassium,
            sodium,
            created: 0,
        })
    }

    /// Configuration in force
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Shared kinetics of a voltage-gated kind
    pub fn kinetics(&self, kind: MechanismKind) -> Option<&Arc<ChannelKinetics>> {
        match kind {
            MechanismKind::KConductance => Some(&self.potassium),
            MechanismKind::NaConductance => Some(&self.sodium),
            _ => None,
        }
    }

    /// Replace the kinetics of a voltage-gated kind, e.g. to add a Q10
    pub fn set_kinetics(&mut self, kinetics: ChannelKinetics) -> Result<()> {
        match kinetics.kind() {
            MechanismKind::KConductance => self.potassium = Arc::new(kinetics),
            MechanismKind::NaConductance => self.sodium = Arc::new(kinetics),
            other => {
                return Err(MechanismError::invalid_config(format!(
                    "{} has no gate kinetics",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Instance of `kind` with default parameters
    pub fn create(&mut self, kind: MechanismKind) -> Result<MechanismInstance> {
        self.instantiate(&ParameterSet::defaults(kind))
    }

    /// Instance configured by `params`
    pub fn instantiate(&mut self, params: &ParameterSet) -> Result<MechanismInstance> {
        self.instantiate_with_waveform(params, ClampWaveform::default())
    }

    /// Instance configured by `params`, with an explicit clamp waveform
    pub fn instantiate_with_waveform(
        &mut self,
        params: &ParameterSet,
        waveform: ClampWaveform,
    ) -> Result<MechanismInstance> {
        let kind = params.schema().kind;
        let instance = match kind {
            MechanismKind::Leak => LeakChannel::from_parameters(params)?.into(),
            MechanismKind::KConductance => {
                VoltageGatedChannel::from_parameters(self.potassium.clone(), params)?.into()
            }
            MechanismKind::NaConductance => {
                VoltageGatedChannel::from_parameters(self.sodium.clone(), params)?.into()
            }
            MechanismKind::Nmda => NmdaSynapse::from_parameters(params)?.into(),
            MechanismKind::CurrentClamp => CurrentClamp::from_parameters(params, waveform)?.into(),
            MechanismKind::VariableNetStim => {
                // Distinct streams per generator, reproducible from the seed
                let seed = self.config.seed.wrapping_add(self.created as u64);
                VariableNetStim::from_parameters(params, seed)?.into()
            }
        };
        self.created += 1;
        Ok(instance)
    }
}
