//! Time-varying current clamp electrode

use std::f64::consts::PI;

use smallvec::{smallvec, SmallVec};

use crate::{
    error::*,
    host::{EventSink, HostView},
    mechanism::{
        Category, CurrentOutput, Kernel, MechanismKind, MechanismSchema, ParameterSet,
        ParameterSpec,
    },
};

/// Schema of the current clamp
pub static SCHEMA: MechanismSchema = MechanismSchema {
    kind: MechanismKind::CurrentClamp,
    name: "CurrentClampVariable",
    category: Category::Electrode,
    ion: None,
    parameters: &[
        ParameterSpec { name: "del", unit: "ms", default: 100.0, limits: Some((0.0, 1e9)) },
        ParameterSpec { name: "dur", unit: "ms", default: 800.0, limits: Some((0.0, 1e9)) },
        ParameterSpec { name: "amp", unit: "nA", default: 0.2, limits: None },
        ParameterSpec { name: "period", unit: "ms", default: 200.0, limits: Some((1e-9, 1e9)) },
    ],
    states: &[],
    derived: &["i"],
};

/// Shape of the injected current inside the active window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ClampWaveform {
    /// `amp * sin(2 pi t / period)`, phase referenced to t = 0
    #[default]
    Sine,
    /// `amp`
    Constant,
}

/// Electrode injecting `amp * w(t)` for `del <= t < del + dur`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentClamp {
    /// Onset (ms)
    pub del: f64,
    /// Duration (ms)
    pub dur: f64,
    /// Amplitude (nA)
    pub amp: f64,
    /// Sine period (ms)
    pub period: f64,
    /// Waveform inside the window
    pub waveform: ClampWaveform,
}

impl Default for CurrentClamp {
    fn default() -> Self {
        Self {
            del: 100.0,
            dur: 800.0,
            amp: 0.2,
            period: 200.0,
            waveform: ClampWaveform::Sine,
        }
    }
}

impl CurrentClamp {
    /// Clamp from a parameter set of the clamp schema
    pub fn from_parameters(params: &ParameterSet, waveform: ClampWaveform) -> Result<Self> {
        params.expect_kind(MechanismKind::CurrentClamp)?;
        Ok(Self {
            del: params.get("del")?,
            dur: params.get("dur")?,
            amp: params.get("amp")?,
            period: params.get("period")?,
            waveform,
        })
    }

    /// Whether `t` falls in the half-open window `[del, del + dur)`
    pub fn is_active(&self, t: f64) -> bool {
        t >= self.del && t < self.del + self.dur
    }

    /// Injected current at `t` (nA)
    pub fn injected(&self, t: f64) -> f64 {
        if !self.is_active(t) {
            return 0.0;
        }
        match self.waveform {
            ClampWaveform::Sine => self.amp * (2.0 * PI * t / self.period).sin(),
            ClampWaveform::Constant => self.amp,
        }
    }
}

impl Kernel for CurrentClamp {
    fn kind(&self) -> MechanismKind {
        MechanismKind::CurrentClamp
    }

    fn init(&mut self, _v: f64, _host: &HostView<'_>, _events: &mut EventSink<'_>) -> Result<()> {
        self.del = SCHEMA.clamp("del", self.del);
        self.dur = SCHEMA.clamp("dur", self.dur);
        self.period = SCHEMA.clamp("period", self.period);
        Ok(())
    }

    fn current(&self, _v: f64, host: &HostView<'_>) -> CurrentOutput {
        CurrentOutput {
            current: self.injected(host.t),
            conductance: 0.0,
            ionic: None,
        }
    }

    fn advance_state(&mut self, _v: f64, _dt: f64, _host: &HostView<'_>) -> Result<()> {
        Ok(())
    }

    fn discontinuities(&self) -> SmallVec<[f64; 2]> {
        smallvec![self.del, self.del + self.dur]
    }
}
