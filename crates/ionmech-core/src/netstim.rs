//! Event generator whose firing rate varies over time
//!
//! The generator has no membrane current. It drives itself with self-events
//! and emits one output event per firing:
//!
//! ```text
//!   OFF --(flag 3, or flag 0 with w > 0)--> ON, fire now
//!   ON  --(flag 1)--> emit, next = event + invl(1/f(t)), OFF if next > end
//!   ON  --(flag 0 with w < 0)--> OFF
//! ```

use std::f64::consts::PI;

use smallvec::smallvec;

use crate::{
    error::*,
    host::{Event, EventFlag, EventSink, HostView, RandomSource, SeededRandom},
    mechanism::{
        check_event_order, Category, CurrentOutput, Kernel, MechanismKind, MechanismSchema,
        ParameterSet, ParameterSpec, StateSpec, StateValues, NO_EVENT_YET,
    },
};

/// Mean interval used when a non-positive one is requested (ms)
pub const FALLBACK_INTERVAL: f64 = 0.01;

/// Schema of the variable-rate generator
pub static SCHEMA: MechanismSchema = MechanismSchema {
    kind: MechanismKind::VariableNetStim,
    name: "NetStimVariable",
    category: Category::ArtificialCell,
    ion: None,
    parameters: &[
        ParameterSpec { name: "min_frequency", unit: "1/ms", default: 0.0005, limits: Some((1e-9, 1e9)) },
        ParameterSpec { name: "noise", unit: "1", default: 0.0, limits: Some((0.0, 1.0)) },
        ParameterSpec { name: "dur", unit: "ms", default: 800.0, limits: None },
        ParameterSpec { name: "del", unit: "ms", default: 100.0, limits: None },
    ],
    states: &[
        StateSpec { name: "on", unit: "1", initial: 0.0, abs_tol: None },
        StateSpec { name: "event", unit: "ms", initial: 0.0, abs_tol: None },
        StateSpec { name: "end", unit: "ms", initial: 0.0, abs_tol: None },
    ],
    derived: &[],
};

/// Raised-cosine firing rate `baseline + modulation * cos(2 pi t / period)`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrequencyProfile {
    /// Mean rate (1/ms)
    pub baseline: f64,
    /// Modulation depth (1/ms)
    pub modulation: f64,
    /// Modulation period (ms)
    pub period: f64,
}

impl Default for FrequencyProfile {
    fn default() -> Self {
        Self {
            baseline: 0.05,
            modulation: 0.04,
            period: 400.0,
        }
    }
}

impl FrequencyProfile {
    /// Unfloored rate at `t` (1/ms)
    pub fn at(&self, t: f64) -> f64 {
        self.baseline + self.modulation * (2.0 * PI * t / self.period).cos()
    }
}

/// Variable-rate spike generator
#[derive(Debug, Clone)]
pub struct VariableNetStim {
    /// Rate floor (1/ms)
    pub min_frequency: f64,
    /// Interval jitter, 0 for regular firing and 1 for Poisson
    pub noise: f64,
    /// Length of the firing window (ms)
    pub dur: f64,
    /// Start of the firing window (ms)
    pub del: f64,
    /// Rate over time
    pub profile: FrequencyProfile,
    on: bool,
    event: f64,
    end: f64,
    last_event: f64,
    rng: SeededRandom,
}

impl Default for VariableNetStim {
    fn default() -> Self {
        Self {
            min_frequency: 0.0005,
            noise: 0.0,
            dur: 800.0,
            del: 100.0,
            profile: FrequencyProfile::default(),
            on: false,
            event: 0.0,
            end: 0.0,
            last_event: NO_EVENT_YET,
            rng: SeededRandom::default(),
        }
    }
}

impl VariableNetStim {
    /// Generator from a parameter set of the generator schema
    pub fn from_parameters(params: &ParameterSet, seed: u64) -> Result<Self> {
        params.expect_kind(MechanismKind::VariableNetStim)?;
        Ok(Self {
            min_frequency: params.get("min_frequency")?,
            noise: params.get("noise")?,
            dur: params.get("dur")?,
            del: params.get("del")?,
            rng: SeededRandom::new(seed),
            ..Self::default()
        })
    }

    /// Set the firing window start and length
    pub fn with_window(mut self, del: f64, dur: f64) -> Self {
        self.del = del;
        self.dur = dur;
        self
    }

    /// Restart the interval stream
    pub fn seed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    /// Whether the generator is firing
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Time of the next scheduled firing (ms)
    pub fn next_event(&self) -> f64 {
        self.event
    }

    /// Firing rate at `t`, never below `min_frequency` (1/ms)
    pub fn frequency(&self, t: f64) -> f64 {
        self.profile.at(t).max(self.min_frequency)
    }

    /// Draw one interval with the given mean
    pub fn interval(&mut self, mean: f64) -> f64 {
        let mean = if mean <= 0.0 { FALLBACK_INTERVAL } else { mean };
        if self.noise == 0.0 {
            mean
        } else {
            (1.0 - self.noise) * mean + self.noise * self.rng.exponential(mean)
        }
    }

    fn start_sequence(&mut self, t: f64) {
        if self.frequency(t) > 0.0 {
            self.on = true;
            self.event = t;
            self.end = self.del + self.dur;
        }
    }

    fn advance_event_time(&mut self, t: f64) {
        let f = self.frequency(t);
        if f > 0.0 {
            self.event += self.interval(1.0 / f);
        }
        if self.event > self.end {
            self.on = false;
        }
    }
}

impl Kernel for VariableNetStim {
    fn kind(&self) -> MechanismKind {
        MechanismKind::VariableNetStim
    }

    fn init(&mut self, _v: f64, _host: &HostView<'_>, events: &mut EventSink<'_>) -> Result<()> {
        self.min_frequency = SCHEMA.clamp("min_frequency", self.min_frequency);
        self.noise = SCHEMA.clamp("noise", self.noise);
        self.on = false;
        self.last_event = NO_EVENT_YET;
        if self.del >= 0.0 {
            let interval = 1.0 / self.frequency(0.0);
            let first = self.del + self.interval(interval) - interval * (1.0 - self.noise);
            self.event = first.max(0.0);
            log::debug!("{}: first phase start at t={}", SCHEMA.name, self.event);
            events.send_self(self.event, EventFlag::PhaseStart, 0.0);
        }
        Ok(())
    }

    fn current(&self, _v: f64, _host: &HostView<'_>) -> CurrentOutput {
        CurrentOutput::none()
    }

    fn advance_state(&mut self, _v: f64, _dt: f64, _host: &HostView<'_>) -> Result<()> {
        Ok(())
    }

    fn on_event(&mut self, event: &Event, events: &mut EventSink<'_>) -> Result<()> {
        check_event_order(SCHEMA.name, &mut self.last_event, event.time)?;
        let t = event.time;
        match event.flag {
            EventFlag::External => {
                if event.weight > 0.0 && !self.on {
                    self.start_sequence(t);
                    events.send_self(t, EventFlag::SelfFire, event.weight);
                } else if event.weight < 0.0 && self.on {
                    self.on = false;
                }
            }
            EventFlag::PhaseStart => {
                if !self.on {
                    self.start_sequence(t);
                    events.send_self(t, EventFlag::SelfFire, event.weight);
                }
            }
            EventFlag::SelfFire => {
                if self.on {
                    events.net_event(t);
                    self.advance_event_time(t);
                    if self.on {
                        events.send_self(self.event, EventFlag::SelfFire, event.weight);
                    }
                }
            }
        }
        Ok(())
    }

    fn states(&self) -> StateValues {
        smallvec![if self.on { 1.0 } else { 0.0 }, self.event, self.end]
    }
}
