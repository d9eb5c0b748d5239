//! Narrow interfaces to the host simulator
//!
//! Kernels never own the clock, the ion pools or the event queue. They see
//! the host through the traits below; [`crate::compartment`] provides small
//! concrete implementations for tests and the reference driver.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp1};

/// Ion species a channel can bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum IonSpecies {
    /// Sodium
    Na,
    /// Potassium
    K,
}

impl IonSpecies {
    /// All species in storage order
    pub const ALL: [IonSpecies; 2] = [IonSpecies::Na, IonSpecies::K];

    /// Short name as used in current names (`ina`, `ek`)
    pub fn name(&self) -> &'static str {
        match self {
            IonSpecies::Na => "na",
            IonSpecies::K => "k",
        }
    }

    /// Default reversal potential (mV)
    pub fn default_reversal(&self) -> f64 {
        match self {
            IonSpecies::Na => 50.0,
            IonSpecies::K => -77.0,
        }
    }

    fn index(&self) -> usize {
        match self {
            IonSpecies::Na => 0,
            IonSpecies::K => 1,
        }
    }
}

/// Shared per-compartment ion state.
///
/// Reads are unrestricted; writes are additive so contributions from many
/// instances can be summed in any order.
pub trait IonPool: Send + Sync {
    /// Reversal potential of `ion` (mV)
    fn reversal(&self, ion: IonSpecies) -> f64;

    /// Add a current (mA/cm^2) and its voltage derivative (S/cm^2)
    fn accumulate(&mut self, ion: IonSpecies, current: f64, di_dv: f64);
}

/// Accumulated state of one ion species
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IonState {
    /// Reversal potential (mV)
    pub reversal: f64,
    /// Total ionic current (mA/cm^2)
    pub current: f64,
    /// Total dI/dV (S/cm^2)
    pub di_dv: f64,
}

/// Ion pools of one compartment
#[derive(Debug, Clone, PartialEq)]
pub struct IonPools {
    states: [IonState; 2],
}

impl Default for IonPools {
    fn default() -> Self {
        let state = |ion: IonSpecies| IonState {
            reversal: ion.default_reversal(),
            current: 0.0,
            di_dv: 0.0,
        };
        Self {
            states: [state(IonSpecies::Na), state(IonSpecies::K)],
        }
    }
}

impl IonPools {
    /// Pools with default reversal potentials
    pub fn new() -> Self {
        Self::default()
    }

    /// Override a reversal potential
    pub fn with_reversal(mut self, ion: IonSpecies, reversal: f64) -> Self {
        self.states[ion.index()].reversal = reversal;
        self
    }

    /// State of one species
    pub fn state(&self, ion: IonSpecies) -> &IonState {
        &self.states[ion.index()]
    }

    /// Zero the accumulators before a new assembly pass
    pub fn clear_currents(&mut self) {
        for state in &mut self.states {
            state.current = 0.0;
            state.di_dv = 0.0;
        }
    }
}

impl IonPool for IonPools {
    fn reversal(&self, ion: IonSpecies) -> f64 {
        self.states[ion.index()].reversal
    }

    fn accumulate(&mut self, ion: IonSpecies, current: f64, di_dv: f64) {
        let state = &mut self.states[ion.index()];
        state.current += current;
        state.di_dv += di_dv;
    }
}

/// Read-only simulation clock
pub trait Clock {
    /// Current time (ms)
    fn t(&self) -> f64;
    /// Current step size (ms)
    fn dt(&self) -> f64;
}

/// Fixed-step clock owned by a driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimClock {
    /// Current time (ms)
    pub t: f64,
    /// Step size (ms)
    pub dt: f64,
}

impl SimClock {
    /// Clock at `t = 0`
    pub fn new(dt: f64) -> Self {
        Self { t: 0.0, dt }
    }
}

impl Clock for SimClock {
    fn t(&self) -> f64 {
        self.t
    }

    fn dt(&self) -> f64 {
        self.dt
    }
}

/// Everything a kernel may read about its placement during a call
#[derive(Clone, Copy)]
pub struct HostView<'a> {
    /// Current time (ms)
    pub t: f64,
    /// Step size (ms)
    pub dt: f64,
    /// Ambient temperature (degC)
    pub celsius: f64,
    /// Area of the owning compartment (um^2)
    pub area: f64,
    /// Ion pools of the owning compartment
    pub ions: &'a dyn IonPool,
}

impl<'a> HostView<'a> {
    /// View built from a clock and a compartment
    pub fn new(clock: &dyn Clock, celsius: f64, area: f64, ions: &'a dyn IonPool) -> Self {
        Self {
            t: clock.t(),
            dt: clock.dt(),
            celsius,
            area,
            ions,
        }
    }

    /// Same view at another time
    pub fn at(self, t: f64) -> Self {
        Self { t, ..self }
    }
}

impl std::fmt::Debug for HostView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostView")
            .field("t", &self.t)
            .field("dt", &self.dt)
            .field("celsius", &self.celsius)
            .field("area", &self.area)
            .finish_non_exhaustive()
    }
}

/// Handle of a placed instance as known to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstanceId(pub usize);

impl InstanceId {
    /// Raw index
    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Meaning of a delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventFlag {
    /// Event arriving from the network (flag 0)
    External,
    /// Self-event scheduled by the instance itself (flag 1)
    SelfFire,
    /// Phase-start self-event scheduled at init (flag 3)
    PhaseStart,
}

impl EventFlag {
    /// Numeric flag value as used on the host's queue
    pub fn code(&self) -> u8 {
        match self {
            EventFlag::External => 0,
            EventFlag::SelfFire => 1,
            EventFlag::PhaseStart => 3,
        }
    }

    /// Parse a numeric flag value
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(EventFlag::External),
            1 => Some(EventFlag::SelfFire),
            3 => Some(EventFlag::PhaseStart),
            _ => None,
        }
    }
}

/// Event handed to `on_event`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Event {
    /// Delivery time (ms)
    pub time: f64,
    /// First payload entry (the connection weight)
    pub weight: f64,
    /// Event flag
    pub flag: EventFlag,
}

impl Event {
    /// External event with a weight
    pub fn external(time: f64, weight: f64) -> Self {
        Self {
            time,
            weight,
            flag: EventFlag::External,
        }
    }
}

/// Host discrete-event queue
pub trait EventQueue {
    /// Schedule an event to `target` at absolute time `deliver_at`
    fn send_self(&mut self, target: InstanceId, deliver_at: f64, flag: EventFlag, weight: f64);

    /// Emit an output event from `source` at time `t`
    fn net_event(&mut self, source: InstanceId, t: f64);
}

/// Queue adapter bound to one instance
pub struct EventSink<'a> {
    instance: InstanceId,
    queue: &'a mut dyn EventQueue,
}

impl<'a> EventSink<'a> {
    /// Bind `queue` to `instance`
    pub fn new(instance: InstanceId, queue: &'a mut dyn EventQueue) -> Self {
        Self { instance, queue }
    }

    /// Schedule a self-event at absolute time `deliver_at`
    pub fn send_self(&mut self, deliver_at: f64, flag: EventFlag, weight: f64) {
        self.queue.send_self(self.instance, deliver_at, flag, weight);
    }

    /// Emit an output event at `t`
    pub fn net_event(&mut self, t: f64) {
        self.queue.net_event(self.instance, t);
    }
}

/// Queue that drops everything, for kernels that never schedule
#[derive(Debug, Default, Clone, Copy)]
pub struct NullQueue;

impl EventQueue for NullQueue {
    fn send_self(&mut self, _target: InstanceId, _deliver_at: f64, _flag: EventFlag, _weight: f64) {}

    fn net_event(&mut self, _source: InstanceId, _t: f64) {}
}

/// Queue that records every call, useful to drive a kernel by hand
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecordingQueue {
    /// Scheduled events `(target, time, flag, weight)`
    pub scheduled: Vec<(InstanceId, f64, EventFlag, f64)>,
    /// Output events `(source, time)`
    pub emitted: Vec<(InstanceId, f64)>,
}

impl EventQueue for RecordingQueue {
    fn send_self(&mut self, target: InstanceId, deliver_at: f64, flag: EventFlag, weight: f64) {
        self.scheduled.push((target, deliver_at, flag, weight));
    }

    fn net_event(&mut self, source: InstanceId, t: f64) {
        self.emitted.push((source, t));
    }
}

/// Random variates for stochastic interval jitter
pub trait RandomSource: Send + Sync {
    /// Uniform variate in `[0, 1)`
    fn uniform(&mut self) -> f64;

    /// Exponential variate with the given mean
    fn exponential(&mut self, mean: f64) -> f64;

    /// Restart the stream from `seed`
    fn reseed(&mut self, seed: u64);
}

/// Deterministic random source over ChaCha8
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: ChaCha8Rng,
}

impl SeededRandom {
    /// Stream starting at `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Default for SeededRandom {
    fn default() -> Self {
        Self::new(42)
    }
}

impl RandomSource for SeededRandom {
    fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn exponential(&mut self, mean: f64) -> f64 {
        let unit: f64 = Exp1.sample(&mut self.rng);
        mean * unit
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ion_pool_accumulates() {
        let mut pools = IonPools::new();
        assert_eq!(pools.reversal(IonSpecies::K), -77.0);
        assert_eq!(pools.reversal(IonSpecies::Na), 50.0);

        pools.accumulate(IonSpecies::K, 0.5, 0.01);
        pools.accumulate(IonSpecies::K, 0.25, 0.02);
        assert_eq!(pools.state(IonSpecies::K).current, 0.75);
        assert!((pools.state(IonSpecies::K).di_dv - 0.03).abs() < 1e-15);
        assert_eq!(pools.state(IonSpecies::Na).current, 0.0);

        pools.clear_currents();
        assert_eq!(pools.state(IonSpecies::K).current, 0.0);
        assert_eq!(pools.state(IonSpecies::K).reversal, -77.0);
    }

    #[test]
    fn test_event_flag_codes() {
        for flag in [EventFlag::External, EventFlag::SelfFire, EventFlag::PhaseStart] {
            assert_eq!(EventFlag::from_code(flag.code()), Some(flag));
        }
        assert_eq!(EventFlag::from_code(2), None);
    }

    #[test]
    fn test_event_sink_binds_instance() {
        let mut queue = RecordingQueue::default();
        {
            let mut sink = EventSink::new(InstanceId(7), &mut queue);
            sink.send_self(12.5, EventFlag::SelfFire, 1.0);
            sink.net_event(12.5);
        }
        assert_eq!(queue.scheduled, vec![(InstanceId(7), 12.5, EventFlag::SelfFire, 1.0)]);
        assert_eq!(queue.emitted, vec![(InstanceId(7), 12.5)]);
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let mut a = SeededRandom::new(9);
        let mut b = SeededRandom::new(9);
        for _ in 0..16 {
            let x = a.exponential(2.0);
            assert_eq!(x, b.exponential(2.0));
            assert!(x >= 0.0);
        }
        a.reseed(9);
        b.reseed(9);
        assert_eq!(a.uniform(), b.uniform());
    }

    #[test]
    fn test_exponential_sample_mean() {
        let mut rng = SeededRandom::new(3);
        let n = 20_000;
        let mean = (0..n).map(|_| rng.exponential(4.0)).sum::<f64>() / n as f64;
        assert!((mean - 4.0).abs() < 0.2, "sample mean {mean}");
    }
}
