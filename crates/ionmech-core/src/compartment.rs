//! Single-compartment reference driver
//!
//! A [`Compartment`] is one isopotential membrane patch carrying any number
//! of mechanism instances. It plays the host's role for the kernels: it owns
//! the clock, the ion pools and the event queue, assembles the linearized
//! membrane equation each step and solves it with backward Euler.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
    error::*,
    host::{Event, EventFlag, EventQueue, EventSink, HostView, InstanceId, IonPool, IonPools, SimClock},
    instance::MechanismInstance,
    mechanism::{linearize, Kernel, Linearization},
};

/// Parameters of a driver run
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DriverParams {
    /// Step size (ms)
    pub dt: f64,
    /// Stop time (ms)
    pub tstop: f64,
    /// Temperature (degC)
    pub celsius: f64,
    /// Initial membrane voltage (mV)
    pub v_init: f64,
    /// Record every n-th step
    pub record_every: usize,
    /// Collect per-step timings
    pub perf_enabled: bool,
}

impl Default for DriverParams {
    fn default() -> Self {
        Self {
            dt: 0.025,
            tstop: 100.0,
            celsius: 6.3,
            v_init: -65.0,
            record_every: 1,
            perf_enabled: false,
        }
    }
}

impl DriverParams {
    /// Create new driver parameters with validation
    pub fn new(dt: f64, tstop: f64) -> Result<Self> {
        let params = Self {
            dt,
            tstop,
            ..Default::default()
        };
        params.validate()?;
        Ok(params)
    }

    /// Set the temperature
    pub fn with_celsius(mut self, celsius: f64) -> Self {
        self.celsius = celsius;
        self
    }

    /// Set the initial voltage
    pub fn with_v_init(mut self, v_init: f64) -> Self {
        self.v_init = v_init;
        self
    }

    /// Set the recording stride
    pub fn with_record_every(mut self, every: usize) -> Self {
        self.record_every = every;
        self
    }

    /// Enable or disable performance sampling
    pub fn with_perf(mut self, enabled: bool) -> Self {
        self.perf_enabled = enabled;
        self
    }

    /// Number of nominal steps
    pub fn num_steps(&self) -> usize {
        (self.tstop / self.dt).round() as usize
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(MechanismError::invalid_parameter("dt", self.dt.to_string(), "> 0"));
        }
        if !(self.tstop.is_finite() && self.tstop >= self.dt) {
            return Err(MechanismError::invalid_parameter(
                "tstop",
                format!("{} (with dt={})", self.tstop, self.dt),
                ">= dt",
            ));
        }
        if !self.celsius.is_finite() {
            return Err(MechanismError::invalid_parameter(
                "celsius",
                self.celsius.to_string(),
                "finite",
            ));
        }
        if !self.v_init.is_finite() {
            return Err(MechanismError::invalid_parameter(
                "v_init",
                self.v_init.to_string(),
                "finite",
            ));
        }
        if self.record_every == 0 {
            return Err(MechanismError::invalid_parameter("record_every", "0", ">= 1"));
        }
        Ok(())
    }
}

/// Membrane patch geometry
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Geometry {
    /// Specific capacitance (uF/cm^2)
    pub cm: f64,
    /// Membrane area (um^2)
    pub area: f64,
}

impl Default for Geometry {
    fn default() -> Self {
        // Cylinder with length and diameter of 18.8 um
        Self {
            cm: 1.0,
            area: std::f64::consts::PI * 18.8 * 18.8,
        }
    }
}

impl Geometry {
    /// Validate geometry
    pub fn validate(&self) -> Result<()> {
        if !(self.cm.is_finite() && self.cm > 0.0) {
            return Err(MechanismError::invalid_parameter("cm", self.cm.to_string(), "> 0"));
        }
        if !(self.area.is_finite() && self.area > 0.0) {
            return Err(MechanismError::invalid_parameter("area", self.area.to_string(), "> 0"));
        }
        Ok(())
    }
}

/// One recorded sample
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceSample {
    /// Time (ms)
    pub t: f64,
    /// Membrane voltage (mV)
    pub v: f64,
    /// State values per instance, in instance order
    pub states: Vec<Vec<f64>>,
}

/// Output event emitted by an instance
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputEvent {
    /// Emitting instance
    pub source: InstanceId,
    /// Emission time (ms)
    pub time: f64,
}

/// Performance metrics collected during driver steps
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PerfReport {
    /// Average step time in nanoseconds
    pub avg_step_ns: u64,
    /// Max step time in nanoseconds
    pub max_step_ns: u64,
    /// Steps sampled
    pub steps: usize,
}

/// Result of a driver run
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Trace {
    /// Mechanism name of each instance
    pub labels: Vec<String>,
    /// Recorded samples
    pub samples: Vec<TraceSample>,
    /// Output events in emission order
    pub events: Vec<OutputEvent>,
    /// Steps executed
    pub steps_executed: usize,
    /// Optional performance report
    pub perf: Option<PerfReport>,
}

impl Trace {
    /// Recorded times
    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.t).collect()
    }

    /// Recorded voltages
    pub fn voltages(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.v).collect()
    }

    /// Most depolarized recorded voltage
    pub fn peak_voltage(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.v).reduce(f64::max)
    }

    /// Upward crossings of `threshold` by the recorded voltage
    pub fn threshold_crossings(&self, threshold: f64) -> Vec<f64> {
        self.samples
            .windows(2)
            .filter(|w| w[0].v < threshold && w[1].v >= threshold)
            .map(|w| w[1].t)
            .collect()
    }

    /// Output events of one instance
    pub fn events_from(&self, source: InstanceId) -> Vec<f64> {
        self.events
            .iter()
            .filter(|e| e.source == source)
            .map(|e| e.time)
            .collect()
    }

    /// Recorded trajectory of one state of one instance
    pub fn state_series(&self, instance: InstanceId, state: usize) -> Vec<f64> {
        self.samples
            .iter()
            .filter_map(|s| s.states.get(instance.raw()).and_then(|v| v.get(state)).copied())
            .collect()
    }
}

/// Event waiting in the driver queue
#[derive(Debug, Clone, Copy)]
struct Pending {
    time: f64,
    seq: u64,
    target: InstanceId,
    flag: EventFlag,
    weight: f64,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed so the max-heap pops the earliest event, ties in insertion order
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time-ordered queue of pending deliveries plus the emitted output events
#[derive(Debug, Default)]
struct DriverQueue {
    heap: BinaryHeap<Pending>,
    seq: u64,
    emitted: Vec<OutputEvent>,
}

impl DriverQueue {
    fn push(&mut self, target: InstanceId, time: f64, flag: EventFlag, weight: f64) {
        self.seq += 1;
        self.heap.push(Pending {
            time,
            seq: self.seq,
            target,
            flag,
            weight,
        });
    }

    fn pop_due(&mut self, until: f64) -> Option<Pending> {
        if self.heap.peek()?.time <= until {
            self.heap.pop()
        } else {
            None
        }
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.emitted.clear();
    }
}

impl EventQueue for DriverQueue {
    fn send_self(&mut self, target: InstanceId, deliver_at: f64, flag: EventFlag, weight: f64) {
        self.push(target, deliver_at, flag, weight);
    }

    fn net_event(&mut self, source: InstanceId, t: f64) {
        self.emitted.push(OutputEvent { source, time: t });
    }
}

/// One isopotential compartment driving a set of mechanism instances
#[derive(Debug)]
pub struct Compartment {
    geometry: Geometry,
    params: DriverParams,
    ions: IonPools,
    instances: Vec<MechanismInstance>,
    external: Vec<(InstanceId, f64, f64)>,
    queue: DriverQueue,
    breakpoints: Vec<f64>,
    clock: SimClock,
    v: f64,
    steps: usize,
    perf_samples: Vec<u64>,
}

impl Compartment {
    /// Create a new compartment
    pub fn new(geometry: Geometry, params: DriverParams) -> Result<Self> {
        geometry.validate()?;
        params.validate()?;
        Ok(Self {
            geometry,
            clock: SimClock::new(params.dt),
            v: params.v_init,
            params,
            ions: IonPools::new(),
            instances: Vec::new(),
            external: Vec::new(),
            queue: DriverQueue::default(),
            breakpoints: Vec::new(),
            steps: 0,
            perf_samples: Vec::new(),
        })
    }

    /// Replace the ion pools, e.g. to change reversal potentials
    pub fn with_ions(mut self, ions: IonPools) -> Self {
        self.ions = ions;
        self
    }

    /// Place an instance
    pub fn add(&mut self, instance: impl Into<MechanismInstance>) -> InstanceId {
        self.instances.push(instance.into());
        InstanceId(self.instances.len() - 1)
    }

    /// Schedule an external event (flag 0) for `target` at `time`.
    ///
    /// External events survive [`Compartment::init`] and are queued again on
    /// every run.
    pub fn schedule(&mut self, target: InstanceId, time: f64, weight: f64) -> Result<()> {
        self.instance(target)?;
        self.external.push((target, time, weight));
        self.queue.push(target, time, EventFlag::External, weight);
        Ok(())
    }

    /// Instance behind `id`
    pub fn instance(&self, id: InstanceId) -> Result<&MechanismInstance> {
        self.instances
            .get(id.raw())
            .ok_or(MechanismError::InstanceNotFound { index: id.raw() })
    }

    /// All instances in placement order
    pub fn instances(&self) -> &[MechanismInstance] {
        &self.instances
    }

    /// Current time (ms)
    pub fn time(&self) -> f64 {
        self.clock.t
    }

    /// Membrane voltage (mV)
    pub fn voltage(&self) -> f64 {
        self.v
    }

    /// Ion pools
    pub fn ions(&self) -> &IonPools {
        &self.ions
    }

    /// Driver parameters
    pub fn params(&self) -> &DriverParams {
        &self.params
    }

    /// Reset to t = 0 and initialize every instance
    pub fn init(&mut self) -> Result<()> {
        self.clock = SimClock::new(self.params.dt);
        self.v = self.params.v_init;
        self.steps = 0;
        self.perf_samples.clear();
        self.ions.clear_currents();
        self.queue.clear();
        for &(target, time, weight) in &self.external {
            self.queue.push(target, time, EventFlag::External, weight);
        }

        let host = HostView::new(&self.clock, self.params.celsius, self.geometry.area, &self.ions);
        for (i, instance) in self.instances.iter_mut().enumerate() {
            let mut sink = EventSink::new(InstanceId(i), &mut self.queue);
            instance.init(self.v, &host, &mut sink)?;
        }

        self.breakpoints = self
            .instances
            .iter()
            .flat_map(|k| k.discontinuities())
            .filter(|t| t.is_finite() && *t > 0.0)
            .collect();
        self.breakpoints.sort_by(f64::total_cmp);
        self.breakpoints.dedup();
        log::debug!(
            "Initialized {} instances at v={} ({} breakpoints)",
            self.instances.len(),
            self.v,
            self.breakpoints.len()
        );
        Ok(())
    }

    /// Deliver due events, then advance one step (shortened to land on a
    /// discontinuity when one falls inside it)
    pub fn step(&mut self) -> Result<()> {
        let t = self.clock.t;
        let dt = self.params.dt;
        self.deliver_events(t + dt / 2.0)?;

        let (dt_eff, t_next) = self.next_step(t, dt);
        self.clock.dt = dt_eff;
        let host = HostView::new(&self.clock, self.params.celsius, self.geometry.area, &self.ions)
            .at(t + dt_eff / 2.0);
        let v = self.v;

        #[cfg(feature = "parallel")]
        let lins: Vec<Linearization> = self.instances.par_iter().map(|k| linearize(k, v, &host)).collect();

        #[cfg(not(feature = "parallel"))]
        let lins: Vec<Linearization> = self.instances.iter().map(|k| linearize(k, v, &host)).collect();

        self.ions.clear_currents();
        let mut rhs = 0.0;
        let mut d = 1e-3 * self.geometry.cm / dt_eff;
        for lin in &lins {
            rhs -= lin.rhs;
            d += lin.d;
            if let Some(ion) = lin.ion {
                self.ions.accumulate(ion.species, ion.current, ion.di_dv);
            }
        }
        self.v += rhs / d;
        if !self.v.is_finite() {
            return Err(MechanismError::integration_failure(
                "Compartment",
                "membrane",
                format!("v={} at t={}", self.v, t),
            ));
        }

        let v = self.v;
        let host = HostView::new(&self.clock, self.params.celsius, self.geometry.area, &self.ions)
            .at(t_next);

        #[cfg(feature = "parallel")]
        self.instances.par_iter_mut().try_for_each(|k| k.advance_state(v, dt_eff, &host))?;

        #[cfg(not(feature = "parallel"))]
        self.instances.iter_mut().try_for_each(|k| k.advance_state(v, dt_eff, &host))?;

        self.clock.t = t_next;
        self.steps += 1;
        Ok(())
    }

    /// Run from t = 0 to `tstop`
    pub fn run(&mut self) -> Result<Trace> {
        log::info!(
            "Starting run: {} instances, {}ms with {}ms timestep at {} degC",
            self.instances.len(),
            self.params.tstop,
            self.params.dt,
            self.params.celsius
        );
        self.init()?;

        let mut trace = Trace {
            labels: self.instances.iter().map(|k| k.schema().name.to_string()).collect(),
            ..Trace::default()
        };
        self.record(&mut trace);

        let num_steps = self.params.num_steps();
        let tstop = self.params.tstop - self.params.dt * 1e-6;
        while self.clock.t < tstop {
            let step_start = Instant::now();
            self.step()?;
            if self.params.perf_enabled {
                self.perf_samples.push(step_start.elapsed().as_nanos() as u64);
            }

            if self.steps % self.params.record_every == 0 {
                self.record(&mut trace);
            }
            if self.steps % (num_steps / 10).max(1) == 0 {
                let progress = self.clock.t / self.params.tstop * 100.0;
                log::debug!("Run progress: {:.1}%", progress);
            }
        }

        trace.events = self.queue.emitted.clone();
        trace.steps_executed = self.steps;
        if self.params.perf_enabled && !self.perf_samples.is_empty() {
            let steps = self.perf_samples.len();
            let sum: u128 = self.perf_samples.iter().map(|v| *v as u128).sum();
            let max = self.perf_samples.iter().copied().max().unwrap_or(0);
            trace.perf = Some(PerfReport {
                avg_step_ns: (sum / steps as u128) as u64,
                max_step_ns: max,
                steps,
            });
        }

        log::info!(
            "Run completed: {} steps, {} output events, final v={:.3}mV",
            trace.steps_executed,
            trace.events.len(),
            self.v
        );
        Ok(trace)
    }

    fn deliver_events(&mut self, until: f64) -> Result<()> {
        while let Some(pending) = self.queue.pop_due(until) {
            let instance = self
                .instances
                .get_mut(pending.target.raw())
                .ok_or(MechanismError::InstanceNotFound { index: pending.target.raw() })?;
            let event = Event {
                time: pending.time,
                weight: pending.weight,
                flag: pending.flag,
            };
            let mut sink = EventSink::new(pending.target, &mut self.queue);
            instance.on_event(&event, &mut sink)?;
        }
        Ok(())
    }

    /// Step length and end time, landing exactly on the next breakpoint
    fn next_step(&self, t: f64, dt: f64) -> (f64, f64) {
        let eps = dt * 1e-9;
        match self.breakpoints.iter().find(|b| **b > t + eps) {
            Some(&b) if b < t + dt - eps => (b - t, b),
            _ => (dt, t + dt),
        }
    }

    fn record(&self, trace: &mut Trace) {
        trace.samples.push(TraceSample {
            t: self.clock.t,
            v: self.v,
            states: self.instances.iter().map(|k| k.states().to_vec()).collect(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::leak::LeakChannel;
    use crate::stimulus::{ClampWaveform, CurrentClamp};
    use crate::config::KernelConfig;
    use crate::instance::MechanismRegistry;
    use crate::mechanism::MechanismKind;
    use crate::synapse::NmdaSynapse;

    fn geometry() -> Geometry {
        Geometry { cm: 1.0, area: 100.0 }
    }

    #[test]
    fn test_driver_params_validation() {
        assert!(DriverParams::default().validate().is_ok());
        assert!(DriverParams::new(0.0, 10.0).is_err());
        assert!(DriverParams::new(0.1, 0.01).is_err());
        assert!(DriverParams::default().with_record_every(0).validate().is_err());
        assert_eq!(DriverParams::new(0.025, 10.0).unwrap().num_steps(), 400);
    }

    #[test]
    fn test_leak_relaxes_to_reversal() {
        let params = DriverParams::new(0.1, 200.0).unwrap().with_v_init(-80.0);
        let mut cell = Compartment::new(geometry(), params).unwrap();
        cell.add(LeakChannel::new(0.001, -60.0));
        let trace = cell.run().unwrap();
        // tau = cm / g = 1 ms, 200 time constants later
        assert!((cell.voltage() + 60.0).abs() < 1e-6);
        let v = trace.voltages();
        assert!(v.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_clamp_onset_is_landed() {
        let params = DriverParams::new(0.3, 2.0).unwrap();
        let mut cell = Compartment::new(geometry(), params).unwrap();
        cell.add(LeakChannel::new(0.001, -65.0));
        cell.add(CurrentClamp {
            del: 1.0,
            dur: 0.5,
            amp: 0.1,
            period: 200.0,
            waveform: ClampWaveform::Constant,
        });
        let trace = cell.run().unwrap();
        let times = trace.times();
        assert!(times.iter().any(|t| (*t - 1.0).abs() < 1e-12));
        assert!(times.iter().any(|t| (*t - 1.5).abs() < 1e-12));
        // No current before onset
        let before: Vec<_> = trace.samples.iter().filter(|s| s.t <= 1.0).collect();
        assert!(before.iter().all(|s| (s.v + 65.0).abs() < 1e-9));
        assert!(trace.peak_voltage().unwrap() > -65.0);
    }

    #[test]
    fn test_synaptic_event_depolarizes() {
        let params = DriverParams::new(0.025, 30.0).unwrap();
        let mut cell = Compartment::new(geometry(), params).unwrap();
        cell.add(LeakChannel::new(0.0003, -65.0));
        let syn = cell.add(NmdaSynapse::default().with_gmax(0.001));
        cell.schedule(syn, 5.0, 1.0).unwrap();
        let trace = cell.run().unwrap();
        let b = trace.state_series(syn, 1);
        assert!(b.iter().any(|x| *x > 0.0));
        assert!(trace.peak_voltage().unwrap() > -64.9);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let mut cell = Compartment::new(geometry(), DriverParams::default()).unwrap();
        let err = cell.schedule(InstanceId(4), 1.0, 1.0).unwrap_err();
        assert_eq!(err, MechanismError::InstanceNotFound { index: 4 });
    }

    #[test]
    fn test_events_to_channels_abort_run() {
        let mut cell = Compartment::new(geometry(), DriverParams::new(0.1, 5.0).unwrap()).unwrap();
        let leak = cell.add(LeakChannel::default());
        cell.schedule(leak, 1.0, 1.0).unwrap();
        let err = cell.run().unwrap_err();
        assert!(matches!(err, MechanismError::EventsNotSupported { .. }));
    }

    #[test]
    fn test_queue_orders_by_time_then_insertion() {
        let mut queue = DriverQueue::default();
        queue.push(InstanceId(0), 2.0, EventFlag::External, 1.0);
        queue.push(InstanceId(1), 1.0, EventFlag::External, 1.0);
        queue.push(InstanceId(2), 1.0, EventFlag::SelfFire, 1.0);
        assert_eq!(queue.pop_due(10.0).unwrap().target, InstanceId(1));
        assert_eq!(queue.pop_due(10.0).unwrap().target, InstanceId(2));
        assert!(queue.pop_due(1.5).is_none());
        assert_eq!(queue.pop_due(2.0).unwrap().target, InstanceId(0));
    }

    fn hh_trace(celsius: f64, q10: Option<f64>) -> Trace {
        let mut registry = MechanismRegistry::new(KernelConfig::new()).unwrap();
        if let Some(factor) = q10 {
            for kind in [MechanismKind::KConductance, MechanismKind::NaConductance] {
                let warm = registry.kinetics(kind).unwrap().with_q10(factor, 6.3).unwrap();
                registry.set_kinetics(warm).unwrap();
            }
        }
        let params = DriverParams::new(0.025, 15.0).unwrap().with_celsius(celsius);
        let mut cell = Compartment::new(geometry(), params).unwrap();
        for kind in [MechanismKind::Leak, MechanismKind::NaConductance, MechanismKind::KConductance] {
            cell.add(registry.create(kind).unwrap());
        }
        cell.add(CurrentClamp {
            del: 1.0,
            dur: 10.0,
            amp: 0.002,
            period: 200.0,
            waveform: ClampWaveform::Constant,
        });
        cell.run().unwrap()
    }

    #[test]
    fn test_temperature_only_matters_with_q10() {
        let cold = hh_trace(6.3, None);
        let warm = hh_trace(20.0, None);
        assert_eq!(cold.voltages(), warm.voltages());

        let cold = hh_trace(6.3, Some(3.0));
        let warm = hh_trace(20.0, Some(3.0));
        assert_eq!(cold.voltages(), hh_trace(6.3, None).voltages());
        assert_ne!(cold.voltages(), warm.voltages());
    }
}
