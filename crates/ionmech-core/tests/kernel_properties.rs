//! Property tests for the numerical kernels

use ionmech_core::{
    gating::exponential_step,
    host::{NullQueue, RecordingQueue},
    linearize, vtrap, ChannelKinetics, Event, EventSink, HostView, InstanceId, IonPools, Kernel,
    LeakChannel, MechanismError, NmdaSynapse, RateTable, TableDomain, TableSettings,
    VariableNetStim, VoltageGatedChannel,
};
use proptest::prelude::*;
use smallvec::smallvec;
use std::sync::Arc;

fn host(pools: &IonPools) -> HostView<'_> {
    HostView {
        t: 0.0,
        dt: 0.025,
        celsius: 6.3,
        area: 1000.0,
        ions: pools,
    }
}

proptest! {
    #[test]
    fn prop_table_within_interpolation_bound(v in -150.0f64..150.0) {
        // f'' = 2 everywhere, so the error bound is h^2 / 4
        let domain = TableDomain::default();
        let table = RateTable::build(domain, 6.3, |x| smallvec![x * x]).unwrap();
        let h = domain.step();
        let expected = v.clamp(domain.v_min, domain.v_max).powi(2);
        let got = table.lookup(v)[0];
        prop_assert!((got - expected).abs() <= h * h / 4.0 + 1e-9);
    }

    #[test]
    fn prop_table_clamps_outside_domain(excess in 0.0f64..1e6) {
        let domain = TableDomain::default();
        let table = RateTable::build(domain, 6.3, |x| smallvec![x.sin(), x]).unwrap();
        prop_assert_eq!(table.lookup(domain.v_min - excess), table.lookup(domain.v_min));
        prop_assert_eq!(table.lookup(domain.v_max + excess), table.lookup(domain.v_max));
    }

    #[test]
    fn prop_vtrap_smooth_across_switch(b in 1.0f64..50.0, k in 0.5f64..2.0) {
        let x = 1e-6 * b * k;
        let y = x / b;
        let reference = 1.0 + y / 2.0 + y * y / 12.0;
        prop_assert!(((vtrap(x, b) - reference) / reference).abs() < 1e-9);
    }

    #[test]
    fn prop_exponential_steps_compose(
        x in 0.0f64..1.0,
        x_inf in 0.0f64..1.0,
        tau in 0.01f64..50.0,
        dt1 in 0.0f64..5.0,
        dt2 in 0.0f64..5.0,
    ) {
        let two = exponential_step(exponential_step(x, x_inf, tau, dt1), x_inf, tau, dt2);
        let one = exponential_step(x, x_inf, tau, dt1 + dt2);
        prop_assert!((two - one).abs() < 1e-12);
    }

    #[test]
    fn prop_leak_conductance_is_gmax(
        gmax in 1e-6f64..1.0,
        e in -100.0f64..50.0,
        v in -100.0f64..50.0,
    ) {
        let pools = IonPools::new();
        let lin = linearize(&LeakChannel::new(gmax, e), v, &host(&pools));
        prop_assert!((lin.d - gmax).abs() < 1e-9 * gmax.max(1.0));
        prop_assert!((lin.rhs - gmax * (v - e)).abs() < 1e-12);
    }

    #[test]
    fn prop_gate_converges_monotonically(v in -90.0f64..30.0, v0 in -90.0f64..30.0) {
        let pools = IonPools::new();
        let kinetics = Arc::new(ChannelKinetics::potassium(TableSettings::disabled()).unwrap());
        let mut k = VoltageGatedChannel::new(kinetics.clone());
        let mut queue = NullQueue;
        let mut sink = EventSink::new(InstanceId(0), &mut queue);
        k.init(v0, &host(&pools), &mut sink).unwrap();

        let inf = kinetics.evaluate(v, 6.3)[0];
        let mut gap = (k.states()[0] - inf).abs();
        for _ in 0..200 {
            k.advance_state(v, 0.1, &host(&pools)).unwrap();
            let next = (k.states()[0] - inf).abs();
            prop_assert!(next <= gap + 1e-15);
            gap = next;
        }
    }

    #[test]
    fn prop_k_conductance_matches_analytic(v in -90.0f64..30.0) {
        let pools = IonPools::new();
        let kinetics = Arc::new(ChannelKinetics::potassium(TableSettings::default()).unwrap());
        let mut k = VoltageGatedChannel::new(kinetics);
        let mut queue = NullQueue;
        let mut sink = EventSink::new(InstanceId(0), &mut queue);
        k.init(-60.0, &host(&pools), &mut sink).unwrap();
        let lin = linearize(&k, v, &host(&pools));
        prop_assert!((lin.d - k.gmax * k.open_fraction()).abs() < 1e-9);
    }

    #[test]
    fn prop_synapse_peak_is_normalized(tau_rise in 0.1f64..5.0, ratio in 1.5f64..20.0) {
        let pools = IonPools::new();
        let mut syn = NmdaSynapse::default().with_time_constants(tau_rise, tau_rise * ratio);
        let mut queue = NullQueue;
        let mut sink = EventSink::new(InstanceId(0), &mut queue);
        syn.init(-65.0, &host(&pools), &mut sink).unwrap();
        syn.on_event(&Event::external(0.0, 1.0), &mut sink).unwrap();

        // Advance exactly to the analytic peak
        syn.advance_state(-65.0, syn.time_to_peak(), &host(&pools)).unwrap();
        let s = syn.states();
        prop_assert!((s[1] - s[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn prop_generator_regular_without_noise(del in 0.0f64..200.0, dur in 50.0f64..500.0) {
        let pools = IonPools::new();
        let mut stim = VariableNetStim::default().with_window(del, dur);
        let mut queue = RecordingQueue::default();
        {
            let mut sink = EventSink::new(InstanceId(0), &mut queue);
            stim.init(-65.0, &host(&pools), &mut sink).unwrap();
        }
        // Deliver self-events one at a time in schedule order
        while let Some((_, time, flag, weight)) = queue.scheduled.pop() {
            let mut sink = EventSink::new(InstanceId(0), &mut queue);
            stim.on_event(&Event { time, weight, flag }, &mut sink).unwrap();
        }

        let spikes: Vec<f64> = queue.emitted.iter().map(|(_, t)| *t).collect();
        prop_assert!(!spikes.is_empty());
        prop_assert!((spikes[0] - del).abs() < 1e-9);
        for pair in spikes.windows(2) {
            let interval = 1.0 / stim.frequency(pair[0]);
            prop_assert!((pair[1] - pair[0] - interval).abs() < 1e-9);
        }
        prop_assert!(spikes.iter().all(|t| *t <= del + dur));
    }

    #[test]
    fn prop_out_of_order_is_reported(t1 in 1.0f64..100.0, back in 1e-6f64..1.0) {
        let mut syn = NmdaSynapse::default();
        let mut queue = NullQueue;
        let mut sink = EventSink::new(InstanceId(0), &mut queue);
        syn.on_event(&Event::external(t1, 0.1), &mut sink).unwrap();
        let err = syn.on_event(&Event::external(t1 - back, 0.1), &mut sink).unwrap_err();
        let is_out_of_order = matches!(err, MechanismError::EventOutOfOrder { .. });
        prop_assert!(is_out_of_order);
    }
}
