use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use ionmech_core::{
    ChannelKinetics, Compartment, DriverParams, Geometry, KernelConfig, MechanismKind,
    MechanismRegistry, TableSettings,
};

fn bench_rates(c: &mut Criterion) {
    let mut group = c.benchmark_group("sodium_rates");
    let voltages: Vec<f64> = (0..1000).map(|i| -90.0 + i as f64 * 0.12).collect();
    group.throughput(Throughput::Elements(voltages.len() as u64));

    let direct = ChannelKinetics::sodium(TableSettings::disabled()).unwrap();
    let tabled = ChannelKinetics::sodium(TableSettings::default()).unwrap();
    // Build the table outside the measurement
    tabled.table(6.3).unwrap();

    group.bench_function("direct", |b| {
        b.iter(|| {
            for &v in &voltages {
                black_box(direct.rates(black_box(v), 6.3).unwrap());
            }
        })
    });
    group.bench_function("table", |b| {
        b.iter(|| {
            for &v in &voltages {
                black_box(tabled.rates(black_box(v), 6.3).unwrap());
            }
        })
    });
    group.finish();
}

fn build_cell(channels: usize) -> Compartment {
    let mut registry = MechanismRegistry::new(KernelConfig::new()).unwrap();
    // Short duration to keep benches fast in CI
    let params = DriverParams::new(0.025, 5.0).unwrap().with_record_every(40);
    let mut cell = Compartment::new(Geometry::default(), params).unwrap();
    cell.add(registry.create(MechanismKind::Leak).unwrap());
    for _ in 0..channels {
        cell.add(registry.create(MechanismKind::NaConductance).unwrap());
        cell.add(registry.create(MechanismKind::KConductance).unwrap());
    }
    cell
}

fn bench_driver(c: &mut Criterion) {
    let mut group = c.benchmark_group("compartment_run");
    for &n in &[1usize, 8, 32] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("hh_channels", n), &n, |b, &n| {
            b.iter_batched(
                || build_cell(n),
                |mut cell| {
                    let _trace = cell.run().unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rates, bench_driver);
criterion_main!(benches);
