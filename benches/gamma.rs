use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use errprop::{estimate, GammaConfig, Obs};

mod common;

fn bench_window_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("gamma");
    for n in [1_000, 10_000, 100_000] {
        let obs = common::record("ens", n, 7);

        group.bench_with_input(BenchmarkId::new("unwindowed", n), &obs, |b, obs| {
            let cfg = GammaConfig::default().with_s(0.0);
            b.iter(|| black_box(estimate(black_box(obs), &cfg).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("automatic", n), &obs, |b, obs| {
            let cfg = GammaConfig::default();
            b.iter(|| black_box(estimate(black_box(obs), &cfg).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("exponential_tail", n), &obs, |b, obs| {
            let cfg = GammaConfig::default().with_tau_exp(10.0);
            b.iter(|| black_box(estimate(black_box(obs), &cfg).unwrap()))
        });
    }
    group.finish();
}

fn bench_replica(c: &mut Criterion) {
    let mut group = c.benchmark_group("gamma_replica");
    for replica in [2, 8] {
        let samples = (0..replica).map(|r| common::ar1(5_000, 0.5, 1.0, r as u64)).collect();
        let names = (0..replica).map(|r| format!("ens|r{r}")).collect();
        let obs = Obs::new(samples, names).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(replica), &obs, |b, obs| {
            let cfg = GammaConfig::default();
            b.iter(|| black_box(estimate(black_box(obs), &cfg).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_window_modes, bench_replica);
criterion_main!(benches);
