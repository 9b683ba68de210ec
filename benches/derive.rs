use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use errprop::linalg;
use errprop::{
    derive, Automatic, Differentiation, Dual64, NumDiffConfig, Numerical, Obs, ObsMatrix, Operand,
};

mod common;

fn sum_of_products(x: &[Dual64]) -> Vec<Dual64> {
    let mut acc = Dual64::constant(0.0);
    for w in x.windows(2) {
        acc += w[0] * w[1];
    }
    vec![acc, acc.exp()]
}

fn sum_of_products_f64(x: &[f64]) -> Vec<f64> {
    let acc: f64 = x.windows(2).map(|w| w[0] * w[1]).sum();
    vec![acc, acc.exp()]
}

fn bench_derive(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive");
    for count in [2, 8, 32] {
        let inputs = common::records(count, 1000);

        group.bench_with_input(BenchmarkId::new("automatic", count), &inputs, |b, x| {
            let provider = Automatic::new(sum_of_products);
            b.iter(|| black_box(derive(&provider, black_box(x)).unwrap()))
        });

        group.bench_with_input(BenchmarkId::new("numerical", count), &inputs, |b, x| {
            let provider = Numerical::new(sum_of_products_f64);
            b.iter(|| black_box(derive(&provider, black_box(x)).unwrap()))
        });
    }
    group.finish();
}

fn bench_operators(c: &mut Criterion) {
    let mut group = c.benchmark_group("operators");
    for n in [100, 10_000] {
        let a = common::record("ens", n, 1);
        let b = common::record("ens", n, 2);
        group.bench_with_input(BenchmarkId::new("mul_exp", n), &(a, b), |bench, (a, b)| {
            bench.iter(|| black_box((a * b).exp()))
        });
    }
    group.finish();
}

fn bench_linalg(c: &mut Criterion) {
    let mut group = c.benchmark_group("linalg");
    for n in [2, 4, 8] {
        let data = (0..n * n)
            .map(|i| {
                let diagonal = i % (n + 1) == 0;
                let mean = if diagonal { n as f64 } else { 0.1 };
                Obs::new(vec![common::ar1(200, 0.3, mean, i as u64)], vec!["ens"]).unwrap()
            })
            .collect();
        let a: Operand = ObsMatrix::new(n, n, data).unwrap().into();

        group.bench_with_input(BenchmarkId::new("inv_automatic", n), &a, |b, a| {
            b.iter(|| black_box(linalg::inv(a, &Differentiation::Automatic).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("inv_numerical", n), &a, |b, a| {
            let diff = Differentiation::Numerical(NumDiffConfig::default());
            b.iter(|| black_box(linalg::inv(a, &diff).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("eigh", n), &a, |b, a| {
            b.iter(|| black_box(linalg::eigh(a, &Differentiation::Automatic).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_derive, bench_operators, bench_linalg);
criterion_main!(benches);
