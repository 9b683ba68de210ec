#![allow(dead_code)]

use errprop::Obs;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

// ─── Chains ────────────────────────────────────────────────────────────────

/// AR(1) samples around `mean`.
pub fn ar1(n: usize, phi: f64, mean: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let mut x = 0.0;
    (0..n)
        .map(|_| {
            x = phi * x + normal.sample(&mut rng);
            mean + 0.1 * x
        })
        .collect()
}

pub fn record(name: &str, n: usize, seed: u64) -> Obs {
    Obs::new(vec![ar1(n, 0.5, 1.0, seed)], vec![name]).unwrap()
}

/// `count` records on one chain.
pub fn records(count: usize, n: usize) -> Vec<Obs> {
    (0..count).map(|i| record("ens", n, i as u64)).collect()
}
