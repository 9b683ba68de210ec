#![allow(dead_code)]

use errprop::Obs;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// AR(1) chain `x_{t+1} = φ x_t + sqrt(1 − φ²) η_t`, rescaled to standard
/// deviation `sigma` around `mean`. Its integrated autocorrelation time is
/// `(1 + φ) / (2 (1 − φ))`.
pub fn ar1(n: usize, phi: f64, mean: f64, sigma: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let kick = (1.0 - phi * phi).sqrt();
    let mut x: f64 = normal.sample(&mut rng);
    (0..n)
        .map(|_| {
            let out = mean + sigma * x;
            x = phi * x + kick * normal.sample(&mut rng);
            out
        })
        .collect()
}

/// Independent Gaussian samples.
pub fn gaussian(n: usize, mean: f64, sigma: f64, seed: u64) -> Vec<f64> {
    ar1(n, 0.0, mean, sigma, seed)
}

/// A record on a single chain.
pub fn chain(name: &str, samples: Vec<f64>) -> Obs {
    Obs::new(vec![samples], vec![name]).unwrap()
}

/// Largest absolute difference of the deltas on `chain`.
pub fn max_delta_diff(a: &Obs, b: &Obs, chain: &str) -> f64 {
    let da = a.deltas(chain).unwrap();
    let db = b.deltas(chain).unwrap();
    assert_eq!(da.len(), db.len());
    da.iter()
        .zip(db)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
