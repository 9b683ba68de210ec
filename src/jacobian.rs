//! Jacobian providers.
//!
//! The derivation engine needs `f(x)` at a handful of points and the Jacobian
//! `J[i][j] = ∂f_i/∂x_j` at the central values. A [`JacobianProvider`]
//! supplies both; the three implementations are interchangeable:
//!
//! - [`Automatic`]: forward-mode dual numbers, exact to machine precision.
//! - [`Numerical`]: central differences refined by Richardson extrapolation,
//!   for functions that cannot be written against [`Dual64`].
//! - [`Manual`]: a caller supplied Jacobian, accepted as is.

use serde::{Deserialize, Serialize};

use crate::dual::Dual;
use crate::error::{Error, ErrorInfo, Result};
use crate::Dual64;

/// Evaluates a vector function and its Jacobian.
pub trait JacobianProvider {
    /// `f(x)`.
    fn eval(&self, x: &[f64]) -> Vec<f64>;

    /// `(f(x), J)` with `J[i][j] = ∂f_i/∂x_j`.
    fn eval_jacobian(&self, x: &[f64]) -> Result<(Vec<f64>, Vec<Vec<f64>>)>;
}

/// Directional derivative (forward mode): `(f(x), J·v)`.
pub fn jvp(f: impl Fn(&[Dual64]) -> Vec<Dual64>, x: &[f64], v: &[f64]) -> (Vec<f64>, Vec<f64>) {
    assert_eq!(x.len(), v.len(), "x and v must have the same length");
    let inputs: Vec<Dual64> = x
        .iter()
        .zip(v.iter())
        .map(|(&xi, &vi)| Dual::new(xi, vi))
        .collect();
    let outputs = f(&inputs);
    let values = outputs.iter().map(|d| d.re).collect();
    let tangents = outputs.iter().map(|d| d.eps).collect();
    (values, tangents)
}

/// Full Jacobian of `f : Rⁿ → Rᵐ` using one forward sweep per input.
///
/// Returns `(f(x), J)` where `J[i][j] = ∂f_i/∂x_j`.
pub fn jacobian(f: impl Fn(&[Dual64]) -> Vec<Dual64>, x: &[f64]) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = x.len();
    let const_inputs: Vec<Dual64> = x.iter().map(|&xi| Dual::constant(xi)).collect();
    let values: Vec<f64> = f(&const_inputs).iter().map(|d| d.re).collect();
    let m = values.len();

    let mut jac = vec![vec![0.0; n]; m];
    let mut inputs = const_inputs;
    for j in 0..n {
        inputs[j] = Dual::variable(x[j]);
        let outputs = f(&inputs);
        for (row, out) in jac.iter_mut().zip(outputs.iter()) {
            row[j] = out.eps;
        }
        inputs[j] = Dual::constant(x[j]);
    }
    (values, jac)
}

/// Exact derivatives through dual numbers.
pub struct Automatic<F> {
    f: F,
}

impl<F> Automatic<F>
where
    F: Fn(&[Dual64]) -> Vec<Dual64>,
{
    pub fn new(f: F) -> Self {
        Automatic { f }
    }
}

impl<F> JacobianProvider for Automatic<F>
where
    F: Fn(&[Dual64]) -> Vec<Dual64>,
{
    fn eval(&self, x: &[f64]) -> Vec<f64> {
        let inputs: Vec<Dual64> = x.iter().map(|&xi| Dual::constant(xi)).collect();
        (self.f)(&inputs).iter().map(|d| d.re).collect()
    }

    fn eval_jacobian(&self, x: &[f64]) -> Result<(Vec<f64>, Vec<Vec<f64>>)> {
        let (values, jac) = jacobian(&self.f, x);
        for (i, row) in jac.iter().enumerate() {
            if !values[i].is_finite() {
                continue;
            }
            if let Some(j) = row.iter().position(|d| !d.is_finite()) {
                return Err(Error::UnsupportedDifferentiation(
                    ErrorInfo::new(
                        "jacobian.non_finite",
                        "automatic differentiation produced a non-finite derivative",
                    )
                    .with_context("output", i)
                    .with_context("input", j)
                    .with_hint("use numerical differentiation for this function"),
                ));
            }
        }
        Ok((values, jac))
    }
}

/// Step control for [`Numerical`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumDiffConfig {
    /// Initial step relative to `max(|x_j|, 1)`.
    pub step: f64,
    /// Number of step halvings combined by Richardson extrapolation.
    pub richardson_terms: usize,
    /// Ratio between successive steps.
    pub step_ratio: f64,
}

impl Default for NumDiffConfig {
    fn default() -> Self {
        NumDiffConfig {
            step: 1e-2,
            richardson_terms: 4,
            step_ratio: 2.0,
        }
    }
}

/// Finite-difference derivatives.
pub struct Numerical<F> {
    f: F,
    config: NumDiffConfig,
}

impl<F> Numerical<F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    pub fn new(f: F) -> Self {
        Self::with_config(f, NumDiffConfig::default())
    }

    pub fn with_config(f: F, config: NumDiffConfig) -> Self {
        Numerical { f, config }
    }

    /// Central difference of every output in direction `j` with step `h`.
    fn central(&self, x: &[f64], j: usize, h: f64, m: usize) -> Result<Vec<f64>> {
        let mut xp = x.to_vec();
        let mut xm = x.to_vec();
        xp[j] += h;
        xm[j] -= h;
        let fp = (self.f)(&xp);
        let fm = (self.f)(&xm);
        if fp.len() != m || fm.len() != m {
            return Err(output_length_changed(m, fp.len().max(fm.len())));
        }
        Ok(fp
            .iter()
            .zip(fm.iter())
            .map(|(a, b)| (a - b) / (2.0 * h))
            .collect())
    }
}

impl<F> JacobianProvider for Numerical<F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    fn eval(&self, x: &[f64]) -> Vec<f64> {
        (self.f)(x)
    }

    fn eval_jacobian(&self, x: &[f64]) -> Result<(Vec<f64>, Vec<Vec<f64>>)> {
        let cfg = &self.config;
        if !(cfg.step > 0.0) || !(cfg.step_ratio > 1.0) {
            return Err(Error::InvalidInput(
                ErrorInfo::new("jacobian.step", "numerical step and ratio must be positive")
                    .with_context("step", cfg.step)
                    .with_context("step_ratio", cfg.step_ratio),
            ));
        }
        let values = (self.f)(x);
        let m = values.len();
        let terms = cfg.richardson_terms.max(1);
        let mut jac = vec![vec![0.0; x.len()]; m];

        for j in 0..x.len() {
            let h0 = cfg.step * x[j].abs().max(1.0);
            // levels[l] is the l-th extrapolation of the current step, per output.
            let mut prev_levels: Vec<Vec<f64>> = Vec::new();
            for k in 0..terms {
                let h = h0 / cfg.step_ratio.powi(k as i32);
                let mut levels = vec![self.central(x, j, h, m)?];
                let mut factor = 1.0;
                for l in 1..=k {
                    factor *= cfg.step_ratio * cfg.step_ratio;
                    let next = levels[l - 1]
                        .iter()
                        .zip(prev_levels[l - 1].iter())
                        .map(|(fine, coarse)| fine + (fine - coarse) / (factor - 1.0))
                        .collect();
                    levels.push(next);
                }
                prev_levels = levels;
            }
            if let Some(best) = prev_levels.last() {
                for (jrow, d) in jac.iter_mut().zip(best.iter()) {
                    jrow[j] = *d;
                }
            }
        }
        Ok((values, jac))
    }
}

/// A verbatim Jacobian next to the function it belongs to.
pub struct Manual<F> {
    f: F,
    jac: Vec<Vec<f64>>,
}

impl<F> Manual<F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    pub fn new(f: F, jac: Vec<Vec<f64>>) -> Self {
        Manual { f, jac }
    }
}

impl<F> JacobianProvider for Manual<F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    fn eval(&self, x: &[f64]) -> Vec<f64> {
        (self.f)(x)
    }

    fn eval_jacobian(&self, x: &[f64]) -> Result<(Vec<f64>, Vec<Vec<f64>>)> {
        let values = (self.f)(x);
        let rows_ok = self.jac.len() == values.len();
        if !rows_ok || self.jac.iter().any(|row| row.len() != x.len()) {
            return Err(Error::ShapeMismatch(
                ErrorInfo::new(
                    "jacobian.manual_shape",
                    "supplied Jacobian does not match the function's outputs and inputs",
                )
                .with_context("outputs", values.len())
                .with_context("inputs", x.len())
                .with_context("rows", self.jac.len()),
            ));
        }
        Ok((values, self.jac.clone()))
    }
}

fn output_length_changed(expected: usize, got: usize) -> Error {
    Error::ShapeMismatch(
        ErrorInfo::new(
            "jacobian.output_length",
            "function returned a different number of outputs at a shifted point",
        )
        .with_context("expected", expected)
        .with_context("got", got),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn richardson_beats_plain_central_difference() {
        let f = |x: &[f64]| vec![x[0].exp()];
        let plain = Numerical::with_config(
            f,
            NumDiffConfig {
                richardson_terms: 1,
                ..NumDiffConfig::default()
            },
        );
        let refined = Numerical::new(f);
        let (_, jp) = plain.eval_jacobian(&[1.0]).unwrap();
        let (_, jr) = refined.eval_jacobian(&[1.0]).unwrap();
        let exact = 1f64.exp();
        assert!((jr[0][0] - exact).abs() < (jp[0][0] - exact).abs());
        assert!((jr[0][0] - exact).abs() < 1e-10);
    }

    #[test]
    fn manual_shape_is_checked() {
        let p = Manual::new(|x: &[f64]| vec![x[0] + x[1]], vec![vec![1.0]]);
        assert!(matches!(
            p.eval_jacobian(&[1.0, 2.0]),
            Err(Error::ShapeMismatch(_))
        ));
    }
}
