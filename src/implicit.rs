//! Records for externally solved parameters.
//!
//! A fit or a root finder returns a plain parameter vector `z*` satisfying
//! `F(z*, d) = 0` for the central data values `d`. The implicit function
//! theorem gives `dz/dd = −F_z⁻¹ F_d`, which is all the derivation engine
//! needs to attach fluctuations to `z*`.

use log::warn;
use nalgebra::DMatrix;

use crate::derive::derive;
use crate::error::{Error, ErrorInfo, Result};
use crate::jacobian::{jacobian, Manual};
use crate::obs::Obs;
use crate::Dual64;

/// Largest `|F(z*, d)|` accepted without a warning.
const RESIDUAL_TOL: f64 = 1e-6;

/// Turn the solution `solution` of `condition(z, d) = 0` into records that
/// depend on `data`.
///
/// `condition` must return as many equations as there are parameters. Per
/// chain values are extrapolated linearly from the solution.
///
/// # Errors
///
/// - [`Error::ShapeMismatch`] if the system is not square.
/// - [`Error::Singular`] if `∂F/∂z` cannot be inverted.
/// - [`Error::UnsupportedDifferentiation`] for non-finite derivatives.
pub fn derive_implicit<F>(condition: F, solution: &[f64], data: &[Obs]) -> Result<Vec<Obs>>
where
    F: Fn(&[Dual64], &[Dual64]) -> Vec<Dual64>,
{
    let k = solution.len();
    let n = data.len();
    let mut point = solution.to_vec();
    point.extend(data.iter().map(Obs::value));

    let (residual, jac) = jacobian(|x: &[Dual64]| condition(&x[..k], &x[k..]), &point);
    if residual.len() != k {
        return Err(Error::ShapeMismatch(
            ErrorInfo::new(
                "implicit.not_square",
                "condition must have one equation per parameter",
            )
            .with_context("equations", residual.len())
            .with_context("parameters", k),
        ));
    }
    if jac.iter().flatten().any(|d| !d.is_finite()) {
        return Err(Error::UnsupportedDifferentiation(ErrorInfo::new(
            "implicit.non_finite",
            "derivatives of the condition are not finite at the solution",
        )));
    }
    let worst = residual.iter().fold(0.0_f64, |acc, r| acc.max(r.abs()));
    if worst > RESIDUAL_TOL {
        warn!("implicit: condition residual {worst:e} at the supplied solution is not close to zero");
    }

    let f_z = DMatrix::from_fn(k, k, |i, j| jac[i][j]);
    let f_d = DMatrix::from_fn(k, n, |i, j| jac[i][k + j]);
    let f_z_inv = f_z.try_inverse().ok_or_else(|| {
        Error::Singular(
            ErrorInfo::new("implicit.singular", "∂F/∂z is singular at the solution")
                .with_hint("the parameters are not determined by the condition"),
        )
    })?;
    let dz = f_z_inv * f_d;
    let sensitivity: Vec<Vec<f64>> = (0..k)
        .map(|i| (0..n).map(|j| -dz[(i, j)]).collect())
        .collect();

    let centre: Vec<f64> = data.iter().map(Obs::value).collect();
    let z0 = solution.to_vec();
    let rows = sensitivity.clone();
    let linearised = move |d: &[f64]| {
        z0.iter()
            .zip(&rows)
            .map(|(z, row)| {
                z + row
                    .iter()
                    .zip(d.iter().zip(&centre))
                    .map(|(g, (x, c))| g * (x - c))
                    .sum::<f64>()
            })
            .collect()
    };
    derive(&Manual::new(linearised, sensitivity), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_root_sensitivity() {
        let d = Obs::new(vec![vec![3.9, 4.1, 4.0, 4.2, 3.8]], vec!["e"]).unwrap();
        let z = derive_implicit(|z, d| vec![z[0] * z[0] - d[0]], &[2.0], &[d.clone()]).unwrap();
        assert!((z[0].value() - 2.0).abs() < 1e-15);
        let expected = d.sqrt();
        for (a, b) in z[0].deltas("e").unwrap().iter().zip(expected.deltas("e").unwrap()) {
            assert!((a - b).abs() < 1e-14);
        }
    }

    #[test]
    fn undetermined_parameter_is_singular() {
        let d = Obs::constant(1.0);
        let err = derive_implicit(|z, d| vec![d[0] - z[0] * 0.0 - 1.0], &[0.5], &[d]).unwrap_err();
        assert!(matches!(err, Error::Singular(_)));
    }
}
