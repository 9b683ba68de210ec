//! Matrix operations on records.
//!
//! Every adapter flattens its operand row-major into a list of records, runs
//! a plain numerical routine through [`derive`], and reshapes the result.
//! Operand variants are matched here and nowhere else; an operand the
//! routine cannot handle is rejected with [`Error::TypeMismatch`] before any
//! arithmetic happens.
//!
//! With [`Differentiation::Automatic`] the algebraic routines (`inv`,
//! `matmul`, `cholesky`, `det`, `slogdet`, `pinv`) run nalgebra's
//! factorisations on dual numbers, while the decompositions (`eigh`, `eig`,
//! `svd`) use closed-form sensitivities. [`Differentiation::Numerical`] runs
//! the `f64` routine under finite differences instead.

mod matrix;
mod spectral;

pub use matrix::{CObsMatrix, Differentiation, ObsMatrix, Operand};

use log::warn;
use nalgebra::DMatrix;

use crate::derive::derive;
use crate::dual::Dual;
use crate::error::{Error, ErrorInfo, Result};
use crate::jacobian::{Automatic, Manual, Numerical};
use crate::obs::Obs;
use crate::scalar::Scalar;
use crate::Dual64;

/// Options of [`eig_with`].
#[derive(Clone, Debug, PartialEq)]
pub struct EigConfig {
    /// Added to eigenvalue gaps in the backward rule.
    pub offset: f64,
}

impl Default for EigConfig {
    fn default() -> Self {
        EigConfig { offset: 1e-20 }
    }
}

/// A flattened matrix routine usable on values and on duals.
trait Kernel {
    fn apply<T: Scalar>(&self, x: &[T]) -> Result<Vec<T>>;
}

/// Evaluate `kernel` once in `f64` to surface failures, then propagate.
fn run<K: Kernel>(kernel: &K, inputs: &[&Obs], diff: &Differentiation) -> Result<Vec<Obs>> {
    let central: Vec<f64> = inputs.iter().map(|o| o.value()).collect();
    let n_out = kernel.apply::<f64>(&central)?.len();
    match diff {
        Differentiation::Automatic => {
            let f = |x: &[Dual64]| {
                kernel
                    .apply(x)
                    .unwrap_or_else(|_| vec![Dual::constant(f64::NAN); n_out])
            };
            derive(&Automatic::new(f), inputs)
        }
        Differentiation::Numerical(cfg) => {
            let f = |x: &[f64]| kernel.apply(x).unwrap_or_else(|_| vec![f64::NAN; n_out]);
            derive(&Numerical::with_config(f, cfg.clone()), inputs)
        }
    }
}

fn row_major<T: Scalar>(m: &DMatrix<T>) -> Vec<T> {
    m.transpose().as_slice().to_vec()
}

fn singular(op: &str) -> Error {
    Error::Singular(
        ErrorInfo::new("linalg.singular", "matrix is singular to working precision")
            .with_context("op", op),
    )
}

struct Inverse {
    n: usize,
}

impl Kernel for Inverse {
    fn apply<T: Scalar>(&self, x: &[T]) -> Result<Vec<T>> {
        let m = DMatrix::from_row_slice(self.n, self.n, x);
        let inv = m.try_inverse().ok_or_else(|| singular("inv"))?;
        Ok(row_major(&inv))
    }
}

/// Inputs `[Re..., Im...]`, outputs `[Re..., Im...]` of the inverse, through
/// the real block form `[[Re, −Im], [Im, Re]]`.
struct ComplexInverse {
    n: usize,
}

impl Kernel for ComplexInverse {
    fn apply<T: Scalar>(&self, x: &[T]) -> Result<Vec<T>> {
        let n = self.n;
        let (re, im) = x.split_at(n * n);
        let block = DMatrix::from_fn(2 * n, 2 * n, |i, j| {
            let k = (i % n) * n + j % n;
            match (i < n, j < n) {
                (true, true) | (false, false) => re[k],
                (true, false) => -im[k],
                (false, true) => im[k],
            }
        });
        let inv = block.try_inverse().ok_or_else(|| singular("inv"))?;
        let mut out = row_major(&inv.view((0, 0), (n, n)).into_owned());
        out.extend(row_major(&inv.view((n, 0), (n, n)).into_owned()));
        Ok(out)
    }
}

struct Product {
    shapes: Vec<(usize, usize)>,
}

impl Kernel for Product {
    fn apply<T: Scalar>(&self, x: &[T]) -> Result<Vec<T>> {
        let mut rest = x;
        let mut acc: Option<DMatrix<T>> = None;
        for &(r, c) in &self.shapes {
            let (head, tail) = rest.split_at(r * c);
            rest = tail;
            let m = DMatrix::from_row_slice(r, c, head);
            acc = Some(match acc {
                None => m,
                Some(a) => a * m,
            });
        }
        Ok(acc.map(|a| row_major(&a)).unwrap_or_default())
    }
}

/// Every factor contributes `[Re..., Im...]`; the output is `[Re..., Im...]`.
struct ComplexProduct {
    shapes: Vec<(usize, usize)>,
}

impl Kernel for ComplexProduct {
    fn apply<T: Scalar>(&self, x: &[T]) -> Result<Vec<T>> {
        let mut rest = x;
        let mut acc: Option<(DMatrix<T>, DMatrix<T>)> = None;
        for &(r, c) in &self.shapes {
            let (re, tail) = rest.split_at(r * c);
            let (im, tail) = tail.split_at(r * c);
            rest = tail;
            let c_re = DMatrix::from_row_slice(r, c, re);
            let c_im = DMatrix::from_row_slice(r, c, im);
            acc = Some(match acc {
                None => (c_re, c_im),
                Some((a, b)) => (&a * &c_re - &b * &c_im, &a * &c_im + &b * &c_re),
            });
        }
        Ok(acc
            .map(|(re, im)| {
                let mut out = row_major(&re);
                out.extend(row_major(&im));
                out
            })
            .unwrap_or_default())
    }
}

/// Only the lower triangle of the input is read.
struct Cholesky {
    n: usize,
}

impl Kernel for Cholesky {
    fn apply<T: Scalar>(&self, x: &[T]) -> Result<Vec<T>> {
        let m = DMatrix::from_row_slice(self.n, self.n, x);
        let chol = m.cholesky().ok_or_else(|| {
            Error::InvalidInput(
                ErrorInfo::new("linalg.not_positive_definite", "matrix is not positive definite")
                    .with_context("op", "cholesky"),
            )
        })?;
        Ok(row_major(&chol.l()))
    }
}

struct Determinant {
    n: usize,
}

impl Kernel for Determinant {
    fn apply<T: Scalar>(&self, x: &[T]) -> Result<Vec<T>> {
        Ok(vec![DMatrix::from_row_slice(self.n, self.n, x).lu().determinant()])
    }
}

struct LogDeterminant {
    n: usize,
}

impl Kernel for LogDeterminant {
    fn apply<T: Scalar>(&self, x: &[T]) -> Result<Vec<T>> {
        let det = DMatrix::from_row_slice(self.n, self.n, x).lu().determinant();
        if det.value() == 0.0 {
            return Err(singular("slogdet"));
        }
        Ok(vec![det.modulus().ln()])
    }
}

struct PseudoInverse {
    rows: usize,
    cols: usize,
}

impl Kernel for PseudoInverse {
    fn apply<T: Scalar>(&self, x: &[T]) -> Result<Vec<T>> {
        let scale = x.iter().fold(0.0_f64, |acc, v| acc.max(v.value().abs()));
        let eps = T::from_f(scale * self.rows.max(self.cols) as f64 * f64::EPSILON);
        let pinv = DMatrix::from_row_slice(self.rows, self.cols, x)
            .pseudo_inverse(eps)
            .map_err(|msg| {
                Error::Singular(ErrorInfo::new("linalg.pinv", msg).with_context("op", "pinv"))
            })?;
        Ok(row_major(&pinv))
    }
}

fn type_mismatch(op: &str, operand: &Operand) -> Error {
    Error::TypeMismatch(
        ErrorInfo::new(
            "linalg.operand",
            format!("{op} does not accept a {}", operand.kind()),
        )
        .with_context("op", op),
    )
}

fn not_square(op: &str, shape: (usize, usize)) -> Error {
    Error::ShapeMismatch(
        ErrorInfo::new("linalg.not_square", "operation requires a square matrix")
            .with_context("op", op)
            .with_context("rows", shape.0)
            .with_context("cols", shape.1),
    )
}

fn real_array<'a>(op: &str, a: &'a Operand) -> Result<&'a ObsMatrix> {
    a.as_array().ok_or_else(|| type_mismatch(op, a))
}

fn square_array<'a>(op: &str, a: &'a Operand) -> Result<&'a ObsMatrix> {
    let m = real_array(op, a)?;
    if m.nrows() != m.ncols() {
        return Err(not_square(op, m.shape()));
    }
    Ok(m)
}

fn complex_inputs(m: &CObsMatrix) -> Vec<&Obs> {
    let parts = m.as_slice();
    parts
        .iter()
        .map(|z| &z.real)
        .chain(parts.iter().map(|z| &z.imag))
        .collect()
}

/// Reject analytic Jacobians that are not finite (degenerate spectra).
fn finite_jacobian(op: &str, jac: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>> {
    if jac.iter().flatten().all(|d| d.is_finite()) {
        return Ok(jac);
    }
    Err(Error::UnsupportedDifferentiation(
        ErrorInfo::new(
            "linalg.non_finite_jacobian",
            "analytic sensitivities are not finite, the spectrum is degenerate",
        )
        .with_context("op", op)
        .with_hint("use Differentiation::Numerical"),
    ))
}

/// Inverse of a real or complex square matrix.
pub fn inv(a: &Operand, diff: &Differentiation) -> Result<Operand> {
    match a {
        Operand::Array(m) => {
            let n = square_array("inv", a)?.nrows();
            let inputs: Vec<&Obs> = m.iter().collect();
            let out = run(&Inverse { n }, &inputs, diff)?;
            Ok(Operand::Array(ObsMatrix::new(n, n, out)?))
        }
        Operand::ComplexArray(m) => {
            let (n, cols) = m.shape();
            if n != cols {
                return Err(not_square("inv", m.shape()));
            }
            let mut out = run(&ComplexInverse { n }, &complex_inputs(m), diff)?;
            let imag = out.split_off(n * n);
            let z = CObsMatrix::from_parts(ObsMatrix::new(n, n, out)?, ObsMatrix::new(n, n, imag)?)?;
            Ok(Operand::ComplexArray(z))
        }
        other => Err(type_mismatch("inv", other)),
    }
}

/// Product of a chain of real or complex matrices, left to right.
///
/// The result is complex as soon as one factor is.
pub fn matmul(operands: &[Operand], diff: &Differentiation) -> Result<Operand> {
    let mut shapes = Vec::with_capacity(operands.len());
    let mut complex = false;
    for op in operands {
        match op {
            Operand::Array(m) => shapes.push(m.shape()),
            Operand::ComplexArray(m) => {
                complex = true;
                shapes.push(m.shape());
            }
            other => return Err(type_mismatch("matmul", other)),
        }
    }
    let (first, last) = match (shapes.first(), shapes.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => {
            return Err(Error::InvalidInput(ErrorInfo::new(
                "linalg.empty_product",
                "matmul needs at least one factor",
            )))
        }
    };
    if let Some(k) = shapes.windows(2).position(|w| w[0].1 != w[1].0) {
        return Err(Error::ShapeMismatch(
            ErrorInfo::new("linalg.matmul_shape", "inner dimensions do not agree")
                .with_context("factor", k)
                .with_context("left", format!("{:?}", shapes[k]))
                .with_context("right", format!("{:?}", shapes[k + 1])),
        ));
    }
    let (rows, cols) = (first.0, last.1);

    if !complex {
        let inputs: Vec<&Obs> = operands
            .iter()
            .filter_map(Operand::as_array)
            .flat_map(|m| m.iter())
            .collect();
        let out = run(&Product { shapes }, &inputs, diff)?;
        return Ok(Operand::Array(ObsMatrix::new(rows, cols, out)?));
    }

    let zero = Obs::constant(0.0);
    let mut inputs: Vec<&Obs> = Vec::new();
    for op in operands {
        match op {
            Operand::Array(m) => {
                inputs.extend(m.iter());
                inputs.extend(std::iter::repeat(&zero).take(m.nrows() * m.ncols()));
            }
            Operand::ComplexArray(m) => inputs.extend(complex_inputs(m)),
            _ => {}
        }
    }
    let mut out = run(&ComplexProduct { shapes }, &inputs, diff)?;
    let imag = out.split_off(rows * cols);
    let z = CObsMatrix::from_parts(
        ObsMatrix::new(rows, cols, out)?,
        ObsMatrix::new(rows, cols, imag)?,
    )?;
    Ok(Operand::ComplexArray(z))
}

/// Lower Cholesky factor of a real symmetric positive definite matrix.
pub fn cholesky(a: &Operand, diff: &Differentiation) -> Result<ObsMatrix> {
    let m = square_array("cholesky", a)?;
    let n = m.nrows();
    let inputs: Vec<&Obs> = m.iter().collect();
    ObsMatrix::new(n, n, run(&Cholesky { n }, &inputs, diff)?)
}

pub fn det(a: &Operand, diff: &Differentiation) -> Result<Obs> {
    let m = square_array("det", a)?;
    let inputs: Vec<&Obs> = m.iter().collect();
    let mut out = run(&Determinant { n: m.nrows() }, &inputs, diff)?;
    Ok(out.remove(0))
}

/// `ln |det A|`.
pub fn slogdet(a: &Operand, diff: &Differentiation) -> Result<Obs> {
    let m = square_array("slogdet", a)?;
    let inputs: Vec<&Obs> = m.iter().collect();
    let mut out = run(&LogDeterminant { n: m.nrows() }, &inputs, diff)?;
    Ok(out.remove(0))
}

/// Moore–Penrose inverse of a real matrix. Singular values below
/// `max |a_ij| · max(m, n) · ε` count as zero.
pub fn pinv(a: &Operand, diff: &Differentiation) -> Result<ObsMatrix> {
    let m = real_array("pinv", a)?;
    let (rows, cols) = m.shape();
    let inputs: Vec<&Obs> = m.iter().collect();
    ObsMatrix::new(cols, rows, run(&PseudoInverse { rows, cols }, &inputs, diff)?)
}

fn split_decomposition(mut out: Vec<Obs>, n: usize) -> Result<(Vec<Obs>, ObsMatrix)> {
    let vectors = out.split_off(n);
    Ok((out, ObsMatrix::new(n, n, vectors)?))
}

/// Eigenvalues (ascending) and unit eigenvectors (columns) of a real
/// symmetric matrix. Only the symmetric part of the input is used.
pub fn eigh(a: &Operand, diff: &Differentiation) -> Result<(Vec<Obs>, ObsMatrix)> {
    let m = square_array("eigh", a)?;
    let n = m.nrows();
    let inputs: Vec<&Obs> = m.iter().collect();
    let eval = move |x: &[f64]| {
        let (w, v) = spectral::sym_eigen(&DMatrix::from_row_slice(n, n, x));
        spectral::flatten_decomposition(&w, &v)
    };
    let out = match diff {
        Differentiation::Automatic => {
            let (w, v) = spectral::sym_eigen(&m.values());
            let jac = finite_jacobian("eigh", spectral::sym_eigen_jacobian(&w, &v))?;
            derive(&Manual::new(eval, jac), &inputs)?
        }
        Differentiation::Numerical(cfg) => {
            derive(&Numerical::with_config(eval, cfg.clone()), &inputs)?
        }
    };
    split_decomposition(out, n)
}

/// [`eig_with`] using the default [`EigConfig`].
pub fn eig(a: &Operand, diff: &Differentiation) -> Result<(Vec<Obs>, ObsMatrix)> {
    eig_with(a, diff, &EigConfig::default())
}

/// Eigenvalues (ascending) and unit eigenvectors (columns) of a general real
/// matrix whose spectrum is real.
///
/// A complex spectrum is an error; it is never truncated to its real parts.
///
/// # Errors
///
/// [`Error::UnsupportedDifferentiation`] with code `linalg.complex_spectrum`
/// if any eigenvalue has a non-zero imaginary part.
pub fn eig_with(
    a: &Operand,
    diff: &Differentiation,
    config: &EigConfig,
) -> Result<(Vec<Obs>, ObsMatrix)> {
    let m = square_array("eig", a)?;
    let n = m.nrows();
    let inputs: Vec<&Obs> = m.iter().collect();
    let eval = move |x: &[f64]| match spectral::real_eigen(&DMatrix::from_row_slice(n, n, x)) {
        Ok((w, v)) => spectral::flatten_decomposition(&w, &v),
        Err(_) => vec![f64::NAN; n + n * n],
    };
    let (w, v) = spectral::real_eigen(&m.values())?;
    let out = match diff {
        Differentiation::Automatic => match spectral::real_eigen_jacobian(&w, &v, config.offset) {
            Some(jac) => derive(&Manual::new(eval, finite_jacobian("eig", jac)?), &inputs)?,
            None => {
                warn!("eig: eigenvector matrix is singular, falling back to numerical differentiation");
                derive(&Numerical::new(eval), &inputs)?
            }
        },
        Differentiation::Numerical(cfg) => {
            derive(&Numerical::with_config(eval, cfg.clone()), &inputs)?
        }
    };
    split_decomposition(out, n)
}

/// Thin singular value decomposition `A = U diag(s) Vᵀ` of a real `m × n`
/// matrix, singular values descending. `U` is `m × k`, `V` is `n × k` with
/// `k = min(m, n)`.
pub fn svd(a: &Operand, diff: &Differentiation) -> Result<(ObsMatrix, Vec<Obs>, ObsMatrix)> {
    let m = real_array("svd", a)?;
    let (rows, cols) = m.shape();
    let k = rows.min(cols);
    let inputs: Vec<&Obs> = m.iter().collect();
    let eval = move |x: &[f64]| match spectral::thin_svd(&DMatrix::from_row_slice(rows, cols, x)) {
        Ok((u, s, v)) => spectral::flatten_svd(&u, &s, &v),
        Err(_) => vec![f64::NAN; rows * k + k + cols * k],
    };
    let (u, s, v) = spectral::thin_svd(&m.values())?;
    let mut out = match diff {
        Differentiation::Automatic => {
            let jac = spectral::svd_jacobian(&u, &s, &v, rows, cols);
            derive(&Manual::new(eval, finite_jacobian("svd", jac)?), &inputs)?
        }
        Differentiation::Numerical(cfg) => {
            derive(&Numerical::with_config(eval, cfg.clone()), &inputs)?
        }
    };
    let v_part = out.split_off(rows * k + k);
    let s_part = out.split_off(rows * k);
    Ok((
        ObsMatrix::new(rows, k, out)?,
        s_part,
        ObsMatrix::new(cols, k, v_part)?,
    ))
}
