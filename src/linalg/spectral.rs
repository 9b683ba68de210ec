//! Eigen and singular value decompositions with analytic sensitivities.
//!
//! Values come from nalgebra. Their derivatives cannot be obtained by running
//! the decomposition on dual numbers, so the Jacobians are assembled from
//! perturbation theory: forward mode for `eigh` and `svd`, the backward rule
//! of the general eigenproblem for `eig`.
//!
//! Signs are fixed so the largest-magnitude component of every eigenvector
//! (left singular vector) is positive; this choice is locally constant and
//! therefore compatible with the derivatives.

use nalgebra::{DMatrix, SymmetricEigen, SVD};

use crate::error::{Error, ErrorInfo, Result};

/// Relative size of an imaginary eigenvalue part still treated as real.
const REAL_SPECTRUM_TOL: f64 = 1e-10;

/// Flip columns so their largest-magnitude entry is positive. Returns the
/// flipped column indices.
fn normalise_signs(u: &mut DMatrix<f64>) -> Vec<usize> {
    let mut flipped = Vec::new();
    for (j, mut col) in u.column_iter_mut().enumerate() {
        let lead = col.iter().copied().fold(0.0_f64, |best, x| {
            if x.abs() > best.abs() {
                x
            } else {
                best
            }
        });
        if lead < 0.0 {
            col.neg_mut();
            flipped.push(j);
        }
    }
    flipped
}

/// Reorder the columns of `m` by `order`.
fn permute_columns(m: &DMatrix<f64>, order: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), order.len(), |i, j| m[(i, order[j])])
}

/// `[values..., vectors row-major...]`.
pub(crate) fn flatten_decomposition(values: &[f64], vectors: &DMatrix<f64>) -> Vec<f64> {
    let mut out = values.to_vec();
    for i in 0..vectors.nrows() {
        out.extend(vectors.row(i).iter().copied());
    }
    out
}

/// Symmetric eigendecomposition of the symmetric part of `a`: ascending
/// eigenvalues, unit eigenvectors in columns.
pub(crate) fn sym_eigen(a: &DMatrix<f64>) -> (Vec<f64>, DMatrix<f64>) {
    let sym = (a + a.transpose()) * 0.5;
    let eig = SymmetricEigen::new(sym);
    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&i, &j| eig.eigenvalues[i].total_cmp(&eig.eigenvalues[j]));
    let values = order.iter().map(|&i| eig.eigenvalues[i]).collect();
    let mut vectors = permute_columns(&eig.eigenvectors, &order);
    normalise_signs(&mut vectors);
    (values, vectors)
}

/// Jacobian of [`sym_eigen`] flattened by [`flatten_decomposition`] with
/// respect to the row-major entries of `a`.
pub(crate) fn sym_eigen_jacobian(values: &[f64], u: &DMatrix<f64>) -> Vec<Vec<f64>> {
    let n = values.len();
    let mut jac = vec![vec![0.0; n * n]; n + n * n];
    for p in 0..n {
        for q in 0..n {
            let col = p * n + q;
            for i in 0..n {
                jac[i][col] = u[(p, i)] * u[(q, i)];
                for j in (0..n).filter(|&j| j != i) {
                    let coupling =
                        (u[(p, j)] * u[(q, i)] + u[(q, j)] * u[(p, i)]) / (2.0 * (values[i] - values[j]));
                    for k in 0..n {
                        jac[n + k * n + i][col] += u[(k, j)] * coupling;
                    }
                }
            }
        }
    }
    jac
}

/// Eigendecomposition of a general real matrix with a real spectrum:
/// ascending eigenvalues, unit eigenvectors in columns.
pub(crate) fn real_eigen(a: &DMatrix<f64>) -> Result<(Vec<f64>, DMatrix<f64>)> {
    let n = a.nrows();
    let complex = a.complex_eigenvalues();
    let scale = a.amax().max(f64::MIN_POSITIVE);
    if let Some(z) = complex.iter().find(|z| z.im.abs() > REAL_SPECTRUM_TOL * scale) {
        return Err(Error::UnsupportedDifferentiation(
            ErrorInfo::new("linalg.complex_spectrum", "matrix has complex eigenvalues")
                .with_context("eigenvalue", format!("{}{:+}i", z.re, z.im))
                .with_hint("only real spectra are supported by eig"),
        ));
    }
    let mut values: Vec<f64> = complex.iter().map(|z| z.re).collect();
    values.sort_by(f64::total_cmp);

    let mut vectors = DMatrix::zeros(n, n);
    for (i, &lambda) in values.iter().enumerate() {
        let shifted = a - DMatrix::identity(n, n) * lambda;
        let svd = SVD::new(shifted, false, true);
        let v_t = svd.v_t.ok_or_else(|| {
            Error::Singular(ErrorInfo::new(
                "linalg.eig_vectors",
                "null space of the shifted matrix is unavailable",
            ))
        })?;
        let (min_idx, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (k, &s)| if s < best.1 { (k, s) } else { best });
        let v = v_t.row(min_idx).transpose();
        let norm = v.norm();
        vectors.set_column(i, &(v / norm));
    }
    normalise_signs(&mut vectors);
    Ok((values, vectors))
}

/// Backward sensitivities of [`real_eigen`], one Jacobian row per output of
/// [`flatten_decomposition`]. `None` if the eigenvector matrix is singular.
pub(crate) fn real_eigen_jacobian(
    values: &[f64],
    u: &DMatrix<f64>,
    offset: f64,
) -> Option<Vec<Vec<f64>>> {
    let n = values.len();
    let ut = u.transpose();
    let ut_inv = ut.clone().try_inverse()?;
    let f = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            0.0
        } else {
            1.0 / (values[j] - values[i] + offset)
        }
    });
    let utu = &ut * u;

    let mut rows = Vec::with_capacity(n + n * n);
    let mut push_row = |ge: DMatrix<f64>, gu: DMatrix<f64>| {
        let utgu = &ut * &gu;
        let d = DMatrix::from_diagonal(&utgu.diagonal());
        let inner = ge + f.component_mul(&utgu) - f.component_mul(&(&utu * d));
        let r = &ut_inv * inner * &ut;
        rows.push(flatten_decomposition(&[], &r));
    };
    for i in 0..n {
        let mut ge = DMatrix::zeros(n, n);
        ge[(i, i)] = 1.0;
        push_row(ge, DMatrix::zeros(n, n));
    }
    for k in 0..n {
        for i in 0..n {
            let mut gu = DMatrix::zeros(n, n);
            gu[(k, i)] = 1.0;
            push_row(DMatrix::zeros(n, n), gu);
        }
    }
    Some(rows)
}

/// Thin SVD `A = U diag(s) Vᵀ`, singular values descending.
pub(crate) fn thin_svd(a: &DMatrix<f64>) -> Result<(DMatrix<f64>, Vec<f64>, DMatrix<f64>)> {
    let svd = SVD::new(a.clone(), true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(Error::Singular(ErrorInfo::new(
                "linalg.svd",
                "singular value decomposition did not converge",
            )))
        }
    };
    let s = svd.singular_values;
    let mut order: Vec<usize> = (0..s.len()).collect();
    order.sort_by(|&i, &j| s[j].total_cmp(&s[i]));
    let values: Vec<f64> = order.iter().map(|&i| s[i]).collect();
    let mut u = permute_columns(&u, &order);
    let mut v = permute_columns(&v_t.transpose(), &order);
    for j in normalise_signs(&mut u) {
        v.column_mut(j).neg_mut();
    }
    Ok((u, values, v))
}

/// Forward tangent of a thin SVD of a tall matrix for `dA = E_pq`.
fn svd_tangent(
    u: &DMatrix<f64>,
    s: &[f64],
    v: &DMatrix<f64>,
    p: usize,
    q: usize,
) -> (DMatrix<f64>, Vec<f64>, DMatrix<f64>) {
    let (m, k) = (u.nrows(), s.len());
    let dp = DMatrix::from_fn(k, k, |i, j| u[(p, i)] * v[(q, j)]);
    let f = DMatrix::from_fn(k, k, |i, j| {
        if i == j {
            0.0
        } else {
            1.0 / (s[j] * s[j] - s[i] * s[i])
        }
    });
    let sm = DMatrix::from_diagonal(&nalgebra::DVector::from_column_slice(s));
    let ds = (0..k).map(|i| dp[(i, i)]).collect();

    let left = f.component_mul(&(&dp * &sm + &sm * dp.transpose()));
    let mut du = u * left;
    // (I - U Uᵀ) E_pq V S⁻¹
    let e_p = DMatrix::from_fn(m, 1, |r, _| if r == p { 1.0 } else { 0.0 });
    let proj = &e_p - u * u.row(p).transpose();
    for j in 0..k {
        let coeff = v[(q, j)] / s[j];
        for r in 0..m {
            du[(r, j)] += proj[(r, 0)] * coeff;
        }
    }
    let right = f.component_mul(&(&sm * &dp + dp.transpose() * &sm));
    let dv = v * right;
    (du, ds, dv)
}

/// Jacobian of `[U..., s..., V...]` (row-major blocks) with respect to the
/// row-major entries of the `m × n` matrix.
pub(crate) fn svd_jacobian(
    u: &DMatrix<f64>,
    s: &[f64],
    v: &DMatrix<f64>,
    m: usize,
    n: usize,
) -> Vec<Vec<f64>> {
    let k = s.len();
    let n_out = m * k + k + n * k;
    let mut jac = vec![vec![0.0; m * n]; n_out];
    for p in 0..m {
        for q in 0..n {
            let (du, ds, dv) = if m >= n {
                svd_tangent(u, s, v, p, q)
            } else {
                let (dv, ds, du) = svd_tangent(v, s, u, q, p);
                (du, ds, dv)
            };
            let col = p * n + q;
            let tangent = du
                .row_iter()
                .flat_map(|r| r.iter().copied().collect::<Vec<_>>())
                .chain(ds)
                .chain(dv.row_iter().flat_map(|r| r.iter().copied().collect::<Vec<_>>()));
            for (row, t) in jac.iter_mut().zip(tangent) {
                row[col] = t;
            }
        }
    }
    jac
}

/// `[U..., s..., V...]`.
pub(crate) fn flatten_svd(u: &DMatrix<f64>, s: &[f64], v: &DMatrix<f64>) -> Vec<f64> {
    let mut out = flatten_decomposition(&[], u);
    out.extend_from_slice(s);
    out.extend(flatten_decomposition(&[], v));
    out
}
