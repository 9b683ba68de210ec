//! Auxiliary covariance entries.
//!
//! Some inputs enter an analysis not as Monte Carlo samples but as external
//! estimates with a known covariance (renormalisation constants, lattice
//! spacings). A [`Covobs`] attaches such a covariance to a record through a
//! gradient: the record's error contribution is `gradᵀ Σ grad`.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::error::{Error, ErrorInfo, Result};

const SYMMETRY_TOL: f64 = 1e-12;
const PSD_TOL: f64 = 1e-14;

/// A named covariance matrix shared by every record derived from it, plus
/// this record's gradient with respect to its entries.
#[derive(Clone, Debug)]
pub struct Covobs {
    name: String,
    cov: Arc<DMatrix<f64>>,
    grad: DVector<f64>,
}

impl Covobs {
    /// Entry `pos` of a validated covariance: the gradient is the unit vector
    /// `e_pos`.
    pub fn new(name: impl Into<String>, cov: DMatrix<f64>, pos: usize) -> Result<Self> {
        let cov = Arc::new(validate_cov(cov)?);
        let dim = cov.nrows();
        if pos >= dim {
            return Err(Error::ShapeMismatch(
                ErrorInfo::new("covobs.position", "position outside the covariance matrix")
                    .with_context("pos", pos)
                    .with_context("dim", dim),
            ));
        }
        let mut grad = DVector::zeros(dim);
        grad[pos] = 1.0;
        Ok(Covobs {
            name: name.into(),
            cov,
            grad,
        })
    }

    /// An entry on an already shared matrix with an explicit gradient.
    pub fn with_gradient(
        name: impl Into<String>,
        cov: Arc<DMatrix<f64>>,
        grad: DVector<f64>,
    ) -> Result<Self> {
        if grad.len() != cov.nrows() {
            return Err(Error::ShapeMismatch(
                ErrorInfo::new("covobs.gradient", "gradient length differs from covariance size")
                    .with_context("grad", grad.len())
                    .with_context("dim", cov.nrows()),
            ));
        }
        Ok(Covobs {
            name: name.into(),
            cov,
            grad,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cov(&self) -> &DMatrix<f64> {
        &self.cov
    }

    pub(crate) fn shared_cov(&self) -> &Arc<DMatrix<f64>> {
        &self.cov
    }

    pub fn grad(&self) -> &DVector<f64> {
        &self.grad
    }

    pub fn dim(&self) -> usize {
        self.grad.len()
    }

    /// `gradᵀ Σ grad`.
    pub fn errsq(&self) -> f64 {
        (&*self.cov * &self.grad).dot(&self.grad)
    }

    /// True if both entries refer to the same covariance matrix.
    pub fn same_matrix(&self, other: &Covobs) -> bool {
        Arc::ptr_eq(&self.cov, &other.cov) || *self.cov == *other.cov
    }

    /// Same matrix, new gradient.
    pub(crate) fn regrad(&self, grad: DVector<f64>) -> Covobs {
        Covobs {
            name: self.name.clone(),
            cov: Arc::clone(&self.cov),
            grad,
        }
    }
}

/// Check symmetry and positive semi-definiteness.
pub(crate) fn validate_cov(cov: DMatrix<f64>) -> Result<DMatrix<f64>> {
    if !cov.is_square() || cov.nrows() == 0 {
        return Err(Error::ShapeMismatch(
            ErrorInfo::new("covobs.not_square", "covariance must be a non-empty square matrix")
                .with_context("rows", cov.nrows())
                .with_context("cols", cov.ncols()),
        ));
    }
    if cov.iter().any(|x| !x.is_finite()) {
        return Err(Error::InvalidInput(ErrorInfo::new(
            "covobs.non_finite",
            "covariance contains non-finite entries",
        )));
    }
    let scale = cov.amax().max(f64::MIN_POSITIVE);
    let asym = (&cov - cov.transpose()).amax();
    if asym > SYMMETRY_TOL * scale {
        return Err(Error::InvalidInput(
            ErrorInfo::new("covobs.asymmetric", "covariance matrix is not symmetric")
                .with_context("max_asymmetry", asym),
        ));
    }
    let eig = SymmetricEigen::new(cov.clone());
    let min = eig.eigenvalues.min();
    if min < -PSD_TOL * scale * cov.nrows() as f64 {
        return Err(Error::InvalidInput(
            ErrorInfo::new(
                "covobs.not_psd",
                "covariance matrix is not positive semi-definite",
            )
            .with_context("min_eigenvalue", min),
        ));
    }
    Ok(cov)
}
