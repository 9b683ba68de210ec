//! Matrices of records and the operand set accepted by the adapters.

use std::ops::Index;

use nalgebra::DMatrix;

use crate::cobs::CObs;
use crate::error::{Error, ErrorInfo, Result};
use crate::gamma::GammaConfig;
use crate::jacobian::NumDiffConfig;
use crate::obs::Obs;

/// Row-major matrix of real records.
#[derive(Clone, Debug)]
pub struct ObsMatrix {
    nrows: usize,
    ncols: usize,
    data: Vec<Obs>,
}

impl ObsMatrix {
    pub fn new(nrows: usize, ncols: usize, data: Vec<Obs>) -> Result<Self> {
        check_len(nrows, ncols, data.len())?;
        Ok(ObsMatrix { nrows, ncols, data })
    }

    pub fn from_rows(rows: Vec<Vec<Obs>>) -> Result<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|r| r.len() != ncols) {
            return Err(Error::ShapeMismatch(
                ErrorInfo::new("linalg.ragged", "rows have different lengths")
                    .with_context("row", bad)
                    .with_context("expected", ncols),
            ));
        }
        Ok(ObsMatrix {
            nrows,
            ncols,
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&Obs> {
        if i < self.nrows && j < self.ncols {
            self.data.get(i * self.ncols + j)
        } else {
            None
        }
    }

    /// Central values.
    pub fn values(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.nrows, self.ncols, |i, j| self[(i, j)].value())
    }

    pub fn transpose(&self) -> ObsMatrix {
        let mut data = Vec::with_capacity(self.data.len());
        for j in 0..self.ncols {
            for i in 0..self.nrows {
                data.push(self[(i, j)].clone());
            }
        }
        ObsMatrix {
            nrows: self.ncols,
            ncols: self.nrows,
            data,
        }
    }

    pub fn as_slice(&self) -> &[Obs] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = &Obs> {
        self.data.iter()
    }

    pub fn into_vec(self) -> Vec<Obs> {
        self.data
    }

    pub fn gamma_method(&mut self, config: &GammaConfig) -> Result<()> {
        for o in &mut self.data {
            o.gamma_method(config)?;
        }
        Ok(())
    }
}

impl Index<(usize, usize)> for ObsMatrix {
    type Output = Obs;
    fn index(&self, (i, j): (usize, usize)) -> &Obs {
        &self.data[i * self.ncols + j]
    }
}

/// Row-major matrix of complex records.
#[derive(Clone, Debug)]
pub struct CObsMatrix {
    nrows: usize,
    ncols: usize,
    data: Vec<CObs>,
}

impl CObsMatrix {
    pub fn new(nrows: usize, ncols: usize, data: Vec<CObs>) -> Result<Self> {
        check_len(nrows, ncols, data.len())?;
        Ok(CObsMatrix { nrows, ncols, data })
    }

    /// Pair two real matrices of equal shape.
    pub fn from_parts(real: ObsMatrix, imag: ObsMatrix) -> Result<Self> {
        if real.shape() != imag.shape() {
            return Err(Error::ShapeMismatch(
                ErrorInfo::new("linalg.parts_shape", "real and imaginary parts differ in shape")
                    .with_context("real", format!("{:?}", real.shape()))
                    .with_context("imag", format!("{:?}", imag.shape())),
            ));
        }
        let (nrows, ncols) = real.shape();
        let data = real
            .into_vec()
            .into_iter()
            .zip(imag.into_vec())
            .map(|(re, im)| CObs::new(re, im))
            .collect();
        Ok(CObsMatrix { nrows, ncols, data })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&CObs> {
        if i < self.nrows && j < self.ncols {
            self.data.get(i * self.ncols + j)
        } else {
            None
        }
    }

    pub fn real(&self) -> ObsMatrix {
        ObsMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            data: self.data.iter().map(|z| z.real.clone()).collect(),
        }
    }

    pub fn imag(&self) -> ObsMatrix {
        ObsMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            data: self.data.iter().map(|z| z.imag.clone()).collect(),
        }
    }

    pub fn as_slice(&self) -> &[CObs] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<CObs> {
        self.data
    }

    pub fn gamma_method(&mut self, config: &GammaConfig) -> Result<()> {
        for z in &mut self.data {
            z.gamma_method(config)?;
        }
        Ok(())
    }
}

impl Index<(usize, usize)> for CObsMatrix {
    type Output = CObs;
    fn index(&self, (i, j): (usize, usize)) -> &CObs {
        &self.data[i * self.ncols + j]
    }
}

fn check_len(nrows: usize, ncols: usize, len: usize) -> Result<()> {
    if nrows * ncols == len {
        return Ok(());
    }
    Err(Error::ShapeMismatch(
        ErrorInfo::new("linalg.shape", "element count does not match the shape")
            .with_context("rows", nrows)
            .with_context("cols", ncols)
            .with_context("elements", len),
    ))
}

/// Anything a matrix adapter accepts.
#[derive(Clone, Debug)]
pub enum Operand {
    Scalar(Obs),
    Complex(CObs),
    Array(ObsMatrix),
    ComplexArray(CObsMatrix),
}

impl Operand {
    pub fn kind(&self) -> &'static str {
        match self {
            Operand::Scalar(_) => "scalar",
            Operand::Complex(_) => "complex scalar",
            Operand::Array(_) => "real matrix",
            Operand::ComplexArray(_) => "complex matrix",
        }
    }

    pub fn as_array(&self) -> Option<&ObsMatrix> {
        match self {
            Operand::Array(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_complex_array(&self) -> Option<&CObsMatrix> {
        match self {
            Operand::ComplexArray(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<ObsMatrix> {
        match self {
            Operand::Array(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_complex_array(self) -> Option<CObsMatrix> {
        match self {
            Operand::ComplexArray(m) => Some(m),
            _ => None,
        }
    }
}

impl From<Obs> for Operand {
    fn from(o: Obs) -> Self {
        Operand::Scalar(o)
    }
}

impl From<CObs> for Operand {
    fn from(z: CObs) -> Self {
        Operand::Complex(z)
    }
}

impl From<ObsMatrix> for Operand {
    fn from(m: ObsMatrix) -> Self {
        Operand::Array(m)
    }
}

impl From<CObsMatrix> for Operand {
    fn from(m: CObsMatrix) -> Self {
        Operand::ComplexArray(m)
    }
}

/// How an adapter obtains its Jacobian.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Differentiation {
    /// Dual numbers through nalgebra factorisations, analytic rules for the
    /// decompositions.
    #[default]
    Automatic,
    /// Finite differences of the plain `f64` routine.
    Numerical(NumDiffConfig),
}
