//! The [`Scalar`] trait for code that runs on plain values and on duals.
//!
//! The matrix kernels in [`linalg`](crate::linalg) are written as
//! `fn f<T: Scalar>(..)` over nalgebra matrices, so the same routine produces
//! values (with `f64`) and exact directional derivatives (with
//! [`Dual64`](crate::Dual64)).

use std::fmt::Display;
use std::ops::{Add, Div, Mul, Sub};

use nalgebra::RealField;

use crate::dual::Dual;

/// Real field element shared by `f64` and `Dual<f64>`.
pub trait Scalar:
    RealField
    + Copy
    + Default
    + Display
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
{
    /// Lift a plain value (constant, zero derivative).
    fn from_f(val: f64) -> Self;

    /// Extract the primal value.
    fn value(&self) -> f64;
}

impl Scalar for f64 {
    #[inline]
    fn from_f(val: f64) -> Self {
        val
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }
}

impl Scalar for Dual<f64> {
    #[inline]
    fn from_f(val: f64) -> Self {
        Dual::constant(val)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.re
    }
}
