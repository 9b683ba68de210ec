//! Forward-mode dual numbers.
//!
//! A [`Dual`] carries a primal value and one tangent. Functions handed to the
//! [`Automatic`](crate::jacobian::Automatic) Jacobian provider are evaluated on
//! duals, one seeded input at a time, which yields exact first derivatives.

use std::fmt::{self, Display};

use crate::Float;

/// A value paired with its tangent: `re + eps·ε` with `ε² = 0`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Dual<F: Float> {
    /// Primal value.
    pub re: F,
    /// Tangent.
    pub eps: F,
}

impl<F: Float> Display for Dual<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}ε", self.re, self.eps)
    }
}

// Each entry expands to `fn name(self) -> Self` applying the chain rule with
// the derivative expression evaluated at `x = self.re`.
macro_rules! smooth_unary {
    ($($(#[$doc:meta])* $name:ident => |$x:ident| $deriv:expr;)*) => {
        $(
            $(#[$doc])*
            #[inline]
            pub fn $name(self) -> Self {
                let $x = self.re;
                self.chain($x.$name(), $deriv)
            }
        )*
    };
}

impl<F: Float> Dual<F> {
    /// A dual with an explicit tangent.
    #[inline]
    pub fn new(re: F, eps: F) -> Self {
        Dual { re, eps }
    }

    /// A constant: zero tangent.
    #[inline]
    pub fn constant(re: F) -> Self {
        Dual { re, eps: F::zero() }
    }

    /// The seeded input of a forward sweep: unit tangent.
    #[inline]
    pub fn variable(re: F) -> Self {
        Dual { re, eps: F::one() }
    }

    #[inline]
    fn chain(self, value: F, deriv: F) -> Self {
        Dual {
            re: value,
            eps: self.eps * deriv,
        }
    }

    #[inline]
    fn two() -> F {
        F::one() + F::one()
    }

    smooth_unary! {
        /// `1/x`.
        recip => |x| -(x * x).recip();
        /// Square root.
        sqrt => |x| (Self::two() * x.sqrt()).recip();
        /// Cube root.
        cbrt => |x| (F::from_f64(3.0).unwrap_or_else(F::one) * x.cbrt() * x.cbrt()).recip();
        exp => |x| x.exp();
        exp2 => |x| x.exp2() * F::LN_2();
        exp_m1 => |x| x.exp();
        /// Natural logarithm.
        ln => |x| x.recip();
        ln_1p => |x| (F::one() + x).recip();
        log10 => |x| (x * F::LN_10()).recip();
        log2 => |x| (x * F::LN_2()).recip();
        sin => |x| x.cos();
        cos => |x| -x.sin();
        tan => |x| (x.cos() * x.cos()).recip();
        asin => |x| (F::one() - x * x).sqrt().recip();
        acos => |x| -(F::one() - x * x).sqrt().recip();
        atan => |x| (F::one() + x * x).recip();
        sinh => |x| x.cosh();
        cosh => |x| x.sinh();
        tanh => |x| (x.cosh() * x.cosh()).recip();
        asinh => |x| (x * x + F::one()).sqrt().recip();
        acosh => |x| (x * x - F::one()).sqrt().recip();
        atanh => |x| (F::one() - x * x).recip();
        /// Absolute value, with zero tangent at zero.
        abs => |x| if x == F::zero() { F::zero() } else { x.signum() };
    }

    /// `(sin x, cos x)` in one evaluation.
    #[inline]
    pub fn sin_cos(self) -> (Self, Self) {
        let (s, c) = self.re.sin_cos();
        (self.chain(s, c), self.chain(c, -s))
    }

    /// Logarithm to a dual base.
    #[inline]
    pub fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }

    #[inline]
    pub fn floor(self) -> Self {
        Dual::constant(self.re.floor())
    }

    #[inline]
    pub fn ceil(self) -> Self {
        Dual::constant(self.re.ceil())
    }

    #[inline]
    pub fn round(self) -> Self {
        Dual::constant(self.re.round())
    }

    #[inline]
    pub fn trunc(self) -> Self {
        Dual::constant(self.re.trunc())
    }

    /// Fractional part; its slope is one away from the integers.
    #[inline]
    pub fn fract(self) -> Self {
        Dual::new(self.re.fract(), self.eps)
    }

    /// `self * a + b` with a single rounding in the primal.
    #[inline]
    pub fn mul_add(self, a: Self, b: Self) -> Self {
        Dual::new(
            self.re.mul_add(a.re, b.re),
            self.eps * a.re + self.re * a.eps + b.eps,
        )
    }

    /// Integer power.
    #[inline]
    pub fn powi(self, n: i32) -> Self {
        let deriv = if n == 0 {
            F::zero()
        } else {
            F::from_i32(n).unwrap_or_else(F::zero) * self.re.powi(n - 1)
        };
        self.chain(self.re.powi(n), deriv)
    }

    /// Power with a dual exponent, `x^y`.
    #[inline]
    pub fn powf(self, y: Self) -> Self {
        let value = self.re.powf(y.re);
        let dx = if self.eps == F::zero() {
            F::zero()
        } else {
            y.re * self.re.powf(y.re - F::one()) * self.eps
        };
        let dy = if y.eps == F::zero() {
            F::zero()
        } else {
            value * self.re.ln() * y.eps
        };
        Dual { re: value, eps: dx + dy }
    }

    /// `atan2(self, other)`.
    #[inline]
    pub fn atan2(self, other: Self) -> Self {
        let denom = self.re * self.re + other.re * other.re;
        Dual {
            re: self.re.atan2(other.re),
            eps: (other.re * self.eps - self.re * other.eps) / denom,
        }
    }

    /// `sqrt(self² + other²)`.
    #[inline]
    pub fn hypot(self, other: Self) -> Self {
        let h = self.re.hypot(other.re);
        Dual {
            re: h,
            eps: (self.re * self.eps + other.re * other.eps) / h,
        }
    }

    #[inline]
    pub fn signum(self) -> Self {
        Dual::constant(self.re.signum())
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        if self.re >= other.re {
            self
        } else {
            other
        }
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        if self.re <= other.re {
            self
        } else {
            other
        }
    }

    /// True if both parts are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.re.is_finite() && self.eps.is_finite()
    }
}
