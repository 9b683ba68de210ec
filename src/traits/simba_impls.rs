//! simba scalar traits for `Dual<f64>`, so nalgebra's decompositions run on
//! duals and return exact directional derivatives.

use approx::{AbsDiffEq, RelativeEq, UlpsEq};
use num_traits::{FloatConst, Zero};
use simba::scalar::{ComplexField, Field, RealField, SubsetOf};
use simba::simd::{PrimitiveSimdValue, SimdValue};

use crate::dual::Dual;
use crate::float::Float;

// A dual is a single lane.
impl<F: Float> SimdValue for Dual<F> {
    const LANES: usize = 1;
    type Element = Self;
    type SimdBool = bool;

    #[inline]
    fn splat(val: Self::Element) -> Self {
        val
    }

    #[inline]
    fn extract(&self, _: usize) -> Self::Element {
        *self
    }

    #[inline]
    unsafe fn extract_unchecked(&self, _: usize) -> Self::Element {
        *self
    }

    #[inline]
    fn replace(&mut self, _: usize, val: Self::Element) {
        *self = val;
    }

    #[inline]
    unsafe fn replace_unchecked(&mut self, _: usize, val: Self::Element) {
        *self = val;
    }

    #[inline]
    fn select(self, cond: Self::SimdBool, other: Self) -> Self {
        if cond {
            self
        } else {
            other
        }
    }
}

impl<F: Float> PrimitiveSimdValue for Dual<F> {}

impl<F: Float> Field for Dual<F> {}

impl<F: Float> SubsetOf<Dual<F>> for Dual<F> {
    #[inline]
    fn to_superset(&self) -> Dual<F> {
        *self
    }

    #[inline]
    fn from_superset_unchecked(element: &Dual<F>) -> Self {
        *element
    }

    #[inline]
    fn is_in_subset(_: &Dual<F>) -> bool {
        true
    }
}

// Plain values embed as constants; a dual with a tangent is not a plain value.
impl SubsetOf<Dual<f64>> for f64 {
    #[inline]
    fn to_superset(&self) -> Dual<f64> {
        Dual::constant(*self)
    }

    #[inline]
    fn from_superset_unchecked(element: &Dual<f64>) -> Self {
        element.re
    }

    #[inline]
    fn is_in_subset(element: &Dual<f64>) -> bool {
        element.eps == 0.0
    }
}

// Required by simba's `ComplexField: SupersetOf<f32>` bound.
impl SubsetOf<Dual<f64>> for f32 {
    #[inline]
    fn to_superset(&self) -> Dual<f64> {
        Dual::constant(*self as f64)
    }

    #[inline]
    fn from_superset_unchecked(element: &Dual<f64>) -> Self {
        element.re as f32
    }

    #[inline]
    fn is_in_subset(element: &Dual<f64>) -> bool {
        element.eps == 0.0
    }
}

// Tolerance comparisons look at the primal only, like `PartialEq`.

impl<F: Float + AbsDiffEq<Epsilon = F>> AbsDiffEq for Dual<F> {
    type Epsilon = Self;

    #[inline]
    fn default_epsilon() -> Self {
        Dual::constant(F::default_epsilon())
    }

    #[inline]
    fn abs_diff_eq(&self, other: &Self, epsilon: Self) -> bool {
        self.re.abs_diff_eq(&other.re, epsilon.re)
    }
}

impl<F: Float + RelativeEq<Epsilon = F>> RelativeEq for Dual<F> {
    #[inline]
    fn default_max_relative() -> Self {
        Dual::constant(F::default_max_relative())
    }

    #[inline]
    fn relative_eq(&self, other: &Self, epsilon: Self, max_relative: Self) -> bool {
        self.re.relative_eq(&other.re, epsilon.re, max_relative.re)
    }
}

impl<F: Float + UlpsEq<Epsilon = F>> UlpsEq for Dual<F> {
    #[inline]
    fn default_max_ulps() -> u32 {
        F::default_max_ulps()
    }

    #[inline]
    fn ulps_eq(&self, other: &Self, epsilon: Self, max_ulps: u32) -> bool {
        self.re.ulps_eq(&other.re, epsilon.re, max_ulps)
    }
}

// Forwards each listed method to the inherent `Dual` method of the same name.
macro_rules! forward_unary {
    ($($name:ident),* $(,)?) => {
        $(
            #[inline]
            fn $name(self) -> Self {
                Dual::$name(self)
            }
        )*
    };
}

impl ComplexField for Dual<f64> {
    type RealField = Self;

    #[inline]
    fn from_real(re: Self::RealField) -> Self {
        re
    }

    #[inline]
    fn real(self) -> Self::RealField {
        self
    }

    #[inline]
    fn imaginary(self) -> Self::RealField {
        Self::zero()
    }

    #[inline]
    fn modulus(self) -> Self::RealField {
        Dual::abs(self)
    }

    #[inline]
    fn modulus_squared(self) -> Self::RealField {
        self * self
    }

    #[inline]
    fn argument(self) -> Self::RealField {
        if self.re >= 0.0 {
            Self::zero()
        } else {
            Self::pi()
        }
    }

    #[inline]
    fn norm1(self) -> Self::RealField {
        Dual::abs(self)
    }

    #[inline]
    fn scale(self, factor: Self::RealField) -> Self {
        self * factor
    }

    #[inline]
    fn unscale(self, factor: Self::RealField) -> Self {
        self / factor
    }

    #[inline]
    fn abs(self) -> Self::RealField {
        Dual::abs(self)
    }

    #[inline]
    fn hypot(self, other: Self) -> Self::RealField {
        Dual::hypot(self, other)
    }

    #[inline]
    fn conjugate(self) -> Self {
        self
    }

    #[inline]
    fn mul_add(self, a: Self, b: Self) -> Self {
        Dual::mul_add(self, a, b)
    }

    #[inline]
    fn sin_cos(self) -> (Self, Self) {
        Dual::sin_cos(self)
    }

    #[inline]
    fn log(self, base: Self::RealField) -> Self {
        Dual::log(self, base)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        Dual::powi(self, n)
    }

    #[inline]
    fn powf(self, n: Self::RealField) -> Self {
        Dual::powf(self, n)
    }

    #[inline]
    fn powc(self, n: Self) -> Self {
        Dual::powf(self, n)
    }

    #[inline]
    fn is_finite(&self) -> bool {
        self.re.is_finite()
    }

    #[inline]
    fn try_sqrt(self) -> Option<Self> {
        (self.re >= 0.0).then(|| Dual::sqrt(self))
    }

    forward_unary!(
        floor, ceil, round, trunc, fract, recip, sin, cos, tan, asin, acos, atan, sinh, cosh,
        tanh, asinh, acosh, atanh, log2, log10, ln, ln_1p, sqrt, exp, exp2, exp_m1, cbrt,
    );
}

macro_rules! constants {
    ($($name:ident => $value:ident),* $(,)?) => {
        $(
            #[inline]
            fn $name() -> Self {
                Dual::constant(f64::$value())
            }
        )*
    };
}

impl RealField for Dual<f64> {
    #[inline]
    fn is_sign_positive(&self) -> bool {
        self.re.is_sign_positive()
    }

    #[inline]
    fn is_sign_negative(&self) -> bool {
        self.re.is_sign_negative()
    }

    #[inline]
    fn copysign(self, sign: Self) -> Self {
        Dual::abs(self) * Dual::signum(sign)
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        Dual::max(self, other)
    }

    #[inline]
    fn min(self, other: Self) -> Self {
        Dual::min(self, other)
    }

    #[inline]
    fn clamp(self, min: Self, max: Self) -> Self {
        Dual::max(Dual::min(self, max), min)
    }

    #[inline]
    fn atan2(self, other: Self) -> Self {
        Dual::atan2(self, other)
    }

    #[inline]
    fn min_value() -> Option<Self> {
        Some(Dual::constant(f64::MIN))
    }

    #[inline]
    fn max_value() -> Option<Self> {
        Some(Dual::constant(f64::MAX))
    }

    constants!(
        pi => PI,
        two_pi => TAU,
        frac_pi_2 => FRAC_PI_2,
        frac_pi_3 => FRAC_PI_3,
        frac_pi_4 => FRAC_PI_4,
        frac_pi_6 => FRAC_PI_6,
        frac_pi_8 => FRAC_PI_8,
        frac_1_pi => FRAC_1_PI,
        frac_2_pi => FRAC_2_PI,
        frac_2_sqrt_pi => FRAC_2_SQRT_PI,
        e => E,
        log2_e => LOG2_E,
        log10_e => LOG10_E,
        ln_2 => LN_2,
        ln_10 => LN_10,
    );
}
