//! Arithmetic and elementary functions on records.
//!
//! Every operation goes through [`derive`](crate::derive::derive) with its
//! derivative written out, so combinations across ensembles, replica, and
//! irregular chains follow the same rules as user supplied functions.
//!
//! The operator impls panic if the operands cannot be combined (for example
//! two covariance entries with the same name but different matrices). Call
//! [`derive`](crate::derive::derive) directly to handle that as an error.

use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::derive::derive;
use crate::jacobian::Manual;
use crate::obs::Obs;

fn single(mut out: Vec<Obs>) -> Obs {
    match out.pop() {
        Some(obs) if out.is_empty() => obs,
        _ => unreachable!("elementary operations produce exactly one record"),
    }
}

fn lift1(x: &Obs, f: impl Fn(f64) -> f64, df: f64) -> Obs {
    let provider = Manual::new(|v: &[f64]| vec![f(v[0])], vec![vec![df]]);
    match derive(&provider, &[x]) {
        Ok(out) => single(out),
        Err(err) => panic!("{err}"),
    }
}

fn lift2(a: &Obs, b: &Obs, f: impl Fn(f64, f64) -> f64, da: f64, db: f64) -> Obs {
    let provider = Manual::new(|v: &[f64]| vec![f(v[0], v[1])], vec![vec![da, db]]);
    match derive(&provider, &[a, b]) {
        Ok(out) => single(out),
        Err(err) => panic!("{err}"),
    }
}

fn add(a: &Obs, b: &Obs) -> Obs {
    lift2(a, b, |x, y| x + y, 1.0, 1.0)
}

fn sub(a: &Obs, b: &Obs) -> Obs {
    lift2(a, b, |x, y| x - y, 1.0, -1.0)
}

fn mul(a: &Obs, b: &Obs) -> Obs {
    lift2(a, b, |x, y| x * y, b.value, a.value)
}

fn div(a: &Obs, b: &Obs) -> Obs {
    let inv = 1.0 / b.value;
    lift2(a, b, |x, y| x / y, inv, -a.value * inv * inv)
}

fn add_f(a: &Obs, c: f64) -> Obs {
    lift1(a, |x| x + c, 1.0)
}

fn sub_f(a: &Obs, c: f64) -> Obs {
    lift1(a, |x| x - c, 1.0)
}

fn rsub_f(c: f64, a: &Obs) -> Obs {
    lift1(a, |x| c - x, -1.0)
}

fn mul_f(a: &Obs, c: f64) -> Obs {
    lift1(a, |x| x * c, c)
}

fn div_f(a: &Obs, c: f64) -> Obs {
    lift1(a, |x| x / c, 1.0 / c)
}

fn rdiv_f(c: f64, a: &Obs) -> Obs {
    lift1(a, |x| c / x, -c / (a.value * a.value))
}

macro_rules! binary_ops {
    ($($trait:ident :: $method:ident => $obs_fn:ident, $lhs_f:ident, $rhs_f:expr;)*) => {
        $(
            impl $trait<&Obs> for &Obs {
                type Output = Obs;
                fn $method(self, rhs: &Obs) -> Obs {
                    $obs_fn(self, rhs)
                }
            }

            impl $trait<Obs> for Obs {
                type Output = Obs;
                fn $method(self, rhs: Obs) -> Obs {
                    $obs_fn(&self, &rhs)
                }
            }

            impl $trait<&Obs> for Obs {
                type Output = Obs;
                fn $method(self, rhs: &Obs) -> Obs {
                    $obs_fn(&self, rhs)
                }
            }

            impl $trait<Obs> for &Obs {
                type Output = Obs;
                fn $method(self, rhs: Obs) -> Obs {
                    $obs_fn(self, &rhs)
                }
            }

            impl $trait<f64> for &Obs {
                type Output = Obs;
                fn $method(self, rhs: f64) -> Obs {
                    $lhs_f(self, rhs)
                }
            }

            impl $trait<f64> for Obs {
                type Output = Obs;
                fn $method(self, rhs: f64) -> Obs {
                    $lhs_f(&self, rhs)
                }
            }

            impl $trait<&Obs> for f64 {
                type Output = Obs;
                fn $method(self, rhs: &Obs) -> Obs {
                    ($rhs_f)(self, rhs)
                }
            }

            impl $trait<Obs> for f64 {
                type Output = Obs;
                fn $method(self, rhs: Obs) -> Obs {
                    ($rhs_f)(self, &rhs)
                }
            }
        )*
    };
}

binary_ops! {
    Add::add => add, add_f, |c, a: &Obs| add_f(a, c);
    Sub::sub => sub, sub_f, rsub_f;
    Mul::mul => mul, mul_f, |c, a: &Obs| mul_f(a, c);
    Div::div => div, div_f, rdiv_f;
}

impl Neg for &Obs {
    type Output = Obs;
    fn neg(self) -> Obs {
        lift1(self, |x| -x, -1.0)
    }
}

impl Neg for Obs {
    type Output = Obs;
    fn neg(self) -> Obs {
        -&self
    }
}

// Each entry expands to a method `name(&self) -> Obs` with the derivative
// evaluated at the central value `x`.
macro_rules! elementary {
    ($($(#[$doc:meta])* $name:ident => |$x:ident| $deriv:expr;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(&self) -> Obs {
                let $x = self.value;
                lift1(self, f64::$name, $deriv)
            }
        )*
    };
}

impl Obs {
    elementary! {
        /// `e^x`.
        exp => |x| x.exp();
        /// `2^x`.
        exp2 => |x| x.exp2() * std::f64::consts::LN_2;
        /// `e^x − 1`, accurate near zero.
        exp_m1 => |x| x.exp();
        /// Natural logarithm.
        ln => |x| 1.0 / x;
        /// `ln(1 + x)`, accurate near zero.
        ln_1p => |x| 1.0 / (1.0 + x);
        /// Base-2 logarithm.
        log2 => |x| 1.0 / (x * std::f64::consts::LN_2);
        /// Base-10 logarithm.
        log10 => |x| 1.0 / (x * std::f64::consts::LN_10);
        /// Square root.
        sqrt => |x| 0.5 / x.sqrt();
        /// Cube root.
        cbrt => |x| 1.0 / (3.0 * x.cbrt() * x.cbrt());
        /// Sine.
        sin => |x| x.cos();
        /// Cosine.
        cos => |x| -x.sin();
        /// Tangent.
        tan => |x| 1.0 / (x.cos() * x.cos());
        /// Inverse sine.
        asin => |x| 1.0 / (1.0 - x * x).sqrt();
        /// Inverse cosine.
        acos => |x| -1.0 / (1.0 - x * x).sqrt();
        /// Inverse tangent.
        atan => |x| 1.0 / (1.0 + x * x);
        /// Hyperbolic sine.
        sinh => |x| x.cosh();
        /// Hyperbolic cosine.
        cosh => |x| x.sinh();
        /// Hyperbolic tangent.
        tanh => |x| 1.0 / (x.cosh() * x.cosh());
        /// Inverse hyperbolic sine.
        asinh => |x| 1.0 / (x * x + 1.0).sqrt();
        /// Inverse hyperbolic cosine.
        acosh => |x| 1.0 / (x * x - 1.0).sqrt();
        /// Inverse hyperbolic tangent.
        atanh => |x| 1.0 / (1.0 - x * x);
        /// Absolute value; the derivative at zero is taken as zero.
        abs => |x| if x == 0.0 { 0.0 } else { x.signum() };
    }

    /// Integer power.
    pub fn powi(&self, n: i32) -> Obs {
        let x = self.value;
        let d = if n == 0 { 0.0 } else { n as f64 * x.powi(n - 1) };
        lift1(self, |v| v.powi(n), d)
    }

    /// Real power with a constant exponent.
    pub fn powf(&self, p: f64) -> Obs {
        let x = self.value;
        let d = if p == 0.0 { 0.0 } else { p * x.powf(p - 1.0) };
        lift1(self, |v| v.powf(p), d)
    }

    /// `self ^ exponent` with both operands fluctuating.
    pub fn pow(&self, exponent: &Obs) -> Obs {
        let (x, y) = (self.value, exponent.value);
        let value = x.powf(y);
        lift2(
            self,
            exponent,
            f64::powf,
            y * x.powf(y - 1.0),
            value * x.ln(),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::obs::Obs;

    fn chain(name: &str, samples: &[f64]) -> Obs {
        Obs::new(vec![samples.to_vec()], vec![name]).unwrap()
    }

    #[test]
    fn self_subtraction_vanishes() {
        let a = chain("e", &[1.0, 2.0, 4.0, 3.0]);
        assert!((&a - &a).is_zero());
    }

    #[test]
    fn scalar_ops_shift_value_and_r_values() {
        let a = chain("e", &[1.0, 3.0]);
        let b = 10.0 - &a;
        assert_eq!(b.value(), 8.0);
        assert_eq!(b.r_value("e"), Some(8.0));
        assert_eq!(b.deltas("e"), Some(&[1.0, -1.0][..]));
    }

    #[test]
    fn product_rule_on_deltas() {
        let a = chain("e", &[1.0, 3.0]);
        let b = chain("e", &[2.0, 6.0]);
        let p = &a * &b;
        assert_eq!(p.value(), 8.0);
        // d(ab) = b da + a db = 4 * (-1, 1) + 2 * (-2, 2)
        assert_eq!(p.deltas("e"), Some(&[-8.0, 8.0][..]));
    }

    #[test]
    fn inverse_functions_cancel() {
        let a = chain("e", &[0.3, 0.5, 0.4, 0.6]);
        assert!((&a.exp_m1().ln_1p() - &a).is_zero());
        assert!((&a.exp2().log2() - &a).is_zero());
        assert!((&a.cbrt().powi(3) - &a).is_zero());
        assert!((&a.sin().asin() - &a).is_zero());
    }
}
