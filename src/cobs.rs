//! Complex records.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::derive::derive;
use crate::error::Result;
use crate::gamma::GammaConfig;
use crate::jacobian::Manual;
use crate::obs::Obs;

/// A complex observable as a pair of real records.
#[derive(Clone, Debug)]
pub struct CObs {
    pub real: Obs,
    pub imag: Obs,
}

impl CObs {
    pub fn new(real: Obs, imag: Obs) -> Self {
        CObs { real, imag }
    }

    /// Purely real value.
    pub fn from_real(real: Obs) -> Self {
        CObs {
            real,
            imag: Obs::constant(0.0),
        }
    }

    pub fn conj(&self) -> CObs {
        CObs {
            real: self.real.clone(),
            imag: -&self.imag,
        }
    }

    /// Modulus `sqrt(re² + im²)`. At the origin the derivative is taken as
    /// zero, like [`Obs::abs`].
    pub fn abs(&self) -> Obs {
        let (re, im) = (self.real.value(), self.imag.value());
        let r = re.hypot(im);
        let grad = if r == 0.0 {
            vec![0.0, 0.0]
        } else {
            vec![re / r, im / r]
        };
        let provider = Manual::new(|x: &[f64]| vec![x[0].hypot(x[1])], vec![grad]);
        match derive(&provider, &[&self.real, &self.imag]) {
            Ok(mut out) => out.remove(0),
            Err(err) => panic!("{err}"),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.real.is_zero() && self.imag.is_zero()
    }

    /// Estimate errors of both parts.
    pub fn gamma_method(&mut self, config: &GammaConfig) -> Result<()> {
        self.real.gamma_method(config)?;
        self.imag.gamma_method(config)?;
        Ok(())
    }
}

impl fmt::Display for CObs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.imag.value() >= 0.0 { "+" } else { "" };
        write!(f, "({}{}{}j)", self.real, sign, self.imag)
    }
}

/// Anything usable as one side of a complex operation.
trait ComplexOperand {
    fn with_parts<R>(&self, k: impl FnOnce([&Obs; 2]) -> R) -> R;
}

impl ComplexOperand for CObs {
    fn with_parts<R>(&self, k: impl FnOnce([&Obs; 2]) -> R) -> R {
        k([&self.real, &self.imag])
    }
}

impl ComplexOperand for Obs {
    fn with_parts<R>(&self, k: impl FnOnce([&Obs; 2]) -> R) -> R {
        let zero = Obs::constant(0.0);
        k([self, &zero])
    }
}

impl ComplexOperand for f64 {
    fn with_parts<R>(&self, k: impl FnOnce([&Obs; 2]) -> R) -> R {
        let re = Obs::constant(*self);
        let zero = Obs::constant(0.0);
        k([&re, &zero])
    }
}

impl<T: ComplexOperand> ComplexOperand for &T {
    fn with_parts<R>(&self, k: impl FnOnce([&Obs; 2]) -> R) -> R {
        (**self).with_parts(k)
    }
}

// Rules take the parts `[a_re, a_im, b_re, b_im]`. `eval` returns `[re, im]`
// and `jac` the 2 × 4 Jacobian at the central values.
struct Rule {
    eval: fn(&[f64]) -> Vec<f64>,
    jac: fn(&[f64]) -> Vec<Vec<f64>>,
}

const ADD: Rule = Rule {
    eval: |x| vec![x[0] + x[2], x[1] + x[3]],
    jac: |_| vec![vec![1.0, 0.0, 1.0, 0.0], vec![0.0, 1.0, 0.0, 1.0]],
};

const SUB: Rule = Rule {
    eval: |x| vec![x[0] - x[2], x[1] - x[3]],
    jac: |_| vec![vec![1.0, 0.0, -1.0, 0.0], vec![0.0, 1.0, 0.0, -1.0]],
};

const MUL: Rule = Rule {
    eval: |x| vec![x[0] * x[2] - x[1] * x[3], x[0] * x[3] + x[1] * x[2]],
    jac: |x| vec![vec![x[2], -x[3], x[0], -x[1]], vec![x[3], x[2], x[1], x[0]]],
};

// δ(a/b) = δa·u − (a/b)·u·δb with u = 1/b. A zero divisor gives non-finite
// fluctuations, as for real division.
const DIV: Rule = Rule {
    eval: |x| {
        let d = x[2] * x[2] + x[3] * x[3];
        vec![
            (x[0] * x[2] + x[1] * x[3]) / d,
            (x[1] * x[2] - x[0] * x[3]) / d,
        ]
    },
    jac: |x| {
        let d = x[2] * x[2] + x[3] * x[3];
        let (ur, ui) = (x[2] / d, -x[3] / d);
        let (qr, qi) = (x[0] * ur - x[1] * ui, x[0] * ui + x[1] * ur);
        let (vr, vi) = (-(qr * ur - qi * ui), -(qr * ui + qi * ur));
        vec![vec![ur, -ui, vr, -vi], vec![ui, ur, vi, vr]]
    },
};

fn apply(lhs: &impl ComplexOperand, rhs: &impl ComplexOperand, rule: Rule) -> CObs {
    lhs.with_parts(|[ar, ai]| {
        rhs.with_parts(|[br, bi]| {
            let centre = [ar.value(), ai.value(), br.value(), bi.value()];
            let provider = Manual::new(rule.eval, (rule.jac)(&centre));
            match derive(&provider, &[ar, ai, br, bi]) {
                Ok(mut out) => {
                    let imag = out.pop();
                    let real = out.pop();
                    match (real, imag) {
                        (Some(real), Some(imag)) => CObs { real, imag },
                        _ => unreachable!("complex rules return two parts"),
                    }
                }
                Err(err) => panic!("{err}"),
            }
        })
    })
}

macro_rules! complex_ops {
    (@pairs $trait:ident, $method:ident, $rule:ident; $(($lhs:ty, $rhs:ty)),*) => {
        $(
            impl $trait<$rhs> for $lhs {
                type Output = CObs;
                fn $method(self, rhs: $rhs) -> CObs {
                    apply(&self, &rhs, $rule)
                }
            }
        )*
    };
    ($($trait:ident :: $method:ident => $rule:ident),*) => {
        $(
            complex_ops!(@pairs $trait, $method, $rule;
                (CObs, CObs), (CObs, &CObs), (&CObs, CObs), (&CObs, &CObs),
                (CObs, Obs), (CObs, &Obs), (&CObs, Obs), (&CObs, &Obs),
                (CObs, f64), (&CObs, f64),
                (Obs, CObs), (Obs, &CObs), (&Obs, CObs), (&Obs, &CObs),
                (f64, CObs), (f64, &CObs)
            );
        )*
    };
}

complex_ops!(
    Add::add => ADD,
    Sub::sub => SUB,
    Mul::mul => MUL,
    Div::div => DIV
);

impl Neg for &CObs {
    type Output = CObs;
    fn neg(self) -> CObs {
        CObs {
            real: -&self.real,
            imag: -&self.imag,
        }
    }
}

impl Neg for CObs {
    type Output = CObs;
    fn neg(self) -> CObs {
        -&self
    }
}
