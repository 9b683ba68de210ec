//! Correlation functions: a record per time slice.
//!
//! A [`Corr`] holds `T` slots, some of which may be empty (`None`), for
//! instance after an effective mass that is only defined on part of the
//! range. Every operation combines present slots elementwise and leaves a
//! slot empty as soon as one of its inputs is.

use std::ops::{Add, Div, Mul, Neg, Sub};

use log::{debug, warn};
use serde_json::Value;

use crate::error::{Error, ErrorInfo, Result};
use crate::gamma::{estimate, GammaConfig};
use crate::implicit::derive_implicit;
use crate::obs::Obs;

/// Finite difference stencil for [`Corr::deriv`] and [`Corr::second_deriv`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Stencil {
    /// Central difference, `O(a²)`.
    #[default]
    Symmetric,
    Forward,
    Backward,
    /// Five-point central difference, `O(a⁴)`.
    Improved,
}

/// Definition of the effective mass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MassVariant {
    /// `ln(C(t) / C(t+1))`.
    #[default]
    Log,
    /// Solves `C(t) / C(t+1) = cosh(m (t − T/2)) / cosh(m (t + 1 − T/2))`
    /// for a periodic correlator.
    Cosh,
    /// `acosh((C(t−1) + C(t+1)) / 2 C(t))`.
    Arccosh,
}

/// How [`Corr::plateau`] combines the slices in range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlateauMethod {
    /// Plain mean.
    #[default]
    Average,
    /// Mean weighted by `1/σ²`, the uncorrelated fit of a constant.
    Weighted,
}

#[derive(Clone, Debug)]
pub struct Corr {
    content: Vec<Option<Obs>>,
    prange: Option<(usize, usize)>,
    tag: Option<Value>,
}

fn empty_corr() -> Error {
    Error::InvalidInput(ErrorInfo::new(
        "corr.empty",
        "correlator has no time slice with data",
    ))
}

fn slice_missing(op: &str, t: usize) -> Error {
    Error::InvalidInput(
        ErrorInfo::new("corr.missing_slice", "operation needs a time slice that is empty")
            .with_context("op", op)
            .with_context("t", t),
    )
}

/// `ln cosh(x)` without overflow for large `|x|`.
fn ln_cosh(x: f64) -> f64 {
    let a = x.abs();
    a + (-2.0 * a).exp().ln_1p() - std::f64::consts::LN_2
}

/// Mass solving `ln cosh(m a) − ln cosh(m b) = target` by bisection. The
/// left side is monotone in `m` with the sign of `|a| − |b|`.
fn solve_cosh_mass(a: f64, b: f64, target: f64) -> Option<f64> {
    let sign = (a.abs() - b.abs()).signum();
    if a.abs() == b.abs() || sign * target <= 0.0 || !target.is_finite() {
        return None;
    }
    let h = |m: f64| sign * (ln_cosh(m * a) - ln_cosh(m * b) - target);
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    while h(hi) < 0.0 {
        hi *= 2.0;
        if hi > 1e6 {
            return None;
        }
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if h(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= f64::EPSILON * hi {
            break;
        }
    }
    Some(0.5 * (lo + hi))
}

impl Corr {
    /// A correlator with every slice present.
    pub fn new(data: Vec<Obs>) -> Result<Self> {
        Self::from_padded(data.into_iter().map(Some).collect())
    }

    /// A correlator with possibly empty slices.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if no slice holds a record.
    pub fn from_padded(content: Vec<Option<Obs>>) -> Result<Self> {
        if content.iter().all(Option::is_none) {
            return Err(empty_corr());
        }
        Ok(Corr { content, prange: None, tag: None })
    }

    /// Number of time slices.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn get(&self, t: usize) -> Option<&Obs> {
        self.content.get(t).and_then(Option::as_ref)
    }

    pub fn content(&self) -> &[Option<Obs>] {
        &self.content
    }

    /// Central values, `None` for empty slices.
    pub fn values(&self) -> Vec<Option<f64>> {
        self.content.iter().map(|c| c.as_ref().map(Obs::value)).collect()
    }

    pub fn prange(&self) -> Option<(usize, usize)> {
        self.prange
    }

    /// Set the default plateau range, both ends inclusive.
    pub fn set_prange(&mut self, start: usize, end: usize) -> Result<()> {
        if start > end || end >= self.len() {
            return Err(Error::InvalidInput(
                ErrorInfo::new("corr.prange", "plateau range outside the correlator")
                    .with_context("start", start)
                    .with_context("end", end)
                    .with_context("len", self.len()),
            ));
        }
        self.prange = Some((start, end));
        Ok(())
    }

    pub fn tag(&self) -> Option<&Value> {
        self.tag.as_ref()
    }

    pub fn with_tag(mut self, tag: Value) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Estimate the error of every present slice.
    pub fn gamma_method(&mut self, config: &GammaConfig) -> Result<()> {
        for obs in self.content.iter_mut().flatten() {
            obs.gamma_method(config)?;
        }
        Ok(())
    }

    /// Same prange and tag, new content.
    fn derived(&self, content: Vec<Option<Obs>>) -> Result<Corr> {
        let mut out = Corr::from_padded(content)?;
        out.prange = self.prange;
        out.tag = self.tag.clone();
        Ok(out)
    }

    fn map_slices(&self, f: impl Fn(&Obs) -> Obs) -> Corr {
        Corr {
            content: self.content.iter().map(|c| c.as_ref().map(&f)).collect(),
            prange: self.prange,
            tag: self.tag.clone(),
        }
    }

    fn zip_slices(&self, other: &Corr, f: impl Fn(&Obs, &Obs) -> Obs) -> Result<Corr> {
        self.check_len(other, "zip")?;
        let content = self
            .content
            .iter()
            .zip(&other.content)
            .map(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => Some(f(a, b)),
                _ => None,
            })
            .collect();
        self.derived(content)
    }

    fn check_len(&self, other: &Corr, op: &str) -> Result<()> {
        if self.len() == other.len() {
            return Ok(());
        }
        Err(Error::ShapeMismatch(
            ErrorInfo::new("corr.length", "correlators differ in length")
                .with_context("op", op)
                .with_context("left", self.len())
                .with_context("right", other.len()),
        ))
    }

    /// Slot `t` combined from the slots at the given offsets, empty if any
    /// of them is empty or out of range.
    fn stencil(&self, t: usize, offsets: &[isize], f: impl Fn(&[&Obs]) -> Obs) -> Option<Obs> {
        let slots: Option<Vec<&Obs>> = offsets
            .iter()
            .map(|&o| {
                let s = t.checked_add_signed(o)?;
                self.get(s)
            })
            .collect();
        slots.map(|s| f(&s))
    }

    /// Time order reversed, `C'(t) = C(T − 1 − t)`.
    pub fn reverse(&self) -> Corr {
        let mut out = self.clone();
        out.content.reverse();
        out.prange = self.prange.map(|(s, e)| (self.len() - 1 - e, self.len() - 1 - s));
        out
    }

    /// Periodic shift, `C'(t) = C(t − dt mod T)`.
    pub fn roll(&self, dt: isize) -> Corr {
        let mut out = self.clone();
        let n = self.len() as isize;
        if n > 0 {
            let shift = dt.rem_euclid(n) as usize;
            out.content.rotate_right(shift);
        }
        out.prange = None;
        out
    }

    /// Average of forward and backward propagation, `(C(t) + C(T − t)) / 2`
    /// for `t > 0` with `C(0)` kept.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `C(0)` is empty.
    pub fn symmetric(&self) -> Result<Corr> {
        self.reflect("symmetric", 1.0)
    }

    /// `(C(t) − C(T − t)) / 2` for `t > 0` with `C(0)` kept. Warns if `C(0)`
    /// is not compatible with zero.
    pub fn anti_symmetric(&self) -> Result<Corr> {
        if let Some(Ok(summary)) = self.get(0).map(|c0| estimate(c0, &GammaConfig::default())) {
            if summary.value.abs() > 3.0 * summary.dvalue {
                warn!(
                    "correlator does not look anti-symmetric: C(0) = {} +- {}",
                    summary.value, summary.dvalue
                );
            }
        }
        self.reflect("anti_symmetric", -1.0)
    }

    fn reflect(&self, op: &str, parity: f64) -> Result<Corr> {
        let c0 = self.get(0).ok_or_else(|| slice_missing(op, 0))?;
        let n = self.len();
        let mut content = Vec::with_capacity(n);
        content.push(Some(c0.clone()));
        for t in 1..n {
            content.push(match (self.get(t), self.get(n - t)) {
                (Some(a), Some(b)) => Some(0.5 * &(a + &(parity * b))),
                _ => None,
            });
        }
        self.derived(content)
    }

    /// Combine with a time-reversed partner, `(C(t) + p · D(T − t)) / 2`
    /// with parity `p = ±1`.
    pub fn t_symmetry(&self, partner: &Corr, parity: f64) -> Result<Corr> {
        self.check_len(partner, "t_symmetry")?;
        let reflected = partner.reverse().roll(1);
        self.zip_slices(&reflected, |a, b| 0.5 * &(a + &(parity * b)))
    }

    /// First derivative in `t`.
    pub fn deriv(&self, stencil: Stencil) -> Result<Corr> {
        let n = self.len();
        let content = (0..n)
            .map(|t| match stencil {
                Stencil::Symmetric => self.stencil(t, &[1, -1], |c| 0.5 * &(c[0] - c[1])),
                Stencil::Forward => self.stencil(t, &[1, 0], |c| c[0] - c[1]),
                Stencil::Backward => self.stencil(t, &[0, -1], |c| c[0] - c[1]),
                Stencil::Improved => self.stencil(t, &[2, 1, -1, -2], |c| {
                    (1.0 / 12.0) * &(&(&(-c[0]) + &(8.0 * c[1])) - &(&(8.0 * c[2]) - c[3]))
                }),
            })
            .collect();
        self.derived(content)
    }

    /// Second derivative in `t`. Only the symmetric and improved stencils
    /// are defined.
    pub fn second_deriv(&self, stencil: Stencil) -> Result<Corr> {
        let n = self.len();
        let content = match stencil {
            Stencil::Symmetric => (0..n)
                .map(|t| self.stencil(t, &[1, 0, -1], |c| &(c[0] - &(2.0 * c[1])) + c[2]))
                .collect(),
            Stencil::Improved => (0..n)
                .map(|t| {
                    self.stencil(t, &[2, 1, 0, -1, -2], |c| {
                        let inner = &(16.0 * c[1]) - &(30.0 * c[2]);
                        let outer = &(16.0 * c[3]) - &(c[0] + c[4]);
                        (1.0 / 12.0) * &(&inner + &outer)
                    })
                })
                .collect(),
            other => {
                return Err(Error::InvalidInput(
                    ErrorInfo::new("corr.stencil", "stencil not defined for the second derivative")
                        .with_context("stencil", format!("{other:?}")),
                ))
            }
        };
        self.derived(content)
    }

    /// Effective mass. Slices where it is undefined stay empty.
    pub fn m_eff(&self, variant: MassVariant) -> Result<Corr> {
        let n = self.len();
        let mut content = Vec::with_capacity(n);
        for t in 0..n {
            let slot = match variant {
                MassVariant::Log => match (self.get(t), self.get(t + 1)) {
                    (Some(a), Some(b)) if a.value() / b.value() > 0.0 && b.value() != 0.0 => {
                        Some((a / b).ln())
                    }
                    _ => None,
                },
                MassVariant::Cosh => self.cosh_mass(t)?,
                MassVariant::Arccosh => match self.get(t) {
                    Some(c) if c.value() != 0.0 => self
                        .stencil(t, &[-1, 1], |n| &(n[0] + n[1]) / &(2.0 * c))
                        .filter(|r| r.value() >= 1.0)
                        .map(|r| r.acosh()),
                    _ => None,
                },
            };
            content.push(slot);
        }
        debug!(
            "effective mass ({variant:?}) defined on {} of {n} slices",
            content.iter().flatten().count()
        );
        self.derived(content)
    }

    fn cosh_mass(&self, t: usize) -> Result<Option<Obs>> {
        let (Some(c0), Some(c1)) = (self.get(t), self.get(t + 1)) else {
            return Ok(None);
        };
        let half = self.len() as f64 / 2.0;
        let (a, b) = (t as f64 - half, t as f64 + 1.0 - half);
        let ratio = c0.value() / c1.value();
        if ratio <= 0.0 {
            return Ok(None);
        }
        let Some(m) = solve_cosh_mass(a, b, ratio.ln()) else {
            return Ok(None);
        };
        let mut out = derive_implicit(
            |z, d| vec![(z[0] * a).cosh().ln() - (z[0] * b).cosh().ln() - (d[0] / d[1]).ln()],
            &[m],
            &[c0.clone(), c1.clone()],
        )?;
        Ok(out.pop())
    }

    /// Constant extracted from the slices in `range` (both ends inclusive),
    /// or from the stored plateau range.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] without a range, or with an empty slice
    ///   inside it.
    /// - Errors of the Γ-method for [`PlateauMethod::Weighted`].
    pub fn plateau(
        &self,
        range: Option<(usize, usize)>,
        method: PlateauMethod,
        config: &GammaConfig,
    ) -> Result<Obs> {
        let (start, end) = range.or(self.prange).ok_or_else(|| {
            Error::InvalidInput(
                ErrorInfo::new("corr.no_plateau", "no plateau range given or stored")
                    .with_hint("pass a range or call set_prange"),
            )
        })?;
        if start > end || end >= self.len() {
            return Err(Error::InvalidInput(
                ErrorInfo::new("corr.prange", "plateau range outside the correlator")
                    .with_context("start", start)
                    .with_context("end", end)
                    .with_context("len", self.len()),
            ));
        }
        let slices = (start..=end)
            .map(|t| self.get(t).ok_or_else(|| slice_missing("plateau", t)))
            .collect::<Result<Vec<_>>>()?;

        let weights = match method {
            PlateauMethod::Average => vec![1.0; slices.len()],
            PlateauMethod::Weighted => slices
                .iter()
                .map(|s| estimate(s, config).map(|e| e.dvalue.powi(2).recip()))
                .collect::<Result<Vec<_>>>()?,
        };
        let total: f64 = weights.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(Error::InvalidInput(
                ErrorInfo::new("corr.plateau_weights", "plateau weights are not usable")
                    .with_context("sum", total),
            ));
        }
        let mut acc = Obs::constant(0.0);
        for (w, s) in weights.iter().zip(slices) {
            acc = &acc + &((w / total) * s);
        }
        Ok(acc)
    }

    /// Slice by slice sample product with `other`; see [`Obs::correlate`].
    pub fn correlate(&self, other: &Corr) -> Result<Corr> {
        self.check_len(other, "correlate")?;
        let content = self
            .content
            .iter()
            .zip(&other.content)
            .map(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => a.correlate(b).map(Some),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>>>()?;
        self.derived(content)
    }

    /// Every slice correlated with the same record.
    pub fn correlate_obs(&self, other: &Obs) -> Result<Corr> {
        let content = self
            .content
            .iter()
            .map(|c| c.as_ref().map(|a| a.correlate(other)).transpose())
            .collect::<Result<Vec<_>>>()?;
        self.derived(content)
    }
}

// Elementwise operators. Mismatched lengths panic like the record operators;
// use the fallible methods to handle them.
macro_rules! corr_ops {
    ($($trait:ident :: $method:ident;)*) => {
        $(
            impl $trait<&Corr> for &Corr {
                type Output = Corr;
                fn $method(self, rhs: &Corr) -> Corr {
                    match self.zip_slices(rhs, |a, b| a.$method(b)) {
                        Ok(out) => out,
                        Err(err) => panic!("{err}"),
                    }
                }
            }

            impl $trait<f64> for &Corr {
                type Output = Corr;
                fn $method(self, rhs: f64) -> Corr {
                    self.map_slices(|a| a.$method(rhs))
                }
            }

            impl $trait<&Corr> for f64 {
                type Output = Corr;
                fn $method(self, rhs: &Corr) -> Corr {
                    rhs.map_slices(|a| self.$method(a))
                }
            }
        )*
    };
}

corr_ops! {
    Add::add;
    Sub::sub;
    Mul::mul;
    Div::div;
}

impl Neg for &Corr {
    type Output = Corr;
    fn neg(self) -> Corr {
        self.map_slices(|a| -a)
    }
}
