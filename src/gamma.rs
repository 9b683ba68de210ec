//! Γ-method error estimation.
//!
//! Per ensemble, the autocorrelation function of the fluctuations is summed
//! up to a window chosen by the automatic windowing procedure of
//! hep-lat/0306017, optionally completed by an exponential tail for slow
//! modes (arXiv:1009.5228). Ensembles and covariance entries are independent
//! sources, so their variances add.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorInfo, Result};
use crate::obs::Obs;

/// Below this `|Γ(0)|` an ensemble is treated as fluctuation free.
const GAMMA_ZERO: f64 = 10.0 * f64::MIN_POSITIVE;

/// What to report when the automatic window search finds no window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFallback {
    /// The `S = 0` result: no autocorrelation correction.
    #[default]
    Unwindowed,
    /// The largest window examined, `W_max − 1`.
    LastWindow,
}

/// Per-ensemble parameters; unset fields take the global value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleOverride {
    pub s: Option<f64>,
    pub tau_exp: Option<f64>,
    pub n_sigma: Option<f64>,
}

/// Parameters of the Γ-method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GammaConfig {
    /// Signal-to-noise parameter of the automatic window (default: 2.0).
    /// Zero disables the autocorrelation correction.
    pub s: f64,
    /// Exponential autocorrelation time of the slowest mode (default: 0, off).
    pub tau_exp: f64,
    /// Significance at which ρ is truncated in tail mode (default: 1.0).
    pub n_sigma: f64,
    /// Result used when the window search does not converge.
    pub fallback: WindowFallback,
    /// Per-ensemble values, which take precedence over the fields above.
    pub overrides: BTreeMap<String, EnsembleOverride>,
}

impl Default for GammaConfig {
    fn default() -> Self {
        GammaConfig {
            s: 2.0,
            tau_exp: 0.0,
            n_sigma: 1.0,
            fallback: WindowFallback::Unwindowed,
            overrides: BTreeMap::new(),
        }
    }
}

impl GammaConfig {
    pub fn with_s(mut self, s: f64) -> Self {
        self.s = s;
        self
    }

    pub fn with_tau_exp(mut self, tau_exp: f64) -> Self {
        self.tau_exp = tau_exp;
        self
    }

    pub fn with_fallback(mut self, fallback: WindowFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_override(mut self, ensemble: impl Into<String>, o: EnsembleOverride) -> Self {
        self.overrides.insert(ensemble.into(), o);
        self
    }

    /// The window mode in effect for `ensemble`.
    pub fn mode_for(&self, ensemble: &str) -> WindowMode {
        let o = self.overrides.get(ensemble);
        let s = o.and_then(|o| o.s).unwrap_or(self.s);
        let tau_exp = o.and_then(|o| o.tau_exp).unwrap_or(self.tau_exp);
        let n_sigma = o.and_then(|o| o.n_sigma).unwrap_or(self.n_sigma);
        if tau_exp > 0.0 {
            WindowMode::ExponentialTail { tau_exp, n_sigma }
        } else if s == 0.0 {
            WindowMode::Unwindowed
        } else {
            WindowMode::Automatic { s }
        }
    }

    fn validate(&self) -> Result<()> {
        let globals = std::iter::once((None, Some(self.s), Some(self.tau_exp), Some(self.n_sigma)));
        let per_ensemble = self
            .overrides
            .iter()
            .map(|(e, o)| (Some(e.as_str()), o.s, o.tau_exp, o.n_sigma));
        for (ensemble, s, tau_exp, n_sigma) in globals.chain(per_ensemble) {
            let bad = s.map_or(false, |s| !(s >= 0.0) || !s.is_finite())
                || tau_exp.map_or(false, |t| !(t >= 0.0) || !t.is_finite())
                || n_sigma.map_or(false, |n| !(n > 0.0) || !n.is_finite());
            if bad {
                return Err(Error::InvalidInput(
                    ErrorInfo::new(
                        "gamma.parameters",
                        "S and tau_exp must be non-negative and N_sigma positive",
                    )
                    .with_context("ensemble", ensemble.unwrap_or("<global>")),
                ));
            }
        }
        Ok(())
    }
}

/// How the summation window of one ensemble was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum WindowMode {
    /// `S = 0`: no autocorrelation correction.
    Unwindowed,
    /// Automatic windowing with parameter `S`.
    Automatic { s: f64 },
    /// Truncated sum plus exponential tail.
    ExponentialTail { tau_exp: f64, n_sigma: f64 },
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowMode::Unwindowed => write!(f, "S = 0.00"),
            WindowMode::Automatic { s } => write!(f, "S = {s:.2}"),
            WindowMode::ExponentialTail { tau_exp, n_sigma } => {
                write!(f, "tau_exp = {tau_exp:.2},  N_sigma = {n_sigma:.0}")
            }
        }
    }
}

/// Autocorrelation analysis of one ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleAnalysis {
    pub mode: WindowMode,
    /// Total configurations over all replica.
    pub n: usize,
    pub dvalue: f64,
    pub ddvalue: f64,
    pub tauint: f64,
    pub dtauint: f64,
    /// Chosen summation window.
    pub window: usize,
    /// Normalised autocorrelation function `ρ(t)`, `t < W_max`.
    pub rho: Vec<f64>,
    /// Error of `ρ(t)`, evaluated up to the lags the window choice needed.
    pub drho: Vec<f64>,
    /// `τ_int(W)` for every window.
    pub n_tauint: Vec<f64>,
    /// Naive error of `τ_int(W)`.
    pub n_dtauint: Vec<f64>,
    /// The window search did not converge and `fallback` was used.
    pub degraded: bool,
}

/// Result of an error estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub value: f64,
    pub dvalue: f64,
    pub ddvalue: f64,
    pub ensembles: BTreeMap<String, EnsembleAnalysis>,
    /// Error contribution `sqrt(gradᵀ Σ grad)` per covariance entry.
    pub covobs: BTreeMap<String, f64>,
    /// Any ensemble fell back to `fallback`.
    pub degraded: bool,
}

/// Estimate the error of `obs` without storing it.
pub fn estimate(obs: &Obs, config: &GammaConfig) -> Result<ErrorSummary> {
    config.validate()?;

    let mut ensembles = BTreeMap::new();
    for (ensemble, chains) in obs.ensembles() {
        let mode = config.mode_for(ensemble);
        let replica: Vec<Vec<f64>> = fluctuations(obs, &chains);
        let analysis = analyse_ensemble(&replica, mode, config.fallback);
        if analysis.degraded {
            warn!(
                "ensemble '{}': window search did not converge, using {:?} fallback",
                ensemble, config.fallback
            );
        } else {
            debug!(
                "ensemble '{}': window {} tau_int {:.4} ({})",
                ensemble, analysis.window, analysis.tauint, mode
            );
        }
        ensembles.insert(ensemble.to_string(), analysis);
    }

    let covobs: BTreeMap<String, f64> = obs
        .covobs()
        .iter()
        .map(|(name, c)| (name.clone(), c.errsq().max(0.0).sqrt()))
        .collect();

    let var: f64 = ensembles.values().map(|a| a.dvalue * a.dvalue).sum::<f64>()
        + covobs.values().map(|d| d * d).sum::<f64>();
    let dvalue = var.sqrt();
    let ddvalue = if dvalue > 0.0 {
        ensembles
            .values()
            .map(|a| (a.dvalue * a.ddvalue).powi(2))
            .sum::<f64>()
            .sqrt()
            / dvalue
    } else {
        0.0
    };
    let degraded = ensembles.values().any(|a| a.degraded);

    Ok(ErrorSummary {
        value: obs.value(),
        dvalue,
        ddvalue,
        ensembles,
        covobs,
        degraded,
    })
}

impl Obs {
    /// Estimate the error and store the summary on the record.
    pub fn gamma_method(&mut self, config: &GammaConfig) -> Result<&ErrorSummary> {
        let summary = estimate(self, config)?;
        self.set_analysis(summary);
        self.analysis().ok_or_else(|| {
            Error::InvalidInput(ErrorInfo::new("gamma.store", "estimate was not stored"))
        })
    }
}

/// Per-replicum fluctuations. With several replica each one is shifted by
/// its mean's offset from the ensemble mean.
fn fluctuations(obs: &Obs, chains: &[&str]) -> Vec<Vec<f64>> {
    let deltas: Vec<&[f64]> = chains.iter().filter_map(|c| obs.deltas(c)).collect();
    if chains.len() < 2 {
        return deltas.iter().map(|d| d.to_vec()).collect();
    }
    let n: usize = deltas.iter().map(|d| d.len()).sum();
    let r_values: Vec<f64> = chains
        .iter()
        .map(|c| obs.r_value(c).unwrap_or_else(|| obs.value()))
        .collect();
    let e_mean = deltas
        .iter()
        .zip(&r_values)
        .map(|(d, r)| d.len() as f64 * r)
        .sum::<f64>()
        / n as f64;
    deltas
        .iter()
        .zip(&r_values)
        .map(|(d, r)| d.iter().map(|x| x + r - e_mean).collect())
        .collect()
}

/// `Γ(t)` for `t < lags`, summing in-replica pairs only.
fn autocovariance(replica: &[Vec<f64>], lags: usize) -> Vec<f64> {
    let mut gamma = vec![0.0; lags];
    let mut pairs = vec![0usize; lags];
    for f in replica {
        let len = f.len();
        for (t, (g, p)) in gamma.iter_mut().zip(pairs.iter_mut()).enumerate() {
            if t >= len {
                break;
            }
            let count = len - t;
            let mut sum = 0.0;
            for i in 0..count {
                sum += f[i] * f[i + t];
            }
            *g += sum;
            *p += count;
        }
    }
    for (g, p) in gamma.iter_mut().zip(pairs) {
        *g /= p.max(1) as f64;
    }
    gamma
}

/// `δρ(i)² = (1/N) Σ_{k=1}^{W_max−i−1} [ρ(k+i) + ρ(|k−i|) − 2ρ(i)ρ(k)]²`.
fn drho_at(rho: &[f64], i: usize, n: usize) -> f64 {
    let w_max = rho.len();
    let upper = w_max.saturating_sub(i + 1);
    let mut sum = 0.0;
    for k in 1..=upper {
        let term = rho[k + i] + rho[k.abs_diff(i)] - 2.0 * rho[i] * rho[k];
        sum += term * term;
    }
    (sum / n as f64).sqrt()
}

fn analyse_ensemble(
    replica: &[Vec<f64>],
    mode: WindowMode,
    fallback: WindowFallback,
) -> EnsembleAnalysis {
    let n: usize = replica.iter().map(Vec::len).sum();
    let w_max = replica.iter().map(Vec::len).max().unwrap_or(0) / 2;
    let nf = n as f64;

    let gamma = autocovariance(replica, w_max.max(1));
    let gamma0 = gamma[0];

    let mut out = EnsembleAnalysis {
        mode,
        n,
        dvalue: 0.0,
        ddvalue: 0.0,
        tauint: 0.5,
        dtauint: 0.0,
        window: 0,
        rho: Vec::new(),
        drho: Vec::new(),
        n_tauint: Vec::new(),
        n_dtauint: Vec::new(),
        degraded: false,
    };
    if n <= 1 || gamma0.abs() < GAMMA_ZERO {
        return out;
    }

    let rho: Vec<f64> = gamma.iter().map(|g| g / gamma0).collect();
    let mut n_tauint = Vec::with_capacity(rho.len());
    let mut acc = 0.5;
    for (t, r) in rho.iter().enumerate() {
        if t > 0 {
            acc += r;
        }
        n_tauint.push(if acc <= 0.5 { 0.5 + f64::EPSILON } else { acc });
    }
    let n_dtauint: Vec<f64> = n_tauint
        .iter()
        .enumerate()
        .map(|(t, &tau)| {
            if t == 0 {
                0.0
            } else {
                tau * 2.0 * ((t as f64 + 0.5 - tau).abs() / nf).sqrt()
            }
        })
        .collect();
    let mut drho = vec![0.0; rho.len()];

    let unwindowed = |out: &mut EnsembleAnalysis| {
        out.window = 0;
        out.tauint = 0.5;
        out.dtauint = 0.0;
        out.dvalue = (gamma0 / (nf - 1.0)).sqrt();
        out.ddvalue = out.dvalue * (0.5 / nf).sqrt();
    };
    let windowed = |out: &mut EnsembleAnalysis, w: usize, tauint: f64, dtauint: f64| {
        out.window = w;
        out.tauint = tauint;
        out.dtauint = dtauint;
        out.dvalue = (2.0 * tauint * gamma0 * (1.0 + 1.0 / nf) / nf).sqrt();
        out.ddvalue = out.dvalue * ((w as f64 + 0.5) / nf).sqrt();
    };
    let bias = |w: usize| (1.0 + (2.0 * w as f64 + 1.0) / nf) / (1.0 + 1.0 / nf);

    match mode {
        WindowMode::Unwindowed => unwindowed(&mut out),
        WindowMode::Automatic { s } => {
            let found = (1..w_max).find(|&w| {
                let tau = n_tauint[w];
                let tau_w = s / ((2.0 * tau + 1.0) / (2.0 * tau - 1.0)).ln();
                let g = (-(w as f64) / tau_w).exp() - tau_w / (w as f64 * nf).sqrt();
                g < 0.0
            });
            match (found, fallback) {
                (Some(w), _) => {
                    drho[w] = drho_at(&rho, w, n);
                    windowed(&mut out, w, n_tauint[w] * bias(w), n_dtauint[w]);
                }
                (None, WindowFallback::LastWindow) => {
                    let w = w_max.saturating_sub(1);
                    drho[w] = drho_at(&rho, w, n);
                    windowed(&mut out, w, n_tauint[w] * bias(w), n_dtauint[w]);
                    out.degraded = true;
                }
                (None, WindowFallback::Unwindowed) => {
                    unwindowed(&mut out);
                    out.degraded = true;
                }
            }
        }
        WindowMode::ExponentialTail { tau_exp, n_sigma } => {
            let half = w_max / 2;
            if half <= 1 {
                // Too few configurations for a tail analysis.
                match fallback {
                    WindowFallback::Unwindowed => unwindowed(&mut out),
                    WindowFallback::LastWindow => {
                        let w = w_max.saturating_sub(1);
                        windowed(&mut out, w, n_tauint[w] * bias(w), n_dtauint[w]);
                    }
                }
                out.degraded = true;
            } else {
                for w in 1..half {
                    drho[w] = drho_at(&rho, w, n);
                    drho[w + 1] = drho_at(&rho, w + 1, n);
                    if rho[w] - n_sigma * drho[w] < 0.0 || w + 2 >= half {
                        let tauint = n_tauint[w] * bias(w) + tau_exp * rho[w + 1].abs();
                        let dtauint =
                            (n_dtauint[w].powi(2) + tau_exp.powi(2) * drho[w + 1].powi(2)).sqrt();
                        windowed(&mut out, w, tauint, dtauint);
                        break;
                    }
                }
            }
        }
    }

    out.rho = rho;
    out.drho = drho;
    out.n_tauint = n_tauint;
    out.n_dtauint = n_dtauint;
    out
}
