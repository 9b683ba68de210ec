//! Fluctuation records.
//!
//! An [`Obs`] stores the central value of an observable together with its
//! per-configuration fluctuations ("deltas") on every Monte Carlo chain it
//! depends on. Chain names of the form `ensemble|replicum` mark replica of one
//! ensemble; a name without `|` is an ensemble with a single replicum.

mod display;
mod idl;
mod ops;
mod reweight;

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::DMatrix;
use serde_json::Value;

use crate::covobs::Covobs;
use crate::error::{Error, ErrorInfo, Result};
use crate::gamma::ErrorSummary;

pub use display::format_uncertainty;
pub use idl::Idl;
pub use reweight::reweight;

/// Separator between ensemble and replicum in a chain name.
pub const REPLICA_SEPARATOR: char = '|';

const ZERO_ATOL: f64 = 1e-10;
const ZERO_RTOL: f64 = 1e-14;

/// Ensemble part of a chain name.
pub fn ensemble_of(chain: &str) -> &str {
    chain
        .split_once(REPLICA_SEPARATOR)
        .map_or(chain, |(ens, _)| ens)
}

/// Replicum part of a chain name, `None` for single-replicum ensembles.
pub fn replicum_of(chain: &str) -> Option<&str> {
    chain.split_once(REPLICA_SEPARATOR).map(|(_, rep)| rep)
}

/// A Monte Carlo observable with its fluctuations on every chain.
#[derive(Clone, Debug)]
pub struct Obs {
    pub(crate) value: f64,
    pub(crate) deltas: BTreeMap<String, Vec<f64>>,
    pub(crate) idl: BTreeMap<String, Idl>,
    pub(crate) r_values: BTreeMap<String, f64>,
    pub(crate) covobs: BTreeMap<String, Covobs>,
    pub(crate) tag: Option<Value>,
    /// Samples were multiplied by reweighting factors.
    pub(crate) reweighted: bool,
    analysis: Option<ErrorSummary>,
}

impl Obs {
    /// Ingest raw samples, one vector per chain, measured on configurations
    /// `1..=N`.
    pub fn new<S: Into<String>>(samples: Vec<Vec<f64>>, names: Vec<S>) -> Result<Self> {
        let idl = samples.iter().map(|s| Idl::contiguous(s.len())).collect();
        Self::with_idl(samples, names, idl)
    }

    /// Ingest raw samples with explicit configuration index lists.
    pub fn with_idl<S: Into<String>>(
        samples: Vec<Vec<f64>>,
        names: Vec<S>,
        idl: Vec<Idl>,
    ) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if samples.len() != names.len() || idl.len() != names.len() {
            return Err(Error::ShapeMismatch(
                ErrorInfo::new(
                    "obs.chain_count",
                    "samples, names and index lists must have equal length",
                )
                .with_context("samples", samples.len())
                .with_context("names", names.len())
                .with_context("idl", idl.len()),
            ));
        }
        if names.is_empty() {
            return Err(Error::InvalidInput(ErrorInfo::new(
                "obs.no_chains",
                "at least one chain of samples is required",
            )));
        }
        check_chain_names(names.iter().map(String::as_str))?;

        let mut deltas = BTreeMap::new();
        let mut r_values = BTreeMap::new();
        let mut idls = BTreeMap::new();
        let mut weighted = 0.0;
        let mut total = 0usize;
        for ((chain, name), idl) in samples.into_iter().zip(names).zip(idl) {
            if chain.is_empty() {
                return Err(Error::InvalidInput(
                    ErrorInfo::new("obs.empty_chain", "chain has no samples")
                        .with_context("chain", &name),
                ));
            }
            if chain.len() != idl.len() {
                return Err(Error::ShapeMismatch(
                    ErrorInfo::new(
                        "obs.idl_length",
                        "index list length differs from sample count",
                    )
                    .with_context("chain", &name)
                    .with_context("samples", chain.len())
                    .with_context("idl", idl.len()),
                ));
            }
            if chain.iter().any(|x| !x.is_finite()) {
                return Err(Error::InvalidInput(
                    ErrorInfo::new("obs.non_finite", "samples contain non-finite values")
                        .with_context("chain", &name),
                ));
            }
            let mean = chain.iter().sum::<f64>() / chain.len() as f64;
            weighted += mean * chain.len() as f64;
            total += chain.len();
            deltas.insert(name.clone(), chain.iter().map(|x| x - mean).collect());
            r_values.insert(name.clone(), mean);
            idls.insert(name, idl);
        }

        Ok(Obs {
            value: weighted / total as f64,
            deltas,
            idl: idls,
            r_values,
            covobs: BTreeMap::new(),
            tag: None,
            reweighted: false,
            analysis: None,
        })
    }

    /// An exact number: no chains, no covariance entries, zero error.
    pub fn constant(value: f64) -> Self {
        Obs {
            value,
            deltas: BTreeMap::new(),
            idl: BTreeMap::new(),
            r_values: BTreeMap::new(),
            covobs: BTreeMap::new(),
            tag: None,
            reweighted: false,
            analysis: None,
        }
    }

    /// One record per entry of `means`, correlated through the covariance
    /// `cov` registered under `name`.
    pub fn from_covariance(means: &[f64], cov: DMatrix<f64>, name: &str) -> Result<Vec<Obs>> {
        if cov.nrows() != means.len() {
            return Err(Error::ShapeMismatch(
                ErrorInfo::new("covobs.means", "number of means differs from covariance size")
                    .with_context("means", means.len())
                    .with_context("dim", cov.nrows()),
            ));
        }
        let shared = Covobs::new(name, cov, 0)?;
        means
            .iter()
            .enumerate()
            .map(|(pos, &mean)| {
                let mut grad = nalgebra::DVector::zeros(means.len());
                grad[pos] = 1.0;
                let mut obs = Obs::constant(mean);
                obs.covobs.insert(name.to_string(), shared.regrad(grad));
                Ok(obs)
            })
            .collect()
    }

    /// Combine records measured on disjoint replica of the same ensemble.
    ///
    /// The merged value is the sample-count weighted mean of the replica
    /// values. Records sharing a chain cannot be merged.
    pub fn merge_replica(parts: &[Obs]) -> Result<Obs> {
        let mut merged = Obs::constant(0.0);
        let mut weighted = 0.0;
        let mut total = 0usize;
        for part in parts {
            if !part.covobs.is_empty() {
                return Err(Error::InvalidInput(ErrorInfo::new(
                    "obs.merge_covobs",
                    "records carrying covariance entries cannot be merged",
                )));
            }
            for (chain, deltas) in &part.deltas {
                if merged.deltas.contains_key(chain) {
                    return Err(Error::EnsembleInconsistency(
                        ErrorInfo::new("obs.merge_overlap", "replica to merge share a chain")
                            .with_context("chain", chain),
                    ));
                }
                let r_value = part.r_values.get(chain).copied().unwrap_or(part.value);
                weighted += r_value * deltas.len() as f64;
                total += deltas.len();
                merged.deltas.insert(chain.clone(), deltas.clone());
                merged.r_values.insert(chain.clone(), r_value);
                if let Some(idl) = part.idl.get(chain) {
                    merged.idl.insert(chain.clone(), idl.clone());
                }
            }
        }
        if total == 0 {
            return Err(Error::InvalidInput(ErrorInfo::new(
                "obs.merge_empty",
                "nothing to merge",
            )));
        }
        check_chain_names(merged.deltas.keys().map(String::as_str))?;
        merged.value = weighted / total as f64;
        merged.tag = common_tag(parts.iter());
        merged.reweighted = parts.iter().any(|p| p.reweighted);
        Ok(merged)
    }

    /// Assemble a record from already consistent parts.
    pub(crate) fn from_parts(
        value: f64,
        deltas: BTreeMap<String, Vec<f64>>,
        idl: BTreeMap<String, Idl>,
        r_values: BTreeMap<String, f64>,
        covobs: BTreeMap<String, Covobs>,
    ) -> Self {
        Obs {
            value,
            deltas,
            idl,
            r_values,
            covobs,
            tag: None,
            reweighted: false,
            analysis: None,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Chain names in sorted order.
    pub fn chain_names(&self) -> impl Iterator<Item = &str> {
        self.deltas.keys().map(String::as_str)
    }

    /// Distinct ensemble names in sorted order.
    pub fn ensemble_names(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self.chain_names().map(ensemble_of).collect();
        set.into_iter().collect()
    }

    /// Chains grouped by ensemble.
    pub fn ensembles(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for chain in self.chain_names() {
            map.entry(ensemble_of(chain)).or_default().push(chain);
        }
        map
    }

    pub fn deltas(&self, chain: &str) -> Option<&[f64]> {
        self.deltas.get(chain).map(Vec::as_slice)
    }

    pub fn idl(&self, chain: &str) -> Option<&Idl> {
        self.idl.get(chain)
    }

    /// The value recomputed from `chain`'s own means.
    pub fn r_value(&self, chain: &str) -> Option<f64> {
        self.r_values.get(chain).copied()
    }

    /// Number of configurations on `chain`.
    pub fn shape(&self, chain: &str) -> Option<usize> {
        self.deltas.get(chain).map(Vec::len)
    }

    /// Total number of Monte Carlo configurations over all chains.
    pub fn n_samples(&self) -> usize {
        self.deltas.values().map(Vec::len).sum()
    }

    pub fn covobs(&self) -> &BTreeMap<String, Covobs> {
        &self.covobs
    }

    pub fn covobs_names(&self) -> impl Iterator<Item = &str> {
        self.covobs.keys().map(String::as_str)
    }

    /// True for a record without chains or covariance entries.
    pub fn is_constant(&self) -> bool {
        self.deltas.is_empty() && self.covobs.is_empty()
    }

    pub fn tag(&self) -> Option<&Value> {
        self.tag.as_ref()
    }

    pub fn set_tag(&mut self, tag: Option<Value>) {
        self.tag = tag;
    }

    pub fn with_tag(mut self, tag: Value) -> Self {
        self.tag = Some(tag);
        self
    }

    /// True if the record was reweighted or derived from a reweighted one.
    pub fn is_reweighted(&self) -> bool {
        self.reweighted
    }

    /// The stored error estimate, if one was requested.
    pub fn analysis(&self) -> Option<&ErrorSummary> {
        self.analysis.as_ref()
    }

    pub(crate) fn set_analysis(&mut self, summary: ErrorSummary) {
        self.analysis = Some(summary);
    }

    /// Estimated error, available after [`Obs::gamma_method`].
    pub fn dvalue(&self) -> Option<f64> {
        self.analysis.as_ref().map(|a| a.dvalue)
    }

    /// Estimated error of the error.
    pub fn ddvalue(&self) -> Option<f64> {
        self.analysis.as_ref().map(|a| a.ddvalue)
    }

    /// True if the value, every delta, and every covariance gradient vanish
    /// within machine precision.
    pub fn is_zero(&self) -> bool {
        let close = |x: f64| x.abs() <= ZERO_ATOL + ZERO_RTOL * x.abs();
        close(self.value)
            && self.deltas.values().flatten().all(|&d| close(d))
            && self.covobs.values().all(|c| c.grad().iter().all(|&g| close(g)))
    }

    /// True if `|value| <= sigma · error`. `None` until an estimate exists.
    pub fn is_zero_within_error(&self, sigma: f64) -> Option<bool> {
        self.dvalue().map(|dv| self.value.abs() <= sigma * dv)
    }
}

/// Reject duplicate chains and ensembles used both with and without replica.
pub(crate) fn check_chain_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = BTreeSet::new();
    let mut plain = BTreeSet::new();
    let mut replicated = BTreeSet::new();
    for name in names {
        if name.is_empty() || name.matches(REPLICA_SEPARATOR).count() > 1 {
            return Err(Error::InvalidInput(
                ErrorInfo::new("obs.chain_name", "malformed chain name")
                    .with_context("chain", name)
                    .with_hint("use 'ensemble' or 'ensemble|replicum'"),
            ));
        }
        if !seen.insert(name) {
            return Err(Error::EnsembleInconsistency(
                ErrorInfo::new("obs.duplicate_chain", "chain name appears twice")
                    .with_context("chain", name),
            ));
        }
        match replicum_of(name) {
            Some(_) => replicated.insert(ensemble_of(name)),
            None => plain.insert(name),
        };
    }
    if let Some(ens) = plain.intersection(&replicated).next() {
        return Err(Error::EnsembleInconsistency(
            ErrorInfo::new(
                "obs.mixed_replica",
                "ensemble used both as a single chain and with replica",
            )
            .with_context("ensemble", *ens),
        ));
    }
    Ok(())
}

/// The tag shared by every tagged record, `None` if they disagree.
pub(crate) fn common_tag<'a>(records: impl Iterator<Item = &'a Obs>) -> Option<Value> {
    let mut tag: Option<&Value> = None;
    for t in records.filter_map(|o| o.tag.as_ref()) {
        match tag {
            None => tag = Some(t),
            Some(prev) if prev == t => {}
            Some(_) => return None,
        }
    }
    tag.cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_is_sample_weighted_mean() {
        let obs = Obs::new(vec![vec![1.0, 3.0], vec![5.0]], vec!["e|r1", "e|r2"]).unwrap();
        assert_eq!(obs.value(), 3.0);
        assert_eq!(obs.r_value("e|r1"), Some(2.0));
        assert_eq!(obs.deltas("e|r1"), Some(&[-1.0, 1.0][..]));
        assert_eq!(obs.ensemble_names(), vec!["e"]);
    }

    #[test]
    fn mixed_replica_naming_is_rejected() {
        let err = Obs::new(vec![vec![1.0], vec![2.0]], vec!["e", "e|r1"]).unwrap_err();
        assert_eq!(err.code(), "obs.mixed_replica");
    }

    #[test]
    fn merge_rejects_shared_chain() {
        let a = Obs::new(vec![vec![1.0, 2.0]], vec!["e|r1"]).unwrap();
        assert!(matches!(
            Obs::merge_replica(&[a.clone(), a]),
            Err(Error::EnsembleInconsistency(_))
        ));
    }

    #[test]
    fn merge_weights_by_sample_count() {
        let a = Obs::new(vec![vec![1.0, 1.0, 1.0]], vec!["e|r1"]).unwrap();
        let b = Obs::new(vec![vec![5.0]], vec!["e|r2"]).unwrap();
        let m = Obs::merge_replica(&[a, b]).unwrap();
        assert_eq!(m.value(), 2.0);
        assert_eq!(m.n_samples(), 4);
    }

    #[test]
    fn conflicting_tags_are_dropped() {
        let a = Obs::constant(1.0).with_tag(Value::from("x"));
        let b = Obs::constant(1.0).with_tag(Value::from("y"));
        let c = Obs::constant(1.0);
        assert_eq!(common_tag([&a, &c].into_iter()), Some(Value::from("x")));
        assert_eq!(common_tag([&a, &b].into_iter()), None);
    }
}
