//! Products of primary samples: correlation and reweighting.
//!
//! Both operate on the samples `delta + r_value` of every configuration and
//! therefore only make sense for primary records, that is records built from
//! raw samples and not yet combined with covariance entries.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{Error, ErrorInfo, Result};
use crate::obs::{Idl, Obs};

fn require_primary(obs: &Obs, op: &str) -> Result<()> {
    if obs.covobs.is_empty() && !obs.deltas.is_empty() {
        return Ok(());
    }
    Err(Error::InvalidInput(
        ErrorInfo::new(
            "obs.not_primary",
            "operation needs records built from samples without covariance entries",
        )
        .with_context("op", op)
        .with_context("chains", obs.deltas.len())
        .with_context("covobs", obs.covobs.len()),
    ))
}

/// Samples of `obs` on `chain`, restricted to the configurations in `idl`.
fn samples_on(obs: &Obs, chain: &str, idl: &Idl) -> Vec<f64> {
    let (Some(deltas), Some(own)) = (obs.deltas.get(chain), obs.idl.get(chain)) else {
        return Vec::new();
    };
    let r_value = obs.r_values.get(chain).copied().unwrap_or(obs.value);
    let positions: BTreeMap<u64, usize> = own.iter().enumerate().map(|(i, c)| (c, i)).collect();
    idl.iter()
        .filter_map(|cfg| positions.get(&cfg).map(|&i| deltas[i] + r_value))
        .collect()
}

/// Rebuild a primary record from per-chain samples on the given lists.
fn primary(samples: BTreeMap<String, (Vec<f64>, Idl)>, reweighted: bool) -> Result<Obs> {
    let mut names = Vec::with_capacity(samples.len());
    let mut data = Vec::with_capacity(samples.len());
    let mut idls = Vec::with_capacity(samples.len());
    for (name, (s, idl)) in samples {
        names.push(name);
        data.push(s);
        idls.push(idl);
    }
    let mut obs = Obs::with_idl(data, names, idls)?;
    obs.reweighted = reweighted;
    Ok(obs)
}

impl Obs {
    /// The record whose sample on every configuration is the product of the
    /// samples of `self` and `other`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] unless both records are primary.
    /// - [`Error::EnsembleInconsistency`] unless both live on the same chains
    ///   with the same configurations.
    pub fn correlate(&self, other: &Obs) -> Result<Obs> {
        require_primary(self, "correlate")?;
        require_primary(other, "correlate")?;
        if !self.deltas.keys().eq(other.deltas.keys()) {
            return Err(Error::EnsembleInconsistency(
                ErrorInfo::new("obs.correlate_chains", "records live on different chains")
                    .with_context("left", self.deltas.len())
                    .with_context("right", other.deltas.len()),
            ));
        }
        let mut samples = BTreeMap::new();
        for (chain, idl) in &self.idl {
            if other.idl.get(chain) != Some(idl) {
                return Err(Error::EnsembleInconsistency(
                    ErrorInfo::new(
                        "obs.correlate_idl",
                        "records use different configurations on one chain",
                    )
                    .with_context("chain", chain),
                ));
            }
            let product = samples_on(self, chain, idl)
                .into_iter()
                .zip(samples_on(other, chain, idl))
                .map(|(a, b)| a * b)
                .collect();
            samples.insert(chain.clone(), (product, idl.clone()));
        }
        primary(samples, self.reweighted || other.reweighted)
    }
}

/// Reweight every record in `obs` with the factors in `weight`:
/// `⟨o w⟩ / ⟨w⟩`.
///
/// Each record must live on a subset of `weight`'s chains and
/// configurations. With `all_configs` the normalisation `⟨w⟩` uses every
/// configuration of `weight`; otherwise only those the record was measured on.
///
/// # Errors
///
/// - [`Error::InvalidInput`] for records that are not primary.
/// - [`Error::EnsembleInconsistency`] if a record uses a chain or
///   configuration the weight does not have.
pub fn reweight(weight: &Obs, obs: &[Obs], all_configs: bool) -> Result<Vec<Obs>> {
    require_primary(weight, "reweight")?;
    let mut out = Vec::with_capacity(obs.len());
    for (k, o) in obs.iter().enumerate() {
        require_primary(o, "reweight")?;
        let mut weighted = BTreeMap::new();
        let mut restricted = BTreeMap::new();
        for (chain, idl) in &o.idl {
            let covered = weight.idl.get(chain).is_some_and(|w| idl.is_subset_of(w));
            if !covered {
                return Err(Error::EnsembleInconsistency(
                    ErrorInfo::new(
                        "obs.reweight_support",
                        "record uses configurations the weight does not cover",
                    )
                    .with_context("record", k)
                    .with_context("chain", chain),
                ));
            }
            let w = samples_on(weight, chain, idl);
            let product = samples_on(o, chain, idl)
                .into_iter()
                .zip(&w)
                .map(|(a, b)| a * b)
                .collect();
            weighted.insert(chain.clone(), (product, idl.clone()));
            restricted.insert(chain.clone(), (w, idl.clone()));
        }
        let numerator = primary(weighted, true)?;
        let mut result = if all_configs {
            &numerator / weight
        } else {
            &numerator / &primary(restricted, true)?
        };
        result.reweighted = true;
        result.tag = o.tag.clone();
        debug!(
            "reweighted record {} on {} chains (all_configs = {})",
            k,
            o.idl.len(),
            all_configs
        );
        out.push(result);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(name: &str, samples: &[f64]) -> Obs {
        Obs::new(vec![samples.to_vec()], vec![name]).unwrap()
    }

    #[test]
    fn correlate_multiplies_samples() {
        let a = chain("e", &[1.0, 2.0, 3.0]);
        let b = chain("e", &[2.0, 2.0, 1.0]);
        let c = a.correlate(&b).unwrap();
        // Samples 2, 4, 3.
        assert_eq!(c.value(), 3.0);
        assert_eq!(c.deltas("e"), Some(&[-1.0, 1.0, 0.0][..]));
    }

    #[test]
    fn unit_weights_change_nothing() {
        let o = chain("e", &[1.0, 4.0, 2.0, 3.0]);
        let w = chain("e", &[1.0; 4]);
        let out = reweight(&w, &[o.clone()], false).unwrap();
        assert!(out[0].is_reweighted());
        assert!((&out[0] - &o).is_zero());
    }

    #[test]
    fn derived_records_cannot_be_reweighted() {
        let o = chain("e", &[1.0, 2.0]);
        let w = chain("e", &[1.0, 1.0]);
        let params = Obs::from_covariance(
            &[1.0],
            nalgebra::DMatrix::from_element(1, 1, 0.1),
            "cv",
        )
        .unwrap();
        let derived = &o + &params[0];
        let err = reweight(&w, &[derived], false).unwrap_err();
        assert_eq!(err.code(), "obs.not_primary");
    }
}
