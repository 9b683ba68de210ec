//! The derivation engine.
//!
//! [`derive`] turns a numerical function of records into new records. The
//! function is evaluated at the central values and once per chain at that
//! chain's means; the fluctuations are propagated linearly through the
//! Jacobian supplied by a [`JacobianProvider`].

use std::borrow::Borrow;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use log::debug;
use nalgebra::DVector;

use crate::covobs::Covobs;
use crate::error::{Error, ErrorInfo, Result};
use crate::jacobian::JacobianProvider;
use crate::obs::{check_chain_names, common_tag, Idl, Obs};

/// Apply `provider`'s function to `inputs`, propagating fluctuations.
///
/// Matrix-valued functions are flattened row-major by the caller. Exact
/// numbers enter as [`Obs::constant`]. Inputs are never modified.
///
/// Inputs that sample the same chain on different configurations are
/// combined on the union of their index lists, each input's deltas placed at
/// its own configurations. A differing configuration count on one chain is
/// therefore merged, not reported as [`Error::EnsembleInconsistency`].
///
/// # Errors
///
/// - [`Error::ShapeMismatch`] if the Jacobian does not match the outputs and
///   inputs, or the function returns a varying number of outputs.
/// - [`Error::EnsembleInconsistency`] for malformed chains or a covariance
///   name registered with different matrices.
/// - [`Error::UnsupportedDifferentiation`] from the automatic provider.
pub fn derive<P, O>(provider: &P, inputs: &[O]) -> Result<Vec<Obs>>
where
    P: JacobianProvider + ?Sized,
    O: Borrow<Obs>,
{
    let inputs: Vec<&Obs> = inputs.iter().map(Borrow::borrow).collect();
    let n = inputs.len();

    let chains = union_chains(&inputs)?;
    let covobs = union_covobs(&inputs)?;

    let central: Vec<f64> = inputs.iter().map(|o| o.value).collect();
    let (values, jac) = provider.eval_jacobian(&central)?;
    let m = values.len();
    if jac.len() != m || jac.iter().any(|row| row.len() != n) {
        return Err(Error::ShapeMismatch(
            ErrorInfo::new(
                "derive.jacobian_shape",
                "Jacobian shape does not match outputs x inputs",
            )
            .with_context("outputs", m)
            .with_context("inputs", n)
            .with_context("rows", jac.len()),
        ));
    }

    // Per-chain values with that chain's means substituted.
    let mut r_values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for chain in chains.keys() {
        let x: Vec<f64> = inputs
            .iter()
            .map(|o| o.r_values.get(chain).copied().unwrap_or(o.value))
            .collect();
        let fx = provider.eval(&x);
        if fx.len() != m {
            return Err(Error::ShapeMismatch(
                ErrorInfo::new(
                    "derive.output_length",
                    "function returned a different number of outputs for a chain",
                )
                .with_context("chain", chain)
                .with_context("expected", m)
                .with_context("got", fx.len()),
            ));
        }
        r_values.insert(chain.as_str(), fx);
    }

    // Input deltas expanded onto the union index list, once per (chain, input).
    let mut expanded: BTreeMap<&str, Vec<(usize, Vec<f64>)>> = BTreeMap::new();
    for (chain, target) in &chains {
        let per_input = inputs
            .iter()
            .enumerate()
            .filter_map(|(j, o)| {
                let d = o.deltas.get(chain)?;
                let own = o.idl.get(chain)?;
                Some((j, own.expand_onto(d, target)))
            })
            .collect();
        expanded.insert(chain.as_str(), per_input);
    }

    let tag = common_tag(inputs.iter().copied());
    let reweighted = inputs.iter().any(|o| o.reweighted);
    let mut outputs = Vec::with_capacity(m);
    for (i, (&value, jrow)) in values.iter().zip(jac.iter()).enumerate() {
        let mut deltas = BTreeMap::new();
        let mut idl = BTreeMap::new();
        let mut r_out = BTreeMap::new();
        for (chain, target) in &chains {
            let mut acc = vec![0.0; target.len()];
            for (j, d) in &expanded[chain.as_str()] {
                let coeff = jrow[*j];
                for (a, x) in acc.iter_mut().zip(d.iter()) {
                    *a += coeff * x;
                }
            }
            deltas.insert(chain.clone(), acc);
            idl.insert(chain.clone(), target.clone());
            r_out.insert(chain.clone(), r_values[chain.as_str()][i]);
        }

        let mut cov_out = BTreeMap::new();
        for (name, template) in &covobs {
            let mut grad = DVector::zeros(template.dim());
            for (j, o) in inputs.iter().enumerate() {
                if let Some(c) = o.covobs.get(name) {
                    grad.axpy(jrow[j], c.grad(), 1.0);
                }
            }
            cov_out.insert(name.clone(), template.regrad(grad));
        }

        let mut obs = Obs::from_parts(value, deltas, idl, r_out, cov_out);
        obs.tag = tag.clone();
        obs.reweighted = reweighted;
        outputs.push(obs);
    }
    Ok(outputs)
}

/// Union index list for every chain referenced by any input.
fn union_chains(inputs: &[&Obs]) -> Result<BTreeMap<String, Idl>> {
    let mut chains: BTreeMap<String, Idl> = BTreeMap::new();
    for o in inputs {
        for (chain, d) in &o.deltas {
            let own = o.idl.get(chain).filter(|idl| idl.len() == d.len()).ok_or_else(|| {
                Error::EnsembleInconsistency(
                    ErrorInfo::new(
                        "derive.malformed_chain",
                        "chain deltas and index list disagree",
                    )
                    .with_context("chain", chain)
                    .with_context("deltas", d.len()),
                )
            })?;
            match chains.entry(chain.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(own.clone());
                }
                Entry::Occupied(mut slot) if slot.get() != own => {
                    let merged = slot.get().union(own);
                    debug!(
                        "chain '{}': merged index lists of {} and {} configurations into {}",
                        chain,
                        slot.get().len(),
                        own.len(),
                        merged.len()
                    );
                    slot.insert(merged);
                }
                Entry::Occupied(_) => {}
            }
        }
    }
    check_chain_names(chains.keys().map(String::as_str))?;
    Ok(chains)
}

/// One template entry per covariance name; every record must agree on the
/// matrix.
fn union_covobs<'a>(inputs: &[&'a Obs]) -> Result<BTreeMap<String, &'a Covobs>> {
    let mut covobs: BTreeMap<String, &Covobs> = BTreeMap::new();
    for o in inputs {
        for (name, c) in &o.covobs {
            match covobs.get(name) {
                Some(prev) if !prev.same_matrix(c) => {
                    return Err(Error::EnsembleInconsistency(
                        ErrorInfo::new(
                            "derive.covobs_mismatch",
                            "covariance entry registered with different matrices",
                        )
                        .with_context("covobs", name),
                    ));
                }
                Some(_) => {}
                None => {
                    covobs.insert(name.clone(), c);
                }
            }
        }
    }
    Ok(covobs)
}
