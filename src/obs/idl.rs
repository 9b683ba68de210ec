//! Configuration index lists.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorInfo, Result};

/// The Monte Carlo configuration numbers a chain was measured on.
///
/// Regular histories are stored as a range; everything else as a strictly
/// increasing list. [`Idl::from_indices`] canonicalises lists that happen to
/// be regular, so two index lists are equal iff they name the same
/// configurations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Idl {
    Range { first: u64, step: u64, len: usize },
    Irregular(Vec<u64>),
}

impl Idl {
    /// `1..=len`, the default for freshly ingested samples.
    pub fn contiguous(len: usize) -> Self {
        Idl::Range {
            first: 1,
            step: 1,
            len,
        }
    }

    /// `first, first + step, ...` with `len` entries.
    pub fn range(first: u64, step: u64, len: usize) -> Result<Self> {
        if step == 0 {
            return Err(Error::InvalidInput(
                ErrorInfo::new("idl.zero_step", "index range step must be positive")
                    .with_context("first", first),
            ));
        }
        Ok(Idl::Range { first, step, len })
    }

    /// Build from an explicit list, which must be strictly increasing.
    pub fn from_indices(indices: Vec<u64>) -> Result<Self> {
        if let Some(pos) = indices.windows(2).position(|w| w[1] <= w[0]) {
            return Err(Error::InvalidInput(
                ErrorInfo::new(
                    "idl.not_increasing",
                    "configuration indices must be strictly increasing",
                )
                .with_context("position", pos + 1)
                .with_context("index", indices[pos + 1]),
            ));
        }
        Ok(Self::canonical(indices))
    }

    fn canonical(indices: Vec<u64>) -> Self {
        let (first, step) = match indices.as_slice() {
            [] => return Idl::contiguous(0),
            [single] => (*single, 1),
            [a, b, ..] => (*a, *b - *a),
        };
        if indices.windows(2).all(|w| w[1] - w[0] == step) {
            Idl::Range {
                first,
                step,
                len: indices.len(),
            }
        } else {
            Idl::Irregular(indices)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Idl::Range { len, .. } => *len,
            Idl::Irregular(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `i`-th configuration number.
    pub fn get(&self, i: usize) -> Option<u64> {
        match self {
            Idl::Range { first, step, len } => (i < *len).then(|| first + step * i as u64),
            Idl::Irregular(v) => v.get(i).copied(),
        }
    }

    pub fn first(&self) -> Option<u64> {
        self.get(0)
    }

    pub fn last(&self) -> Option<u64> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    pub fn to_vec(&self) -> Vec<u64> {
        self.iter().collect()
    }

    /// Sorted union of two index lists.
    pub fn union(&self, other: &Idl) -> Idl {
        if self == other {
            return self.clone();
        }
        let merged: BTreeSet<u64> = self.iter().chain(other.iter()).collect();
        Self::canonical(merged.into_iter().collect())
    }

    /// Union over any number of lists.
    pub fn union_all<'a>(lists: impl IntoIterator<Item = &'a Idl>) -> Option<Idl> {
        let mut lists = lists.into_iter();
        let first = lists.next()?.clone();
        Some(lists.fold(first, |acc, idl| acc.union(idl)))
    }

    /// True if every configuration of `self` also appears in `other`.
    pub fn is_subset_of(&self, other: &Idl) -> bool {
        let mut theirs = other.iter().peekable();
        'outer: for mine in self.iter() {
            while let Some(&t) = theirs.peek() {
                theirs.next();
                if t == mine {
                    continue 'outer;
                }
                if t > mine {
                    return false;
                }
            }
            return false;
        }
        true
    }

    /// Place `deltas` (measured on `self`) onto the positions of `target`,
    /// which must contain `self`. Missing configurations are zero and the
    /// result is scaled by `len(target) / len(self)` so the mean
    /// contribution is preserved. Equal lists copy without scaling.
    pub(crate) fn expand_onto(&self, deltas: &[f64], target: &Idl) -> Vec<f64> {
        if self == target {
            return deltas.to_vec();
        }
        let scale = target.len() as f64 / self.len() as f64;
        let mut out = vec![0.0; target.len()];
        let mut mine = self.iter().zip(deltas.iter()).peekable();
        for (slot, cfg) in out.iter_mut().zip(target.iter()) {
            if let Some(&(c, &d)) = mine.peek() {
                if c == cfg {
                    *slot = d * scale;
                    mine.next();
                }
            }
        }
        out
    }

    /// Parenthesised description used by the record summary.
    pub fn describe(&self) -> String {
        match self {
            Idl::Range { len: 0, .. } => "(empty)".to_string(),
            Idl::Range { first, step: 1, len } => {
                format!("(from {} to {})", first, first + (*len as u64 - 1))
            }
            Idl::Range { first, step, len } => format!(
                "(from {} to {} in steps of {})",
                first,
                first + step * (*len as u64 - 1),
                step
            ),
            Idl::Irregular(_) => "(irregular range)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_lists_collapse_to_ranges() {
        let idl = Idl::from_indices(vec![5, 7, 9, 11]).unwrap();
        assert_eq!(
            idl,
            Idl::Range {
                first: 5,
                step: 2,
                len: 4
            }
        );
        assert_eq!(idl.describe(), "(from 5 to 11 in steps of 2)");
    }

    #[test]
    fn irregular_list_is_kept() {
        let idl = Idl::from_indices(vec![2, 9, 28, 29, 501]).unwrap();
        assert!(matches!(idl, Idl::Irregular(_)));
        assert_eq!(idl.describe(), "(irregular range)");
        assert_eq!(idl.last(), Some(501));
    }

    #[test]
    fn decreasing_list_is_rejected() {
        let err = Idl::from_indices(vec![1, 3, 3]).unwrap_err();
        assert_eq!(err.code(), "idl.not_increasing");
    }

    #[test]
    fn union_of_interleaved_ranges() {
        let odd = Idl::range(1, 2, 5).unwrap();
        let even = Idl::range(2, 2, 5).unwrap();
        assert_eq!(odd.union(&even), Idl::contiguous(10));
        assert!(odd.is_subset_of(&Idl::contiguous(10)));
        assert!(!Idl::contiguous(10).is_subset_of(&odd));
    }

    #[test]
    fn expansion_pads_and_rescales() {
        let own = Idl::range(1, 2, 3).unwrap();
        let target = Idl::contiguous(6);
        let out = own.expand_onto(&[1.0, 2.0, 3.0], &target);
        assert_eq!(out, vec![2.0, 0.0, 4.0, 0.0, 6.0, 0.0]);
    }
}
