//! Serialization of records and jackknife conversion.
//!
//! [`ObsStructure`] is the interchange form of a list of records sharing
//! their chains: per chain one row per configuration holding the
//! configuration number followed by the deltas of every record. Covariance
//! entries are stored once with one gradient per record. A [`JsonFile`]
//! wraps independent structures with the writer's provenance.
//!
//! ```json
//! {
//!   "program": "errprop 0.1.0",
//!   "version": "1.1",
//!   "who": "alice",
//!   "date": "2024-05-01 12:00:00 +0000",
//!   "host": "node17",
//!   "obsdata": [
//!     {
//!       "type": "List",
//!       "value": [1.02, 0.98],
//!       "layout": "2",
//!       "data": [
//!         { "id": "A", "replica": [ { "name": "A", "deltas": [[1, 0.1, -0.2], [2, -0.1, 0.2]] } ] }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::Utc;
use log::info;
use nalgebra::{DMatrix, DVector};
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::covobs::Covobs;
use crate::error::{Error, ErrorInfo, Result};
use crate::obs::{check_chain_names, common_tag, ensemble_of, Idl, Obs};

/// Version of the file format written by [`to_json`].
pub const FORMAT_VERSION: &str = "1.1";

/// A file of independent record structures together with its provenance.
/// Only `obsdata` is required when reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonFile {
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub who: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub host: String,
    /// Free-form account of the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    pub obsdata: Vec<ObsStructure>,
}

fn env_or_unknown(keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| std::env::var(k).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

impl JsonFile {
    /// Wrap `obsdata` with the program, user, host and current time.
    pub fn new(obsdata: Vec<ObsStructure>, description: Option<Value>) -> Self {
        JsonFile {
            program: format!("errprop {}", env!("CARGO_PKG_VERSION")),
            version: FORMAT_VERSION.to_string(),
            who: env_or_unknown(&["USER", "USERNAME", "LOGNAME"]),
            date: Utc::now().format("%Y-%m-%d %H:%M:%S %z").to_string(),
            host: env_or_unknown(&["HOSTNAME", "COMPUTERNAME"]),
            description,
            obsdata,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a file. A bare structure without the envelope is accepted as a
    /// file holding that single structure.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for a configuration number that is not a
    /// non-negative integer, [`Error::Serde`] for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(json)?;
        let file = if doc.get("obsdata").is_some() {
            for structure in items(&doc, "obsdata") {
                check_configs(structure)?;
            }
            serde_json::from_value::<JsonFile>(doc)?
        } else {
            check_configs(&doc)?;
            JsonFile {
                program: String::new(),
                version: String::new(),
                who: String::new(),
                date: String::new(),
                host: String::new(),
                description: None,
                obsdata: vec![serde_json::from_value(doc)?],
            }
        };
        if !file.program.is_empty() {
            info!(
                "reading data written by {} (format {}) on {} by {} at {}",
                file.program, file.version, file.host, file.who, file.date
            );
        }
        Ok(file)
    }

    /// Records and layout of every structure, in file order.
    pub fn records(&self) -> Result<Vec<(Vec<Obs>, Vec<usize>)>> {
        self.obsdata.iter().map(import_structure).collect()
    }
}

fn items<'a>(doc: &'a Value, key: &str) -> &'a [Value] {
    doc.get(key).and_then(Value::as_array).map_or(&[][..], Vec::as_slice)
}

fn valid_config(config: &Value) -> bool {
    config.as_u64().is_some()
        || config
            .as_f64()
            .is_some_and(|c| c >= 0.0 && c.fract() == 0.0 && c < u64::MAX as f64)
}

/// Reject configuration numbers that are negative, fractional or not numbers.
fn check_configs(structure: &Value) -> Result<()> {
    for ensemble in items(structure, "data") {
        for rep in items(ensemble, "replica") {
            for row in items(rep, "deltas") {
                let Some(config) = row.get(0) else { continue };
                if !valid_config(config) {
                    return Err(Error::InvalidInput(
                        ErrorInfo::new(
                            "export.config",
                            "configuration number is not a non-negative integer",
                        )
                        .with_context("replicum", rep.get("name").unwrap_or(&Value::Null))
                        .with_context("config", config),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// A list of records in serializable form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObsStructure {
    /// `"Obs"`, `"List"` or `"Array"`; the records are always readable as a
    /// flat list.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub value: Vec<f64>,
    /// Shape of the record list, e.g. `"2, 3"` for a 2×3 matrix.
    pub layout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Value>,
    /// Set if any record of the structure was reweighted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reweighted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<EnsembleData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cdata: Vec<CovobsData>,
}

fn default_kind() -> String {
    "List".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnsembleData {
    pub id: String,
    pub replica: Vec<ReplicumData>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicumData {
    /// Full chain name.
    pub name: String,
    pub deltas: Vec<DeltaRow>,
}

/// One configuration: serialized as `[config, delta_1, ..., delta_n]`.
#[derive(Clone, Debug, PartialEq)]
pub struct DeltaRow {
    pub config: u64,
    pub deltas: Vec<f64>,
}

impl Serialize for DeltaRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.deltas.len() + 1))?;
        seq.serialize_element(&self.config)?;
        for d in &self.deltas {
            seq.serialize_element(d)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for DeltaRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = DeltaRow;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sequence [config, delta, ...]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<DeltaRow, A::Error> {
                let config: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                if !(config >= 0.0 && config.fract() == 0.0 && config < u64::MAX as f64) {
                    return Err(de::Error::custom(format!(
                        "configuration number {config} is not a non-negative integer"
                    )));
                }
                let mut deltas = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(d) = seq.next_element()? {
                    deltas.push(d);
                }
                Ok(DeltaRow {
                    config: config as u64,
                    deltas,
                })
            }
        }

        deserializer.deserialize_seq(RowVisitor)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CovobsData {
    pub id: String,
    pub layout: String,
    /// Row-major covariance matrix.
    pub cov: Vec<f64>,
    /// One gradient per record.
    pub grad: Vec<Vec<f64>>,
}

fn format_layout(layout: &[usize]) -> String {
    layout
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_layout(layout: &str) -> Result<Vec<usize>> {
    layout
        .split(',')
        .map(|part| {
            part.trim().parse::<usize>().map_err(|_| {
                Error::InvalidInput(
                    ErrorInfo::new("export.layout", "layout is not a list of dimensions")
                        .with_context("layout", layout),
                )
            })
        })
        .collect()
}

/// Offsets `r_value − ensemble mean` for ensembles with several replica.
fn replica_offsets(obs: &Obs, chains: &[&str]) -> BTreeMap<String, f64> {
    let mut offsets = BTreeMap::new();
    if chains.len() < 2 {
        return offsets;
    }
    let present: Vec<(&str, usize, f64)> = chains
        .iter()
        .filter_map(|&c| {
            let n = obs.shape(c)?;
            Some((c, n, obs.r_value(c).unwrap_or_else(|| obs.value())))
        })
        .collect();
    let total: usize = present.iter().map(|(_, n, _)| n).sum();
    if total == 0 {
        return offsets;
    }
    let e_mean = present.iter().map(|(_, n, r)| *n as f64 * r).sum::<f64>() / total as f64;
    for (c, _, r) in present {
        offsets.insert(c.to_string(), r - e_mean);
    }
    offsets
}

/// Convert `records` (flattened row-major with shape `layout`) into their
/// interchange form.
///
/// # Errors
///
/// - [`Error::ShapeMismatch`] if `layout` does not describe `records.len()`
///   entries.
/// - [`Error::EnsembleInconsistency`] if two records use different index
///   lists on one chain, or one covariance name with different matrices.
pub fn export_structure(records: &[Obs], layout: &[usize]) -> Result<ObsStructure> {
    let count: usize = layout.iter().product();
    if records.is_empty() || count != records.len() {
        return Err(Error::ShapeMismatch(
            ErrorInfo::new("export.layout", "layout does not match the number of records")
                .with_context("layout", format_layout(layout))
                .with_context("records", records.len()),
        ));
    }

    let mut idls: BTreeMap<&str, &Idl> = BTreeMap::new();
    for obs in records {
        for chain in obs.chain_names() {
            let Some(idl) = obs.idl(chain) else { continue };
            match idls.get(chain) {
                Some(existing) if *existing != idl => {
                    return Err(Error::EnsembleInconsistency(
                        ErrorInfo::new(
                            "export.idl_mismatch",
                            "records use different configurations on one chain",
                        )
                        .with_context("chain", chain),
                    ))
                }
                Some(_) => {}
                None => {
                    idls.insert(chain, idl);
                }
            }
        }
    }
    check_chain_names(idls.keys().copied())?;

    let mut ensembles: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for &chain in idls.keys() {
        ensembles.entry(ensemble_of(chain)).or_default().push(chain);
    }
    let offsets: Vec<BTreeMap<String, f64>> = records
        .iter()
        .map(|obs| {
            let mut all = BTreeMap::new();
            for chains in obs.ensembles().values() {
                all.extend(replica_offsets(obs, chains));
            }
            all
        })
        .collect();

    let mut data = Vec::with_capacity(ensembles.len());
    for (ensemble, chains) in &ensembles {
        let mut replica = Vec::with_capacity(chains.len());
        for &chain in chains {
            let idl = idls[chain];
            let rows = idl
                .iter()
                .enumerate()
                .map(|(i, config)| DeltaRow {
                    config,
                    deltas: records
                        .iter()
                        .zip(&offsets)
                        .map(|(obs, off)| match obs.deltas(chain) {
                            Some(d) => d[i] + off.get(chain).copied().unwrap_or(0.0),
                            None => 0.0,
                        })
                        .collect(),
                })
                .collect();
            replica.push(ReplicumData {
                name: chain.to_string(),
                deltas: rows,
            });
        }
        data.push(EnsembleData {
            id: ensemble.to_string(),
            replica,
        });
    }

    let mut shared: BTreeMap<&str, &Covobs> = BTreeMap::new();
    for obs in records {
        for (name, cov) in obs.covobs() {
            match shared.get(name.as_str()) {
                Some(existing) if !existing.same_matrix(cov) => {
                    return Err(Error::EnsembleInconsistency(
                        ErrorInfo::new(
                            "export.covobs_mismatch",
                            "one covariance name is used with different matrices",
                        )
                        .with_context("covobs", name),
                    ))
                }
                Some(_) => {}
                None => {
                    shared.insert(name, cov);
                }
            }
        }
    }
    let cdata = shared
        .into_iter()
        .map(|(name, cov)| {
            let dim = cov.dim();
            let matrix = cov.cov();
            CovobsData {
                id: name.to_string(),
                layout: format_layout(&[dim, dim]),
                cov: (0..dim)
                    .flat_map(|i| (0..dim).map(move |j| (i, j)))
                    .map(|(i, j)| matrix[(i, j)])
                    .collect(),
                grad: records
                    .iter()
                    .map(|obs| match obs.covobs().get(name) {
                        Some(c) => c.grad().iter().copied().collect(),
                        None => vec![0.0; dim],
                    })
                    .collect(),
            }
        })
        .collect();

    let kind = match layout {
        [1] => "Obs",
        [_] => "List",
        _ => "Array",
    };
    Ok(ObsStructure {
        kind: kind.to_string(),
        value: records.iter().map(Obs::value).collect(),
        layout: format_layout(layout),
        tag: common_tag(records.iter()),
        reweighted: records.iter().any(Obs::is_reweighted),
        data,
        cdata,
    })
}

/// Rebuild records from their interchange form. Returns the records and
/// their layout.
pub fn import_structure(structure: &ObsStructure) -> Result<(Vec<Obs>, Vec<usize>)> {
    let layout = parse_layout(&structure.layout)?;
    let count = structure.value.len();
    if layout.iter().product::<usize>() != count {
        return Err(Error::ShapeMismatch(
            ErrorInfo::new("export.layout", "layout does not match the number of values")
                .with_context("layout", &structure.layout)
                .with_context("values", count),
        ));
    }

    let mut deltas: Vec<BTreeMap<String, Vec<f64>>> = vec![BTreeMap::new(); count];
    let mut idls: BTreeMap<String, Idl> = BTreeMap::new();
    let mut seen = BTreeSet::new();
    for ensemble in &structure.data {
        for rep in &ensemble.replica {
            if ensemble_of(&rep.name) != ensemble.id || !seen.insert(rep.name.as_str()) {
                return Err(Error::EnsembleInconsistency(
                    ErrorInfo::new("export.chain_name", "replicum does not belong to its ensemble")
                        .with_context("ensemble", &ensemble.id)
                        .with_context("replicum", &rep.name),
                ));
            }
            if let Some(row) = rep.deltas.iter().find(|r| r.deltas.len() != count) {
                return Err(Error::ShapeMismatch(
                    ErrorInfo::new("export.row_length", "row does not hold one delta per record")
                        .with_context("chain", &rep.name)
                        .with_context("config", row.config)
                        .with_context("expected", count),
                ));
            }
            let configs = rep.deltas.iter().map(|r| r.config).collect();
            idls.insert(rep.name.clone(), Idl::from_indices(configs)?);
            for (k, per_record) in deltas.iter_mut().enumerate() {
                per_record.insert(
                    rep.name.clone(),
                    rep.deltas.iter().map(|r| r.deltas[k]).collect(),
                );
            }
        }
    }
    check_chain_names(idls.keys().map(String::as_str))?;

    let mut covobs: Vec<BTreeMap<String, Covobs>> = vec![BTreeMap::new(); count];
    for entry in &structure.cdata {
        let dims = parse_layout(&entry.layout)?;
        let dim = dims.first().copied().unwrap_or(0);
        if dims.len() != 2 || dims[1] != dim || entry.cov.len() != dim * dim || entry.grad.len() != count {
            return Err(Error::ShapeMismatch(
                ErrorInfo::new("export.covobs_shape", "covariance entry has an inconsistent shape")
                    .with_context("covobs", &entry.id)
                    .with_context("layout", &entry.layout),
            ));
        }
        let base = Covobs::new(&entry.id, DMatrix::from_row_slice(dim, dim, &entry.cov), 0)?;
        for (grad, target) in entry.grad.iter().zip(covobs.iter_mut()) {
            if grad.len() != dim {
                return Err(Error::ShapeMismatch(
                    ErrorInfo::new("export.covobs_grad", "gradient length differs from covariance size")
                        .with_context("covobs", &entry.id)
                        .with_context("grad", grad.len()),
                ));
            }
            if grad.iter().all(|g| *g == 0.0) {
                continue;
            }
            target.insert(entry.id.clone(), base.regrad(DVector::from_column_slice(grad)));
        }
    }

    let records = structure
        .value
        .iter()
        .zip(deltas)
        .zip(covobs)
        .map(|((&value, deltas), covobs)| {
            let idl: BTreeMap<String, Idl> = deltas
                .keys()
                .filter_map(|c| Some((c.clone(), idls.get(c)?.clone())))
                .collect();
            let r_values = deltas.keys().map(|c| (c.clone(), value)).collect();
            let mut obs = Obs::from_parts(value, deltas, idl, r_values, covobs);
            obs.set_tag(structure.tag.clone());
            obs.reweighted = structure.reweighted;
            obs
        })
        .collect();
    Ok((records, layout))
}

/// JSON text of a [`JsonFile`] holding the single structure of `records`.
pub fn to_json(records: &[Obs], layout: &[usize]) -> Result<String> {
    JsonFile::new(vec![export_structure(records, layout)?], None).to_json()
}

/// Inverse of [`to_json`]: the records of a file with exactly one structure.
pub fn from_json(json: &str) -> Result<(Vec<Obs>, Vec<usize>)> {
    let file = JsonFile::from_json(json)?;
    match file.obsdata.as_slice() {
        [only] => import_structure(only),
        other => Err(Error::InvalidInput(
            ErrorInfo::new("export.structure_count", "file does not hold exactly one structure")
                .with_context("structures", other.len())
                .with_hint("use JsonFile::records"),
        )),
    }
}

impl Obs {
    /// Jackknife samples of a record living on exactly one chain:
    /// `[value, jk_1, ..., jk_N]`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for records on several chains, with
    /// covariance entries, or with fewer than two configurations.
    pub fn export_jackknife(&self) -> Result<Vec<f64>> {
        let chains: Vec<&str> = self.chain_names().collect();
        let chain = match chains.as_slice() {
            [only] if self.covobs().is_empty() => *only,
            _ => {
                return Err(Error::InvalidInput(
                    ErrorInfo::new(
                        "export.jackknife_chains",
                        "jackknife export needs a record on a single chain",
                    )
                    .with_context("chains", chains.len())
                    .with_context("covobs", self.covobs().len()),
                ))
            }
        };
        let deltas = self.deltas(chain).unwrap_or_default();
        let n = deltas.len();
        if n < 2 {
            return Err(Error::InvalidInput(
                ErrorInfo::new("export.jackknife_size", "jackknife needs two configurations")
                    .with_context("configurations", n),
            ));
        }
        let mean = self.value();
        let r_value = self.r_value(chain).unwrap_or(mean);
        let nf = n as f64;
        let mut jacks = Vec::with_capacity(n + 1);
        jacks.push(mean);
        jacks.extend(deltas.iter().map(|d| (nf * mean - (d + r_value)) / (nf - 1.0)));
        Ok(jacks)
    }
}

/// Rebuild a record from `[value, jk_1, ..., jk_N]` on chain `name`.
/// Configurations default to `1..=N`.
pub fn import_jackknife(jacks: &[f64], name: &str, idl: Option<Idl>) -> Result<Obs> {
    let Some((&value, jk)) = jacks.split_first() else {
        return Err(Error::InvalidInput(ErrorInfo::new(
            "export.jackknife_size",
            "no jackknife samples",
        )));
    };
    let n = jk.len();
    if n < 2 {
        return Err(Error::InvalidInput(
            ErrorInfo::new("export.jackknife_size", "jackknife needs two configurations")
                .with_context("configurations", n),
        ));
    }
    let total: f64 = jk.iter().sum();
    let samples: Vec<f64> = jk.iter().map(|j| total - (n as f64 - 1.0) * j).collect();
    let idl = idl.unwrap_or_else(|| Idl::contiguous(n));
    let mut obs = Obs::with_idl(vec![samples], vec![name], vec![idl])?;
    obs.value = value;
    Ok(obs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_serialize_flat() {
        let row = DeltaRow {
            config: 4,
            deltas: vec![0.5, -1.0],
        };
        assert_eq!(serde_json::to_string(&row).unwrap(), "[4,0.5,-1.0]");
        let back: DeltaRow = serde_json::from_str("[4, 0.5, -1.0]").unwrap();
        assert_eq!(back, row);
        assert!(serde_json::from_str::<DeltaRow>("[1.5, 0.0]").is_err());
        let integral: DeltaRow = serde_json::from_str("[4.0, 0.5, -1.0]").unwrap();
        assert_eq!(integral.config, 4);
    }

    #[test]
    fn configuration_numbers_are_validated() {
        let row = |config: &str| {
            format!(
                r#"{{"value": [1.0], "layout": "1",
                    "data": [{{"id": "e", "replica": [{{"name": "e", "deltas": [[{config}, 0.0]]}}]}}]}}"#
            )
        };
        assert!(from_json(&row("3")).is_ok());
        assert!(from_json(&row("3.0")).is_ok());
        for bad in ["2.5", "-1", "\"x\"", "1e30"] {
            let err = from_json(&row(bad)).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{bad}: {err:?}");
            assert_eq!(err.code(), "export.config");
        }
    }

    #[test]
    fn envelope_carries_provenance() {
        let obs = Obs::new(vec![vec![1.0, 2.0]], vec!["e"]).unwrap();
        let structure = export_structure(&[obs], &[1]).unwrap();
        assert_eq!(structure.kind, "Obs");
        let file = JsonFile::new(vec![structure.clone(), structure], Some(Value::from("test")));
        assert!(file.program.starts_with("errprop "));
        assert_eq!(file.version, FORMAT_VERSION);
        assert!(!file.date.is_empty());

        let back = JsonFile::from_json(&file.to_json().unwrap()).unwrap();
        assert_eq!(back, file);
        assert_eq!(back.records().unwrap().len(), 2);
        let err = from_json(&file.to_json().unwrap()).unwrap_err();
        assert_eq!(err.code(), "export.structure_count");
    }

    #[test]
    fn layout_must_cover_records() {
        let obs = Obs::new(vec![vec![1.0, 2.0]], vec!["e"]).unwrap();
        let err = export_structure(&[obs], &[2]).unwrap_err();
        assert_eq!(err.code(), "export.layout");
        assert_eq!(parse_layout("2, 3").unwrap(), vec![2, 3]);
    }

    #[test]
    fn jackknife_recovers_samples() {
        let samples = vec![1.0, 2.5, 0.5, 3.0];
        let obs = Obs::new(vec![samples.clone()], vec!["e"]).unwrap();
        let jacks = obs.export_jackknife().unwrap();
        assert_eq!(jacks.len(), 5);
        // leave-one-out mean of the first sample
        assert!((jacks[1] - (2.5 + 0.5 + 3.0) / 3.0).abs() < 1e-14);
        let back = import_jackknife(&jacks, "e", None).unwrap();
        for (a, b) in back.deltas("e").unwrap().iter().zip(obs.deltas("e").unwrap()) {
            assert!((a - b).abs() < 1e-13);
        }
    }
}
