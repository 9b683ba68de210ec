//! Error taxonomy.
//!
//! Every variant carries an [`ErrorInfo`] with a stable code, a message, and
//! optional context pairs (chain names, shapes) plus a remediation hint.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`Error`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable code, e.g. `"derive.jacobian_shape"`.
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "; hint: {hint}")?;
        }
        Ok(())
    }
}

/// Errors raised at the crate's call boundaries.
///
/// Degraded estimates (a window search that did not converge) are not errors;
/// they are flagged on the [`ErrorSummary`](crate::ErrorSummary).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Jacobian, output, or matrix dimensions disagree.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(ErrorInfo),
    /// Chains, index lists, or covariance entries cannot be reconciled.
    #[error("ensemble inconsistency: {0}")]
    EnsembleInconsistency(ErrorInfo),
    /// Automatic differentiation produced a non-finite derivative.
    #[error("unsupported differentiation: {0}")]
    UnsupportedDifferentiation(ErrorInfo),
    /// An operand variant the requested operation does not accept.
    #[error("type mismatch: {0}")]
    TypeMismatch(ErrorInfo),
    /// Malformed user input (empty samples, bad index list, non-PSD covariance).
    #[error("invalid input: {0}")]
    InvalidInput(ErrorInfo),
    /// A matrix that must be inverted is singular.
    #[error("singular matrix: {0}")]
    Singular(ErrorInfo),
    /// Serialization failure at the export boundary.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Error {
    /// The structured payload of any variant.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            Error::ShapeMismatch(info)
            | Error::EnsembleInconsistency(info)
            | Error::UnsupportedDifferentiation(info)
            | Error::TypeMismatch(info)
            | Error::InvalidInput(info)
            | Error::Singular(info)
            | Error::Serde(info) => info,
        }
    }

    /// Shorthand for the stable code of the payload.
    pub fn code(&self) -> &str {
        &self.info().code
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(
            ErrorInfo::new("export.json", err.to_string())
                .with_context("line", err.line())
                .with_context("column", err.column()),
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
