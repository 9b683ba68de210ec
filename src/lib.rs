//! Linear error propagation for Monte Carlo data.
//!
//! Samples measured on Markov chains enter as [`Obs`] records holding the
//! per-configuration fluctuations around the mean. Functions of records are
//! evaluated through [`derive`], which propagates the fluctuations with a
//! Jacobian from forward-mode dual numbers, finite differences, or a caller
//! supplied matrix. Errors are estimated on demand with the Γ-method
//! ([`Obs::gamma_method`]), which accounts for autocorrelations within each
//! ensemble.
//!
//! ```
//! use errprop::{GammaConfig, Obs};
//!
//! let a = Obs::new(vec![vec![1.0, 1.2, 0.9, 1.1, 1.05]], vec!["ens"]).unwrap();
//! let mut b = a.exp() / &a;
//! b.gamma_method(&GammaConfig::default()).unwrap();
//! assert!(b.dvalue().unwrap() > 0.0);
//! ```

pub mod cobs;
pub mod corr;
pub mod covobs;
pub mod derive;
pub mod dual;
pub mod error;
pub mod export;
pub mod float;
pub mod gamma;
pub mod implicit;
pub mod jacobian;
pub mod linalg;
pub mod obs;
pub mod scalar;
mod traits;

pub use cobs::CObs;
pub use corr::{Corr, MassVariant, PlateauMethod, Stencil};
pub use covobs::Covobs;
pub use derive::derive;
pub use dual::Dual;
pub use error::{Error, ErrorInfo, Result};
pub use export::{
    export_structure, from_json, import_jackknife, import_structure, to_json, JsonFile,
    ObsStructure, FORMAT_VERSION,
};
pub use float::Float;
pub use gamma::{
    estimate, EnsembleAnalysis, EnsembleOverride, ErrorSummary, GammaConfig, WindowFallback,
    WindowMode,
};
pub use implicit::derive_implicit;
pub use jacobian::{jacobian, jvp, Automatic, JacobianProvider, Manual, NumDiffConfig, Numerical};
pub use linalg::{CObsMatrix, Differentiation, ObsMatrix, Operand};
pub use obs::{reweight, Idl, Obs};
pub use scalar::Scalar;

/// Type alias for forward-mode dual numbers over `f64`.
pub type Dual64 = Dual<f64>;
