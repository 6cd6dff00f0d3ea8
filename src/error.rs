//! Error types for the GSPCR pipeline.
//!
//! Two levels exist. [`GspcrError`] is what public entry points return;
//! configuration problems are reported through it before any fitting starts.
//! [`FitError`] describes a failure confined to a single outcome-model fit. The
//! cross-validation loop records those as failed cells instead of aborting.

use thiserror::Error;

/// Failure of a single outcome-model fit.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FitError {
    #[error("iterative fit did not converge after {iterations} iterations")]
    ConvergenceFailed { iterations: usize },

    #[error("fitted probabilities are numerically 0 or 1 (perfect separation)")]
    Separation,

    #[error("normal equations are singular or nearly singular")]
    Singular,

    #[error("degenerate outcome: {0}")]
    DegenerateOutcome(String),

    #[error("fit produced a non-finite value: {0}")]
    NonFinite(String),
}

/// Errors returned by the public API.
#[derive(Debug, Error)]
pub enum GspcrError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dimension mismatch: X has {x_rows} rows but y has {y_len} elements")]
    DimensionMismatch { x_rows: usize, y_len: usize },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("model fit failed: {0}")]
    Fit(#[from] FitError),

    #[error("cannot build a threshold grid: fewer than two distinct finite predictor scores")]
    DegenerateGrid,

    #[error("component extraction failed: {0}")]
    Extraction(String),

    #[error("no valid solution: every (threshold, Q) cell is undefined")]
    NoValidSolution,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GspcrError {
    /// Convenience constructor used by config validation.
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        GspcrError::InvalidConfig(msg.into())
    }
}
