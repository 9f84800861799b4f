//! Error types for loss evaluation.
//!
//! Only call-contract violations are reported as errors. Shape mismatches and
//! invalid hyper-parameters are programmer errors and panic with a descriptive
//! message instead, the same way Burn's own loss modules behave.

use thiserror::Error;

/// The error type for loss evaluation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LossError {
    /// A reduction override outside of `none`, `mean` and `sum` was supplied.
    #[error("Invalid reduction: {value:?}, expected one of \"none\", \"mean\" or \"sum\"")]
    InvalidReduction {
        /// The rejected value.
        value: String,
    },

    /// An `avg_factor` was combined with a `sum` reduction.
    #[error("avg_factor can not be used with reduction=\"sum\"")]
    AvgFactorWithSum,
}

/// A specialized `Result` type for loss evaluation.
pub type LossResult<T> = Result<T, LossError>;
