//! Reduction modes, loss weights and the shared weighting/reduction step.
//!
//! Every loss produces an unreduced loss tensor first. [`weight_reduce_loss`] then
//! applies the optional element weights and aggregates according to the effective
//! reduction:
//!
//! ```text
//! avg_factor = None:  none → L,   mean → mean(L),                 sum → sum(L)
//! avg_factor = Some:  none → L,   mean → sum(L) / (avg + f32::ε), sum → error
//! ```

use core::{fmt, str::FromStr};

use burn::{
    nn::loss::Reduction,
    prelude::*,
    tensor::{ElementConversion, TensorData},
};
use serde::{Deserialize, Serialize};

use crate::error::{LossError, LossResult};

/// Aggregation applied to an elementwise loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossReduction {
    /// Keep the elementwise loss.
    None,
    /// Average over all elements, or divide the sum by `avg_factor`.
    #[default]
    Mean,
    /// Sum over all elements.
    Sum,
}

impl LossReduction {
    /// Lowercase name as accepted by [`FromStr`].
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Mean => "mean",
            Self::Sum => "sum",
        }
    }

    /// Parse an optional textual override such as a value read from a config file.
    ///
    /// `None` means "use the loss's configured reduction".
    pub fn parse_override(value: Option<&str>) -> LossResult<Option<Self>> {
        value.map(str::parse).transpose()
    }

    /// The reduction actually applied: an override wins over the configured value.
    pub fn resolve(self, reduction_override: Option<Self>) -> Self {
        reduction_override.unwrap_or(self)
    }
}

impl FromStr for LossReduction {
    type Err = LossError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(Self::None),
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            other => Err(LossError::InvalidReduction {
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<&str> for LossReduction {
    type Error = LossError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for LossReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Reduction> for LossReduction {
    fn from(reduction: Reduction) -> Self {
        match reduction {
            Reduction::Mean | Reduction::Auto => Self::Mean,
            Reduction::Sum => Self::Sum,
        }
    }
}

/// Result of a loss evaluation.
#[derive(Debug, Clone)]
pub enum LossOutput<B: Backend, const D: usize> {
    /// Per-element loss, produced when the effective reduction is `none`.
    Elementwise(Tensor<B, D>),
    /// Aggregated loss of shape `[1]`.
    Reduced(Tensor<B, 1>),
}

impl<B: Backend, const D: usize> LossOutput<B, D> {
    /// Shape of the wrapped tensor.
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Self::Elementwise(loss) => loss.dims().to_vec(),
            Self::Reduced(loss) => loss.dims().to_vec(),
        }
    }

    /// Whether the output was aggregated to shape `[1]`.
    pub const fn is_reduced(&self) -> bool {
        matches!(self, Self::Reduced(_))
    }

    /// The aggregated loss, or `None` for an elementwise output.
    pub fn into_reduced(self) -> Option<Tensor<B, 1>> {
        match self {
            Self::Reduced(loss) => Some(loss),
            Self::Elementwise(_) => None,
        }
    }

    /// The elementwise loss, or `None` for a reduced output.
    pub fn into_elementwise(self) -> Option<Tensor<B, D>> {
        match self {
            Self::Elementwise(loss) => Some(loss),
            Self::Reduced(_) => None,
        }
    }

    /// Moves the loss values to the host.
    pub fn into_data(self) -> TensorData {
        match self {
            Self::Elementwise(loss) => loss.into_data(),
            Self::Reduced(loss) => loss.into_data(),
        }
    }

    /// Sum of all entries as `f64`, mostly useful for logging and tests.
    pub fn total(self) -> f64 {
        match self {
            Self::Elementwise(loss) => loss.sum().into_scalar().elem(),
            Self::Reduced(loss) => loss.into_scalar().elem(),
        }
    }

    /// Scales every entry, keeping the variant.
    pub fn mul_scalar(self, factor: f64) -> Self {
        match self {
            Self::Elementwise(loss) => Self::Elementwise(loss.mul_scalar(factor)),
            Self::Reduced(loss) => Self::Reduced(loss.mul_scalar(factor)),
        }
    }

    /// Adds two outputs produced with the same reduction.
    pub fn add(self, other: Self) -> Self {
        match (self, other) {
            (Self::Elementwise(a), Self::Elementwise(b)) => Self::Elementwise(a + b),
            (Self::Reduced(a), Self::Reduced(b)) => Self::Reduced(a + b),
            _ => panic!("Cannot add an elementwise loss to a reduced loss"),
        }
    }
}

/// Optional per-sample or per-element weight for `[n, k]` shaped losses.
#[derive(Debug, Clone)]
pub enum LossWeight<B: Backend> {
    /// One weight per row, shape `[n]`.
    PerRow(Tensor<B, 1>),
    /// One weight per element, shape `[n, k]`.
    PerElement(Tensor<B, 2>),
}

impl<B: Backend> From<Tensor<B, 1>> for LossWeight<B> {
    fn from(weight: Tensor<B, 1>) -> Self {
        Self::PerRow(weight)
    }
}

impl<B: Backend> From<Tensor<B, 2>> for LossWeight<B> {
    fn from(weight: Tensor<B, 2>) -> Self {
        Self::PerElement(weight)
    }
}

impl<B: Backend> LossWeight<B> {
    /// True when no entry is strictly positive.
    pub fn is_all_zero(&self) -> bool {
        let max = match self {
            Self::PerRow(w) if w.shape().num_elements() > 0 => w.clone().max(),
            Self::PerElement(w) if w.shape().num_elements() > 0 => w.clone().max(),
            _ => return true,
        };
        max.into_scalar().elem::<f64>() <= 0.0
    }

    /// Collapse to one weight per row, averaging per-element weights.
    pub fn into_rows(self) -> Tensor<B, 1> {
        match self {
            Self::PerRow(w) => w,
            Self::PerElement(w) => {
                let [n, _] = w.dims();
                w.mean_dim(1).reshape([n])
            }
        }
    }

    /// Expand to one weight per element of an `[n, cols]` loss.
    pub fn into_elements(self, cols: usize) -> Tensor<B, 2> {
        match self {
            Self::PerRow(w) => {
                let [n] = w.dims();
                w.reshape([n, 1]).repeat_dim(1, cols)
            }
            Self::PerElement(w) => {
                let [_, k] = w.dims();
                assert_eq!(k, cols, "Weight has {k} columns, loss has {cols}");
                w
            }
        }
    }

    /// `sum(pred * weight)`, the exact zero returned when every weight is zero.
    pub fn zero_loss(self, pred: Tensor<B, 2>) -> Tensor<B, 1> {
        let [_, cols] = pred.dims();
        (pred * self.into_elements(cols)).sum()
    }
}

/// Rejects an `avg_factor` combined with a `sum` reduction.
pub fn check_avg_factor(reduction: LossReduction, avg_factor: Option<f64>) -> LossResult<()> {
    match (reduction, avg_factor) {
        (LossReduction::Sum, Some(_)) => Err(LossError::AvgFactorWithSum),
        _ => Ok(()),
    }
}

/// Apply element weights and reduce an unreduced loss.
///
/// # Shapes
///
/// - loss: `[...dims]`
/// - weight: `[...dims]` or broadcastable to it
/// - output: `[...dims]` for `none`, `[1]` otherwise
pub fn weight_reduce_loss<B: Backend, const D: usize>(
    loss: Tensor<B, D>,
    weight: Option<Tensor<B, D>>,
    reduction: LossReduction,
    avg_factor: Option<f64>,
) -> LossResult<LossOutput<B, D>> {
    check_avg_factor(reduction, avg_factor)?;

    let loss = match weight {
        Some(weight) => loss * weight,
        None => loss,
    };

    let output = match (reduction, avg_factor) {
        (LossReduction::None, _) => LossOutput::Elementwise(loss),
        (LossReduction::Mean, None) => LossOutput::Reduced(loss.mean()),
        (LossReduction::Mean, Some(avg_factor)) => {
            LossOutput::Reduced(loss.sum().div_scalar(avg_factor + f64::from(f32::EPSILON)))
        }
        (LossReduction::Sum, _) => LossOutput::Reduced(loss.sum()),
    };
    Ok(output)
}

/// Output for an empty prediction: an empty elementwise loss or a zero scalar.
pub fn empty_loss<B: Backend, const D: usize>(
    pred: Tensor<B, D>,
    reduction: LossReduction,
) -> LossOutput<B, D> {
    match reduction {
        LossReduction::None => LossOutput::Elementwise(pred),
        _ => LossOutput::Reduced(pred.sum().mul_scalar(0.0)),
    }
}
