//! Smooth L1 and L1 losses for box regression.
//!
//! The unreduced Smooth L1 loss is:
//! ```text
//! d = |pred - target|
//! l = 0.5 * d² / β      if d < β
//! l = d - 0.5 * β       otherwise
//! ```
//!
//! The L1 loss is `l = |pred - target|`.

use core::fmt;

use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};

use crate::{
    error::LossResult,
    reduction::{check_avg_factor, empty_loss, weight_reduce_loss, LossOutput, LossReduction},
};

/// Configuration for creating a [Smooth L1 loss](SmoothL1Loss).
#[derive(Config, Debug)]
pub struct SmoothL1LossConfig {
    /// Transition point from the quadratic to the linear part. Default: 1.0
    #[config(default = 1.0)]
    pub beta: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl SmoothL1LossConfig {
    /// Initialize [Smooth L1 loss](SmoothL1Loss).
    pub fn init(&self) -> SmoothL1Loss {
        self.assertions();
        SmoothL1Loss {
            beta: self.beta,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }

    fn assertions(&self) {
        assert!(
            self.beta > 0.0,
            "Beta for SmoothL1Loss must be positive, got {}",
            self.beta
        );
        assert!(
            self.loss_weight >= 0.0,
            "Loss weight for SmoothL1Loss must be non-negative, got {}",
            self.loss_weight
        );
    }
}

/// Smooth L1 loss.
#[derive(Clone, Debug)]
pub struct SmoothL1Loss {
    pub beta: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for SmoothL1Loss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SmoothL1Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SmoothL1Loss {{beta: {}, reduction: {}, loss_weight: {}}}",
            self.beta, self.reduction, self.loss_weight
        )
    }
}

impl SmoothL1Loss {
    /// Create a new Smooth L1 loss with default configuration.
    pub fn new() -> Self {
        SmoothL1LossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[...dims]`
    /// - target: `[...dims]`
    /// - weight: `[...dims]`
    /// - output: `[...dims]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend, const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
        weight: Option<Tensor<B, D>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, D>> {
        let reduction = self.reduction.resolve(reduction_override);
        if target.shape().num_elements() == 0 {
            check_avg_factor(reduction, avg_factor)?;
            return Ok(empty_loss(pred, reduction));
        }

        let loss = self.forward_no_reduction(pred, target);
        Ok(weight_reduce_loss(loss, weight, reduction, avg_factor)?.mul_scalar(self.loss_weight))
    }

    /// Compute the criterion without weighting or reduction.
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> Tensor<B, D> {
        assert_same_shape(&pred, &target);
        smooth_l1(pred - target, self.beta)
    }
}

/// Elementwise Smooth L1 of a difference tensor.
fn smooth_l1<B: Backend, const D: usize>(diff: Tensor<B, D>, beta: f64) -> Tensor<B, D> {
    let diff = diff.abs();
    let quadratic = diff.clone().powf_scalar(2.0).mul_scalar(0.5 / beta);
    let linear = diff.clone().sub_scalar(0.5 * beta);
    linear.mask_where(diff.lower_elem(beta), quadratic)
}

/// Configuration for creating an [L1 loss](L1Loss).
#[derive(Config, Debug)]
pub struct L1LossConfig {
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl L1LossConfig {
    /// Initialize [L1 loss](L1Loss).
    pub fn init(&self) -> L1Loss {
        assert!(
            self.loss_weight >= 0.0,
            "Loss weight for L1Loss must be non-negative, got {}",
            self.loss_weight
        );
        L1Loss {
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// L1 loss.
#[derive(Clone, Debug)]
pub struct L1Loss {
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for L1Loss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for L1Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "L1Loss {{reduction: {}, loss_weight: {}}}",
            self.reduction, self.loss_weight
        )
    }
}

impl L1Loss {
    /// Create a new L1 loss with default configuration.
    pub fn new() -> Self {
        L1LossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[...dims]`
    /// - target: `[...dims]`
    /// - weight: `[...dims]`
    /// - output: `[...dims]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend, const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
        weight: Option<Tensor<B, D>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, D>> {
        let reduction = self.reduction.resolve(reduction_override);
        if target.shape().num_elements() == 0 {
            check_avg_factor(reduction, avg_factor)?;
            return Ok(empty_loss(pred, reduction));
        }

        let loss = self.forward_no_reduction(pred, target);
        Ok(weight_reduce_loss(loss, weight, reduction, avg_factor)?.mul_scalar(self.loss_weight))
    }

    /// Compute the criterion without weighting or reduction.
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> Tensor<B, D> {
        assert_same_shape(&pred, &target);
        (pred - target).abs()
    }
}

pub(crate) fn assert_same_shape<B: Backend, const D: usize>(
    pred: &Tensor<B, D>,
    target: &Tensor<B, D>,
) {
    let pred_dims = pred.dims();
    let target_dims = target.dims();
    assert_eq!(
        pred_dims, target_dims,
        "Shape of predictions ({pred_dims:?}) must match targets ({target_dims:?})"
    );
}
