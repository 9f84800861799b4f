//! Mean squared error loss.
//!
//! The unreduced loss is `l = (pred - target)²`.

use core::fmt;

use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};

use crate::{
    error::LossResult,
    reduction::{weight_reduce_loss, LossOutput, LossReduction},
    smooth_l1::assert_same_shape,
};

/// Configuration for creating a [Mean Squared Error loss](MseLoss).
#[derive(Config, Debug)]
pub struct MseLossConfig {
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl MseLossConfig {
    /// Initialize [Mean Squared Error loss](MseLoss).
    pub fn init(&self) -> MseLoss {
        assert!(
            self.loss_weight >= 0.0,
            "Loss weight for MseLoss must be non-negative, got {}",
            self.loss_weight
        );
        MseLoss {
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Mean squared error loss.
#[derive(Clone, Debug)]
pub struct MseLoss {
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for MseLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MseLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MseLoss {{reduction: {}, loss_weight: {}}}",
            self.reduction, self.loss_weight
        )
    }
}

impl MseLoss {
    /// Create a new MSE loss with default configuration.
    pub fn new() -> Self {
        MseLossConfig::new().init()
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
        (pred - target).powf_scalar(2.0)
    }
}
