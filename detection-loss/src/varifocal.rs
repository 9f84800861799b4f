//! Varifocal loss for IoU-aware classification scores.
//!
//! Targets are `[n, c]` IoU-aware classification scores: the IoU with the
//! matched ground truth at the ground-truth class, zero elsewhere. Positives are
//! weighted by their target (or by one), negatives by `α · |sigmoid(x) - t|^γ`.

use core::fmt;

use burn::{
    config::Config,
    tensor::{activation, backend::Backend, Tensor},
};

use crate::{
    cross_entropy::binary_cross_entropy_with_logits,
    error::LossResult,
    reduction::{weight_reduce_loss, LossOutput, LossReduction, LossWeight},
    smooth_l1::assert_same_shape,
};

/// Configuration for creating a [Varifocal loss](VarifocalLoss).
#[derive(Config, Debug)]
pub struct VarifocalLossConfig {
    /// Weight of the negative term. Default: 0.75
    #[config(default = 0.75)]
    pub alpha: f64,
    /// Exponent of the negative modulating factor. Default: 2.0
    #[config(default = 2.0)]
    pub gamma: f64,
    /// Scale positives by their IoU target instead of one. Default: true
    #[config(default = true)]
    pub iou_weighted: bool,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl VarifocalLossConfig {
    /// Initialize [Varifocal loss](VarifocalLoss).
    pub fn init(&self) -> VarifocalLoss {
        self.assertions();
        VarifocalLoss {
            alpha: self.alpha,
            gamma: self.gamma,
            iou_weighted: self.iou_weighted,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }

    fn assertions(&self) {
        assert!(
            self.alpha >= 0.0,
            "Alpha for VarifocalLoss must be non-negative, got {}",
            self.alpha
        );
        assert!(
            self.gamma >= 0.0,
            "Gamma for VarifocalLoss must be non-negative, got {}",
            self.gamma
        );
    }
}

/// Varifocal loss.
#[derive(Clone, Debug)]
pub struct VarifocalLoss {
    pub alpha: f64,
    pub gamma: f64,
    pub iou_weighted: bool,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for VarifocalLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VarifocalLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VarifocalLoss {{alpha: {}, gamma: {}, iou_weighted: {}, reduction: {}, loss_weight: {}}}",
            self.alpha, self.gamma, self.iou_weighted, self.reduction, self.loss_weight
        )
    }
}

impl VarifocalLoss {
    /// Create a new varifocal loss with default configuration.
    pub fn new() -> Self {
        VarifocalLossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, c]` logits
    /// - target: `[n, c]` IoU-aware scores
    /// - weight: `[n]` or `[n, c]`
    /// - output: `[n, c]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 2>,
        weight: Option<LossWeight<B>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, 2>> {
        let reduction = self.reduction.resolve(reduction_override);
        let [_, num_classes] = pred.dims();
        let weight = weight.map(|weight| weight.into_elements(num_classes));

        let loss = self.forward_no_reduction(pred, target);
        Ok(weight_reduce_loss(loss, weight, reduction, avg_factor)?.mul_scalar(self.loss_weight))
    }

    /// Compute the per-class loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        assert_same_shape(&pred, &target);
        let prob = activation::sigmoid(pred.clone());

        let positive = target.clone().greater_elem(0.0);
        let negative_weight = (prob - target.clone())
            .abs()
            .powf_scalar(self.gamma)
            .mul_scalar(self.alpha);
        let positive_weight = if self.iou_weighted {
            target.clone()
        } else {
            target.ones_like()
        };
        let focal_weight = negative_weight.mask_where(positive, positive_weight);

        binary_cross_entropy_with_logits(pred, target) * focal_weight
    }
}
