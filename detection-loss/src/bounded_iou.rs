//! Bounded IoU loss.
//!
//! Bounds the IoU achievable by each coordinate independently, with the target
//! treated as a constant. Each of the four per-coordinate terms is then smoothed
//! with a Smooth-L1 transition at `beta`, giving an `[n, 4]` elementwise loss.

use core::fmt;

use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};
use burn_extra_ops::BoxCorners;

use crate::{
    error::LossResult,
    iou::assert_boxes,
    reduction::{weight_reduce_loss, LossOutput, LossReduction, LossWeight},
};

/// Configuration for creating a [Bounded IoU loss](BoundedIoULoss).
#[derive(Config, Debug)]
pub struct BoundedIoULossConfig {
    /// Smooth-L1 transition point. Default: 0.2
    #[config(default = 0.2)]
    pub beta: f64,
    /// Added to the denominators. Default: 1e-3
    #[config(default = 1e-3)]
    pub eps: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl BoundedIoULossConfig {
    /// Initialize [Bounded IoU loss](BoundedIoULoss).
    pub fn init(&self) -> BoundedIoULoss {
        assert!(
            self.beta > 0.0,
            "Beta for BoundedIoULoss must be positive, got {}",
            self.beta
        );
        BoundedIoULoss {
            beta: self.beta,
            eps: self.eps,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Bounded IoU loss.
#[derive(Clone, Debug)]
pub struct BoundedIoULoss {
    pub beta: f64,
    pub eps: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for BoundedIoULoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BoundedIoULoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BoundedIoULoss {{beta: {}, eps: {}, reduction: {}, loss_weight: {}}}",
            self.beta, self.eps, self.reduction, self.loss_weight
        )
    }
}

impl BoundedIoULoss {
    /// Create a new Bounded IoU loss with default configuration.
    pub fn new() -> Self {
        BoundedIoULossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// A per-box `[n]` weight is shared by the four coordinates of its box.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, 4]`
    /// - target: `[n, 4]`
    /// - weight: `[n]` or `[n, 4]`
    /// - output: `[n, 4]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 2>,
        weight: Option<LossWeight<B>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, 2>> {
        let reduction = self.reduction.resolve(reduction_override);
        if let Some(weight) = weight.as_ref().filter(|w| w.is_all_zero()) {
            return Ok(LossOutput::Reduced(weight.clone().zero_loss(pred)));
        }

        let weight = weight.map(|w| w.into_elements(4));
        let loss = self.forward_no_reduction(pred, target);
        Ok(weight_reduce_loss(loss, weight, reduction, avg_factor)?.mul_scalar(self.loss_weight))
    }

    /// Compute the per-coordinate loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        assert_boxes(&pred, &target);
        let eps = self.eps;

        let pred = BoxCorners::from_boxes(pred);
        let target = BoxCorners::from_boxes(target.detach());
        let (pred_w, pred_h) = (pred.width(), pred.height());
        let (target_w, target_h) = (target.width(), target.height());

        let offset_term = |extent: Tensor<B, 1>, delta: Tensor<B, 1>| {
            let twice = delta.abs().mul_scalar(2.0);
            let bound = (extent.clone() - twice.clone()) / (extent + twice).add_scalar(eps);
            bound.clamp_min(0.0).neg().add_scalar(1.0)
        };
        let scale_term = |target_extent: Tensor<B, 1>, pred_extent: Tensor<B, 1>| {
            let a = target_extent.clone() / pred_extent.clone().add_scalar(eps);
            let b = pred_extent / target_extent.add_scalar(eps);
            a.min_pair(b).neg().add_scalar(1.0)
        };

        let loss_dx = offset_term(target_w.clone(), target.center_x() - pred.center_x());
        let loss_dy = offset_term(target_h.clone(), target.center_y() - pred.center_y());
        let loss_dw = scale_term(target_w, pred_w);
        let loss_dh = scale_term(target_h, pred_h);

        let combined = Tensor::stack::<2>(vec![loss_dx, loss_dy, loss_dw, loss_dh], 1);
        signed_smooth_l1(combined, self.beta)
    }
}

/// Smooth-L1 transition applied to the signed term.
///
/// Degenerate boxes can make an offset term negative; such values stay on the
/// quadratic branch instead of being folded by `abs`.
fn signed_smooth_l1<B: Backend>(term: Tensor<B, 2>, beta: f64) -> Tensor<B, 2> {
    let quadratic = term.clone().powf_scalar(2.0).mul_scalar(0.5 / beta);
    let linear = term.clone().sub_scalar(0.5 * beta);
    linear.mask_where(term.lower_elem(beta), quadratic)
}
