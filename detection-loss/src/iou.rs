//! IoU and GIoU losses for bounding-box regression.
//!
//! Boxes are `[n, 4]` tensors in `(x1, y1, x2, y2)` format, compared row by row.
//!
//! ```text
//! IoULoss:  linear 1 - iou | square 1 - iou² | log -ln(iou),  iou clamped to eps
//! GIoULoss: 1 - giou
//! ```
//!
//! All IoU-family losses share the same weight handling: when no weight is
//! positive and the loss is reduced, the result is exactly `sum(pred * weight) = 0`.
//! A per-coordinate `[n, 4]` weight is averaged into one weight per box.

use core::fmt;

use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};
use burn_extra_ops::{bbox_overlaps_aligned, OverlapMode};
use serde::{Deserialize, Serialize};

use crate::{
    error::LossResult,
    reduction::{weight_reduce_loss, LossOutput, LossReduction, LossWeight},
};

/// How an IoU value is turned into a loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoUMode {
    /// `1 - iou`
    Linear,
    /// `1 - iou²`
    Square,
    /// `-ln(iou)`
    Log,
}

impl fmt::Display for IoUMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Linear => "linear",
            Self::Square => "square",
            Self::Log => "log",
        })
    }
}

/// Shared forward pass of the IoU-family losses.
pub(crate) fn iou_family_forward<B, F>(
    pred: Tensor<B, 2>,
    target: Tensor<B, 2>,
    weight: Option<LossWeight<B>>,
    reduction: LossReduction,
    avg_factor: Option<f64>,
    loss_weight: f64,
    elementwise: F,
) -> LossResult<LossOutput<B, 1>>
where
    B: Backend,
    F: FnOnce(Tensor<B, 2>, Tensor<B, 2>) -> Tensor<B, 1>,
{
    // with `none` the zero weight flows through and keeps the `[n]` shape
    let reduced = reduction != LossReduction::None;
    if let Some(weight) = weight.as_ref().filter(|w| reduced && w.is_all_zero()) {
        return Ok(LossOutput::Reduced(weight.clone().zero_loss(pred)));
    }

    assert_boxes(&pred, &target);
    let weight = weight.map(LossWeight::into_rows);
    let loss = elementwise(pred, target);
    Ok(weight_reduce_loss(loss, weight, reduction, avg_factor)?.mul_scalar(loss_weight))
}

pub(crate) fn assert_boxes<B: Backend>(pred: &Tensor<B, 2>, target: &Tensor<B, 2>) {
    let pred_dims = pred.dims();
    let target_dims = target.dims();
    assert_eq!(
        pred_dims, target_dims,
        "Shape of predictions ({pred_dims:?}) must match targets ({target_dims:?})"
    );
    assert_eq!(
        pred_dims[1], 4,
        "Boxes must be [n, 4] in (x1, y1, x2, y2) format, got {pred_dims:?}"
    );
}

/// Configuration for creating an [IoU loss](IoULoss).
#[derive(Config, Debug)]
pub struct IoULossConfig {
    /// Transform from IoU to loss. Default: log
    #[config(default = "IoUMode::Log")]
    pub mode: IoUMode,
    /// Lower clamp of the IoU. Default: 1e-6
    #[config(default = 1e-6)]
    pub eps: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl IoULossConfig {
    /// Initialize [IoU loss](IoULoss).
    pub fn init(&self) -> IoULoss {
        self.assertions();
        IoULoss {
            mode: self.mode,
            eps: self.eps,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }

    fn assertions(&self) {
        assert!(
            self.eps > 0.0,
            "Epsilon for IoULoss must be positive, got {}",
            self.eps
        );
    }
}

/// IoU loss.
#[derive(Clone, Debug)]
pub struct IoULoss {
    pub mode: IoUMode,
    pub eps: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for IoULoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IoULoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IoULoss {{mode: {}, eps: {}, reduction: {}, loss_weight: {}}}",
            self.mode, self.eps, self.reduction, self.loss_weight
        )
    }
}

impl IoULoss {
    /// Create a new IoU loss with default configuration.
    pub fn new() -> Self {
        IoULossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, 4]`
    /// - target: `[n, 4]`
    /// - weight: `[n]` or `[n, 4]`
    /// - output: `[n]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 2>,
        weight: Option<LossWeight<B>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, 1>> {
        iou_family_forward(
            pred,
            target,
            weight,
            self.reduction.resolve(reduction_override),
            avg_factor,
            self.loss_weight,
            |pred, target| self.forward_no_reduction(pred, target),
        )
    }

    /// Compute the per-box loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let ious = bbox_overlaps_aligned(pred, target, OverlapMode::IoU, 1e-6).clamp_min(self.eps);
        match self.mode {
            IoUMode::Linear => ious.neg().add_scalar(1.0),
            IoUMode::Square => ious.powf_scalar(2.0).neg().add_scalar(1.0),
            IoUMode::Log => ious.log().neg(),
        }
    }
}

/// Configuration for creating a [GIoU loss](GIoULoss).
#[derive(Config, Debug)]
pub struct GIoULossConfig {
    /// Lower clamp of union and enclosing area. Default: 1e-7
    #[config(default = 1e-7)]
    pub eps: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl GIoULossConfig {
    /// Initialize [GIoU loss](GIoULoss).
    pub fn init(&self) -> GIoULoss {
        assert!(
            self.eps > 0.0,
            "Epsilon for GIoULoss must be positive, got {}",
            self.eps
        );
        GIoULoss {
            eps: self.eps,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Generalized IoU loss.
#[derive(Clone, Debug)]
pub struct GIoULoss {
    pub eps: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for GIoULoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GIoULoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GIoULoss {{eps: {}, reduction: {}, loss_weight: {}}}",
            self.eps, self.reduction, self.loss_weight
        )
    }
}

impl GIoULoss {
    /// Create a new GIoU loss with default configuration.
    pub fn new() -> Self {
        GIoULossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, 4]`
    /// - target: `[n, 4]`
    /// - weight: `[n]` or `[n, 4]`
    /// - output: `[n]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 2>,
        weight: Option<LossWeight<B>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, 1>> {
        iou_family_forward(
            pred,
            target,
            weight,
            self.reduction.resolve(reduction_override),
            avg_factor,
            self.loss_weight,
            |pred, target| self.forward_no_reduction(pred, target),
        )
    }

    /// Compute the per-box loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        bbox_overlaps_aligned(pred, target, OverlapMode::GIoU, self.eps)
            .neg()
            .add_scalar(1.0)
    }
}
