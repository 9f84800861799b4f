//! Loss functions for object detection training.
//!
//! This crate provides the bounding-box regression, classification and
//! quality-estimation losses used by modern object detectors, built on the Burn
//! deep learning framework. All losses are backend-agnostic and differentiable.
//!
//! ## Loss Functions
//!
//! ### Box Regression
//! - **[`SmoothL1Loss`]**, **[`L1Loss`]**, **[`MseLoss`]**: elementwise distance losses
//! - **[`BalancedL1Loss`]**: Smooth L1 with a promoted inlier gradient
//! - **[`IoULoss`]**, **[`GIoULoss`]**, **[`DIoULoss`]**, **[`CIoULoss`]**: overlap based losses
//! - **[`BoundedIoULoss`]**: per-coordinate upper bound of the IoU loss
//! - **[`GhmR`]**: gradient-harmonized Authentic Smooth L1
//!
//! ### Classification
//! - **[`CrossEntropyLoss`]**, **[`BinaryCrossEntropyLoss`]**: softmax and sigmoid cross-entropy
//! - **[`FocalLoss`]**: sigmoid focal loss for dense detectors
//! - **[`SeesawLoss`]**: long-tail aware softmax loss with an objectness branch
//! - **[`GhmC`]**: gradient-harmonized sigmoid cross-entropy
//!
//! ### Quality and Distribution
//! - **[`QualityFocalLoss`]**, **[`DistributionFocalLoss`]**: generalized focal losses
//! - **[`VarifocalLoss`]**: IoU-aware classification loss
//! - **[`GaussianFocalLoss`]**: focal loss for Gaussian heatmaps
//! - **[`KnowledgeDistillationKlDivLoss`]**: temperature-softened distillation
//!
//! ## Calling Convention
//!
//! Every loss is created from its `XxxConfig` and exposes
//! `forward(pred, target, weight, reduction_override, avg_factor)` together with
//! a `forward_no_reduction` variant. The reduction override is a typed
//! [`LossReduction`], so values other than `none`, `mean` and `sum` are rejected
//! when they are parsed or deserialized. An `avg_factor` replaces the element
//! count of a `mean` reduction and is rejected for `sum`:
//!
//! ```rust
//! use burn::{backend::NdArray, tensor::Tensor};
//! use detection_loss::{LossError, LossReduction, SmoothL1Loss};
//!
//! let device = Default::default();
//! let pred = Tensor::<NdArray, 2>::zeros([2, 4], &device);
//! let target = Tensor::<NdArray, 2>::ones([2, 4], &device);
//! let loss = SmoothL1Loss::new();
//!
//! let mean = loss.forward(pred.clone(), target.clone(), None, None, Some(4.0));
//! assert!(mean.is_ok());
//!
//! let reduction = LossReduction::parse_override(Some("sum")).unwrap();
//! let sum = loss.forward(pred, target, None, reduction, Some(4.0));
//! assert_eq!(sum.unwrap_err(), LossError::AvgFactorWithSum);
//! ```

mod balanced_l1;
mod bounded_iou;
mod cross_entropy;
mod distance_iou;
mod error;
mod focal;
mod gaussian_focal;
mod gfocal;
mod ghm;
mod iou;
mod kd;
mod mse;
mod reduction;
mod seesaw;
mod smooth_l1;
mod varifocal;

pub use balanced_l1::{BalancedL1Loss, BalancedL1LossConfig};
pub use bounded_iou::{BoundedIoULoss, BoundedIoULossConfig};
pub use cross_entropy::{
    BinaryCrossEntropyLoss, BinaryCrossEntropyLossConfig, CrossEntropyLoss,
    CrossEntropyLossConfig, DEFAULT_IGNORE_INDEX,
};
pub use distance_iou::{CIoULoss, CIoULossConfig, DIoULoss, DIoULossConfig};
pub use error::{LossError, LossResult};
pub use focal::{FocalLoss, FocalLossConfig};
pub use gaussian_focal::{GaussianFocalLoss, GaussianFocalLossConfig};
pub use gfocal::{
    DistributionFocalLoss, DistributionFocalLossConfig, QualityFocalLoss, QualityFocalLossConfig,
};
pub use ghm::{GhmC, GhmCConfig, GhmR, GhmRConfig};
pub use iou::{GIoULoss, GIoULossConfig, IoULoss, IoULossConfig, IoUMode};
pub use kd::{KnowledgeDistillationKlDivLoss, KnowledgeDistillationKlDivLossConfig};
pub use mse::{MseLoss, MseLossConfig};
pub use reduction::{
    check_avg_factor, weight_reduce_loss, LossOutput, LossReduction, LossWeight,
};
pub use seesaw::{SeesawLoss, SeesawLossConfig, SeesawOutput};
pub use smooth_l1::{L1Loss, L1LossConfig, SmoothL1Loss, SmoothL1LossConfig};
pub use varifocal::{VarifocalLoss, VarifocalLossConfig};
