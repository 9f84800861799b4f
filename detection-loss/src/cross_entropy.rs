//! Softmax and sigmoid cross-entropy for classification heads.
//!
//! [`CrossEntropyLoss`] applies a softmax over the class axis and yields one loss
//! per sample. [`BinaryCrossEntropyLoss`] treats every class as an independent
//! binary problem and yields one loss per sample and class; integer labels are
//! expanded to one-hot rows where labels outside `[0, c)` become all-zero rows.
//!
//! Samples whose label equals `ignore_index` contribute nothing. With
//! `avg_non_ignore` and a mean reduction, the loss is averaged over the
//! non-ignored samples only.

use core::fmt;

use burn::{
    config::Config,
    tensor::{activation, backend::Backend, ElementConversion, Int, Tensor},
};
use burn_extra_ops::one_hot;

use crate::{
    error::LossResult,
    reduction::{weight_reduce_loss, LossOutput, LossReduction},
};

/// Label value used to mark ignored samples when none is configured.
pub const DEFAULT_IGNORE_INDEX: i64 = -100;

/// Numerically stable elementwise `BCE(sigmoid(logits), target)`.
pub(crate) fn binary_cross_entropy_with_logits<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, D> {
    // max(x, 0) - x·y + ln(1 + e^(-|x|))
    let softplus = logits.clone().abs().neg().exp().add_scalar(1.0).log();
    logits.clone().clamp_min(0.0) - logits * target + softplus
}

/// Elementwise BCE with logits where positives are scaled by `pos_weight`.
fn binary_cross_entropy_with_logits_pos_weight<B: Backend>(
    logits: Tensor<B, 2>,
    target: Tensor<B, 2>,
    pos_weight: Tensor<B, 2>,
) -> Tensor<B, 2> {
    // (1 - y)·x + (1 + (p - 1)·y) · (ln(1 + e^(-|x|)) + max(-x, 0))
    let log_weight = (pos_weight.sub_scalar(1.0) * target.clone()).add_scalar(1.0);
    let softplus = logits.clone().abs().neg().exp().add_scalar(1.0).log()
        + logits.clone().neg().clamp_min(0.0);
    target.neg().add_scalar(1.0) * logits + log_weight * softplus
}

/// Softmax cross-entropy of `[n, c]` logits against `[n, c]` (soft) one-hot targets.
pub(crate) fn softmax_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    target: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let [n, _] = logits.dims();
    let log_probs = activation::log_softmax(logits, 1);
    (log_probs * target).sum_dim(1).reshape([n]).neg()
}

/// Mask of samples that are neither negative nor ignored, as `0.0 / 1.0`.
fn non_ignored_mask<B: Backend>(labels: Tensor<B, 1, Int>, ignore_index: i64) -> Tensor<B, 1> {
    let non_negative = labels.clone().greater_equal_elem(0).float();
    let kept = labels.not_equal_elem(ignore_index).float();
    non_negative * kept
}

fn class_weight_tensor<B: Backend>(
    class_weight: &[f64],
    num_classes: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    assert_eq!(
        class_weight.len(),
        num_classes,
        "Class weight has {} entries, predictions have {num_classes} classes",
        class_weight.len()
    );
    Tensor::<B, 1>::from_floats(class_weight, device).reshape([1, num_classes])
}

fn assert_labels<B: Backend>(pred: &Tensor<B, 2>, labels: &Tensor<B, 1, Int>) {
    let [n, _] = pred.dims();
    let [m] = labels.dims();
    assert_eq!(
        n, m,
        "Batch size of predictions ({n}) must match labels ({m})"
    );
}

fn warn_ignored_mean(ignore_index: Option<i64>, avg_non_ignore: bool, reduction: LossReduction) {
    if ignore_index.is_some() && !avg_non_ignore && reduction == LossReduction::Mean {
        tracing::warn!(
            "avg_non_ignore is off: ignored labels still count towards the mean; \
             set avg_non_ignore to average over non-ignored labels only"
        );
    }
}

/// Configuration for creating a [Cross-entropy loss](CrossEntropyLoss).
#[derive(Config, Debug)]
pub struct CrossEntropyLossConfig {
    /// Per-class rescaling weights.
    pub class_weight: Option<Vec<f64>>,
    /// Label marking samples that contribute no loss. Default: -100
    pub ignore_index: Option<i64>,
    /// Average over non-ignored samples instead of all samples. Default: false
    #[config(default = false)]
    pub avg_non_ignore: bool,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl CrossEntropyLossConfig {
    /// Initialize [Cross-entropy loss](CrossEntropyLoss).
    pub fn init(&self) -> CrossEntropyLoss {
        warn_ignored_mean(self.ignore_index, self.avg_non_ignore, self.reduction);
        CrossEntropyLoss {
            class_weight: self.class_weight.clone(),
            ignore_index: self.ignore_index.unwrap_or(DEFAULT_IGNORE_INDEX),
            avg_non_ignore: self.avg_non_ignore,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Softmax cross-entropy loss.
#[derive(Clone, Debug)]
pub struct CrossEntropyLoss {
    pub class_weight: Option<Vec<f64>>,
    pub ignore_index: i64,
    pub avg_non_ignore: bool,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for CrossEntropyLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CrossEntropyLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CrossEntropyLoss {{ignore_index: {}, avg_non_ignore: {}, reduction: {}, loss_weight: {}}}",
            self.ignore_index, self.avg_non_ignore, self.reduction, self.loss_weight
        )
    }
}

impl CrossEntropyLoss {
    /// Create a new cross-entropy loss with default configuration.
    pub fn new() -> Self {
        CrossEntropyLossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, c]` logits
    /// - labels: `[n]` class indices
    /// - weight: `[n]`
    /// - output: `[n]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
        weight: Option<Tensor<B, 1>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, 1>> {
        let reduction = self.reduction.resolve(reduction_override);
        let avg_factor = match avg_factor {
            None if self.avg_non_ignore && reduction == LossReduction::Mean => Some(
                labels
                    .clone()
                    .not_equal_elem(self.ignore_index)
                    .int()
                    .sum()
                    .into_scalar()
                    .elem::<f64>(),
            ),
            other => other,
        };

        let loss = self.forward_no_reduction(pred, labels);
        Ok(weight_reduce_loss(loss, weight, reduction, avg_factor)?.mul_scalar(self.loss_weight))
    }

    /// Compute the per-sample loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        assert_labels(&pred, &labels);
        let [n, num_classes] = pred.dims();
        let device = pred.device();

        let kept = labels.clone().not_equal_elem(self.ignore_index).float();
        let target = one_hot(labels, num_classes) * kept.reshape([n, 1]);
        let loss = softmax_cross_entropy(pred, target.clone());

        match &self.class_weight {
            Some(class_weight) => {
                let class_weight = class_weight_tensor::<B>(class_weight, num_classes, &device);
                loss * (target * class_weight).sum_dim(1).reshape([n])
            }
            None => loss,
        }
    }
}

/// Configuration for creating a [Binary cross-entropy loss](BinaryCrossEntropyLoss).
#[derive(Config, Debug)]
pub struct BinaryCrossEntropyLossConfig {
    /// Per-class weights applied to positive targets.
    pub class_weight: Option<Vec<f64>>,
    /// Label marking samples that contribute no loss. Default: -100
    pub ignore_index: Option<i64>,
    /// Average over non-ignored elements instead of all elements. Default: false
    #[config(default = false)]
    pub avg_non_ignore: bool,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl BinaryCrossEntropyLossConfig {
    /// Initialize [Binary cross-entropy loss](BinaryCrossEntropyLoss).
    pub fn init(&self) -> BinaryCrossEntropyLoss {
        warn_ignored_mean(self.ignore_index, self.avg_non_ignore, self.reduction);
        BinaryCrossEntropyLoss {
            class_weight: self.class_weight.clone(),
            ignore_index: self.ignore_index.unwrap_or(DEFAULT_IGNORE_INDEX),
            avg_non_ignore: self.avg_non_ignore,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Sigmoid (per-class binary) cross-entropy loss.
#[derive(Clone, Debug)]
pub struct BinaryCrossEntropyLoss {
    pub class_weight: Option<Vec<f64>>,
    pub ignore_index: i64,
    pub avg_non_ignore: bool,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for BinaryCrossEntropyLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BinaryCrossEntropyLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BinaryCrossEntropyLoss {{ignore_index: {}, avg_non_ignore: {}, reduction: {}, loss_weight: {}}}",
            self.ignore_index, self.avg_non_ignore, self.reduction, self.loss_weight
        )
    }
}

impl BinaryCrossEntropyLoss {
    /// Create a new binary cross-entropy loss with default configuration.
    pub fn new() -> Self {
        BinaryCrossEntropyLossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, c]` logits
    /// - labels: `[n]` class indices
    /// - weight: `[n]`, shared by all classes of a sample
    /// - output: `[n, c]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
        weight: Option<Tensor<B, 1>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, 2>> {
        assert_labels(&pred, &labels);
        let reduction = self.reduction.resolve(reduction_override);
        let [n, num_classes] = pred.dims();

        let valid = non_ignored_mask(labels.clone(), self.ignore_index).reshape([n, 1]);
        let element_weight = match weight {
            Some(weight) => weight.reshape([n, 1]) * valid.clone(),
            None => valid.clone(),
        }
        .repeat_dim(1, num_classes);

        let avg_factor = match avg_factor {
            None if self.avg_non_ignore && reduction == LossReduction::Mean => {
                Some(valid.sum().into_scalar().elem::<f64>() * num_classes as f64)
            }
            other => other,
        };

        let loss = self.forward_no_reduction(pred, labels);
        Ok(
            weight_reduce_loss(loss, Some(element_weight), reduction, avg_factor)?
                .mul_scalar(self.loss_weight),
        )
    }

    /// Compute the per-class loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
    ) -> Tensor<B, 2> {
        assert_labels(&pred, &labels);
        let [_, num_classes] = pred.dims();
        let device = pred.device();
        let target = one_hot(labels, num_classes);

        match &self.class_weight {
            Some(class_weight) => {
                let pos_weight = class_weight_tensor::<B>(class_weight, num_classes, &device)
                    .repeat_dim(0, pred.dims()[0]);
                binary_cross_entropy_with_logits_pos_weight(pred, target, pos_weight)
            }
            None => binary_cross_entropy_with_logits(pred, target),
        }
    }
}
