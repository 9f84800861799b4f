//! Generalized focal losses: Quality Focal Loss and Distribution Focal Loss.
//!
//! QFL extends the focal loss to continuous IoU-quality targets: the positive
//! class of each sample is trained towards its quality score, every other class
//! towards zero, and both are modulated by `|target - sigmoid(x)|^β`.
//!
//! DFL learns a discrete distribution over integral bins for each box edge. A
//! continuous target `y` between bins `⌊y⌋` and `⌊y⌋ + 1` is split into the two
//! neighbouring bins with linear interpolation weights.

use core::fmt;

use burn::{
    config::Config,
    tensor::{activation, backend::Backend, Int, Tensor},
};
use burn_extra_ops::one_hot;

use crate::{
    cross_entropy::{binary_cross_entropy_with_logits, softmax_cross_entropy},
    error::LossResult,
    reduction::{weight_reduce_loss, LossOutput, LossReduction},
};

/// Configuration for creating a [Quality focal loss](QualityFocalLoss).
#[derive(Config, Debug)]
pub struct QualityFocalLossConfig {
    /// Modulating exponent. Default: 2.0
    #[config(default = 2.0)]
    pub beta: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl QualityFocalLossConfig {
    /// Initialize [Quality focal loss](QualityFocalLoss).
    pub fn init(&self) -> QualityFocalLoss {
        assert!(
            self.beta >= 0.0,
            "Beta for QualityFocalLoss must be non-negative, got {}",
            self.beta
        );
        QualityFocalLoss {
            beta: self.beta,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Quality focal loss.
#[derive(Clone, Debug)]
pub struct QualityFocalLoss {
    pub beta: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for QualityFocalLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QualityFocalLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QualityFocalLoss {{beta: {}, reduction: {}, loss_weight: {}}}",
            self.beta, self.reduction, self.loss_weight
        )
    }
}

impl QualityFocalLoss {
    /// Create a new quality focal loss with default configuration.
    pub fn new() -> Self {
        QualityFocalLossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// The target is `(labels, scores)`: the class of each sample (`c` for
    /// background) and the IoU quality its class should predict.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, c]` logits
    /// - target: `([n], [n])`
    /// - weight: `[n]`
    /// - output: `[n]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: (Tensor<B, 1, Int>, Tensor<B, 1>),
        weight: Option<Tensor<B, 1>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, 1>> {
        let reduction = self.reduction.resolve(reduction_override);
        let (labels, scores) = target;
        let loss = self.forward_no_reduction(pred, labels, scores);
        Ok(weight_reduce_loss(loss, weight, reduction, avg_factor)?.mul_scalar(self.loss_weight))
    }

    /// Compute the per-sample loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
        scores: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        let [n, num_classes] = pred.dims();
        assert_eq!(labels.dims(), [n], "Labels must have shape [{n}]");
        assert_eq!(scores.dims(), [n], "Scores must have shape [{n}]");

        let prob = activation::sigmoid(pred.clone());

        // every class is first treated as a negative with target 0
        let negative = binary_cross_entropy_with_logits(pred.clone(), prob.zeros_like())
            * prob.clone().powf_scalar(self.beta);

        let score = scores.reshape([n, 1]).repeat_dim(1, num_classes);
        let positive = binary_cross_entropy_with_logits(pred, score.clone())
            * (score - prob).abs().powf_scalar(self.beta);

        let is_positive = one_hot(labels, num_classes).greater_elem(0.5);
        negative
            .mask_where(is_positive, positive)
            .sum_dim(1)
            .reshape([n])
    }
}

/// Configuration for creating a [Distribution focal loss](DistributionFocalLoss).
#[derive(Config, Debug)]
pub struct DistributionFocalLossConfig {
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl DistributionFocalLossConfig {
    /// Initialize [Distribution focal loss](DistributionFocalLoss).
    pub fn init(&self) -> DistributionFocalLoss {
        DistributionFocalLoss {
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Distribution focal loss.
#[derive(Clone, Debug)]
pub struct DistributionFocalLoss {
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for DistributionFocalLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DistributionFocalLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DistributionFocalLoss {{reduction: {}, loss_weight: {}}}",
            self.reduction, self.loss_weight
        )
    }
}

impl DistributionFocalLoss {
    /// Create a new distribution focal loss with default configuration.
    pub fn new() -> Self {
        DistributionFocalLossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, bins]` logits
    /// - target: `[n]` continuous positions in `[0, bins - 1]`
    /// - weight: `[n]`
    /// - output: `[n]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 1>,
        weight: Option<Tensor<B, 1>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, 1>> {
        let reduction = self.reduction.resolve(reduction_override);
        let loss = self.forward_no_reduction(pred, target);
        Ok(weight_reduce_loss(loss, weight, reduction, avg_factor)?.mul_scalar(self.loss_weight))
    }

    /// Compute the per-sample loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        let [n, bins] = pred.dims();
        assert_eq!(target.dims(), [n], "Targets must have shape [{n}]");

        let left = target.clone().floor();
        let weight_left = (left.clone().add_scalar(1.0) - target.clone()).reshape([n, 1]);
        let weight_right = (target - left.clone()).reshape([n, 1]);

        let left_index = left.int();
        let right_index = left_index.clone().add_scalar(1);

        // cross-entropy is linear in the target, so both bins share one softmax
        let soft_target = one_hot(left_index, bins) * weight_left
            + one_hot(right_index, bins) * weight_right;
        softmax_cross_entropy(pred, soft_target)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::tests::TestBackend;

    fn bce(x: f64, y: f64) -> f64 {
        x.max(0.0) - x * y + (1.0 + (-x.abs()).exp()).ln()
    }

    fn sigmoid(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn qfl_positive_class_regresses_quality_score() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.5, -1.0]], &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0], &device);
        let scores = Tensor::<TestBackend, 1>::from_floats([0.8], &device);

        let result = QualityFocalLoss::new().forward_no_reduction(pred, labels, scores);

        let positive = bce(0.5, 0.8) * (0.8 - sigmoid(0.5)).abs().powi(2);
        let negative = bce(-1.0, 0.0) * sigmoid(-1.0).powi(2);
        result.into_data().assert_approx_eq::<f32>(
            &TensorData::from([positive + negative]),
            Tolerance::default(),
        );
    }

    #[test]
    fn qfl_background_sample_is_all_negative() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0]], &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([2], &device);
        let scores = Tensor::<TestBackend, 1>::zeros([1], &device);

        let result = QualityFocalLoss::new()
            .forward(pred, (labels, scores), None, Some(LossReduction::Sum), None)
            .unwrap();

        let expected = 2.0 * bce(0.0, 0.0) * 0.25;
        assert!((result.total() - expected).abs() < 1e-5);
    }

    #[test]
    fn dfl_interpolates_between_neighbouring_bins() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 0.5, 0.0]], &device);
        let target = Tensor::<TestBackend, 1>::from_floats([1.25], &device);

        let result = DistributionFocalLoss::new().forward_no_reduction(pred, target);

        let logits = [1.0_f64, 2.0, 0.5, 0.0];
        let log_sum = logits.iter().map(|x| x.exp()).sum::<f64>().ln();
        let expected = 0.75 * (log_sum - logits[1]) + 0.25 * (log_sum - logits[2]);
        result
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([expected]), Tolerance::default());
    }

    #[test]
    fn dfl_integer_target_at_last_bin_is_plain_cross_entropy() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0, 0.0]], &device);
        let target = Tensor::<TestBackend, 1>::from_floats([2.0], &device);

        let values = DistributionFocalLoss::new()
            .forward_no_reduction(pred, target)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!((values[0] as f64 - 3.0_f64.ln()).abs() < 1e-5);
    }
}
