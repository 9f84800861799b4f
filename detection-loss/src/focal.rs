//! Sigmoid focal loss.
//!
//! Down-weights well-classified examples so training focuses on hard ones.
//! Labels equal to the number of classes denote background:
//! ```text
//! p  = sigmoid(x)
//! pt = (1 - p)·t + p·(1 - t)
//! l  = BCE(x, t) · (α·t + (1 - α)·(1 - t)) · pt^γ
//! ```

use core::fmt;

use burn::{
    config::Config,
    tensor::{activation, backend::Backend, Int, Tensor},
};
use burn_extra_ops::one_hot;

use crate::{
    cross_entropy::binary_cross_entropy_with_logits,
    error::LossResult,
    reduction::{weight_reduce_loss, LossOutput, LossReduction, LossWeight},
};

/// Configuration for creating a [Focal loss](FocalLoss).
#[derive(Config, Debug)]
pub struct FocalLossConfig {
    /// Focusing parameter. Default: 2.0
    #[config(default = 2.0)]
    pub gamma: f64,
    /// Balance between positive and negative samples. Default: 0.25
    #[config(default = 0.25)]
    pub alpha: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl FocalLossConfig {
    /// Initialize [Focal loss](FocalLoss).
    pub fn init(&self) -> FocalLoss {
        self.assertions();
        FocalLoss {
            gamma: self.gamma,
            alpha: self.alpha,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }

    fn assertions(&self) {
        assert!(
            self.gamma >= 0.0,
            "Gamma for FocalLoss must be non-negative, got {}",
            self.gamma
        );
        assert!(
            (0.0..=1.0).contains(&self.alpha),
            "Alpha for FocalLoss must be in [0, 1], got {}",
            self.alpha
        );
    }
}

/// Sigmoid focal loss.
#[derive(Clone, Debug)]
pub struct FocalLoss {
    pub gamma: f64,
    pub alpha: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for FocalLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FocalLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FocalLoss {{gamma: {}, alpha: {}, reduction: {}, loss_weight: {}}}",
            self.gamma, self.alpha, self.reduction, self.loss_weight
        )
    }
}

impl FocalLoss {
    /// Create a new focal loss with default configuration.
    pub fn new() -> Self {
        FocalLossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, c]` logits
    /// - labels: `[n]`, with `c` meaning background
    /// - weight: `[n]` or `[n, c]`
    /// - output: `[n, c]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
        weight: Option<LossWeight<B>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, 2>> {
        let reduction = self.reduction.resolve(reduction_override);
        let [_, num_classes] = pred.dims();
        let weight = weight.map(|w| w.into_elements(num_classes));

        let loss = self.forward_no_reduction(pred, labels);
        Ok(weight_reduce_loss(loss, weight, reduction, avg_factor)?.mul_scalar(self.loss_weight))
    }

    /// Compute the per-class loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
    ) -> Tensor<B, 2> {
        let [n, num_classes] = pred.dims();
        let [m] = labels.dims();
        assert_eq!(
            n, m,
            "Batch size of predictions ({n}) must match labels ({m})"
        );

        let target = one_hot(labels, num_classes);
        self.forward_dense(pred, target)
    }

    /// Focal loss against a dense `{0, 1}` target of the same shape as `pred`.
    pub fn forward_dense<B: Backend>(&self, pred: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 2> {
        let prob = activation::sigmoid(pred.clone());
        let negative = target.clone().neg().add_scalar(1.0);

        let pt = prob.clone().neg().add_scalar(1.0) * target.clone() + prob * negative.clone();
        let balance = target.clone().mul_scalar(self.alpha) + negative.mul_scalar(1.0 - self.alpha);
        let focal_weight = balance * pt.powf_scalar(self.gamma);

        binary_cross_entropy_with_logits(pred, target) * focal_weight
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::tests::TestBackend;

    fn sigmoid(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn focal_loss_matches_reference_for_positive_and_negative() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[1.0, -2.0]], &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0], &device);

        let result = FocalLoss::new().forward_no_reduction(pred, labels);

        let p0 = sigmoid(1.0);
        let p1 = sigmoid(-2.0);
        let expected = TensorData::from([[
            -p0.ln() * 0.25 * (1.0 - p0).powi(2),
            -(1.0 - p1).ln() * 0.75 * p1.powi(2),
        ]]);
        result
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn focal_loss_background_label_has_no_positive() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::zeros([1, 3], &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([3], &device);

        let values = FocalLoss::new()
            .forward_no_reduction(pred, labels)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        // every class is a negative at p = 0.5
        let expected = (2.0_f64).ln() * 0.75 * 0.25;
        for value in values {
            assert!((value as f64 - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn focal_loss_gamma_zero_is_balanced_bce() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.3, -0.7]], &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([1], &device);
        let loss = FocalLossConfig::new().with_gamma(0.0).with_alpha(0.5).init();

        let focal = loss.forward_no_reduction(pred.clone(), labels.clone());
        let bce = binary_cross_entropy_with_logits(pred, one_hot(labels, 2)).mul_scalar(0.5);

        focal
            .into_data()
            .assert_approx_eq::<f32>(&bce.into_data(), Tolerance::default());
    }

    #[test]
    #[should_panic = "Alpha for FocalLoss must be in [0, 1]"]
    fn focal_loss_config_alpha_out_of_range_panics() {
        let _loss = FocalLossConfig::new().with_alpha(1.5).init();
    }
}
