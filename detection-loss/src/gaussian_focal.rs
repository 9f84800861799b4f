//! Gaussian focal loss for heatmap-based detectors.
//!
//! Predictions are probabilities; targets are Gaussian-splatted heatmaps whose
//! peaks equal exactly 1. Peaks are positives, everything else is a negative
//! down-weighted by its distance to a peak:
//! ```text
//! pos = -ln(p + ε) · (1 - p)^α · [t = 1]
//! neg = -ln(1 - p + ε) · p^α · (1 - t)^γ
//! ```

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

const EPS: f64 = 1e-12;

/// Configuration for creating a [Gaussian focal loss](GaussianFocalLoss).
#[derive(Config, Debug)]
pub struct GaussianFocalLossConfig {
    /// Power of the prediction modulating factor. Default: 2.0
    #[config(default = 2.0)]
    pub alpha: f64,
    /// Power of the target modulating factor for negatives. Default: 4.0
    #[config(default = 4.0)]
    pub gamma: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl GaussianFocalLossConfig {
    /// Initialize [Gaussian focal loss](GaussianFocalLoss).
    pub fn init(&self) -> GaussianFocalLoss {
        GaussianFocalLoss {
            alpha: self.alpha,
            gamma: self.gamma,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Gaussian focal loss.
#[derive(Clone, Debug)]
pub struct GaussianFocalLoss {
    pub alpha: f64,
    pub gamma: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for GaussianFocalLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GaussianFocalLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GaussianFocalLoss {{alpha: {}, gamma: {}, reduction: {}, loss_weight: {}}}",
            self.alpha, self.gamma, self.reduction, self.loss_weight
        )
    }
}

impl GaussianFocalLoss {
    /// Create a new Gaussian focal loss with default configuration.
    pub fn new() -> Self {
        GaussianFocalLossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[...dims]` probabilities
    /// - target: `[...dims]` heatmap
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

    /// Compute the elementwise loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> Tensor<B, D> {
        assert_same_shape(&pred, &target);

        let pos_weights = target.clone().equal_elem(1.0).float();
        let neg_weights = target.neg().add_scalar(1.0).powf_scalar(self.gamma);
        let complement = pred.clone().neg().add_scalar(1.0);

        let pos_loss = pred.clone().add_scalar(EPS).log().neg()
            * complement.clone().powf_scalar(self.alpha)
            * pos_weights;
        let neg_loss = complement.add_scalar(EPS).log().neg()
            * pred.powf_scalar(self.alpha)
            * neg_weights;

        pos_loss + neg_loss
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn gaussian_focal_separates_peaks_and_background() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 3>::from_floats([[[0.8, 0.2, 0.5]]], &device);
        let target = Tensor::<TestBackend, 3>::from_floats([[[1.0, 0.0, 0.5]]], &device);

        let result = GaussianFocalLoss::new().forward_no_reduction(pred, target);

        let expected = TensorData::from([[[
            -(0.8_f64).ln() * 0.2 * 0.2,
            -(0.8_f64).ln() * 0.2 * 0.2,
            -(0.5_f64).ln() * 0.25 * 0.5_f64.powi(4),
        ]]]);
        result
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn gaussian_focal_perfect_prediction_is_near_zero() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [0.0, 1.0]], &device);

        let result = GaussianFocalLoss::new()
            .forward(target.clone(), target, None, Some(LossReduction::Sum), None)
            .unwrap();
        assert!(result.total().abs() < 1e-6);
    }
}
