//! Balanced L1 loss from Libra R-CNN.
//!
//! Promotes the gradient of inliers (small errors) so that accurate samples are
//! not dominated by outliers. With `b = e^(γ/α) - 1` and `d = |pred - target|`:
//! ```text
//! l = α/b · (b·d + 1) · ln(b·d/β + 1) - α·d     if d < β
//! l = γ·d + γ/b - α·β                           otherwise
//! ```

use core::fmt;

use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};

use crate::{
    error::LossResult,
    reduction::{check_avg_factor, empty_loss, weight_reduce_loss, LossOutput, LossReduction},
    smooth_l1::assert_same_shape,
};

/// Configuration for creating a [Balanced L1 loss](BalancedL1Loss).
#[derive(Config, Debug)]
pub struct BalancedL1LossConfig {
    /// Promotion factor for inlier gradients. Default: 0.5
    #[config(default = 0.5)]
    pub alpha: f64,
    /// Upper bound of the loss gradient for outliers. Default: 1.5
    #[config(default = 1.5)]
    pub gamma: f64,
    /// Boundary between inliers and outliers. Default: 1.0
    #[config(default = 1.0)]
    pub beta: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl BalancedL1LossConfig {
    /// Initialize [Balanced L1 loss](BalancedL1Loss).
    pub fn init(&self) -> BalancedL1Loss {
        self.assertions();
        BalancedL1Loss {
            alpha: self.alpha,
            gamma: self.gamma,
            beta: self.beta,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }

    fn assertions(&self) {
        assert!(
            self.alpha > 0.0,
            "Alpha for BalancedL1Loss must be positive, got {}",
            self.alpha
        );
        assert!(
            self.beta > 0.0,
            "Beta for BalancedL1Loss must be positive, got {}",
            self.beta
        );
        assert!(
            self.gamma > 0.0,
            "Gamma for BalancedL1Loss must be positive, got {}",
            self.gamma
        );
    }
}

/// Balanced L1 loss.
#[derive(Clone, Debug)]
pub struct BalancedL1Loss {
    pub alpha: f64,
    pub gamma: f64,
    pub beta: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for BalancedL1Loss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BalancedL1Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BalancedL1Loss {{alpha: {}, gamma: {}, beta: {}, reduction: {}, loss_weight: {}}}",
            self.alpha, self.gamma, self.beta, self.reduction, self.loss_weight
        )
    }
}

impl BalancedL1Loss {
    /// Create a new Balanced L1 loss with default configuration.
    pub fn new() -> Self {
        BalancedL1LossConfig::new().init()
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

        let (alpha, gamma, beta) = (self.alpha, self.gamma, self.beta);
        let b = libm::expm1(gamma / alpha);
        let diff = (pred - target).abs();

        let scaled = diff.clone().mul_scalar(b);
        let inlier = scaled
            .clone()
            .add_scalar(1.0)
            .mul(scaled.div_scalar(beta).add_scalar(1.0).log())
            .mul_scalar(alpha / b)
            - diff.clone().mul_scalar(alpha);
        let outlier = diff
            .clone()
            .mul_scalar(gamma)
            .add_scalar(gamma / b - alpha * beta);

        outlier.mask_where(diff.lower_elem(beta), inlier)
    }
}
