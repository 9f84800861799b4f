//! Knowledge distillation with a temperature-softened KL divergence.

use core::fmt;

use burn::{
    config::Config,
    tensor::{activation, backend::Backend, Tensor},
};

use crate::{
    error::LossResult,
    reduction::{weight_reduce_loss, LossOutput, LossReduction},
    smooth_l1::assert_same_shape,
};

/// Configuration for creating a [KL divergence distillation loss](KnowledgeDistillationKlDivLoss).
#[derive(Config, Debug)]
pub struct KnowledgeDistillationKlDivLossConfig {
    /// Softmax temperature. Default: 10.0
    #[config(default = 10.0)]
    pub temperature: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl KnowledgeDistillationKlDivLossConfig {
    /// Initialize [KL divergence distillation loss](KnowledgeDistillationKlDivLoss).
    pub fn init(&self) -> KnowledgeDistillationKlDivLoss {
        assert!(
            self.temperature >= 1.0,
            "Temperature for KnowledgeDistillationKlDivLoss must be at least 1, got {}",
            self.temperature
        );
        KnowledgeDistillationKlDivLoss {
            temperature: self.temperature,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// KL divergence between the softened student and teacher class distributions.
///
/// `loss = T² · mean_c(q · (ln q - ln p))` where `p = softmax(pred / T)` and
/// `q = softmax(soft_label / T)`. Gradients do not flow into the soft labels.
#[derive(Clone, Debug)]
pub struct KnowledgeDistillationKlDivLoss {
    pub temperature: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for KnowledgeDistillationKlDivLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for KnowledgeDistillationKlDivLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KnowledgeDistillationKlDivLoss {{temperature: {}, reduction: {}, loss_weight: {}}}",
            self.temperature, self.reduction, self.loss_weight
        )
    }
}

impl KnowledgeDistillationKlDivLoss {
    /// Create a new distillation loss with default configuration.
    pub fn new() -> Self {
        KnowledgeDistillationKlDivLossConfig::new().init()
    }

    /// Compute the weighted, reduced criterion.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, c]` student logits
    /// - soft_label: `[n, c]` teacher logits
    /// - weight: `[n]`
    /// - output: `[n]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        soft_label: Tensor<B, 2>,
        weight: Option<Tensor<B, 1>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<LossOutput<B, 1>> {
        let reduction = self.reduction.resolve(reduction_override);
        let loss = self.forward_no_reduction(pred, soft_label);
        Ok(weight_reduce_loss(loss, weight, reduction, avg_factor)?.mul_scalar(self.loss_weight))
    }

    /// Compute the per-sample loss without weighting or reduction.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred: Tensor<B, 2>,
        soft_label: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        assert_same_shape(&pred, &soft_label);
        let [n, _] = pred.dims();
        let t = self.temperature;

        let log_student = activation::log_softmax(pred.div_scalar(t), 1);
        let log_teacher = activation::log_softmax(soft_label.detach().div_scalar(t), 1);
        let teacher = log_teacher.clone().exp();

        (teacher * (log_teacher - log_student))
            .mean_dim(1)
            .reshape([n])
            .mul_scalar(t * t)
    }
}
