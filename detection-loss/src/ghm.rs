//! Gradient Harmonizing Mechanism losses.
//!
//! Both losses measure a per-element gradient norm `g ∈ [0, 1]`, histogram it
//! into `bins` equal-width bins and weight every valid element by
//! `tot / (count_of_its_bin · non_empty_bins)`. Frequent, easy examples are
//! thereby down-weighted. With a positive `momentum`, bin counts are replaced by
//! an exponential moving average that persists across calls.
//!
//! The result is always normalized by `tot`, so a `sum` reduction is rejected
//! with [`LossError::AvgFactorWithSum`](crate::LossError::AvgFactorWithSum).

use core::fmt;

use burn::{
    config::Config,
    tensor::{activation, backend::Backend, ElementConversion, Int, Tensor, TensorData},
};
use burn_extra_ops::one_hot;

use crate::{
    cross_entropy::binary_cross_entropy_with_logits,
    error::LossResult,
    reduction::{weight_reduce_loss, LossOutput, LossReduction, LossWeight},
    smooth_l1::assert_same_shape,
};

/// Histogram of gradient norms with optional moving-average bin counts.
#[derive(Clone, Debug)]
struct GradientDensity {
    edges: Vec<f64>,
    momentum: f64,
    acc_sum: Vec<f64>,
}

impl GradientDensity {
    fn new(bins: usize, momentum: f64, last_edge: f64) -> Self {
        let mut edges: Vec<f64> = (0..=bins).map(|i| i as f64 / bins as f64).collect();
        if let Some(last) = edges.last_mut() {
            *last = last_edge;
        }
        Self {
            edges,
            momentum,
            acc_sum: vec![0.0; bins],
        }
    }

    fn bins(&self) -> usize {
        self.acc_sum.len()
    }

    fn bin_of(&self, g: f64) -> Option<usize> {
        self.edges
            .windows(2)
            .position(|edge| g >= edge[0] && g < edge[1])
    }

    /// Harmonizing weight per element, zero for invalid elements.
    fn weights(&mut self, gradients: &[f32], valid: &[bool], tot: f64) -> Vec<f32> {
        let bin_index: Vec<Option<usize>> = gradients
            .iter()
            .zip(valid)
            .map(|(g, valid)| if *valid { self.bin_of(f64::from(*g)) } else { None })
            .collect();

        let mut counts = vec![0_usize; self.bins()];
        for bin in bin_index.iter().flatten() {
            counts[*bin] += 1;
        }

        let mut bin_weight = vec![0.0; self.bins()];
        let mut non_empty = 0_usize;
        for (bin, count) in counts.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            non_empty += 1;
            bin_weight[bin] = if self.momentum > 0.0 {
                self.acc_sum[bin] =
                    self.momentum * self.acc_sum[bin] + (1.0 - self.momentum) * *count as f64;
                tot / self.acc_sum[bin]
            } else {
                tot / *count as f64
            };
        }
        tracing::trace!(?counts, non_empty, tot, "gradient density histogram");

        let norm = non_empty.max(1) as f64;
        bin_index
            .into_iter()
            .map(|bin| bin.map_or(0.0, |bin| (bin_weight[bin] / norm) as f32))
            .collect()
    }

    fn weight_tensor<B: Backend>(
        &mut self,
        gradients: Tensor<B, 2>,
        label_weight: Tensor<B, 2>,
        tot: f64,
    ) -> Tensor<B, 2> {
        let shape = gradients.dims();
        let device = gradients.device();
        let gradients: Vec<f32> = gradients.into_data().iter::<f32>().collect();
        let valid: Vec<bool> = label_weight
            .into_data()
            .iter::<f32>()
            .map(|weight| weight > 0.0)
            .collect();

        let weights = self.weights(&gradients, &valid, tot);
        Tensor::from_data(TensorData::new(weights, shape), &device)
    }
}

fn label_weight_or_ones<B: Backend>(
    label_weight: Option<LossWeight<B>>,
    like: &Tensor<B, 2>,
) -> Tensor<B, 2> {
    let [_, cols] = like.dims();
    match label_weight {
        Some(weight) => weight.into_elements(cols),
        None => like.ones_like(),
    }
}

/// Configuration for creating a [GHM classification loss](GhmC).
#[derive(Config, Debug)]
pub struct GhmCConfig {
    /// Number of gradient-norm bins. Default: 10
    #[config(default = 10)]
    pub bins: usize,
    /// Moving-average factor for bin counts, 0 disables it. Default: 0.0
    #[config(default = 0.0)]
    pub momentum: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl GhmCConfig {
    /// Initialize [GHM classification loss](GhmC).
    pub fn init(&self) -> GhmC {
        assert_ghm_params("GhmC", self.bins, self.momentum);
        GhmC {
            density: GradientDensity::new(self.bins, self.momentum, 1.0 + 1e-6),
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

fn assert_ghm_params(name: &str, bins: usize, momentum: f64) {
    assert!(bins > 0, "Bins for {name} must be positive");
    assert!(
        (0.0..1.0).contains(&momentum),
        "Momentum for {name} must be in [0, 1), got {momentum}"
    );
}

/// Gradient-harmonized sigmoid binary cross-entropy.
///
/// The gradient norm of an element is `|sigmoid(x) - t|`.
#[derive(Clone, Debug)]
pub struct GhmC {
    density: GradientDensity,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for GhmC {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GhmC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GhmC {{bins: {}, momentum: {}, reduction: {}, loss_weight: {}}}",
            self.density.bins(),
            self.density.momentum,
            self.reduction,
            self.loss_weight
        )
    }
}

impl GhmC {
    /// Create a new GHM-C loss with default configuration.
    pub fn new() -> Self {
        GhmCConfig::new().init()
    }

    /// Moving-average bin counts, all zero unless momentum is enabled.
    pub fn acc_sum(&self) -> &[f64] {
        &self.density.acc_sum
    }

    /// Compute the reduced criterion for integer labels.
    ///
    /// Labels outside `[0, c)` are negatives for every class.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, c]` logits
    /// - labels: `[n]`
    /// - label_weight: `[n]` or `[n, c]`, elements with weight `<= 0` are ignored
    /// - output: `[n, c]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &mut self,
        pred: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
        label_weight: Option<LossWeight<B>>,
        reduction_override: Option<LossReduction>,
    ) -> LossResult<LossOutput<B, 2>> {
        let [n, num_classes] = pred.dims();
        assert_eq!(labels.dims(), [n], "Labels must have shape [{n}]");
        let target = one_hot(labels, num_classes);
        self.forward_dense(pred, target, label_weight, reduction_override)
    }

    /// Compute the reduced criterion for binary `[n, c]` targets.
    pub fn forward_dense<B: Backend>(
        &mut self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 2>,
        label_weight: Option<LossWeight<B>>,
        reduction_override: Option<LossReduction>,
    ) -> LossResult<LossOutput<B, 2>> {
        assert_same_shape(&pred, &target);
        let reduction = self.reduction.resolve(reduction_override);
        let label_weight = label_weight_or_ones(label_weight, &pred);

        let tot = label_weight
            .clone()
            .greater_elem(0.0)
            .int()
            .sum()
            .into_scalar()
            .elem::<f64>()
            .max(1.0);

        let gradients = (activation::sigmoid(pred.clone().detach()) - target.clone()).abs();
        let weights = self.density.weight_tensor(gradients, label_weight, tot);

        let loss = binary_cross_entropy_with_logits(pred, target);
        Ok(weight_reduce_loss(loss, Some(weights), reduction, Some(tot))?
            .mul_scalar(self.loss_weight))
    }
}

/// Configuration for creating a [GHM regression loss](GhmR).
#[derive(Config, Debug)]
pub struct GhmRConfig {
    /// Smoothing parameter of the Authentic Smooth L1 loss. Default: 0.02
    #[config(default = 0.02)]
    pub mu: f64,
    /// Number of gradient-norm bins. Default: 10
    #[config(default = 10)]
    pub bins: usize,
    /// Moving-average factor for bin counts, 0 disables it. Default: 0.0
    #[config(default = 0.0)]
    pub momentum: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl GhmRConfig {
    /// Initialize [GHM regression loss](GhmR).
    pub fn init(&self) -> GhmR {
        assert_ghm_params("GhmR", self.bins, self.momentum);
        assert!(self.mu > 0.0, "Mu for GhmR must be positive, got {}", self.mu);
        GhmR {
            mu: self.mu,
            density: GradientDensity::new(self.bins, self.momentum, 1e3),
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Gradient-harmonized Authentic Smooth L1 loss.
///
/// `loss = sqrt(d² + μ²) - μ` with gradient norm `|d| / sqrt(d² + μ²)`.
#[derive(Clone, Debug)]
pub struct GhmR {
    pub mu: f64,
    density: GradientDensity,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for GhmR {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GhmR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GhmR {{mu: {}, bins: {}, momentum: {}, reduction: {}, loss_weight: {}}}",
            self.mu,
            self.density.bins(),
            self.density.momentum,
            self.reduction,
            self.loss_weight
        )
    }
}

impl GhmR {
    /// Create a new GHM-R loss with default configuration.
    pub fn new() -> Self {
        GhmRConfig::new().init()
    }

    /// Moving-average bin counts, all zero unless momentum is enabled.
    pub fn acc_sum(&self) -> &[f64] {
        &self.density.acc_sum
    }

    /// Compute the reduced criterion.
    ///
    /// `tot` is the sum of `label_weight`, at least one.
    ///
    /// # Shapes
    ///
    /// - pred: `[n, 4]`
    /// - target: `[n, 4]`
    /// - label_weight: `[n]` or `[n, 4]`
    /// - output: `[n, 4]` for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &mut self,
        pred: Tensor<B, 2>,
        target: Tensor<B, 2>,
        label_weight: Option<LossWeight<B>>,
        reduction_override: Option<LossReduction>,
    ) -> LossResult<LossOutput<B, 2>> {
        assert_same_shape(&pred, &target);
        let reduction = self.reduction.resolve(reduction_override);
        let label_weight = label_weight_or_ones(label_weight, &pred);
        let tot = label_weight.clone().sum().into_scalar().elem::<f64>().max(1.0);

        let mu = self.mu;
        let diff = pred - target;
        let root = diff.clone().powf_scalar(2.0).add_scalar(mu * mu).sqrt();
        let gradients = (diff.detach() / root.clone().detach()).abs();
        let loss = root.sub_scalar(mu);

        let weights = self.density.weight_tensor(gradients, label_weight, tot);
        Ok(weight_reduce_loss(loss, Some(weights), reduction, Some(tot))?
            .mul_scalar(self.loss_weight))
    }
}
