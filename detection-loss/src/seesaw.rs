//! Seesaw loss for long-tailed instance classification.
//!
//! The classification logits carry `num_classes` class scores followed by two
//! objectness scores (foreground, background). Label `num_classes` marks a
//! background sample.
//!
//! For a positive sample of class `i`, the logit of every other class `j` is
//! shifted by `ln(M_ij · C_ij)` before the softmax cross-entropy:
//!
//! ```text
//! M_ij = (N_j / N_i)^p   if N_j < N_i else 1    (mitigation)
//! C_ij = (σ_j / σ_i)^q   if σ_j > σ_i else 1    (compensation)
//! ```
//!
//! where `N` are the cumulative per-class sample counts seen so far and `σ` the
//! detached softmax scores. Objectness is a plain two-way cross-entropy over all
//! samples.

use core::fmt;

use burn::{
    config::Config,
    tensor::{activation, backend::Backend, Int, Tensor},
};
use burn_extra_ops::{one_hot, valid_label_mask};

use crate::{
    cross_entropy::softmax_cross_entropy,
    error::LossResult,
    reduction::{weight_reduce_loss, LossOutput, LossReduction},
};

/// Configuration for creating a [Seesaw loss](SeesawLoss).
#[derive(Config, Debug)]
pub struct SeesawLossConfig {
    /// Exponent of the mitigation factor, 0 disables it. Default: 0.8
    #[config(default = 0.8)]
    pub p: f64,
    /// Exponent of the compensation factor, 0 disables it. Default: 2.0
    #[config(default = 2.0)]
    pub q: f64,
    /// Number of foreground classes. Default: 1203
    #[config(default = 1203)]
    pub num_classes: usize,
    /// Lower bound of the own-class score in the compensation factor. Default: 1e-2
    #[config(default = 1e-2)]
    pub eps: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl SeesawLossConfig {
    /// Initialize [Seesaw loss](SeesawLoss).
    pub fn init(&self) -> SeesawLoss {
        self.assertions();
        SeesawLoss {
            p: self.p,
            q: self.q,
            num_classes: self.num_classes,
            eps: self.eps,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
            cum_samples: vec![0.0; self.num_classes + 1],
        }
    }

    fn assertions(&self) {
        assert!(
            self.num_classes > 0,
            "Number of classes for SeesawLoss must be positive"
        );
        assert!(
            self.p >= 0.0 && self.q >= 0.0,
            "Exponents p and q for SeesawLoss must be non-negative, got {} and {}",
            self.p,
            self.q
        );
        assert!(
            self.eps > 0.0,
            "Eps for SeesawLoss must be positive, got {}",
            self.eps
        );
    }
}

/// Classification and objectness terms of a [`SeesawLoss`] evaluation.
#[derive(Debug, Clone)]
pub struct SeesawOutput<B: Backend> {
    pub classes: LossOutput<B, 1>,
    pub objectness: LossOutput<B, 1>,
}

impl<B: Backend> SeesawOutput<B> {
    /// Sum of both terms.
    pub fn total(self) -> LossOutput<B, 1> {
        self.classes.add(self.objectness)
    }
}

/// Seesaw loss.
#[derive(Clone, Debug)]
pub struct SeesawLoss {
    pub p: f64,
    pub q: f64,
    pub num_classes: usize,
    pub eps: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
    cum_samples: Vec<f64>,
}

impl Default for SeesawLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SeesawLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SeesawLoss {{p: {}, q: {}, num_classes: {}, eps: {}, reduction: {}, loss_weight: {}}}",
            self.p, self.q, self.num_classes, self.eps, self.reduction, self.loss_weight
        )
    }
}

impl SeesawLoss {
    /// Create a new seesaw loss with default configuration.
    pub fn new() -> Self {
        SeesawLossConfig::new().init()
    }

    /// Samples seen per label so far, background last.
    pub fn cum_samples(&self) -> &[f64] {
        &self.cum_samples
    }

    /// Compute both loss terms and update the per-class sample counts.
    ///
    /// Without an `avg_factor`, the mean of the classification term is taken
    /// over positive samples only.
    ///
    /// # Shapes
    ///
    /// - cls_score: `[n, num_classes + 2]`
    /// - labels: `[n]` in `[0, num_classes]`
    /// - label_weights: `[n]`
    /// - output: two `[n]` terms for `none`, `[1]` otherwise
    pub fn forward<B: Backend>(
        &mut self,
        cls_score: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
        label_weights: Option<Tensor<B, 1>>,
        reduction_override: Option<LossReduction>,
        avg_factor: Option<f64>,
    ) -> LossResult<SeesawOutput<B>> {
        let [n, channels] = cls_score.dims();
        let num_classes = self.num_classes;
        assert_eq!(
            channels,
            num_classes + 2,
            "Seesaw scores must have {} channels (classes + objectness), got {channels}",
            num_classes + 2
        );
        assert_eq!(labels.dims(), [n], "Labels must have shape [{n}]");
        let reduction = self.reduction.resolve(reduction_override);

        let num_pos = self.accumulate(&labels);

        let label_weights = label_weights.unwrap_or_else(|| Tensor::ones([n], &cls_score.device()));
        let positive = valid_label_mask(labels.clone(), num_classes).float();

        let classes_score = cls_score.clone().narrow(1, 0, num_classes);
        let objectness_score = cls_score.narrow(1, num_classes, 2);

        let classes_avg_factor = match (reduction, avg_factor) {
            (LossReduction::Mean, None) => Some(num_pos as f64),
            (_, other) => other,
        };
        let classes = weight_reduce_loss(
            self.classes_no_reduction(classes_score, labels.clone()),
            Some(label_weights.clone() * positive),
            reduction,
            classes_avg_factor,
        )?;

        let background = labels.equal_elem(num_classes as i64).int();
        let objectness = weight_reduce_loss(
            softmax_cross_entropy(objectness_score, one_hot(background, 2)),
            Some(label_weights),
            reduction,
            avg_factor,
        )?;

        Ok(SeesawOutput {
            classes: classes.mul_scalar(self.loss_weight),
            objectness: objectness.mul_scalar(self.loss_weight),
        })
    }

    /// Seesaw cross-entropy of every sample, zero for background samples.
    ///
    /// Uses the current sample counts without updating them.
    pub fn classes_no_reduction<B: Backend>(
        &self,
        cls_score: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let [n, num_classes] = cls_score.dims();
        assert_eq!(num_classes, self.num_classes, "Expected {} class scores", self.num_classes);
        let device = cls_score.device();

        let positive = valid_label_mask(labels.clone(), num_classes);
        // background rows borrow class 0 and are masked out below
        let safe_labels = labels.mask_fill(positive.clone().bool_not(), 0);
        let onehot = one_hot(safe_labels.clone(), num_classes);

        let mut seesaw_weights = cls_score.ones_like();
        if self.p > 0.0 {
            let counts = Tensor::<B, 1>::from_floats(&self.cum_samples[..num_classes], &device)
                .clamp_min(1.0);
            let own = counts.clone().select(0, safe_labels);
            let ratio = counts.reshape([1, num_classes]) / own.reshape([n, 1]);
            let mitigation = ratio
                .clone()
                .powf_scalar(self.p)
                .mask_fill(ratio.greater_equal_elem(1.0), 1.0);
            seesaw_weights = seesaw_weights * mitigation;
        }
        if self.q > 0.0 {
            let scores = activation::softmax(cls_score.clone().detach(), 1);
            let own = (scores.clone() * onehot.clone())
                .sum_dim(1)
                .clamp_min(self.eps);
            let ratio = scores / own;
            let compensation = ratio
                .clone()
                .powf_scalar(self.q)
                .mask_fill(ratio.lower_equal_elem(1.0), 1.0);
            seesaw_weights = seesaw_weights * compensation;
        }

        let logits = cls_score + seesaw_weights.log() * onehot.clone().neg().add_scalar(1.0);
        softmax_cross_entropy(logits, onehot) * positive.float()
    }

    /// Class probabilities with background last, shape `[n, num_classes + 1]`.
    ///
    /// Class scores are the class softmax scaled by the foreground objectness.
    pub fn scores<B: Backend>(&self, cls_score: Tensor<B, 2>) -> Tensor<B, 2> {
        let num_classes = self.num_classes;
        let classes = activation::softmax(cls_score.clone().narrow(1, 0, num_classes), 1);
        let objectness = activation::softmax(cls_score.narrow(1, num_classes, 2), 1);

        let foreground = classes * objectness.clone().narrow(1, 0, 1);
        let background = objectness.narrow(1, 1, 1);
        Tensor::cat(vec![foreground, background], 1)
    }

    /// Adds the labels of one batch to the running counts, returns the positives.
    fn accumulate<B: Backend>(&mut self, labels: &Tensor<B, 1, Int>) -> usize {
        let mut num_pos = 0;
        for label in labels.to_data().iter::<i64>() {
            let Ok(index) = usize::try_from(label) else {
                continue;
            };
            if let Some(count) = self.cum_samples.get_mut(index) {
                *count += 1.0;
                if index < self.num_classes {
                    num_pos += 1;
                }
            }
        }
        tracing::debug!(
            num_pos,
            background = self.cum_samples[self.num_classes],
            "seesaw sample counts updated"
        );
        num_pos
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::{tests::TestBackend, LossError};

    fn reference_ce(row: &[f64], label: usize) -> f64 {
        let log_sum = row.iter().map(|x| x.exp()).sum::<f64>().ln();
        log_sum - row[label]
    }

    fn loss(num_classes: usize) -> SeesawLoss {
        SeesawLossConfig::new().with_num_classes(num_classes).init()
    }

    #[test]
    fn first_batch_counts_and_splits_terms() {
        let device = Default::default();
        let cls_score = Tensor::<TestBackend, 2>::from_floats(
            [[2.0, 0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 0.0, 1.0]],
            &device,
        );
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0, 3], &device);
        let mut loss = loss(3);

        let output = loss
            .forward(cls_score, labels, None, Some(LossReduction::None), None)
            .unwrap();

        assert_eq!(loss.cum_samples(), &[1.0, 0.0, 0.0, 1.0]);

        // class 0 is the most frequent and most confident: no reweighting
        let classes = output.classes.into_elementwise().unwrap();
        classes.into_data().assert_approx_eq::<f32>(
            &TensorData::from([reference_ce(&[2.0, 0.0, 0.0], 0), 0.0]),
            Tolerance::default(),
        );

        let objectness = output.objectness.into_elementwise().unwrap();
        objectness.into_data().assert_approx_eq::<f32>(
            &TensorData::from([reference_ce(&[1.0, 0.0], 0), reference_ce(&[0.0, 1.0], 1)]),
            Tolerance::default(),
        );
    }

    #[test]
    fn mitigation_lowers_frequent_negative_classes() {
        let device = Default::default();
        let mut loss = SeesawLossConfig::new()
            .with_num_classes(2)
            .with_q(0.0)
            .init();

        // class 0 seen three times, class 1 once
        let warmup = Tensor::<TestBackend, 1, Int>::from_ints([0, 0, 0, 1], &device);
        loss.accumulate(&warmup);

        let cls_score = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0]], &device);
        let frequent = loss.classes_no_reduction(
            cls_score.clone(),
            Tensor::from_ints([0], &device),
        );
        let rare = loss.classes_no_reduction(cls_score, Tensor::from_ints([1], &device));

        // the rare class keeps its full penalty, the frequent class is mitigated
        let p = 0.8_f64;
        let mitigated = reference_ce(&[0.0, (1.0_f64 / 3.0).powf(p).ln()], 0);
        frequent
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([mitigated]), Tolerance::default());
        rare.into_data().assert_approx_eq::<f32>(
            &TensorData::from([reference_ce(&[0.0, 0.0], 1)]),
            Tolerance::default(),
        );
    }

    #[test]
    fn compensation_raises_confident_wrong_classes() {
        let device = Default::default();
        let loss = SeesawLossConfig::new()
            .with_num_classes(2)
            .with_p(0.0)
            .init();

        let cls_score = Tensor::<TestBackend, 2>::from_floats([[0.0, 1.0]], &device);
        let result = loss.classes_no_reduction(cls_score, Tensor::from_ints([0], &device));

        // σ_1 / σ_0 = e, raised to q = 2 shifts the wrong logit by 2
        result.into_data().assert_approx_eq::<f32>(
            &TensorData::from([reference_ce(&[0.0, 3.0], 0)]),
            Tolerance::default(),
        );
    }

    #[test]
    fn mean_classes_term_averages_over_positives() {
        let device = Default::default();
        let cls_score = Tensor::<TestBackend, 2>::zeros([3, 4], &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 2], &device);

        let output = loss(2).forward(cls_score, labels, None, None, None).unwrap();

        // two positives, each ln(2) since all counts are equal and scores uniform
        assert!((output.classes.total() - 2.0_f64.ln()).abs() < 1e-5);
    }

    #[test]
    fn scores_sum_to_one() {
        let device = Default::default();
        let cls_score =
            Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 0.5, -0.5]], &device);

        let scores = loss(2).scores(cls_score);

        assert_eq!(scores.dims(), [1, 3]);
        let total: f32 = scores.sum().into_scalar();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sum_with_avg_factor_is_rejected() {
        let device = Default::default();
        let cls_score = Tensor::<TestBackend, 2>::zeros([1, 4], &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0], &device);

        let result = loss(2).forward(cls_score, labels, None, Some(LossReduction::Sum), Some(1.0));
        assert_eq!(result.unwrap_err(), LossError::AvgFactorWithSum);
    }

    #[test]
    #[should_panic = "Seesaw scores must have 4 channels"]
    fn wrong_channel_count_panics() {
        let device = Default::default();
        let cls_score = Tensor::<TestBackend, 2>::zeros([1, 3], &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0], &device);
        let _ = loss(2).forward(cls_score, labels, None, None, None);
    }
}
