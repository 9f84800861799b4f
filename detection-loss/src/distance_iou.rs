//! Distance-IoU and Complete-IoU losses.
//!
//! Both add a penalty on the squared distance `ρ²` between box centres,
//! normalised by the squared diagonal `c²` of the enclosing box. CIoU also
//! penalises aspect-ratio disagreement:
//! ```text
//! DIoU = 1 - (iou - ρ²/c²)
//! v    = 4/π² · (atan(w_t/h_t) - atan(w_p/h_p))²
//! α    = [iou > 0.5] · v / (1 - iou + v)          (no gradient)
//! CIoU = 1 - clamp(iou - (ρ²/c² + α·v), -1, 1)
//! ```

use core::{f64::consts::PI, fmt};

use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};
use burn_extra_ops::{Atan, BoxCorners};

use crate::{
    error::LossResult,
    iou::iou_family_forward,
    reduction::{LossOutput, LossReduction, LossWeight},
};

/// IoU and centre-distance penalty shared by DIoU and CIoU.
struct DistanceTerms<B: Backend> {
    ious: Tensor<B, 1>,
    center_penalty: Tensor<B, 1>,
    pred: BoxCorners<B>,
    target: BoxCorners<B>,
}

impl<B: Backend> DistanceTerms<B> {
    fn new(pred: Tensor<B, 2>, target: Tensor<B, 2>, eps: f64) -> Self {
        let pred = BoxCorners::from_boxes(pred);
        let target = BoxCorners::from_boxes(target);

        let (w, h) = pred.intersection_wh(&target);
        let overlap = w * h;
        let union = pred.area() + target.area() - overlap.clone() + eps;
        let ious = overlap / union;

        let (enclose_w, enclose_h) = pred.enclosing_wh(&target);
        let c2 = enclose_w.powf_scalar(2.0) + enclose_h.powf_scalar(2.0) + eps;
        let rho2 = (target.center_x() - pred.center_x()).powf_scalar(2.0)
            + (target.center_y() - pred.center_y()).powf_scalar(2.0);

        Self {
            ious,
            center_penalty: rho2 / c2,
            pred,
            target,
        }
    }
}

/// Configuration for creating a [DIoU loss](DIoULoss).
#[derive(Config, Debug)]
pub struct DIoULossConfig {
    /// Added to the union and the enclosing diagonal. Default: 1e-7
    #[config(default = 1e-7)]
    pub eps: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl DIoULossConfig {
    /// Initialize [DIoU loss](DIoULoss).
    pub fn init(&self) -> DIoULoss {
        assert!(
            self.eps > 0.0,
            "Epsilon for DIoULoss must be positive, got {}",
            self.eps
        );
        DIoULoss {
            eps: self.eps,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Distance-IoU loss.
#[derive(Clone, Debug)]
pub struct DIoULoss {
    pub eps: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for DIoULoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DIoULoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DIoULoss {{eps: {}, reduction: {}, loss_weight: {}}}",
            self.eps, self.reduction, self.loss_weight
        )
    }
}

impl DIoULoss {
    /// Create a new DIoU loss with default configuration.
    pub fn new() -> Self {
        DIoULossConfig::new().init()
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
        let terms = DistanceTerms::new(pred, target, self.eps);
        (terms.ious - terms.center_penalty).neg().add_scalar(1.0)
    }
}

/// Configuration for creating a [CIoU loss](CIoULoss).
#[derive(Config, Debug)]
pub struct CIoULossConfig {
    /// Added to the union, the enclosing diagonal and box heights. Default: 1e-7
    #[config(default = 1e-7)]
    pub eps: f64,
    /// Reduction used when no override is given. Default: mean
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Factor applied to the final loss. Default: 1.0
    #[config(default = 1.0)]
    pub loss_weight: f64,
}

impl CIoULossConfig {
    /// Initialize [CIoU loss](CIoULoss).
    pub fn init(&self) -> CIoULoss {
        assert!(
            self.eps > 0.0,
            "Epsilon for CIoULoss must be positive, got {}",
            self.eps
        );
        CIoULoss {
            eps: self.eps,
            reduction: self.reduction,
            loss_weight: self.loss_weight,
        }
    }
}

/// Complete-IoU loss.
#[derive(Clone, Debug)]
pub struct CIoULoss {
    pub eps: f64,
    pub reduction: LossReduction,
    pub loss_weight: f64,
}

impl Default for CIoULoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CIoULoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CIoULoss {{eps: {}, reduction: {}, loss_weight: {}}}",
            self.eps, self.reduction, self.loss_weight
        )
    }
}

impl CIoULoss {
    /// Create a new CIoU loss with default configuration.
    pub fn new() -> Self {
        CIoULossConfig::new().init()
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
        let eps = self.eps;
        let terms = DistanceTerms::new(pred, target, eps);

        let pred_ratio = terms.pred.width() / terms.pred.height().add_scalar(eps);
        let target_ratio = terms.target.width() / terms.target.height().add_scalar(eps);
        let v = (target_ratio.atan() - pred_ratio.atan())
            .powf_scalar(2.0)
            .mul_scalar(4.0 / (PI * PI));

        let alpha = {
            let ious = terms.ious.clone().detach();
            let v = v.clone().detach();
            let gate = ious.clone().greater_elem(0.5).float();
            gate * v.clone() / (ious.neg().add_scalar(1.0) + v)
        };

        let cious = terms.ious - (terms.center_penalty + alpha * v);
        cious.clamp(-1.0, 1.0).neg().add_scalar(1.0)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn diou_penalizes_center_distance() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0, 2.0, 2.0]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0, 3.0, 2.0]], &device);

        let result = DIoULoss::new().forward_no_reduction(pred, target);

        // iou 1/3, ρ² = 1, c² = 3² + 2² = 13
        let expected = TensorData::from([1.0 - 1.0 / 3.0 + 1.0 / 13.0]);
        result
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::absolute(1e-5));
    }

    #[test]
    fn ciou_equals_diou_for_matching_aspect_ratios() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0, 2.0, 2.0]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[1.0, 1.0, 3.0, 3.0]], &device);

        let diou = DIoULoss::new().forward_no_reduction(pred.clone(), target.clone());
        let ciou = CIoULoss::new().forward_no_reduction(pred, target);

        ciou.into_data()
            .assert_approx_eq::<f32>(&diou.into_data(), Tolerance::absolute(1e-5));
    }

    #[test]
    fn ciou_adds_aspect_penalty_for_high_overlap() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0, 4.0, 2.0]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0, 4.0, 3.0]], &device);

        let diou = DIoULoss::new()
            .forward_no_reduction(pred.clone(), target.clone())
            .into_scalar();
        let ciou = CIoULoss::new().forward_no_reduction(pred, target).into_scalar();

        // iou = 2/3 > 0.5, so the aspect term is active
        let v = 4.0 / (PI * PI) * (libm::atan(4.0 / 3.0) - libm::atan(2.0)).powi(2);
        let alpha = v / (1.0 - 2.0 / 3.0 + v);
        assert!(ciou > diou);
        assert!(((ciou - diou) as f64 - alpha * v).abs() < 1e-4);
    }

    #[test]
    fn ciou_zero_weight_returns_zero() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::random(
            [5, 4],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let target = pred.clone().add_scalar(0.1);
        let weight = Tensor::<TestBackend, 1>::zeros([5], &device);

        let result = CIoULoss::new()
            .forward(pred, target, Some(weight.into()), Some(LossReduction::Sum), Some(3.0))
            .unwrap();
        assert_eq!(result.total(), 0.0);
    }
}
