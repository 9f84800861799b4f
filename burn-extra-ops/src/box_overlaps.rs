//! # Aligned Box Overlaps
//!
//! Overlap measures between the i-th box of one set and the i-th box of another.
//! Boxes are `(x1, y1, x2, y2)` rows of an `[n, 4]` tensor.

use burn::prelude::*;

use crate::TensorExtraOps;

/// Overlap measure computed by [`bbox_overlaps_aligned`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapMode {
    /// Intersection over union.
    IoU,
    /// Generalized IoU, which subtracts the empty share of the enclosing box.
    GIoU,
}

/// The four corner columns of an `[n, 4]` box tensor, each shaped `[n]`.
#[derive(Debug, Clone)]
pub struct BoxCorners<B: Backend> {
    pub x1: Tensor<B, 1>,
    pub y1: Tensor<B, 1>,
    pub x2: Tensor<B, 1>,
    pub y2: Tensor<B, 1>,
}

impl<B: Backend> BoxCorners<B> {
    /// Splits `[n, 4]` boxes into corner columns.
    pub fn from_boxes(boxes: Tensor<B, 2>) -> Self {
        let [_, coords] = boxes.dims();
        assert_eq!(coords, 4, "Boxes must have 4 coordinates, got {coords}");

        Self {
            x1: boxes.clone().column(0),
            y1: boxes.clone().column(1),
            x2: boxes.clone().column(2),
            y2: boxes.column(3),
        }
    }

    pub fn width(&self) -> Tensor<B, 1> {
        self.x2.clone() - self.x1.clone()
    }

    pub fn height(&self) -> Tensor<B, 1> {
        self.y2.clone() - self.y1.clone()
    }

    pub fn area(&self) -> Tensor<B, 1> {
        self.width() * self.height()
    }

    pub fn center_x(&self) -> Tensor<B, 1> {
        (self.x1.clone() + self.x2.clone()) * 0.5
    }

    pub fn center_y(&self) -> Tensor<B, 1> {
        (self.y1.clone() + self.y2.clone()) * 0.5
    }

    /// Width and height of the intersection, clamped at zero.
    pub fn intersection_wh(&self, other: &Self) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let w = self.x2.clone().min_pair(other.x2.clone())
            - self.x1.clone().max_pair(other.x1.clone());
        let h = self.y2.clone().min_pair(other.y2.clone())
            - self.y1.clone().max_pair(other.y1.clone());
        (w.clamp_min(0.0), h.clamp_min(0.0))
    }

    /// Width and height of the smallest box enclosing both, clamped at zero.
    pub fn enclosing_wh(&self, other: &Self) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let w = self.x2.clone().max_pair(other.x2.clone())
            - self.x1.clone().min_pair(other.x1.clone());
        let h = self.y2.clone().max_pair(other.y2.clone())
            - self.y1.clone().min_pair(other.y1.clone());
        (w.clamp_min(0.0), h.clamp_min(0.0))
    }
}

/// Computes aligned overlaps between two `[n, 4]` box sets.
///
/// The union and the enclosing area are clamped to at least `eps`.
///
/// # Shapes
/// - boxes1: `[n, 4]`
/// - boxes2: `[n, 4]`
/// - output: `[n]`
pub fn bbox_overlaps_aligned<B: Backend>(
    boxes1: Tensor<B, 2>,
    boxes2: Tensor<B, 2>,
    mode: OverlapMode,
    eps: f64,
) -> Tensor<B, 1> {
    let dims1 = boxes1.dims();
    let dims2 = boxes2.dims();
    assert_eq!(
        dims1, dims2,
        "Aligned boxes must have the same shape, got {dims1:?} and {dims2:?}"
    );

    let a = BoxCorners::from_boxes(boxes1);
    let b = BoxCorners::from_boxes(boxes2);

    let (w, h) = a.intersection_wh(&b);
    let overlap = w * h;
    let union = (a.area() + b.area() - overlap.clone()).clamp_min(eps);
    let ious = overlap / union.clone();

    match mode {
        OverlapMode::IoU => ious,
        OverlapMode::GIoU => {
            let (enclose_w, enclose_h) = a.enclosing_wh(&b);
            let enclose_area = (enclose_w * enclose_h).clamp_min(eps);
            ious - (enclose_area.clone() - union) / enclose_area
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{ndarray::NdArray, Autodiff},
        tensor::{TensorData, Tolerance},
    };

    type TestBackend = Autodiff<NdArray<f32>>;

    fn boxes(rows: [[f32; 4]; 3]) -> Tensor<TestBackend, 2> {
        Tensor::from_floats(rows, &Default::default())
    }

    #[test]
    fn iou_of_identical_half_shifted_and_disjoint_boxes() {
        let pred = boxes([[0.0, 0.0, 2.0, 2.0], [0.0, 0.0, 2.0, 2.0], [0.0, 0.0, 1.0, 1.0]]);
        let target = boxes([[0.0, 0.0, 2.0, 2.0], [1.0, 0.0, 3.0, 2.0], [2.0, 2.0, 3.0, 3.0]]);

        let result = bbox_overlaps_aligned(pred, target, OverlapMode::IoU, 1e-6);

        // overlap 2, union 6
        let expected = TensorData::from([1.0, 1.0 / 3.0, 0.0]);
        result
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn giou_penalizes_empty_enclosing_area() {
        let pred = boxes([[0.0, 0.0, 2.0, 2.0], [0.0, 0.0, 2.0, 2.0], [0.0, 0.0, 1.0, 1.0]]);
        let target = boxes([[0.0, 0.0, 2.0, 2.0], [1.0, 0.0, 3.0, 2.0], [2.0, 2.0, 3.0, 3.0]]);

        let result = bbox_overlaps_aligned(pred, target, OverlapMode::GIoU, 1e-6);

        // second: enclosing 6 == union, third: enclosing 9, union 2
        let expected = TensorData::from([1.0, 1.0 / 3.0, -7.0 / 9.0]);
        result
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn corners_report_centers_and_sizes() {
        let corners =
            BoxCorners::from_boxes(boxes([[0.0, 0.0, 2.0, 4.0], [1.0, 1.0, 2.0, 2.0], [0.0; 4]]));

        assert_eq!(
            corners.center_y().into_data().to_vec::<f32>().unwrap(),
            vec![2.0, 1.5, 0.0]
        );
        assert_eq!(
            corners.area().into_data().to_vec::<f32>().unwrap(),
            vec![8.0, 1.0, 0.0]
        );
    }

    #[test]
    #[should_panic = "Aligned boxes must have the same shape"]
    fn mismatched_box_counts_panic() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::zeros([2, 4], &device);
        let b = Tensor::<TestBackend, 2>::zeros([3, 4], &device);
        let _ = bbox_overlaps_aligned(a, b, OverlapMode::IoU, 1e-6);
    }
}
