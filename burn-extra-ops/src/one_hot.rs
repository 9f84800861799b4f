//! One-hot label expansion.

use burn::prelude::*;

/// Expands integer class labels into a float one-hot matrix.
///
/// Labels outside `[0, num_classes)` produce an all-zero row, which is how
/// detection heads encode background and ignored samples.
///
/// # Shapes
/// - labels: `[n]`
/// - output: `[n, num_classes]`
pub fn one_hot<B: Backend>(labels: Tensor<B, 1, Int>, num_classes: usize) -> Tensor<B, 2> {
    let [n] = labels.dims();
    let device = labels.device();

    let classes = Tensor::<B, 1, Int>::arange(0..num_classes as i64, &device)
        .reshape([1, num_classes])
        .repeat_dim(0, n);

    labels
        .reshape([n, 1])
        .repeat_dim(1, num_classes)
        .equal(classes)
        .float()
}

/// Mask of labels that name a real class, i.e. lie in `[0, num_classes)`.
pub fn valid_label_mask<B: Backend>(
    labels: Tensor<B, 1, Int>,
    num_classes: usize,
) -> Tensor<B, 1, Bool> {
    let non_negative = labels.clone().greater_equal_elem(0);
    let below = labels.lower_elem(num_classes as i64);
    non_negative.int().mul(below.int()).equal_elem(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn one_hot_marks_label_columns() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([2, 0, 1], &device);
        let result = one_hot(labels, 3);

        assert_eq!(
            result.into_data().to_vec::<f32>().unwrap(),
            vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn one_hot_out_of_range_labels_are_zero_rows() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([3, -100], &device);
        let result = one_hot(labels, 3);

        assert_eq!(result.dims(), [2, 3]);
        assert_eq!(result.sum().into_scalar(), 0.0);
    }

    #[test]
    fn valid_label_mask_excludes_background_and_ignored() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0, 4, -1, 3], &device);
        let mask = valid_label_mask(labels, 4).int();

        assert_eq!(
            mask.into_data().to_vec::<i64>().unwrap(),
            vec![1, 0, 0, 1]
        );
    }
}
