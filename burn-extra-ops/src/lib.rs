//! Additional operations for the Burn deep learning framework
//!
//! This crate provides the tensor operations detection losses need that are not
//! available in the core Burn framework: an arctangent, one-hot label expansion and
//! aligned bounding-box overlaps.

use burn::prelude::*;

mod atan;
mod box_overlaps;
mod one_hot;

// Convenient re-exports
pub use atan::{atan, Atan};
pub use box_overlaps::{bbox_overlaps_aligned, BoxCorners, OverlapMode};
pub use one_hot::{one_hot, valid_label_mask};

/// Additional operations for Burn tensors
pub trait TensorExtraOps<B: Backend> {
    /// Extract column `index` of an `[n, k]` tensor as an `[n]` tensor.
    fn column(self, index: usize) -> Tensor<B, 1>;
}

impl<B: Backend> TensorExtraOps<B> for Tensor<B, 2> {
    fn column(self, index: usize) -> Tensor<B, 1> {
        let [n, k] = self.dims();
        assert!(index < k, "Column {index} out of range for {k} columns");
        self.narrow(1, index, 1).reshape([n])
    }
}
