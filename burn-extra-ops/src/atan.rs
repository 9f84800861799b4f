//! # Arctangent (atan)
//!
//! Elementwise arctangent built from differentiable tensor primitives, so it can
//! sit inside an autodiff graph on any backend.
//!
//! Arguments outside `[-1, 1]` are folded back with
//! `atan(x) = sign(x) π/2 - atan(1/x)`. The folded value is evaluated with a
//! degree-11 odd minimax polynomial whose maximum absolute error is about `1e-5`.

use burn::prelude::*;
use core::f64::consts::FRAC_PI_2;

const COEFFS: [f64; 6] = [
    0.999_977_26,
    -0.332_623_47,
    0.193_543_46,
    -0.116_432_87,
    0.052_653_32,
    -0.011_721_20,
];

/// A trait for calculating the arctangent on a tensor.
pub trait Atan {
    /// Calculates the arctangent element-wise.
    fn atan(self) -> Self;
}

impl<B: Backend, const D: usize> Atan for Tensor<B, D> {
    fn atan(self) -> Self {
        atan_(self)
    }
}

fn atan_<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let outer_mask = x.clone().abs().greater_elem(1.0);

    // The polynomial is odd, so the inner branch needs no sign folding.
    let inner = evaluate_polynomial(x.clone().clamp(-1.0, 1.0));

    // Both branches stay finite, which keeps the masked-out gradient finite too.
    let safe = x.clone().mask_fill(outer_mask.clone().bool_not(), 1.0);
    let outer = x.sign() * FRAC_PI_2 - evaluate_polynomial(safe.recip());

    inner.mask_where(outer_mask, outer)
}

/// Evaluates `z * P(z²)` with Horner's method.
fn evaluate_polynomial<B: Backend, const D: usize>(z: Tensor<B, D>) -> Tensor<B, D> {
    let z2 = z.clone().powf_scalar(2.0);
    let mut acc = z2.clone() * COEFFS[5] + COEFFS[4];
    for coeff in COEFFS[..4].iter().rev() {
        acc = acc * z2.clone() + *coeff;
    }
    acc * z
}

/// Convenience function for the arctangent
pub fn atan<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.atan()
}
