// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shape model: M/K/N extraction, batch descriptors and output shapes.
//!
//! Operand shapes are always given in storage order. A transposed lhs is
//! stored as `[.., K, M]` and a transposed rhs as `[.., N, K]`:
//!
//! ```text
//!   lhs  !t: [.., M, K]     t: [.., K, M]
//!   rhs  !t: [.., K, N]     t: [.., N, K]
//! ```

use tensor_core::Shape;

use crate::PlanError;

/// Maximum number of leading batch dimensions.
pub const MAX_BATCH_DIMS: usize = 4;
/// Highest operand rank the batched path accepts.
pub const MAX_RANK: usize = MAX_BATCH_DIMS + 2;

/// Which side of the product an operand sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Side {
    Lhs,
    Rhs,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Lhs => "lhs",
            Side::Rhs => "rhs",
        }
    }
}

/// Returns `(contraction, outer)` for an operand of rank ≥ 2.
///
/// For the lhs the outer dimension is M, for the rhs it is N.
pub fn compute_mkn(shape: &Shape, transposed: bool, side: Side) -> Option<(usize, usize)> {
    let (rows, cols) = shape.last_two()?;
    let contraction_is_rows = match side {
        Side::Lhs => transposed,
        Side::Rhs => !transposed,
    };
    Some(if contraction_is_rows { (rows, cols) } else { (cols, rows) })
}

/// Logical M/K/N of a matmul.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct MatmulDims {
    pub m: usize,
    pub k: usize,
    pub n: usize,
}

impl MatmulDims {
    pub fn new(m: usize, k: usize, n: usize) -> Self {
        Self { m, k, n }
    }

    /// Resolves M/K/N from both operands, checking the contraction axis.
    pub fn resolve(lhs: &Shape, transpose_lhs: bool, rhs: &Shape, transpose_rhs: bool) -> Result<Self, PlanError> {
        let (lhs_k, m) = compute_mkn(lhs, transpose_lhs, Side::Lhs).ok_or(PlanError::InvalidRank {
            operand: "lhs",
            rank: lhs.rank(),
            expected: ">= 2",
        })?;
        let (rhs_k, n) = compute_mkn(rhs, transpose_rhs, Side::Rhs).ok_or(PlanError::InvalidRank {
            operand: "rhs",
            rank: rhs.rank(),
            expected: ">= 2",
        })?;
        if lhs_k != rhs_k {
            return Err(PlanError::ContractionMismatch {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
                lhs_k,
                rhs_k,
            });
        }
        Ok(Self { m, k: lhs_k, n })
    }

    pub fn max_mn(&self) -> usize {
        self.m.max(self.n)
    }

    pub fn min_mn(&self) -> usize {
        self.m.min(self.n)
    }
}

impl std::fmt::Display for MatmulDims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m={} k={} n={}", self.m, self.k, self.n)
    }
}

/// Right-aligned leading dimensions, padded with 1 on the left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct BatchDims(pub [usize; MAX_BATCH_DIMS]);

impl BatchDims {
    /// Product of all batch dimensions.
    pub fn count(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_broadcast_compatible(&self, other: &BatchDims) -> bool {
        self.0
            .iter()
            .zip(&other.0)
            .rev()
            .all(|(&a, &b)| a == b || a == 1 || b == 1)
    }

    /// Per-position maximum; the broadcast result of two compatible batches.
    pub fn broadcast(&self, other: &BatchDims) -> BatchDims {
        let mut dims = [1usize; MAX_BATCH_DIMS];
        for (i, d) in dims.iter_mut().enumerate() {
            *d = self.0[i].max(other.0[i]);
        }
        BatchDims(dims)
    }
}

/// Batch descriptor of `shape`: everything but the trailing two dims.
pub fn batch_dims(shape: &Shape) -> BatchDims {
    let mut dims = [1usize; MAX_BATCH_DIMS];
    let leading = shape.batch_dims();
    for (slot, &d) in dims.iter_mut().rev().zip(leading.iter().rev()) {
        *slot = d;
    }
    BatchDims(dims)
}

pub fn batch_broadcast_compatible(lhs: &Shape, rhs: &Shape) -> bool {
    batch_dims(lhs).is_broadcast_compatible(&batch_dims(rhs))
}

/// Product of the leading dimensions (1 for rank ≤ 2).
pub fn batch_count(shape: &Shape) -> usize {
    shape.batch_dims().iter().product()
}

pub fn batch_equal(lhs: &Shape, rhs: &Shape) -> bool {
    batch_dims(lhs) == batch_dims(rhs)
}

/// Output shape `[..batch, M, N]` of a possibly broadcast batched matmul.
///
/// Both ranks must lie in `2..=6`. The output rank is the larger of the two.
pub fn infer_output_shape(
    lhs: &Shape,
    rhs: &Shape,
    transpose_lhs: bool,
    transpose_rhs: bool,
) -> Result<Shape, PlanError> {
    for (operand, shape) in [("lhs", lhs), ("rhs", rhs)] {
        if !(2..=MAX_RANK).contains(&shape.rank()) {
            return Err(PlanError::InvalidRank {
                operand,
                rank: shape.rank(),
                expected: "2..=6",
            });
        }
    }
    let dims = MatmulDims::resolve(lhs, transpose_lhs, rhs, transpose_rhs)?;
    let (lb, rb) = (batch_dims(lhs), batch_dims(rhs));
    if !lb.is_broadcast_compatible(&rb) {
        return Err(PlanError::BatchMismatch {
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        });
    }
    let out_rank = lhs.rank().max(rhs.rank());
    let batch = lb.broadcast(&rb);
    let mut out: Vec<usize> = batch.0[MAX_BATCH_DIMS - (out_rank - 2)..].to_vec();
    out.push(dims.m);
    out.push(dims.n);
    Ok(Shape::new(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compute_mkn() {
        let s = Shape::matrix(4, 16);
        assert_eq!(compute_mkn(&s, false, Side::Lhs), Some((16, 4)));
        assert_eq!(compute_mkn(&s, true, Side::Lhs), Some((4, 16)));
        assert_eq!(compute_mkn(&s, false, Side::Rhs), Some((4, 16)));
        assert_eq!(compute_mkn(&s, true, Side::Rhs), Some((16, 4)));
        assert_eq!(compute_mkn(&Shape::vector(3), false, Side::Lhs), None);
    }

    #[test]
    fn test_resolve_dims() {
        let d = MatmulDims::resolve(&Shape::matrix(4, 16), false, &Shape::matrix(16, 8), false).unwrap();
        assert_eq!(d, MatmulDims::new(4, 16, 8));
        // Transposed lhs stored [K, M], transposed rhs stored [N, K].
        let d = MatmulDims::resolve(&Shape::matrix(16, 4), true, &Shape::matrix(8, 16), true).unwrap();
        assert_eq!(d, MatmulDims::new(4, 16, 8));
        assert!(matches!(
            MatmulDims::resolve(&Shape::matrix(4, 16), false, &Shape::matrix(15, 8), false),
            Err(PlanError::ContractionMismatch { lhs_k: 16, rhs_k: 15, .. })
        ));
    }

    #[test]
    fn test_batch_dims_padding() {
        assert_eq!(batch_dims(&Shape::matrix(3, 4)), BatchDims([1, 1, 1, 1]));
        assert_eq!(batch_dims(&Shape::new(vec![2, 3, 4, 5])), BatchDims([1, 1, 2, 3]));
        assert_eq!(batch_count(&Shape::new(vec![2, 3, 4, 5])), 6);
        assert_eq!(batch_count(&Shape::matrix(4, 5)), 1);
    }

    #[test]
    fn test_batch_broadcast() {
        let a = Shape::new(vec![2, 1, 4, 5]);
        let b = Shape::new(vec![3, 5, 6]);
        assert!(batch_broadcast_compatible(&a, &b));
        assert!(!batch_broadcast_compatible(&Shape::new(vec![2, 4, 5]), &Shape::new(vec![3, 5, 6])));
        assert!(!batch_equal(&a, &b));
    }

    #[test]
    fn test_infer_output_shape() {
        let out = infer_output_shape(
            &Shape::new(vec![2, 3, 4, 16]),
            &Shape::new(vec![2, 3, 16, 8]),
            false,
            false,
        )
        .unwrap();
        assert_eq!(out.dims(), &[2, 3, 4, 8]);

        let out = infer_output_shape(&Shape::new(vec![5, 1, 4, 16]), &Shape::new(vec![7, 16, 8]), false, false).unwrap();
        assert_eq!(out.dims(), &[5, 7, 4, 8]);

        let out = infer_output_shape(&Shape::matrix(0, 16), &Shape::matrix(16, 8), false, false).unwrap();
        assert_eq!(out.dims(), &[0, 8]);
        assert!(out.has_zero_dim());

        assert!(infer_output_shape(&Shape::new(vec![1; 7]), &Shape::matrix(1, 1), false, false).is_err());
    }

    fn batch_strategy() -> impl Strategy<Value = Shape> {
        prop::collection::vec(prop_oneof![Just(1usize), 2usize..4], 2..=6).prop_map(Shape::new)
    }

    proptest! {
        #[test]
        fn prop_batch_broadcast_symmetric(a in batch_strategy(), b in batch_strategy()) {
            prop_assert_eq!(batch_broadcast_compatible(&a, &b), batch_broadcast_compatible(&b, &a));
        }

        #[test]
        fn prop_batch_broadcast_reflexive(a in batch_strategy()) {
            prop_assert!(batch_broadcast_compatible(&a, &a));
        }
    }
}
