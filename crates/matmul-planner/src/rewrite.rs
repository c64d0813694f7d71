// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Degenerate-shape rewrites.
//!
//! Checked in this order before any backend is chosen:
//!
//! 1. an empty operand produces a zero-filled result,
//! 2. a contraction of length one becomes an elementwise multiply,
//! 3. a unit M or N axis is moved outward by a view-only transpose.
//!
//! Rewrites 2 and 3 only apply to row-major operands.

use tensor_core::{DType, Layout, Shape, TensorDesc};
use tracing::debug;

use crate::batch_to_mul::{batch_to_mul_allowed, BatchToMulQuery};
use crate::{infer_output_shape, Eligibility, MatmulDims, PlanError, PlatformInfo};

const BF16_MUL_MAX_N: usize = 4000;
const BF16_MUL_MIN_MN: usize = 10000;

/// Outcome of the empty-operand check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum EmptyCheck {
    NotEmpty,
    /// The result is all zeros (plus bias, if any) of this shape.
    EmptyResult { out_shape: Shape },
}

/// Detects an empty operand and the shape of the resulting zero tensor.
///
/// On the batched-accumulate path a non-empty bias cannot be added into an
/// empty result.
pub fn empty_result(
    lhs: &Shape,
    rhs: &Shape,
    transpose_lhs: bool,
    transpose_rhs: bool,
    bias: Option<&Shape>,
    accumulate: bool,
) -> Result<EmptyCheck, PlanError> {
    if !lhs.has_zero_dim() && !rhs.has_zero_dim() {
        return Ok(EmptyCheck::NotEmpty);
    }
    let out_shape = infer_output_shape(lhs, rhs, transpose_lhs, transpose_rhs)?;
    if let Some(bias) = bias {
        if accumulate && out_shape.has_zero_dim() && !bias.has_zero_dim() {
            return Err(PlanError::NonEmptyBias {
                bias: bias.clone(),
                out: out_shape,
            });
        }
    }
    debug!("empty operand: result {out_shape} is zero-filled");
    Ok(EmptyCheck::EmptyResult { out_shape })
}

/// Facts the K=1 rule inspects.
#[derive(Debug, Clone, Copy)]
pub struct KEqual1Context {
    pub lhs_layout: Layout,
    pub rhs_layout: Layout,
    /// Resolved operand types.
    pub lhs_dtype: DType,
    pub rhs_dtype: DType,
    pub out_dtype: DType,
    pub has_bias: bool,
    pub dims: MatmulDims,
    pub transpose_lhs: bool,
    pub transpose_rhs: bool,
    pub is_batched: bool,
    pub lhs_batch: usize,
    pub rhs_batch: usize,
}

/// Whether a K=1 matmul may run as an elementwise multiply.
pub fn k_equal_1_eligible(ctx: &KEqual1Context, platform: &PlatformInfo) -> Eligibility {
    let dims = ctx.dims;
    let mut rule = Eligibility::all("k_equal_1")
        .check("lhs_not_tiled", !ctx.lhs_layout.is_tiled())
        .check("rhs_not_tiled", !ctx.rhs_layout.is_tiled())
        .check("out_dtype_matches_lhs", ctx.out_dtype == ctx.lhs_dtype)
        .check("out_dtype_matches_rhs", ctx.out_dtype == ctx.rhs_dtype)
        .check("no_bias", !ctx.has_bias)
        .check("k_is_one", dims.k == 1);

    if ctx.is_batched {
        let query = BatchToMulQuery {
            dims,
            dtype: ctx.lhs_dtype,
            transpose_lhs: ctx.transpose_lhs,
            transpose_rhs: ctx.transpose_rhs,
            lhs_batch: ctx.lhs_batch,
            rhs_batch: ctx.rhs_batch,
        };
        rule = rule.check_with("batch_to_mul", || batch_to_mul_allowed(&query, platform));
    } else if ctx.lhs_dtype == DType::BF16 {
        rule = rule
            .check("n_within_limit", dims.n <= BF16_MUL_MAX_N)
            .check("soc_supports_mul", platform.soc.is_mid_generation())
            .check("mn_above_limit", dims.m * dims.n >= BF16_MUL_MIN_MN);
    }
    debug!("{rule}");
    rule
}

/// Operands of a K=1 multiply, both untransposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KEqual1Rewrite {
    /// `[.., M, 1]`
    pub lhs: TensorDesc,
    /// `[.., 1, N]`
    pub rhs: TensorDesc,
}

/// Re-reads transposed K=1 operands in natural order.
///
/// A transposed lhs is stored `[.., 1, M]`; since one axis has length one
/// the same bytes read as `[.., M, 1]`. The rhs is handled symmetrically.
pub fn fold_k_equal_1(
    lhs: &TensorDesc,
    transpose_lhs: bool,
    rhs: &TensorDesc,
    transpose_rhs: bool,
) -> Result<KEqual1Rewrite, PlanError> {
    let untranspose = |desc: &TensorDesc, transposed: bool| -> Result<TensorDesc, PlanError> {
        if transposed {
            Ok(desc.reshape(desc.shape().with_last_two_swapped())?)
        } else {
            Ok(desc.clone())
        }
    };
    Ok(KEqual1Rewrite {
        lhs: untranspose(lhs, transpose_lhs)?,
        rhs: untranspose(rhs, transpose_rhs)?,
    })
}

/// A view-only move of a unit axis, remembering how to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisPromotion {
    pub original: TensorDesc,
    pub original_transposed: bool,
    pub desc: TensorDesc,
    pub transposed: bool,
}

impl AxisPromotion {
    fn swap(desc: &TensorDesc, transposed: bool) -> Option<Self> {
        let swapped = desc.reshape(desc.shape().with_last_two_swapped()).ok()?;
        Some(Self {
            original: desc.clone(),
            original_transposed: transposed,
            desc: swapped,
            transposed: !transposed,
        })
    }

    /// Restores the original descriptor and transpose flag.
    pub fn undo(&self) -> Result<(TensorDesc, bool), PlanError> {
        let desc = self.desc.reshape(self.original.shape().clone())?;
        Ok((desc, !self.transposed))
    }
}

/// M=1 with a transposed lhs stored `[.., K, 1]` becomes `[.., 1, K]` untransposed.
pub fn promote_m_equal_1(lhs: &TensorDesc, transposed: bool, layout: Layout) -> Option<AxisPromotion> {
    let applies = !layout.is_tiled() && transposed && lhs.shape().dim_from_end(1) == Some(1);
    if !applies {
        return None;
    }
    AxisPromotion::swap(lhs, transposed)
}

/// N=1 with an untransposed rhs stored `[.., K, 1]` becomes `[.., 1, K]` transposed.
pub fn promote_n_equal_1(rhs: &TensorDesc, transposed: bool, layout: Layout) -> Option<AxisPromotion> {
    let applies = !layout.is_tiled() && !transposed && rhs.shape().dim_from_end(1) == Some(1);
    if !applies {
        return None;
    }
    AxisPromotion::swap(rhs, transposed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SocVersion;

    fn desc(dims: Vec<usize>) -> TensorDesc {
        TensorDesc::contiguous(Shape::new(dims), DType::F32, Layout::RowMajor)
    }

    #[test]
    fn test_empty_result_shape() {
        let r = empty_result(&Shape::matrix(0, 16), &Shape::matrix(16, 8), false, false, None, false).unwrap();
        assert_eq!(r, EmptyCheck::EmptyResult { out_shape: Shape::matrix(0, 8) });

        // K = 0 gives a non-empty zero result.
        let r = empty_result(&Shape::matrix(4, 0), &Shape::matrix(0, 8), false, false, None, false).unwrap();
        assert_eq!(r, EmptyCheck::EmptyResult { out_shape: Shape::matrix(4, 8) });

        let r = empty_result(&Shape::matrix(4, 16), &Shape::matrix(16, 8), false, false, None, false).unwrap();
        assert_eq!(r, EmptyCheck::NotEmpty);
    }

    #[test]
    fn test_empty_result_rejects_bias_only_when_accumulating() {
        let lhs = Shape::new(vec![0, 4, 16]);
        let rhs = Shape::new(vec![0, 16, 8]);
        let bias = Shape::vector(8);
        assert!(matches!(
            empty_result(&lhs, &rhs, false, false, Some(&bias), true),
            Err(PlanError::NonEmptyBias { .. })
        ));
        assert!(empty_result(&lhs, &rhs, false, false, Some(&bias), false).is_ok());
        assert!(empty_result(&lhs, &rhs, false, false, Some(&Shape::vector(0)), true).is_ok());
    }

    fn ctx(dtype: DType, dims: MatmulDims) -> KEqual1Context {
        KEqual1Context {
            lhs_layout: Layout::RowMajor,
            rhs_layout: Layout::RowMajor,
            lhs_dtype: dtype,
            rhs_dtype: dtype,
            out_dtype: dtype,
            has_bias: false,
            dims,
            transpose_lhs: false,
            transpose_rhs: false,
            is_batched: false,
            lhs_batch: 1,
            rhs_batch: 1,
        }
    }

    #[test]
    fn test_k_equal_1_rule() {
        let p = PlatformInfo::new(SocVersion::Ascend910B);
        assert!(k_equal_1_eligible(&ctx(DType::F32, MatmulDims::new(5, 1, 7)), &p).holds());

        let tiled = KEqual1Context {
            rhs_layout: Layout::Tiled,
            ..ctx(DType::F16, MatmulDims::new(5, 1, 7))
        };
        assert_eq!(k_equal_1_eligible(&tiled, &p).first_failure(), Some("rhs_not_tiled"));

        let widened = KEqual1Context {
            out_dtype: DType::F32,
            ..ctx(DType::F16, MatmulDims::new(5, 1, 7))
        };
        assert_eq!(k_equal_1_eligible(&widened, &p).first_failure(), Some("out_dtype_matches_lhs"));

        let biased = KEqual1Context {
            has_bias: true,
            ..ctx(DType::F32, MatmulDims::new(5, 1, 7))
        };
        assert_eq!(k_equal_1_eligible(&biased, &p).first_failure(), Some("no_bias"));

        assert_eq!(
            k_equal_1_eligible(&ctx(DType::F32, MatmulDims::new(5, 2, 7)), &p).first_failure(),
            Some("k_is_one")
        );
    }

    #[test]
    fn test_k_equal_1_bf16_limits() {
        let p = PlatformInfo::new(SocVersion::Ascend910B);
        assert!(k_equal_1_eligible(&ctx(DType::BF16, MatmulDims::new(100, 1, 200)), &p).holds());
        assert_eq!(
            k_equal_1_eligible(&ctx(DType::BF16, MatmulDims::new(5, 1, 7)), &p).first_failure(),
            Some("mn_above_limit")
        );
        assert_eq!(
            k_equal_1_eligible(&ctx(DType::BF16, MatmulDims::new(5, 1, 5000)), &p).first_failure(),
            Some("n_within_limit")
        );
        let p950 = PlatformInfo::new(SocVersion::Ascend950);
        assert_eq!(
            k_equal_1_eligible(&ctx(DType::BF16, MatmulDims::new(100, 1, 200)), &p950).first_failure(),
            Some("soc_supports_mul")
        );
    }

    #[test]
    fn test_k_equal_1_batched_uses_generation_table() {
        let batched = KEqual1Context {
            is_batched: true,
            lhs_batch: 4,
            rhs_batch: 4,
            ..ctx(DType::F16, MatmulDims::new(16, 1, 16))
        };
        assert!(k_equal_1_eligible(&batched, &PlatformInfo::new(SocVersion::Ascend910B)).holds());
        assert_eq!(
            k_equal_1_eligible(&batched, &PlatformInfo::new(SocVersion::Ascend910)).first_failure(),
            Some("batch_to_mul")
        );
    }

    #[test]
    fn test_fold_k_equal_1() {
        let lhs = desc(vec![1, 5]);
        let rhs = desc(vec![7, 1]);
        let folded = fold_k_equal_1(&lhs, true, &rhs, true).unwrap();
        assert_eq!(folded.lhs.shape().dims(), &[5, 1]);
        assert_eq!(folded.rhs.shape().dims(), &[1, 7]);

        let plain = fold_k_equal_1(&desc(vec![5, 1]), false, &desc(vec![1, 7]), false).unwrap();
        assert_eq!(plain.lhs.shape().dims(), &[5, 1]);
    }

    #[test]
    fn test_promote_m_equal_1_roundtrip() {
        let lhs = desc(vec![2, 16, 1]);
        let promoted = promote_m_equal_1(&lhs, true, Layout::RowMajor).unwrap();
        assert_eq!(promoted.desc.shape().dims(), &[2, 1, 16]);
        assert!(!promoted.transposed);
        let (undone, flag) = promoted.undo().unwrap();
        assert_eq!(undone, lhs);
        assert!(flag);

        assert!(promote_m_equal_1(&lhs, false, Layout::RowMajor).is_none());
        assert!(promote_m_equal_1(&lhs, true, Layout::Tiled).is_none());
    }

    #[test]
    fn test_promote_n_equal_1_roundtrip() {
        let rhs = desc(vec![16, 1]);
        let promoted = promote_n_equal_1(&rhs, false, Layout::RowMajor).unwrap();
        assert_eq!(promoted.desc.shape().dims(), &[1, 16]);
        assert!(promoted.transposed);
        let (undone, flag) = promoted.undo().unwrap();
        assert_eq!(undone.shape(), rhs.shape());
        assert!(!flag);

        assert!(promote_n_equal_1(&rhs, true, Layout::RowMajor).is_none());
        assert!(promote_n_equal_1(&desc(vec![16, 2]), false, Layout::RowMajor).is_none());
    }
}
