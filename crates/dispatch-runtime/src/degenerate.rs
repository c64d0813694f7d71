// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Degenerate-shape rewrites applied after operands are contiguous.

use matmul_planner::{
    batch_count, fold_k_equal_1, k_equal_1_eligible, promote_m_equal_1, promote_n_equal_1, KEqual1Context,
    MatmulPlan,
};
use tensor_core::TensorView;
use tracing::info;

use crate::context::view_of;
use crate::{DispatchContext, DispatchError, RewriteKind};

/// What the backend stage has to run.
#[derive(Debug, Clone)]
pub(crate) enum Core {
    /// K=1: broadcast product of `[.., M, 1]` and `[.., 1, N]`.
    Multiply { lhs: TensorView, rhs: TensorView },
    Matmul {
        lhs: TensorView,
        transpose_lhs: bool,
        rhs: TensorView,
        transpose_rhs: bool,
    },
}

impl Core {
    pub fn matmul(lhs: TensorView, transpose_lhs: bool, rhs: TensorView, transpose_rhs: bool) -> Self {
        Core::Matmul {
            lhs,
            transpose_lhs,
            rhs,
            transpose_rhs,
        }
    }
}

/// Tries K=1, then M=1 and N=1, on prepared operands.
pub(crate) fn rewrite_degenerate(
    ctx: &DispatchContext<'_>,
    plan: &MatmulPlan,
    lhs: TensorView,
    transpose_lhs: bool,
    rhs: TensorView,
    transpose_rhs: bool,
    rewrites: &mut Vec<RewriteKind>,
) -> Result<Core, DispatchError> {
    let k1 = KEqual1Context {
        lhs_layout: lhs.layout(),
        rhs_layout: rhs.layout(),
        lhs_dtype: lhs.dtype(),
        rhs_dtype: rhs.dtype(),
        out_dtype: plan.out.dtype,
        has_bias: plan.has_bias(),
        dims: plan.dims,
        transpose_lhs,
        transpose_rhs,
        is_batched: plan.is_batched,
        lhs_batch: batch_count(lhs.shape()),
        rhs_batch: batch_count(rhs.shape()),
    };
    if k_equal_1_eligible(&k1, ctx.platform).holds() {
        let fold = fold_k_equal_1(lhs.desc(), transpose_lhs, rhs.desc(), transpose_rhs)?;
        let lhs = view_of(ctx, &lhs, &fold.lhs)?;
        let rhs = view_of(ctx, &rhs, &fold.rhs)?;
        info!("K=1: {} x {} runs as an elementwise multiply", lhs.shape(), rhs.shape());
        rewrites.push(RewriteKind::KEqual1);
        return Ok(Core::Multiply { lhs, rhs });
    }

    let (lhs, transpose_lhs) = match promote_m_equal_1(lhs.desc(), transpose_lhs, lhs.layout()) {
        Some(promoted) => {
            rewrites.push(RewriteKind::MEqual1);
            (view_of(ctx, &lhs, &promoted.desc)?, promoted.transposed)
        }
        None => (lhs, transpose_lhs),
    };
    let (rhs, transpose_rhs) = match promote_n_equal_1(rhs.desc(), transpose_rhs, rhs.layout()) {
        Some(promoted) => {
            rewrites.push(RewriteKind::NEqual1);
            (view_of(ctx, &rhs, &promoted.desc)?, promoted.transposed)
        }
        None => (rhs, transpose_rhs),
    };
    Ok(Core::matmul(lhs, transpose_lhs, rhs, transpose_rhs))
}
