// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Checked entry points: `mm`, `bmm` and the rank-generic `matmul`.

use matmul_planner::PlanError;
use tensor_core::TensorView;
use tracing::debug;

use crate::batched::execute_batched_matmul;
use crate::context::view_of;
use crate::flat::execute_matmul;
use crate::validate::{promoted_shape, validate_bmm, validate_matmul, validate_mm};
use crate::{DispatchContext, DispatchError, DispatchOutcome, MatmulArgs};

/// `out = lhs @ rhs (+ bias)` for 2-D operands.
pub fn mm(ctx: &DispatchContext<'_>, args: &MatmulArgs<'_>, out: &TensorView) -> Result<DispatchOutcome, DispatchError> {
    validate_mm(args, out, ctx.platform)?;
    execute_matmul(ctx, args, out)
}

/// `out = lhs @ rhs` for 3-D operands with equal or broadcast batches.
pub fn bmm(ctx: &DispatchContext<'_>, args: &MatmulArgs<'_>, out: &TensorView) -> Result<DispatchOutcome, DispatchError> {
    validate_bmm(args, out, ctx.platform)?;
    execute_batched_matmul(ctx, args, out, false)
}

/// Rank-generic matmul.
///
/// Rank-1 operands are read as `[1, K]` (left) or `[K, 1]` (right) through
/// views. Two matrices, or a 3-D lhs against an untransposed matrix, take
/// the flat path; everything else runs batched.
pub fn matmul(
    ctx: &DispatchContext<'_>,
    args: &MatmulArgs<'_>,
    out: &TensorView,
) -> Result<DispatchOutcome, DispatchError> {
    validate_matmul(args, out, ctx.platform)?;

    let lhs = as_matrix(ctx, args.lhs, true)?;
    let rhs = as_matrix(ctx, args.rhs, false)?;
    let call = MatmulArgs {
        lhs: &lhs,
        rhs: &rhs,
        ..*args
    };

    let (lhs_rank, rhs_rank) = (lhs.shape().rank(), rhs.shape().rank());
    let flat = rhs_rank == 2 && (lhs_rank == 2 || (lhs_rank == 3 && !args.transpose_lhs));
    debug!(
        "matmul {} x {} -> {} path",
        lhs.shape(),
        rhs.shape(),
        if flat { "flat" } else { "batched" }
    );
    if flat {
        execute_matmul(ctx, &call, out)
    } else {
        execute_batched_matmul(ctx, &call, out, false)
    }
}

fn as_matrix(ctx: &DispatchContext<'_>, view: &TensorView, is_lhs: bool) -> Result<TensorView, DispatchError> {
    if view.shape().rank() != 1 {
        return Ok(view.clone());
    }
    let shape = promoted_shape(view.shape(), is_lhs);
    let stride = view.desc().strides()[0];
    let strides = if is_lhs { vec![0, stride] } else { vec![stride, 0] };
    let desc = view.desc().restride(shape, strides, view.desc().offset()).map_err(PlanError::from)?;
    view_of(ctx, view, &desc)
}
