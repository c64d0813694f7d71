// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batched matmul flow (`bmm`, `baddbmm` and rank > 2 `matmul`).
//!
//! Operands are `[.., M, K] x [.., K, N]` with up to four broadcast batch
//! axes. On the newest generation a permuted rhs can be handed to the
//! backend as-is; when only the lhs carries a batch the call is folded
//! into one flat matmul.

use matmul_planner::{
    accumulate_out_dtype, detect_transpose_last_two, detect_transpose_noncontiguous, empty_result,
    transpose_shape_supported, transposed_storage_view, Baddbmm, BackendVariant, Bmm, EmptyCheck, MatmulDims,
    MatmulOperator, MatmulPlan, MatmulRequest, TransposeKind, TransposeShapeQuery,
};
use op_executor::BackendCall;
use tensor_core::TensorView;
use tracing::{debug, info};

use crate::context::{
    convert_output, finish, normalize_format, write_back, zero_result, FlowOutput, Target,
};
use crate::degenerate::{rewrite_degenerate, Core};
use crate::{DispatchContext, DispatchError, DispatchOutcome, MatmulArgs, RewriteKind, Stage, StageTrace};

/// Operands after view detection.
struct Detected {
    lhs: TensorView,
    transpose_lhs: bool,
    rhs: TensorView,
    transpose_rhs: bool,
    /// The rhs is consumed through its permuted view.
    rhs_zero_copy: bool,
}

struct Prepared {
    plan: MatmulPlan,
    lhs: TensorView,
    rhs: TensorView,
    bias: Option<TensorView>,
}

/// Runs one batched matmul and writes the result into `out`.
///
/// With `is_accumulate` the bias is fused into the backend call
/// (`baddbmm` with unit scalars). Preconditions are not re-validated here;
/// see [`crate::bmm`] for the checked entry point.
pub fn execute_batched_matmul(
    ctx: &DispatchContext<'_>,
    args: &MatmulArgs<'_>,
    out: &TensorView,
    is_accumulate: bool,
) -> Result<DispatchOutcome, DispatchError> {
    let mut trace = StageTrace::new();
    trace.mark(Stage::Start);
    let flow = run_batched(ctx, args, &Target::of(out), is_accumulate, &mut trace)?;
    write_back(ctx, &flow.result, out, &mut trace)?;
    Ok(finish(ctx, flow, None, trace))
}

/// The batched flow up to (not including) write-back.
pub(crate) fn run_batched(
    ctx: &DispatchContext<'_>,
    args: &MatmulArgs<'_>,
    target: &Target,
    is_accumulate: bool,
    trace: &mut StageTrace,
) -> Result<FlowOutput, DispatchError> {
    let exec = ctx.executor;

    let empty = trace.run(Stage::EmptyCheck, || {
        let check = empty_result(
            args.lhs.shape(),
            args.rhs.shape(),
            args.transpose_lhs,
            args.transpose_rhs,
            args.bias.map(TensorView::shape),
            is_accumulate,
        )?;
        match check {
            EmptyCheck::NotEmpty => Ok(None),
            EmptyCheck::EmptyResult { out_shape } => zero_result(ctx, &out_shape, args.bias, target.dtype).map(Some),
        }
    })?;
    if let Some(result) = empty {
        return Ok(FlowOutput::rewritten(result, RewriteKind::EmptyResult));
    }

    let (lhs, rhs) = trace.run(Stage::FormatNormalize, || {
        Ok((normalize_format(args.lhs), normalize_format(args.rhs)))
    })?;

    let mut rewrites = Vec::new();
    let ops = trace.run(Stage::NonContiguousDetection, || {
        detect_views(ctx, args, lhs, rhs, &mut rewrites)
    })?;

    let operator: &dyn MatmulOperator = if is_accumulate { &Baddbmm } else { &Bmm };
    let prepared = trace.run(Stage::ContiguityAndCast, || {
        let request = MatmulRequest {
            lhs: ops.lhs.desc(),
            rhs: ops.rhs.desc(),
            bias: args.bias.map(TensorView::desc),
            out_dtype: Some(target.dtype),
            transpose_lhs: ops.transpose_lhs,
            transpose_rhs: ops.transpose_rhs,
            math: args.math,
        };
        let plan = operator.build_plan(&request, ctx.platform)?;
        debug!("{}", plan.summary());

        let lhs = exec.cast(&exec.contiguous(&ops.lhs)?, plan.lhs.dtype)?;
        let rhs = if ops.rhs_zero_copy {
            exec.cast(&ops.rhs, plan.rhs.dtype)?
        } else {
            exec.cast(&exec.contiguous(&ops.rhs)?, plan.rhs.dtype)?
        };
        let bias = match (args.bias, plan.bias.as_ref()) {
            (Some(bias), Some(bias_plan)) => Some(exec.cast(&exec.contiguous(bias)?, bias_plan.dtype)?),
            _ => None,
        };
        Ok(Prepared { plan, lhs, rhs, bias })
    })?;
    let Prepared { plan, lhs, rhs, bias } = prepared;

    let core = trace.run(Stage::DegenerateRewriteCheck, || {
        if ops.rhs_zero_copy {
            return Ok(Core::matmul(lhs, ops.transpose_lhs, rhs, ops.transpose_rhs));
        }
        rewrite_degenerate(ctx, &plan, lhs, ops.transpose_lhs, rhs, ops.transpose_rhs, &mut rewrites)
    })?;

    let (raw, backend) = trace.run(Stage::BackendDispatch, || match core {
        Core::Multiply { lhs, rhs } => {
            let call = BackendCall {
                backend: BackendVariant::ElementwiseMul,
                lhs: &lhs,
                rhs: &rhs,
                bias: None,
                transpose_lhs: false,
                transpose_rhs: false,
                impl_mode: plan.impl_mode,
                out_dtype: plan.out.dtype,
            };
            Ok((exec.launch(&call)?, BackendVariant::ElementwiseMul))
        }
        Core::Matmul {
            lhs,
            transpose_lhs,
            rhs,
            transpose_rhs,
        } => {
            let mut lhs = exec.trans_data(&lhs, plan.lhs.layout)?;
            let mut rhs = exec.trans_data(&rhs, plan.rhs.layout)?;
            let backend = operator.select_backend(&plan, ctx.oracle, ctx.platform);
            if backend == BackendVariant::FoldedBatchToMatMul {
                lhs = exec.reshape(&lhs, lhs.shape().fold_leading())?;
                rhs = exec.reshape(&rhs, rhs.shape().fold_leading())?;
                info!("batch folded into rows: {} x {}", lhs.shape(), rhs.shape());
                rewrites.push(RewriteKind::FoldBatch);
            }
            let out_dtype = if is_accumulate {
                accumulate_out_dtype(plan.lhs.dtype, plan.rhs.dtype, plan.out.dtype, ctx.platform)
            } else {
                plan.out.dtype
            };
            let call = BackendCall {
                backend,
                lhs: &lhs,
                rhs: &rhs,
                bias: bias.as_ref(),
                transpose_lhs,
                transpose_rhs,
                impl_mode: plan.impl_mode,
                out_dtype,
            };
            Ok((exec.launch(&call)?, backend))
        }
    })?;

    let result = trace.run(Stage::OutputConvert, || convert_output(ctx, &raw, target))?;
    Ok(FlowOutput {
        result,
        plan: Some(plan),
        backend: Some(backend),
        rewrites,
    })
}

fn untranspose(view: &TensorView, transposed: bool) -> Option<(TensorView, bool)> {
    detect_transpose_last_two(view.desc()).then(|| (view.with_desc(transposed_storage_view(view.desc())), !transposed))
}

/// Finds operands whose strides are a transpose of a contiguous buffer.
fn detect_views(
    ctx: &DispatchContext<'_>,
    args: &MatmulArgs<'_>,
    lhs: TensorView,
    rhs: TensorView,
    rewrites: &mut Vec<RewriteKind>,
) -> Result<Detected, DispatchError> {
    let (lhs, transpose_lhs) = match untranspose(&lhs, args.transpose_lhs) {
        Some(found) => {
            rewrites.push(RewriteKind::TransposeView);
            found
        }
        None => (lhs, args.transpose_lhs),
    };

    if let Some(kind) = detect_transpose_noncontiguous(rhs.desc(), ctx.platform) {
        let (candidate, transpose_rhs) = match kind {
            TransposeKind::NeedSwap => (rhs.with_desc(rhs.desc().swap_last_two()), !args.transpose_rhs),
            TransposeKind::NoSwap => (rhs.clone(), args.transpose_rhs),
        };
        let dims = MatmulDims::resolve(lhs.shape(), transpose_lhs, candidate.shape(), transpose_rhs)?;
        let query = TransposeShapeQuery {
            lhs: lhs.desc(),
            rhs: candidate.desc(),
            dims,
            has_bias: args.bias.is_some(),
        };
        if transpose_shape_supported(&query, ctx.platform).holds() {
            info!("permuted rhs {} ({kind:?}) consumed without a copy", candidate.shape());
            rewrites.push(RewriteKind::TransposeView);
            return Ok(Detected {
                lhs,
                transpose_lhs,
                rhs: candidate,
                transpose_rhs,
                rhs_zero_copy: true,
            });
        }
    }

    let (rhs, transpose_rhs) = match untranspose(&rhs, args.transpose_rhs) {
        Some(found) => {
            rewrites.push(RewriteKind::TransposeView);
            found
        }
        None => (rhs, args.transpose_rhs),
    };
    Ok(Detected {
        lhs,
        transpose_lhs,
        rhs,
        transpose_rhs,
        rhs_zero_copy: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use matmul_planner::{AlwaysV3, NeverV3, PlatformInfo, SocVersion};
    use op_executor::{HostExecutor, OperatorExecutor};
    use tensor_core::{DType, Layout, Shape, Tensor};

    fn upload(exec: &HostExecutor, dims: Vec<usize>, dtype: DType) -> TensorView {
        let shape = Shape::new(dims);
        let values: Vec<f32> = (0..shape.num_elements()).map(|i| (i % 7) as f32 - 3.0).collect();
        exec.upload(&Tensor::from_f32_as(shape, dtype, &values).unwrap(), Layout::RowMajor)
            .unwrap()
    }

    #[test]
    fn test_batched_v3_on_newest() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend950);
        let ctx = DispatchContext::new(&platform, &AlwaysV3, &exec);
        let lhs = upload(&exec, vec![2, 3, 4, 16], DType::F16);
        let rhs = upload(&exec, vec![2, 3, 16, 8], DType::F16);
        let out = exec.alloc_tensor(&Shape::new(vec![2, 3, 4, 8]), DType::F16, Layout::RowMajor).unwrap();

        let outcome = execute_batched_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out, false).unwrap();
        let backend = outcome.backend.unwrap();
        assert!(backend.is_v3() && backend.is_batched(), "got {backend}");
        assert_eq!(outcome.trace.last(), Some(Stage::Done));
        assert_eq!(exec.download(&out).unwrap().shape(), &Shape::new(vec![2, 3, 4, 8]));
    }

    #[test]
    fn test_lhs_only_batch_folds_on_newest() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend950);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![3, 4, 16], DType::F32);
        let rhs = upload(&exec, vec![1, 16, 8], DType::F32);
        let out = exec.alloc_tensor(&Shape::new(vec![3, 4, 8]), DType::F32, Layout::RowMajor).unwrap();

        let outcome = execute_batched_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out, false).unwrap();
        assert_eq!(outcome.backend, Some(BackendVariant::FoldedBatchToMatMul));
        assert!(outcome.rewrote(RewriteKind::FoldBatch));

        let host_lhs = exec.download(&lhs).unwrap();
        let host_rhs = exec.download(&rhs).unwrap().reshape(Shape::matrix(16, 8)).unwrap();
        let expected = tensor_core::matmul(&host_lhs, &host_rhs, false, false).unwrap();
        assert_eq!(exec.download(&out).unwrap().to_f32_vec(), expected.to_f32_vec());
    }

    #[test]
    fn test_empty_batch_skips_backend() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![2, 4, 0], DType::F32);
        let rhs = upload(&exec, vec![2, 0, 5], DType::F32);
        let out = exec.alloc_tensor(&Shape::new(vec![2, 4, 5]), DType::F32, Layout::RowMajor).unwrap();

        let outcome = execute_batched_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out, false).unwrap();
        assert!(outcome.rewrote(RewriteKind::EmptyResult));
        assert!(outcome.backend.is_none());
        assert!(exec.backends_launched().is_empty());
        assert!(exec.download(&out).unwrap().to_f32_vec().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_accumulate_rejects_bias_into_empty_result() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![2, 0, 4], DType::F32);
        let rhs = upload(&exec, vec![2, 4, 5], DType::F32);
        let bias = upload(&exec, vec![5], DType::F32);
        let out = exec.alloc_tensor(&Shape::new(vec![2, 0, 5]), DType::F32, Layout::RowMajor).unwrap();

        let args = MatmulArgs::new(&lhs, &rhs).with_bias(&bias);
        let err = execute_batched_matmul(&ctx, &args, &out, true).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parameter);
    }

    /// `[batch, 8, 16]` lhs against a `[batch, 16, 32]` rhs view of a
    /// contiguous buffer laid out in `storage_order`.
    fn permuted_rhs_call(
        exec: &HostExecutor,
        batch: usize,
        storage_order: [usize; 3],
    ) -> (TensorView, TensorView, TensorView) {
        let view_dims = [batch, 16, 32];
        let storage: Vec<usize> = storage_order.iter().map(|&axis| view_dims[axis]).collect();
        let mut strides = vec![0usize; 3];
        let mut acc = 1usize;
        for &axis in storage_order.iter().rev() {
            strides[axis] = acc;
            acc *= view_dims[axis];
        }
        let buffer = upload(exec, storage, DType::F32);
        let rhs = exec
            .create_view(&buffer, Shape::new(view_dims.to_vec()), strides, 0)
            .unwrap();
        let lhs = upload(exec, vec![batch, 8, 16], DType::F32);
        let out = exec.alloc_tensor(&Shape::new(vec![batch, 8, 32]), DType::F32, Layout::RowMajor).unwrap();
        (lhs, rhs, out)
    }

    fn assert_matches_reference(exec: &HostExecutor, lhs: &TensorView, rhs: &TensorView, out: &TensorView) {
        let host_lhs = exec.download(lhs).unwrap();
        let host_rhs = exec.download(rhs).unwrap();
        let expected = tensor_core::matmul(&host_lhs, &host_rhs, false, false).unwrap();
        let got = exec.download(out).unwrap();
        assert_eq!(got.shape(), expected.shape());
        assert_eq!(got.to_f32_vec(), expected.to_f32_vec());
    }

    #[test]
    fn test_permuted_rhs_consumed_without_copy() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend950);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        // [16, 40, 32] storage read as [40, 16, 32], strides [32, 1280, 1].
        let (lhs, rhs, out) = permuted_rhs_call(&exec, 40, [1, 0, 2]);
        assert_eq!(rhs.desc().strides(), &[32, 1280, 1]);

        let outcome = execute_batched_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out, false).unwrap();
        assert!(outcome.rewrote(RewriteKind::TransposeView));
        assert!(!exec.launches().iter().any(|l| l.kernel == "Contiguous"));
        assert_matches_reference(&exec, &lhs, &rhs, &out);
    }

    #[test]
    fn test_swapped_rhs_consumed_without_copy() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend950);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        // [32, 40, 16] storage read as [40, 16, 32].
        let (lhs, rhs, out) = permuted_rhs_call(&exec, 40, [2, 0, 1]);

        let outcome = execute_batched_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out, false).unwrap();
        assert!(outcome.rewrote(RewriteKind::TransposeView));
        assert!(outcome.plan.as_ref().unwrap().rhs.transposed);
        assert!(!exec.launches().iter().any(|l| l.kernel == "Contiguous"));
        assert_matches_reference(&exec, &lhs, &rhs, &out);
    }

    #[test]
    fn test_permuted_rhs_with_few_batches_is_copied() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend950);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let (lhs, rhs, out) = permuted_rhs_call(&exec, 4, [1, 0, 2]);
        assert!(4 <= platform.cube_core_count);

        let outcome = execute_batched_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out, false).unwrap();
        assert!(!outcome.rewrote(RewriteKind::TransposeView));
        assert!(exec.launches().iter().any(|l| l.kernel == "Contiguous"));
        assert_matches_reference(&exec, &lhs, &rhs, &out);
    }

    #[test]
    fn test_transposed_lhs_view_is_relabelled() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        // [2, 16, 4] storage read as [2, 4, 16].
        let stored = upload(&exec, vec![2, 16, 4], DType::F32);
        let lhs = stored.with_desc(stored.desc().swap_last_two());
        let rhs = upload(&exec, vec![2, 16, 8], DType::F32);
        let out = exec.alloc_tensor(&Shape::new(vec![2, 4, 8]), DType::F32, Layout::RowMajor).unwrap();

        let outcome = execute_batched_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out, false).unwrap();
        assert!(outcome.rewrote(RewriteKind::TransposeView));
        let launch = exec
            .launches()
            .into_iter()
            .find(|l| l.backend.is_some())
            .unwrap();
        assert_eq!(launch.shapes[0], Shape::new(vec![2, 16, 4]));
        assert!(!exec.launches().iter().any(|l| l.kernel == "Contiguous"));
    }
}
