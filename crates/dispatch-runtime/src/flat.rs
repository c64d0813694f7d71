// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Flat matmul flow (`mm`, `addmm` with a fused bias, and a 3-D lhs
//! against a 2-D rhs).

use matmul_planner::{
    detect_slice, detect_transpose_last_two, empty_result, slice_shape_supported, transposed_storage_view, Addmm,
    EmptyCheck, MatmulDims, MatmulOperator, MatmulPlan, MatmulRequest, Mm, SliceView,
};
use op_executor::BackendCall;
use tensor_core::{Layout, Shape, TensorDesc, TensorView};
use tracing::{debug, info};

use crate::context::{convert_output, finish, normalize_format, write_back, zero_result, FlowOutput, Target};
use crate::degenerate::{rewrite_degenerate, Core};
use crate::validate::validate_flat_lhs;
use crate::{DispatchContext, DispatchError, DispatchOutcome, MatmulArgs, RewriteKind, Stage, StageTrace};

struct Detected {
    lhs: TensorView,
    transpose_lhs: bool,
    rhs: TensorView,
    transpose_rhs: bool,
    /// A 3-D lhs the backend reads in place, with its 2-D stand-in.
    slice: Option<(SliceView, TensorDesc)>,
}

struct Prepared {
    plan: MatmulPlan,
    lhs: TensorView,
    rhs: TensorView,
    bias: Option<TensorView>,
}

/// Runs one flat matmul (`[M, K] x [K, N]`, optional `[N]` bias) and writes
/// the result into `out`.
///
/// A 3-D lhs is either consumed as a row slice (newest generation) or
/// folded to `[B * M, K]`, so a transposed 3-D lhs is rejected before any
/// stage runs. Other preconditions are not re-validated here; see
/// [`crate::mm`] for the checked entry point.
pub fn execute_matmul(
    ctx: &DispatchContext<'_>,
    args: &MatmulArgs<'_>,
    out: &TensorView,
) -> Result<DispatchOutcome, DispatchError> {
    validate_flat_lhs(args)?;
    let mut trace = StageTrace::new();
    trace.mark(Stage::Start);
    let flow = run_flat(ctx, args, &Target::of(out), &mut trace)?;
    write_back(ctx, &flow.result, out, &mut trace)?;
    Ok(finish(ctx, flow, None, trace))
}

pub(crate) fn run_flat(
    ctx: &DispatchContext<'_>,
    args: &MatmulArgs<'_>,
    target: &Target,
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
            false,
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

    let operator: &dyn MatmulOperator = if args.bias.is_some() { &Addmm } else { &Mm };
    let prepared = trace.run(Stage::ContiguityAndCast, || {
        // Fold a 3-D lhs into rows unless it is read in place.
        let lhs = match &ops.slice {
            Some(_) => ops.lhs.clone(),
            None if ops.lhs.shape().rank() == 3 => exec.reshape(&ops.lhs, ops.lhs.shape().fold_leading())?,
            None => ops.lhs.clone(),
        };
        let lhs_desc = match &ops.slice {
            Some((_, stand_in)) => stand_in,
            None => lhs.desc(),
        };
        let request = MatmulRequest {
            lhs: lhs_desc,
            rhs: ops.rhs.desc(),
            bias: args.bias.map(TensorView::desc),
            out_dtype: Some(target.dtype),
            transpose_lhs: ops.transpose_lhs,
            transpose_rhs: ops.transpose_rhs,
            math: args.math,
        };
        let plan = operator.build_plan(&request, ctx.platform)?;
        debug!("{}", plan.summary());

        let lhs = if ops.slice.is_some() {
            exec.cast(&lhs, plan.lhs.dtype)?
        } else {
            exec.cast(&exec.contiguous(&lhs)?, plan.lhs.dtype)?
        };
        let rhs = exec.cast(&exec.contiguous(&ops.rhs)?, plan.rhs.dtype)?;
        let bias = match (args.bias, plan.bias.as_ref()) {
            (Some(bias), Some(bias_plan)) => Some(exec.cast(&exec.contiguous(bias)?, bias_plan.dtype)?),
            _ => None,
        };
        Ok(Prepared { plan, lhs, rhs, bias })
    })?;
    let Prepared { plan, lhs, rhs, bias } = prepared;

    let in_place = ops.slice.is_some();
    let core = trace.run(Stage::DegenerateRewriteCheck, || {
        if in_place {
            return Ok(Core::matmul(lhs, ops.transpose_lhs, rhs, ops.transpose_rhs));
        }
        rewrite_degenerate(ctx, &plan, lhs, ops.transpose_lhs, rhs, ops.transpose_rhs, &mut rewrites)
    })?;

    let (raw, backend) = trace.run(Stage::BackendDispatch, || match core {
        Core::Multiply { lhs, rhs } => {
            let call = BackendCall {
                backend: matmul_planner::BackendVariant::ElementwiseMul,
                lhs: &lhs,
                rhs: &rhs,
                bias: None,
                transpose_lhs: false,
                transpose_rhs: false,
                impl_mode: plan.impl_mode,
                out_dtype: plan.out.dtype,
            };
            Ok((exec.launch(&call)?, call.backend))
        }
        Core::Matmul {
            lhs,
            transpose_lhs,
            rhs,
            transpose_rhs,
        } => {
            let lhs = exec.trans_data(&lhs, plan.lhs.layout)?;
            let rhs = exec.trans_data(&rhs, plan.rhs.layout)?;
            let backend = operator.select_backend(&plan, ctx.oracle, ctx.platform);
            let call = BackendCall {
                backend,
                lhs: &lhs,
                rhs: &rhs,
                bias: bias.as_ref(),
                transpose_lhs,
                transpose_rhs,
                impl_mode: plan.impl_mode,
                out_dtype: plan.out.dtype,
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

fn untranspose(view: TensorView, transposed: bool, rewrites: &mut Vec<RewriteKind>) -> (TensorView, bool) {
    if view.shape().rank() == 2 && detect_transpose_last_two(view.desc()) {
        rewrites.push(RewriteKind::TransposeView);
        (view.with_desc(transposed_storage_view(view.desc())), !transposed)
    } else {
        (view, transposed)
    }
}

fn detect_views(
    ctx: &DispatchContext<'_>,
    args: &MatmulArgs<'_>,
    lhs: TensorView,
    rhs: TensorView,
    rewrites: &mut Vec<RewriteKind>,
) -> Result<Detected, DispatchError> {
    let (lhs, transpose_lhs) = untranspose(lhs, args.transpose_lhs, rewrites);
    let (rhs, transpose_rhs) = untranspose(rhs, args.transpose_rhs, rewrites);

    let mut slice = None;
    if lhs.shape().rank() == 3 && !transpose_lhs {
        if let Some(found) = detect_slice(lhs.desc(), rhs.desc(), ctx.platform) {
            let stand_in = TensorDesc::contiguous(Shape::matrix(found.m(), found.k), lhs.dtype(), Layout::RowMajor);
            let dims = MatmulDims::resolve(stand_in.shape(), false, rhs.shape(), transpose_rhs)?;
            let supported =
                slice_shape_supported(&dims, lhs.dtype(), rhs.dtype(), args.math.allows_hf32(), ctx.platform);
            debug!("{supported}");
            if supported.holds() {
                info!("sliced lhs {} read in place as {dims}", lhs.shape());
                rewrites.push(RewriteKind::SliceView);
                slice = Some((found, stand_in));
            }
        }
    }
    Ok(Detected {
        lhs,
        transpose_lhs,
        rhs,
        transpose_rhs,
        slice,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use matmul_planner::{BackendVariant, NeverV3, PlatformInfo, SocVersion};
    use op_executor::{HostExecutor, OperatorExecutor};
    use tensor_core::{DType, Tensor};

    fn upload(exec: &HostExecutor, dims: Vec<usize>, dtype: DType) -> TensorView {
        let shape = Shape::new(dims);
        let values: Vec<f32> = (0..shape.num_elements()).map(|i| (i % 5) as f32 - 2.0).collect();
        exec.upload(&Tensor::from_f32_as(shape, dtype, &values).unwrap(), Layout::RowMajor)
            .unwrap()
    }

    #[test]
    fn test_flat_f16_on_910b() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![4, 16], DType::F16);
        let rhs = upload(&exec, vec![16, 8], DType::F16);
        let out = exec.alloc_tensor(&Shape::matrix(4, 8), DType::F16, Layout::RowMajor).unwrap();

        let outcome = execute_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
        assert_eq!(outcome.backend, Some(BackendVariant::MatMulNd));
        assert!(outcome.rewrites.is_empty());
        assert_eq!(
            outcome.trace.stages(),
            vec![
                Stage::Start,
                Stage::EmptyCheck,
                Stage::FormatNormalize,
                Stage::NonContiguousDetection,
                Stage::ContiguityAndCast,
                Stage::DegenerateRewriteCheck,
                Stage::BackendDispatch,
                Stage::OutputConvert,
                Stage::WriteBack,
                Stage::Done,
            ]
        );
    }

    #[test]
    fn test_k_equal_1_runs_as_mul() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![5, 1], DType::F32);
        let rhs = upload(&exec, vec![1, 7], DType::F32);
        let out = exec.alloc_tensor(&Shape::matrix(5, 7), DType::F32, Layout::RowMajor).unwrap();

        let outcome = execute_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
        assert_eq!(outcome.backend, Some(BackendVariant::ElementwiseMul));
        assert!(outcome.rewrote(RewriteKind::KEqual1));

        let a = exec.download(&lhs).unwrap().to_f32_vec();
        let b = exec.download(&rhs).unwrap().to_f32_vec();
        let got = exec.download(&out).unwrap().to_f32_vec();
        for i in 0..5 {
            for j in 0..7 {
                assert_eq!(got[i * 7 + j], a[i] * b[j]);
            }
        }
    }

    #[test]
    fn test_transposed_rhs_view_skips_copy() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![4, 16], DType::F32);
        let stored = upload(&exec, vec![8, 16], DType::F32);
        let rhs = stored.with_desc(stored.desc().swap_last_two());
        let out = exec.alloc_tensor(&Shape::matrix(4, 8), DType::F32, Layout::RowMajor).unwrap();

        let outcome = execute_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
        assert!(outcome.rewrote(RewriteKind::TransposeView));
        assert!(!exec.launches().iter().any(|l| l.kernel == "Contiguous"));

        let host_lhs = exec.download(&lhs).unwrap();
        let host_rhs = exec.download(&stored).unwrap();
        let expected = tensor_core::matmul(&host_lhs, &host_rhs, false, true).unwrap();
        assert_eq!(exec.download(&out).unwrap().to_f32_vec(), expected.to_f32_vec());
    }

    #[test]
    fn test_sliced_lhs_read_in_place_on_newest() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend950);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        // Rows 16..24 of each [32, 64] batch.
        let source = upload(&exec, vec![4, 32, 64], DType::F32);
        let lhs = exec
            .create_view(&source, Shape::new(vec![4, 8, 64]), vec![2048, 64, 1], 16 * 64)
            .unwrap();
        let rhs = upload(&exec, vec![64, 16], DType::F32);
        let out = exec.alloc_tensor(&Shape::new(vec![4, 8, 16]), DType::F32, Layout::RowMajor).unwrap();

        let outcome = execute_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
        assert!(outcome.rewrote(RewriteKind::SliceView));
        assert!(!exec.launches().iter().any(|l| l.kernel == "Contiguous"));

        let host_lhs = exec.download(&lhs).unwrap();
        let host_rhs = exec.download(&rhs).unwrap();
        let expected = tensor_core::matmul(&host_lhs, &host_rhs, false, false).unwrap();
        let got = exec.download(&out).unwrap();
        assert_eq!(got.shape(), &Shape::new(vec![4, 8, 16]));
        assert_eq!(got.to_f32_vec(), expected.to_f32_vec());
    }

    #[test]
    fn test_3d_lhs_folds_into_rows() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![2, 3, 16], DType::F32);
        let rhs = upload(&exec, vec![16, 4], DType::F32);
        let out = exec.alloc_tensor(&Shape::new(vec![2, 3, 4]), DType::F32, Layout::RowMajor).unwrap();

        let outcome = execute_matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
        assert_eq!(outcome.plan.unwrap().lhs.shape, Shape::matrix(6, 16));
        assert_eq!(exec.download(&out).unwrap().shape(), &Shape::new(vec![2, 3, 4]));
    }

    #[test]
    fn test_transposed_3d_lhs_is_rejected() {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![2, 16, 3], DType::F32);
        let rhs = upload(&exec, vec![16, 4], DType::F32);
        let out = exec.alloc_tensor(&Shape::new(vec![2, 3, 4]), DType::F32, Layout::RowMajor).unwrap();

        let args = MatmulArgs::new(&lhs, &rhs).transposed(true, false);
        let err = execute_matmul(&ctx, &args, &out).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parameter);
        assert!(exec.launches().is_empty());
    }
}
