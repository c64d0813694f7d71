// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end dispatch.
//!
//! These tests drive complete calls from host tensors through validation,
//! planning, rewriting and the host executor, proving that the four
//! library crates compose and that failures leave outputs untouched.

use dispatch_runtime::{
    addmm, baddbmm, bmm, matmul, mm, AddmmArgs, AddmmGraph, DispatchConfig, DispatchContext, DispatchEngine, ErrorKind,
    MatmulArgs, OperatorKind, PlanJob, RewriteKind, Stage,
};
use matmul_planner::{
    plan_call, AlwaysV3, BackendVariant, Mm, MatmulRequest, NeverV3, PlatformInfo, SocVersion, ThresholdOracle,
};
use op_executor::{HostExecutor, OperatorExecutor};
use proptest::prelude::*;
use tensor_core::{DType, Layout, Shape, Tensor, TensorDesc, TensorView};

// ── Helpers ────────────────────────────────────────────────────

fn ramp(dims: Vec<usize>, dtype: DType) -> Tensor {
    let shape = Shape::new(dims);
    let values: Vec<f32> = (0..shape.num_elements()).map(|i| ((i % 11) as f32 - 5.0) * 0.25).collect();
    Tensor::from_f32_as(shape, dtype, &values).unwrap()
}

fn upload(exec: &HostExecutor, dims: Vec<usize>, dtype: DType) -> TensorView {
    exec.upload(&ramp(dims, dtype), Layout::RowMajor).unwrap()
}

fn alloc(exec: &HostExecutor, dims: Vec<usize>, dtype: DType) -> TensorView {
    exec.alloc_tensor(&Shape::new(dims), dtype, Layout::RowMajor).unwrap()
}

fn reference(exec: &HostExecutor, lhs: &TensorView, rhs: &TensorView) -> Vec<f32> {
    let a = exec.download(lhs).unwrap();
    let b = exec.download(rhs).unwrap();
    tensor_core::matmul(&a, &b, false, false).unwrap().to_f32_vec()
}

// ── Scenarios ──────────────────────────────────────────────────

#[test]
fn test_small_fp16_uses_legacy_row_major_path() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend910B);
    let oracle = ThresholdOracle::default();
    let ctx = DispatchContext::new(&platform, &oracle, &exec);
    let lhs = upload(&exec, vec![4, 16], DType::F16);
    let rhs = upload(&exec, vec![16, 8], DType::F16);
    let out = alloc(&exec, vec![4, 8], DType::F16);

    let outcome = mm(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
    assert_eq!(outcome.backend, Some(BackendVariant::MatMulNd));
    assert!(!outcome.backend.unwrap().is_v3());
    assert_eq!(out.shape(), &Shape::matrix(4, 8));
    assert_eq!(outcome.trace.last(), Some(Stage::Done));
}

#[test]
fn test_batched_fp16_on_newest_selects_v3() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend950);
    let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
    let lhs = upload(&exec, vec![2, 3, 4, 16], DType::F16);
    let rhs = upload(&exec, vec![2, 3, 16, 8], DType::F16);
    let out = alloc(&exec, vec![2, 3, 4, 8], DType::F16);

    let outcome = matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
    assert_eq!(outcome.backend, Some(BackendVariant::BatchMatMulV3Nd));
    assert!(outcome.plan.unwrap().is_batched);
}

#[test]
fn test_single_rhs_batch_folds_but_keeps_output_shape() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend950);
    let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
    let lhs = upload(&exec, vec![2, 3, 4, 16], DType::F32);
    let rhs = upload(&exec, vec![1, 16, 8], DType::F32);
    let out = alloc(&exec, vec![2, 3, 4, 8], DType::F32);

    let outcome = matmul(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
    assert_eq!(outcome.backend, Some(BackendVariant::FoldedBatchToMatMul));
    assert!(outcome.rewrote(RewriteKind::FoldBatch));
    assert_eq!(out.shape(), &Shape::new(vec![2, 3, 4, 8]));

    let flat_rhs = exec.download(&rhs).unwrap().reshape(Shape::matrix(16, 8)).unwrap();
    let expected = tensor_core::matmul(&exec.download(&lhs).unwrap(), &flat_rhs, false, false).unwrap();
    assert_eq!(exec.download(&out).unwrap().to_f32_vec(), expected.to_f32_vec());
}

#[test]
fn test_empty_rows_issue_no_backend_call() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend910B);
    let ctx = DispatchContext::new(&platform, &AlwaysV3, &exec);
    let lhs = upload(&exec, vec![0, 16], DType::F16);
    let rhs = upload(&exec, vec![16, 8], DType::F16);
    let out = alloc(&exec, vec![0, 8], DType::F16);

    let outcome = mm(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
    assert!(outcome.rewrote(RewriteKind::EmptyResult));
    assert!(outcome.backend.is_none());
    assert!(exec.backends_launched().is_empty());
    assert_eq!(outcome.result.unwrap().shape(), &Shape::matrix(0, 8));
}

#[test]
fn test_zero_contraction_fills_zeros() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend910B);
    let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
    let lhs = upload(&exec, vec![3, 0], DType::F32);
    let rhs = upload(&exec, vec![0, 5], DType::F32);
    let out = upload(&exec, vec![3, 5], DType::F32);

    mm(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
    assert!(exec.backends_launched().is_empty());
    assert_eq!(exec.download(&out).unwrap().to_f32_vec(), vec![0.0; 15]);
}

#[test]
fn test_outer_product_runs_as_elementwise_mul() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend910B);
    let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
    let lhs = upload(&exec, vec![5, 1], DType::F32);
    let rhs = upload(&exec, vec![1, 7], DType::F32);
    let out = alloc(&exec, vec![5, 7], DType::F32);

    let outcome = mm(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
    assert_eq!(outcome.backend, Some(BackendVariant::ElementwiseMul));
    assert!(outcome.rewrote(RewriteKind::KEqual1));
    assert_eq!(exec.download(&out).unwrap().to_f32_vec(), reference(&exec, &lhs, &rhs));
}

#[test]
fn test_mixed_fp32_fp16_computes_in_fp32() {
    let lhs = TensorDesc::contiguous(Shape::matrix(8, 32), DType::F32, Layout::RowMajor);
    let rhs = TensorDesc::contiguous(Shape::matrix(32, 8), DType::F16, Layout::RowMajor);
    let platform = PlatformInfo::new(SocVersion::Ascend910B);

    let (ab, _) = plan_call(&Mm, &MatmulRequest::new(&lhs, &rhs), &platform, &NeverV3).unwrap();
    let (ba, _) = plan_call(&Mm, &MatmulRequest::new(&rhs, &lhs), &platform, &NeverV3).unwrap();
    assert_eq!(ab.compute_dtype(), Some(DType::F32));
    assert_eq!(ba.compute_dtype(), Some(DType::F32));
}

// ── Failure handling ───────────────────────────────────────────

#[test]
fn test_backend_failure_leaves_output_untouched() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend910B);
    let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
    let lhs = upload(&exec, vec![4, 16], DType::F32);
    let rhs = upload(&exec, vec![16, 8], DType::F32);
    let out = upload(&exec, vec![4, 8], DType::F32);
    let before = exec.download(&out).unwrap().to_f32_vec();

    let (_, backend) = plan_call(
        &Mm,
        &MatmulRequest::new(lhs.desc(), rhs.desc()),
        &platform,
        &NeverV3,
    )
    .unwrap();
    exec.fail_on(backend.name());

    let err = mm(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.stage(), Some(Stage::BackendDispatch));
    assert_eq!(exec.download(&out).unwrap().to_f32_vec(), before);
}

#[test]
fn test_parameter_errors_precede_executor_work() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend310P);
    let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
    let lhs = upload(&exec, vec![4, 16], DType::BF16);
    let rhs = upload(&exec, vec![16, 8], DType::BF16);
    let out = alloc(&exec, vec![4, 8], DType::BF16);
    exec.clear_launches();

    let err = mm(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parameter);
    assert!(exec.launches().is_empty());
}

// ── addmm / baddbmm ────────────────────────────────────────────

#[test]
fn test_addmm_row_bias_fuses_into_mm() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend910B);
    let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
    let bias = upload(&exec, vec![8], DType::F32);
    let mat1 = upload(&exec, vec![4, 16], DType::F32);
    let mat2 = upload(&exec, vec![16, 8], DType::F32);
    let out = alloc(&exec, vec![4, 8], DType::F32);

    let outcome = addmm(&ctx, &AddmmArgs::new(&bias, &mat1, &mat2), &out).unwrap();
    assert_eq!(outcome.graph, Some(AddmmGraph::MmWithBias));

    let b = exec.download(&bias).unwrap().to_f32_vec();
    let expected: Vec<f32> = reference(&exec, &mat1, &mat2)
        .iter()
        .enumerate()
        .map(|(i, v)| v + b[i % 8])
        .collect();
    assert_eq!(exec.download(&out).unwrap().to_f32_vec(), expected);
}

#[test]
fn test_addmm_beta0_ignores_input() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend910B);
    let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
    let input = upload(&exec, vec![4, 8], DType::F32);
    let mat1 = upload(&exec, vec![4, 16], DType::F32);
    let mat2 = upload(&exec, vec![16, 8], DType::F32);
    let out = alloc(&exec, vec![4, 8], DType::F32);

    let outcome = addmm(&ctx, &AddmmArgs::new(&input, &mat1, &mat2).scaled(0.0, 1.0), &out).unwrap();
    assert_eq!(outcome.graph, Some(AddmmGraph::Beta0));
    assert_eq!(exec.download(&out).unwrap().to_f32_vec(), reference(&exec, &mat1, &mat2));
}

#[test]
fn test_baddbmm_empty_batch_is_empty_tensor() {
    let exec = HostExecutor::default();
    let platform = PlatformInfo::new(SocVersion::Ascend910B);
    let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
    let input = upload(&exec, vec![0, 4, 8], DType::F16);
    let b1 = upload(&exec, vec![0, 4, 16], DType::F16);
    let b2 = upload(&exec, vec![0, 16, 8], DType::F16);
    let out = alloc(&exec, vec![0, 4, 8], DType::F16);

    let outcome = baddbmm(&ctx, &AddmmArgs::new(&input, &b1, &b2), &out).unwrap();
    assert_eq!(outcome.graph, Some(AddmmGraph::EmptyTensor));
    assert!(exec.backends_launched().is_empty());
}

// ── Engine ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_engine_plans_and_runs() {
    let config = DispatchConfig::from_toml(
        r#"
soc = "ascend950"
workspace_budget = "64M"
math_type = "keep_dtype"
oracle = "never-v3"
"#,
    )
    .unwrap();
    let engine = DispatchEngine::new(config).configure().unwrap().prepare();

    let desc = |dims: Vec<usize>| TensorDesc::contiguous(Shape::new(dims), DType::F16, Layout::RowMajor);
    let planned = engine
        .plan_many(vec![
            PlanJob::new(OperatorKind::Mm, desc(vec![4, 16]), desc(vec![16, 8])),
            PlanJob::new(OperatorKind::Bmm, desc(vec![2, 4, 16]), desc(vec![2, 16, 8])),
        ])
        .await;
    assert!(planned.iter().all(|r| r.as_ref().is_ok_and(|p| p.backend.is_v3())));

    let exec = engine.executor();
    let lhs = upload(exec, vec![2, 4, 16], DType::F16);
    let rhs = upload(exec, vec![2, 16, 8], DType::F16);
    let out = alloc(exec, vec![2, 4, 8], DType::F16);
    engine.bmm(&engine.args(&lhs, &rhs), &out).unwrap();
    assert_eq!(engine.metrics().calls, 1);
}

// ── Properties ─────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_k_equal_1_is_exact(m in 1usize..12, n in 1usize..12) {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![m, 1], DType::F32);
        let rhs = upload(&exec, vec![1, n], DType::F32);
        let out = alloc(&exec, vec![m, n], DType::F32);

        mm(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
        let got = exec.download(&out).unwrap().to_f32_vec();
        let want = reference(&exec, &lhs, &rhs);
        prop_assert!(got.iter().zip(&want).all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn test_empty_contraction_gives_zeros(
        m in 1usize..8,
        n in 1usize..8,
        dtype in prop::sample::select(vec![DType::F16, DType::F32, DType::BF16]),
    ) {
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![m, 0], dtype);
        let rhs = upload(&exec, vec![0, n], dtype);
        let out = upload(&exec, vec![m, n], dtype);

        let outcome = mm(&ctx, &MatmulArgs::new(&lhs, &rhs), &out).unwrap();
        prop_assert!(outcome.backend.is_none());
        let got = exec.download(&out).unwrap();
        prop_assert_eq!(got.shape(), &Shape::matrix(m, n));
        prop_assert!(got.to_f32_vec().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_empty_batched_call_gives_zeros(
        batch in 0usize..3,
        m in 1usize..6,
        k in 1usize..6,
        n in 1usize..6,
        dtype in prop::sample::select(vec![DType::F16, DType::F32, DType::BF16]),
        through_bmm in any::<bool>(),
    ) {
        // A zero batch empties the result; otherwise the contraction is emptied.
        let k = if batch == 0 { k } else { 0 };
        let exec = HostExecutor::default();
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let ctx = DispatchContext::new(&platform, &NeverV3, &exec);
        let lhs = upload(&exec, vec![batch, m, k], dtype);
        let rhs = upload(&exec, vec![batch, k, n], dtype);
        let out = upload(&exec, vec![batch, m, n], dtype);

        let args = MatmulArgs::new(&lhs, &rhs);
        let outcome = if through_bmm {
            bmm(&ctx, &args, &out).unwrap()
        } else {
            matmul(&ctx, &args, &out).unwrap()
        };
        prop_assert!(outcome.rewrote(RewriteKind::EmptyResult));
        prop_assert!(exec.backends_launched().is_empty());
        let got = exec.download(&out).unwrap();
        prop_assert_eq!(got.shape(), &Shape::new(vec![batch, m, n]));
        prop_assert!(got.to_f32_vec().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_planning_is_pure(m in 1usize..600, k in 1usize..600, n in 1usize..600) {
        let lhs = TensorDesc::contiguous(Shape::matrix(m, k), DType::F16, Layout::RowMajor);
        let rhs = TensorDesc::contiguous(Shape::matrix(k, n), DType::F16, Layout::RowMajor);
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let oracle = ThresholdOracle::default();
        let first = plan_call(&Mm, &MatmulRequest::new(&lhs, &rhs), &platform, &oracle).unwrap();
        let second = plan_call(&Mm, &MatmulRequest::new(&lhs, &rhs), &platform, &oracle).unwrap();
        prop_assert_eq!(first, second);
    }
}
