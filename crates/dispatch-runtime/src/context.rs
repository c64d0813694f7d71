// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Call context, arguments and outcomes shared by every entry point.

use matmul_planner::{BackendVariant, CubeMathType, MatmulPlan, PlatformInfo, V3ShapeOracle};
use op_executor::OperatorExecutor;
use tensor_core::{DType, Layout, Shape, TensorDesc, TensorView};

use crate::{AddmmGraph, DispatchError, Stage, StageTrace};

/// Collaborators of one call: the immutable platform description, the V3
/// shape oracle and the executor that owns every buffer.
#[derive(Clone, Copy)]
pub struct DispatchContext<'a> {
    pub platform: &'a PlatformInfo,
    pub oracle: &'a dyn V3ShapeOracle,
    pub executor: &'a dyn OperatorExecutor,
}

impl<'a> DispatchContext<'a> {
    pub fn new(platform: &'a PlatformInfo, oracle: &'a dyn V3ShapeOracle, executor: &'a dyn OperatorExecutor) -> Self {
        Self {
            platform,
            oracle,
            executor,
        }
    }
}

impl std::fmt::Debug for DispatchContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("soc", &self.platform.soc)
            .field("oracle", &self.oracle.name())
            .field("executor", &self.executor.name())
            .finish()
    }
}

/// Operands of a matmul call. Shapes are in storage order: a transposed
/// lhs is stored `[.., K, M]`.
#[derive(Debug, Clone, Copy)]
pub struct MatmulArgs<'a> {
    pub lhs: &'a TensorView,
    pub rhs: &'a TensorView,
    pub bias: Option<&'a TensorView>,
    pub transpose_lhs: bool,
    pub transpose_rhs: bool,
    pub math: CubeMathType,
}

impl<'a> MatmulArgs<'a> {
    pub fn new(lhs: &'a TensorView, rhs: &'a TensorView) -> Self {
        Self {
            lhs,
            rhs,
            bias: None,
            transpose_lhs: false,
            transpose_rhs: false,
            math: CubeMathType::KeepDtype,
        }
    }

    pub fn with_bias(mut self, bias: &'a TensorView) -> Self {
        self.bias = Some(bias);
        self
    }

    pub fn transposed(mut self, transpose_lhs: bool, transpose_rhs: bool) -> Self {
        self.transpose_lhs = transpose_lhs;
        self.transpose_rhs = transpose_rhs;
        self
    }

    pub fn with_math(mut self, math: CubeMathType) -> Self {
        self.math = math;
        self
    }
}

/// A rewrite the dispatcher applied instead of the plain matmul.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RewriteKind {
    /// Zero-filled result for an empty operand.
    EmptyResult,
    /// K=1 computed as an elementwise multiply.
    KEqual1,
    /// Unit M moved outward by a view-only transpose.
    MEqual1,
    /// Unit N moved outward by a view-only transpose.
    NEqual1,
    /// Sliced lhs consumed without a copy.
    SliceView,
    /// Transposed operand consumed without a copy.
    TransposeView,
    /// Batched call run as one flat matmul.
    FoldBatch,
}

/// What one dispatched call did.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchOutcome {
    /// Plan of the matmul core, absent when no matmul ran.
    pub plan: Option<MatmulPlan>,
    pub backend: Option<BackendVariant>,
    /// Graph chosen by addmm and baddbmm.
    pub graph: Option<AddmmGraph>,
    pub rewrites: Vec<RewriteKind>,
    pub trace: StageTrace,
    /// The converted result that was copied into the caller's output.
    pub result: Option<TensorView>,
    /// Executor workspace after the call.
    pub workspace_size: usize,
}

impl DispatchOutcome {
    pub fn rewrote(&self, kind: RewriteKind) -> bool {
        self.rewrites.contains(&kind)
    }
}

// ── Crate-internal plumbing ───────────────────────────────────

/// Shape and element type a flow hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub shape: Shape,
    pub dtype: DType,
}

impl Target {
    pub fn of(view: &TensorView) -> Self {
        Self {
            shape: view.shape().clone(),
            dtype: view.dtype(),
        }
    }
}

/// Result of a flow before write-back.
#[derive(Debug, Clone)]
pub(crate) struct FlowOutput {
    pub result: TensorView,
    pub plan: Option<MatmulPlan>,
    pub backend: Option<BackendVariant>,
    pub rewrites: Vec<RewriteKind>,
}

impl FlowOutput {
    pub fn rewritten(result: TensorView, rewrite: RewriteKind) -> Self {
        Self {
            result,
            plan: None,
            backend: None,
            rewrites: vec![rewrite],
        }
    }
}

/// Relabels a view row-major unless its storage is tiled.
pub(crate) fn normalize_format(view: &TensorView) -> TensorView {
    if view.storage_layout().is_tiled() || view.layout() == Layout::RowMajor {
        view.clone()
    } else {
        view.with_desc(view.desc().with_layout(Layout::RowMajor))
    }
}

/// Executor view over `base`'s storage described by `desc`.
pub(crate) fn view_of(
    ctx: &DispatchContext<'_>,
    base: &TensorView,
    desc: &TensorDesc,
) -> Result<TensorView, DispatchError> {
    Ok(ctx
        .executor
        .create_view(base, desc.shape().clone(), desc.strides().to_vec(), desc.offset())?)
}

/// Zero-copy broadcast of `view` to `shape` using zero strides.
pub(crate) fn broadcast_to(
    ctx: &DispatchContext<'_>,
    view: &TensorView,
    shape: &Shape,
) -> Result<TensorView, DispatchError> {
    if view.shape() == shape {
        return Ok(view.clone());
    }
    let src = view.shape().dims();
    let src_strides = view.desc().strides();
    let target = shape.dims();
    if src.len() > target.len() {
        return Err(DispatchError::parameter(format!(
            "cannot broadcast {} to {shape}",
            view.shape()
        )));
    }
    let pad = target.len() - src.len();
    let mut strides = vec![0usize; target.len()];
    for (i, &d) in target.iter().enumerate() {
        if i < pad {
            continue;
        }
        let s = src[i - pad];
        if s == d {
            strides[i] = src_strides[i - pad];
        } else if s != 1 {
            return Err(DispatchError::parameter(format!(
                "cannot broadcast {} to {shape}",
                view.shape()
            )));
        }
    }
    ctx.executor
        .create_view(view, shape.clone(), strides, view.desc().offset())
        .map_err(DispatchError::from)
}

/// Zero (or bias) result for an empty contraction.
pub(crate) fn zero_result(
    ctx: &DispatchContext<'_>,
    out_shape: &Shape,
    bias: Option<&TensorView>,
    dtype: DType,
) -> Result<TensorView, DispatchError> {
    let exec = ctx.executor;
    let zeros = exec.fill(out_shape, dtype, 0.0)?;
    match bias {
        Some(bias) if !out_shape.has_zero_dim() => {
            let summed = exec.add(&zeros, bias)?;
            Ok(exec.cast(&summed, dtype)?)
        }
        _ => Ok(zeros),
    }
}

/// Brings a backend result back to row-major, the target type and shape.
pub(crate) fn convert_output(
    ctx: &DispatchContext<'_>,
    raw: &TensorView,
    target: &Target,
) -> Result<TensorView, DispatchError> {
    let exec = ctx.executor;
    let row_major = exec.trans_data(raw, Layout::RowMajor)?;
    let typed = exec.cast(&row_major, target.dtype)?;
    if typed.shape() == &target.shape {
        Ok(typed)
    } else {
        Ok(exec.reshape(&typed, target.shape.clone())?)
    }
}

/// Copies the finished result into the caller's output view.
pub(crate) fn write_back(
    ctx: &DispatchContext<'_>,
    result: &TensorView,
    out: &TensorView,
    trace: &mut StageTrace,
) -> Result<(), DispatchError> {
    trace.run(Stage::WriteBack, || {
        if out.is_empty() {
            return Ok(());
        }
        ctx.executor.view_copy(result, out)?;
        Ok(())
    })
}

/// Closes the trace and packages the outcome.
pub(crate) fn finish(
    ctx: &DispatchContext<'_>,
    flow: FlowOutput,
    graph: Option<AddmmGraph>,
    mut trace: StageTrace,
) -> DispatchOutcome {
    trace.mark(Stage::Done);
    DispatchOutcome {
        plan: flow.plan,
        backend: flow.backend,
        graph,
        rewrites: flow.rewrites,
        trace,
        result: Some(flow.result),
        workspace_size: ctx.executor.workspace_size(),
    }
}

/// `|a - b|` within f32 epsilon, as the scalar checks compare.
pub(crate) fn scalar_is(value: f64, expected: f64) -> bool {
    (value as f32 - expected as f32).abs() <= f32::EPSILON
}
