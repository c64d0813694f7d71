// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `addmm` and `baddbmm`: `out = beta * self + alpha * (mat1 @ mat2)`.
//!
//! The call is lowered to one of six graphs, chosen in a fixed order:
//!
//! | Graph | When |
//! |---|---|
//! | [`AddmmGraph::EmptyTensor`] | `self` or the result is empty |
//! | [`AddmmGraph::Alpha0`] | an operand is empty, or `alpha == 0` |
//! | [`AddmmGraph::Beta0`] | `beta == 0` |
//! | [`AddmmGraph::MmWithBias`] | `self` can be fused as a matmul bias |
//! | [`AddmmGraph::GemmV3`] | in-place fp32 accumulate the GEMM entry point supports |
//! | [`AddmmGraph::MatmulAdd`] | everything else |

use std::fmt;

use matmul_planner::{
    accumulate_out_dtype, batch_count, infer_output_shape, is_split_k, promotion_rule, Addmm, BackendVariant,
    CubeMathType, Eligibility, GemmV3Eligibility, MatmulDims, MatmulOperator, MatmulRequest, PlatformInfo,
    SocVersion, SplitKQuery,
};
use op_executor::BackendCall;
use tensor_core::{DType, Layout, TensorView};
use tracing::{debug, info};

use crate::batched::run_batched;
use crate::context::{broadcast_to, convert_output, finish, scalar_is, write_back, FlowOutput, Target};
use crate::flat::run_flat;
use crate::validate::validate_addmm;
use crate::{DispatchContext, DispatchError, DispatchOutcome, MatmulArgs, Stage, StageTrace};

/// The computation graph an addmm-family call is lowered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum AddmmGraph {
    /// Nothing to compute.
    EmptyTensor,
    /// `out = beta * self`, broadcast.
    Alpha0,
    /// `out = alpha * (mat1 @ mat2)`.
    Beta0,
    /// `self` is passed to the matmul as its bias.
    MmWithBias,
    /// Fused GEMM accumulating into an fp32 `self`.
    GemmV3,
    /// Separate matmul, scales and add.
    MatmulAdd,
}

impl AddmmGraph {
    pub fn as_str(self) -> &'static str {
        match self {
            AddmmGraph::EmptyTensor => "EmptyTensor",
            AddmmGraph::Alpha0 => "Alpha0",
            AddmmGraph::Beta0 => "Beta0",
            AddmmGraph::MmWithBias => "MmWithBias",
            AddmmGraph::GemmV3 => "GemmV3",
            AddmmGraph::MatmulAdd => "MatmulAdd",
        }
    }
}

impl fmt::Display for AddmmGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operands and scalars of `addmm` / `baddbmm`.
#[derive(Debug, Clone, Copy)]
pub struct AddmmArgs<'a> {
    /// The addend (`self`).
    pub input: &'a TensorView,
    pub mat1: &'a TensorView,
    pub mat2: &'a TensorView,
    pub beta: f64,
    pub alpha: f64,
    pub math: CubeMathType,
}

impl<'a> AddmmArgs<'a> {
    pub fn new(input: &'a TensorView, mat1: &'a TensorView, mat2: &'a TensorView) -> Self {
        Self {
            input,
            mat1,
            mat2,
            beta: 1.0,
            alpha: 1.0,
            math: CubeMathType::KeepDtype,
        }
    }

    pub fn scaled(mut self, beta: f64, alpha: f64) -> Self {
        self.beta = beta;
        self.alpha = alpha;
        self
    }

    pub fn with_math(mut self, math: CubeMathType) -> Self {
        self.math = math;
        self
    }

    fn unit_scalars(&self) -> bool {
        scalar_is(self.alpha, 1.0) && scalar_is(self.beta, 1.0)
    }
}

/// Whether `self` can be handed to the matmul as its bias.
pub fn bias_convertible(args: &AddmmArgs<'_>, platform: &PlatformInfo) -> Result<Eligibility, DispatchError> {
    let dims = MatmulDims::resolve(args.mat1.shape(), false, args.mat2.shape(), false)?;
    let input = args.input.shape();
    let supported = promotion_rule(platform).supported_dtypes();
    let (mat1, mat2, bias) = (args.mat1.dtype(), args.mat2.dtype(), args.input.dtype());

    let rule = Eligibility::all("bias_convertible")
        .check("alpha_is_one", scalar_is(args.alpha, 1.0))
        .check("beta_is_one", scalar_is(args.beta, 1.0))
        .check(
            "bias_is_row",
            match input.dims() {
                [n] => *n == dims.n,
                [1, n] => *n == dims.n,
                _ => false,
            },
        )
        .check("operand_dtypes_supported", supported.contains(&mat1) && supported.contains(&mat2))
        .check(
            "bias_dtype_supported",
            if mat1 == DType::BF16 {
                matches!(bias, DType::BF16 | DType::F32)
            } else {
                supported.contains(&bias)
            },
        )
        .check("batch_is_one", batch_count(args.mat1.shape()) == 1)
        .check_with("split_k_ignored_or_off", || {
            let tolerant = matches!(
                platform.soc,
                SocVersion::Ascend910B | SocVersion::Ascend910_93 | SocVersion::Ascend950
            );
            tolerant
                || !is_split_k(&SplitKQuery {
                    lhs_dtype: mat1,
                    rhs_dtype: mat2,
                    dims,
                    lhs_layout: Layout::RowMajor,
                    out_layout: Layout::RowMajor,
                    is_batched: false,
                })
                .holds()
        });
    debug!("{rule}");
    Ok(rule)
}

/// Picks the graph for one call. `batched` selects the `baddbmm` rules.
pub fn select_addmm_graph(
    args: &AddmmArgs<'_>,
    out: &TensorView,
    batched: bool,
    platform: &PlatformInfo,
) -> Result<AddmmGraph, DispatchError> {
    let result_shape = infer_output_shape(args.mat1.shape(), args.mat2.shape(), false, false)?;
    if args.input.is_empty() || result_shape.has_zero_dim() {
        return Ok(AddmmGraph::EmptyTensor);
    }
    if args.mat1.is_empty() || args.mat2.is_empty() || scalar_is(args.alpha, 0.0) {
        return Ok(AddmmGraph::Alpha0);
    }
    if scalar_is(args.beta, 0.0) {
        return Ok(AddmmGraph::Beta0);
    }
    if bias_convertible(args, platform)?.holds() {
        return Ok(AddmmGraph::MmWithBias);
    }
    if !batched && args.unit_scalars() && out.aliases(args.input) && out.dtype() == DType::F32 {
        let dims = MatmulDims::resolve(args.mat1.shape(), false, args.mat2.shape(), false)?;
        let (mat1, mat2) = (args.mat1.desc(), args.mat2.desc());
        let validated = GemmV3Eligibility::for_addmm_validated(mat1, mat2, &dims, args.math, platform);
        let with_bias = GemmV3Eligibility::for_addmm_with_bias(
            mat1,
            mat2,
            args.input.desc(),
            out.desc(),
            &dims,
            args.math,
            platform,
        );
        debug!("{validated}; {with_bias}");
        if validated.holds() && with_bias.holds() {
            return Ok(AddmmGraph::GemmV3);
        }
    }
    Ok(AddmmGraph::MatmulAdd)
}

/// `out = beta * self + alpha * (mat1 @ mat2)` for 2-D operands.
pub fn addmm(ctx: &DispatchContext<'_>, args: &AddmmArgs<'_>, out: &TensorView) -> Result<DispatchOutcome, DispatchError> {
    validate_addmm(args, out, false, ctx.platform)?;
    run_addmm(ctx, args, out, false)
}

/// `out = beta * self + alpha * (batch1 @ batch2)` for 3-D operands.
pub fn baddbmm(
    ctx: &DispatchContext<'_>,
    args: &AddmmArgs<'_>,
    out: &TensorView,
) -> Result<DispatchOutcome, DispatchError> {
    validate_addmm(args, out, true, ctx.platform)?;
    run_addmm(ctx, args, out, true)
}

fn run_addmm(
    ctx: &DispatchContext<'_>,
    args: &AddmmArgs<'_>,
    out: &TensorView,
    batched: bool,
) -> Result<DispatchOutcome, DispatchError> {
    let exec = ctx.executor;
    let target = Target::of(out);
    let mut trace = StageTrace::new();
    trace.mark(Stage::Start);

    let graph = trace.run(Stage::EmptyCheck, || select_addmm_graph(args, out, batched, ctx.platform))?;
    info!("{} lowered to {graph}", if batched { "baddbmm" } else { "addmm" });

    let flow = match graph {
        AddmmGraph::EmptyTensor => {
            trace.mark(Stage::Done);
            return Ok(DispatchOutcome {
                plan: None,
                backend: None,
                graph: Some(graph),
                rewrites: Vec::new(),
                trace,
                result: None,
                workspace_size: exec.workspace_size(),
            });
        }
        AddmmGraph::Alpha0 => {
            let result = trace.run(Stage::OutputConvert, || {
                let input = exec.contiguous(args.input)?;
                let scaled = if scalar_is(args.beta, 1.0) {
                    input
                } else {
                    exec.scale(&input, args.beta)?
                };
                let wide = broadcast_to(ctx, &scaled, &target.shape)?;
                Ok(exec.cast(&wide, target.dtype)?)
            })?;
            FlowOutput {
                result,
                plan: None,
                backend: None,
                rewrites: Vec::new(),
            }
        }
        AddmmGraph::Beta0 => {
            let product = run_product(ctx, args, None, args.math, &target, batched, &mut trace)?;
            let result = trace.run(Stage::OutputConvert, || {
                if scalar_is(args.alpha, 1.0) {
                    return Ok(product.result.clone());
                }
                let scaled = exec.scale(&product.result, args.alpha)?;
                Ok(exec.cast(&scaled, target.dtype)?)
            })?;
            FlowOutput { result, ..product }
        }
        AddmmGraph::MmWithBias => run_product(ctx, args, Some(args.input), args.math, &target, batched, &mut trace)?,
        AddmmGraph::GemmV3 => run_gemm_v3(ctx, args, &target, &mut trace)?,
        AddmmGraph::MatmulAdd => run_matmul_add(ctx, args, &target, batched, &mut trace)?,
    };

    write_back(ctx, &flow.result, out, &mut trace)?;
    Ok(finish(ctx, flow, Some(graph), trace))
}

/// `mat1 @ mat2 (+ bias)` through the flat or batched flow.
fn run_product(
    ctx: &DispatchContext<'_>,
    args: &AddmmArgs<'_>,
    bias: Option<&TensorView>,
    math: CubeMathType,
    target: &Target,
    batched: bool,
    trace: &mut StageTrace,
) -> Result<FlowOutput, DispatchError> {
    let mut call = MatmulArgs::new(args.mat1, args.mat2).with_math(math);
    call.bias = bias;
    if batched {
        run_batched(ctx, &call, target, true, trace)
    } else {
        run_flat(ctx, &call, target, trace)
    }
}

fn run_gemm_v3(
    ctx: &DispatchContext<'_>,
    args: &AddmmArgs<'_>,
    target: &Target,
    trace: &mut StageTrace,
) -> Result<FlowOutput, DispatchError> {
    let exec = ctx.executor;
    let (plan, mat1, mat2, bias) = trace.run(Stage::ContiguityAndCast, || {
        let request = MatmulRequest {
            bias: Some(args.input.desc()),
            out_dtype: Some(DType::F32),
            math: args.math,
            ..MatmulRequest::new(args.mat1.desc(), args.mat2.desc())
        };
        let plan = Addmm.build_plan(&request, ctx.platform)?;
        let mat1 = exec.cast(&exec.contiguous(args.mat1)?, plan.lhs.dtype)?;
        let mat2 = exec.cast(&exec.contiguous(args.mat2)?, plan.rhs.dtype)?;
        let bias = exec.cast(&exec.contiguous(args.input)?, DType::F32)?;
        Ok((plan, mat1, mat2, bias))
    })?;

    let raw = trace.run(Stage::BackendDispatch, || {
        let call = BackendCall {
            backend: BackendVariant::GemmV3,
            lhs: &mat1,
            rhs: &mat2,
            bias: Some(&bias),
            transpose_lhs: false,
            transpose_rhs: false,
            impl_mode: plan.impl_mode,
            out_dtype: DType::F32,
        };
        Ok(exec.launch(&call)?)
    })?;

    let result = trace.run(Stage::OutputConvert, || convert_output(ctx, &raw, target))?;
    Ok(FlowOutput {
        result,
        plan: Some(plan),
        backend: Some(BackendVariant::GemmV3),
        rewrites: Vec::new(),
    })
}

fn run_matmul_add(
    ctx: &DispatchContext<'_>,
    args: &AddmmArgs<'_>,
    target: &Target,
    batched: bool,
    trace: &mut StageTrace,
) -> Result<FlowOutput, DispatchError> {
    let exec = ctx.executor;
    let (mat1, mat2) = (args.mat1.dtype(), args.mat2.dtype());
    let half_pair = mat1 == mat2 && mat1.is_half();

    // The matmul keeps fp32 precision so the add is not rounded twice.
    let (math, product_dtype) = if batched {
        (args.math, accumulate_out_dtype(mat1, mat2, target.dtype, ctx.platform))
    } else if ctx.platform.soc.is_mid_generation()
        && half_pair
        && matches!(args.math, CubeMathType::KeepDtype | CubeMathType::UseHf32)
    {
        (CubeMathType::UseHighPrecMode, DType::F32)
    } else {
        (args.math, target.dtype)
    };
    let product_target = Target {
        shape: target.shape.clone(),
        dtype: product_dtype,
    };
    let product = run_product(ctx, args, None, math, &product_target, batched, trace)?;

    let result = trace.run(Stage::OutputConvert, || {
        let mut input = exec.contiguous(args.input)?;
        if input.dtype() == DType::BF16 {
            input = exec.cast(&input, DType::F32)?;
        }
        let input = if scalar_is(args.beta, 1.0) {
            input
        } else {
            exec.scale(&input, args.beta)?
        };
        let scaled = if scalar_is(args.alpha, 1.0) {
            product.result.clone()
        } else {
            exec.scale(&product.result, args.alpha)?
        };
        let sum = exec.add(&input, &scaled)?;
        Ok(exec.cast(&sum, target.dtype)?)
    })?;
    Ok(FlowOutput { result, ..product })
}
