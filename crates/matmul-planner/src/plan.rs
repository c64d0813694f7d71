// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Matmul plan: the output of an operator's planning rules.
//!
//! A plan records the original and resolved element type and layout of
//! every tensor in one call, the resolved dimensions and the precision
//! settings. It is the contract between the planner and the dispatch
//! runtime. Plans are built fresh for each call and never cached.

use tensor_core::{DType, Layout, Shape, TensorDesc};

use crate::{
    batch_dims, infer_output_shape, BatchDims, CubeMathType, ImplMode, LayoutChoice, MatmulDims, PlanError,
    PrecisionMode, Promotion, RuleWarning, SocVersion,
};

/// One matmul input as the plan sees it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OperandPlan {
    /// Shape in storage order.
    pub shape: Shape,
    pub original_dtype: DType,
    /// Type the operand is cast to before launch.
    pub dtype: DType,
    pub declared_layout: Layout,
    pub layout: Layout,
    pub transposed: bool,
}

/// The result tensor as the plan sees it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OutputPlan {
    pub shape: Shape,
    /// Type the caller asked for.
    pub original_dtype: DType,
    /// Type the backend emits.
    pub dtype: DType,
    pub declared_layout: Layout,
    pub layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BiasPlan {
    pub shape: Shape,
    pub original_dtype: DType,
    pub dtype: DType,
}

/// The complete plan for one matmul call.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MatmulPlan {
    /// Operator that produced this plan.
    pub operator: &'static str,
    pub soc: SocVersion,
    pub lhs: OperandPlan,
    pub rhs: OperandPlan,
    pub out: OutputPlan,
    pub bias: Option<BiasPlan>,
    pub dims: MatmulDims,
    /// Broadcast batch dims of the output.
    pub batch: BatchDims,
    pub use_split_k: bool,
    pub precision: PrecisionMode,
    pub math_type: CubeMathType,
    pub impl_mode: ImplMode,
    pub is_batched: bool,
    /// fp16/bf16 inputs accumulated into an fp32 result.
    pub fp16_bf16_in_fp32_out: bool,
    pub warnings: Vec<RuleWarning>,
}

impl MatmulPlan {
    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Resolved layouts of lhs, rhs and output.
    pub fn layouts(&self) -> LayoutChoice {
        LayoutChoice {
            lhs: self.lhs.layout,
            rhs: self.rhs.layout,
            out: self.out.layout,
        }
    }

    /// Resolved compute type if both operands agree.
    pub fn compute_dtype(&self) -> Option<DType> {
        (self.lhs.dtype == self.rhs.dtype).then_some(self.lhs.dtype)
    }

    /// Both operands resolve to the same half type.
    pub fn is_half_pair(&self) -> bool {
        self.compute_dtype().is_some_and(DType::is_half)
    }

    /// Validates the plan.
    ///
    /// Checks:
    /// - Both operands resolve to the same compute type.
    /// - Split-K keeps both operands in one layout.
    /// - The output shape ends in `[M, N]`.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.lhs.dtype != self.rhs.dtype {
            return Err(PlanError::InvalidPlan {
                operator: self.operator,
                detail: format!(
                    "operands resolve to different compute types {} and {}",
                    self.lhs.dtype, self.rhs.dtype,
                ),
            });
        }

        if self.use_split_k && self.lhs.layout != self.rhs.layout {
            return Err(PlanError::InvalidPlan {
                operator: self.operator,
                detail: format!("split-K with mixed operand layouts {}", self.layouts()),
            });
        }

        if self.out.shape.last_two() != Some((self.dims.m, self.dims.n)) {
            return Err(PlanError::InvalidPlan {
                operator: self.operator,
                detail: format!("output shape {} does not end in [{}, {}]", self.out.shape, self.dims.m, self.dims.n),
            });
        }

        Ok(())
    }

    /// Returns a human-readable one-line summary of the plan.
    pub fn summary(&self) -> String {
        format!(
            "Plan '{}' on {}: {}x{} -> {} (compute {}, emit {}), layout {}, {}, out {}, \
             split_k={}, math={}, impl={}{}",
            self.operator,
            self.soc,
            self.lhs.original_dtype,
            self.rhs.original_dtype,
            self.out.original_dtype,
            self.lhs.dtype,
            self.out.dtype,
            self.layouts(),
            self.dims,
            self.out.shape,
            self.use_split_k,
            self.math_type,
            self.impl_mode,
            if self.has_bias() { ", bias" } else { "" },
        )
    }
}

/// Builder helper for constructing a `MatmulPlan` in steps.
///
/// Used internally by operator implementations.
pub(crate) struct PlanBuilder {
    plan: MatmulPlan,
}

impl PlanBuilder {
    /// Starts a plan with caller types and layouts, resolving dims and the
    /// output shape.
    pub fn new(
        operator: &'static str,
        soc: SocVersion,
        lhs: &TensorDesc,
        transpose_lhs: bool,
        rhs: &TensorDesc,
        transpose_rhs: bool,
        math: CubeMathType,
    ) -> Result<Self, PlanError> {
        let dims = MatmulDims::resolve(lhs.shape(), transpose_lhs, rhs.shape(), transpose_rhs)?;
        let out_shape = infer_output_shape(lhs.shape(), rhs.shape(), transpose_lhs, transpose_rhs)?;
        let operand = |desc: &TensorDesc, transposed: bool| OperandPlan {
            shape: desc.shape().clone(),
            original_dtype: desc.dtype(),
            dtype: desc.dtype(),
            declared_layout: desc.layout(),
            layout: desc.layout(),
            transposed,
        };
        Ok(Self {
            plan: MatmulPlan {
                operator,
                soc,
                lhs: operand(lhs, transpose_lhs),
                rhs: operand(rhs, transpose_rhs),
                batch: batch_dims(&out_shape),
                out: OutputPlan {
                    shape: out_shape,
                    original_dtype: lhs.dtype(),
                    dtype: lhs.dtype(),
                    declared_layout: Layout::RowMajor,
                    layout: Layout::RowMajor,
                },
                bias: None,
                dims,
                use_split_k: false,
                precision: PrecisionMode::from(math),
                math_type: math,
                impl_mode: ImplMode::DEFAULT,
                is_batched: false,
                fp16_bf16_in_fp32_out: false,
                warnings: Vec::new(),
            },
        })
    }

    pub fn dims(&self) -> MatmulDims {
        self.plan.dims
    }

    pub fn out_dtype(&self) -> DType {
        self.plan.out.dtype
    }

    pub fn requested_out(&mut self, dtype: DType) -> &mut Self {
        self.plan.out.original_dtype = dtype;
        self
    }

    pub fn bias(&mut self, bias: &TensorDesc) -> &mut Self {
        self.plan.bias = Some(BiasPlan {
            shape: bias.shape().clone(),
            original_dtype: bias.dtype(),
            dtype: bias.dtype(),
        });
        self
    }

    /// Applies resolved compute, output and bias types.
    pub fn promotion(&mut self, promotion: Promotion) -> &mut Self {
        self.plan.lhs.dtype = promotion.compute;
        self.plan.rhs.dtype = promotion.compute;
        self.plan.out.dtype = promotion.output;
        if let (Some(bias), Some(dtype)) = (self.plan.bias.as_mut(), promotion.bias) {
            bias.dtype = dtype;
        }
        self.plan.warnings = promotion.warnings;
        self
    }

    pub fn layout(&mut self, choice: LayoutChoice) -> &mut Self {
        self.plan.lhs.layout = choice.lhs;
        self.plan.rhs.layout = choice.rhs;
        self.plan.out.layout = choice.out;
        self
    }

    pub fn rhs_layout(&mut self, layout: Layout) -> &mut Self {
        self.plan.rhs.layout = layout;
        self
    }

    pub fn out_layout(&mut self, layout: Layout) -> &mut Self {
        self.plan.out.layout = layout;
        self
    }

    pub fn out_dtype_override(&mut self, dtype: DType) -> &mut Self {
        self.plan.out.dtype = dtype;
        self
    }

    pub fn split_k(&mut self, enabled: bool) -> &mut Self {
        self.plan.use_split_k = enabled;
        self
    }

    pub fn impl_mode(&mut self, mode: ImplMode) -> &mut Self {
        self.plan.impl_mode = mode;
        self
    }

    pub fn batched(&mut self, batched: bool) -> &mut Self {
        self.plan.is_batched = batched;
        self
    }

    pub fn fp16_bf16_in_fp32_out(&mut self, flag: bool) -> &mut Self {
        self.plan.fp16_bf16_in_fp32_out = flag;
        self
    }

    /// Consumes the builder, validating the finished plan.
    pub fn build(self) -> Result<MatmulPlan, PlanError> {
        self.plan.validate()?;
        Ok(self.plan)
    }
}
