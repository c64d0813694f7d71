// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`MatmulOperator`] trait and operator implementations.

pub mod addmm;
pub mod bmm;
pub mod mm;

use tensor_core::{DType, TensorDesc};

use crate::{BackendVariant, CubeMathType, MatmulPlan, PlanError, PlatformInfo, V3ShapeOracle};

/// Inputs of one matmul call as the planner sees them.
///
/// Shapes are in storage order: a transposed lhs is stored `[.., K, M]`
/// and a transposed rhs `[.., N, K]`.
#[derive(Debug, Clone, Copy)]
pub struct MatmulRequest<'a> {
    pub lhs: &'a TensorDesc,
    pub rhs: &'a TensorDesc,
    pub bias: Option<&'a TensorDesc>,
    /// Output type the caller asked for; defaults to the lhs type.
    pub out_dtype: Option<DType>,
    pub transpose_lhs: bool,
    pub transpose_rhs: bool,
    pub math: CubeMathType,
}

impl<'a> MatmulRequest<'a> {
    pub fn new(lhs: &'a TensorDesc, rhs: &'a TensorDesc) -> Self {
        Self {
            lhs,
            rhs,
            bias: None,
            out_dtype: None,
            transpose_lhs: false,
            transpose_rhs: false,
            math: CubeMathType::KeepDtype,
        }
    }

    pub(crate) fn requested_out(&self) -> DType {
        self.out_dtype.unwrap_or_else(|| self.lhs.dtype())
    }
}

/// Trait for matmul operators.
///
/// Each operator owns its own promotion, layout and backend rules, even
/// where they overlap with another operator's. Planning is purely
/// algorithmic, so one operator value can plan concurrent calls.
pub trait MatmulOperator: Send + Sync {
    /// Human-readable name of this operator.
    fn name(&self) -> &'static str;

    /// Produces the plan for one call.
    fn build_plan(&self, request: &MatmulRequest<'_>, platform: &PlatformInfo) -> Result<MatmulPlan, PlanError>;

    /// Picks the backend entry point for a plan this operator built.
    fn select_backend(&self, plan: &MatmulPlan, oracle: &dyn V3ShapeOracle, platform: &PlatformInfo)
        -> BackendVariant;
}
