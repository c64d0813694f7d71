// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Flat matmul with a fused bias.
//!
//! Shares the flat layout and split-K rules with [`crate::Mm`] but promotes
//! through the per-generation rule tables, which also type the bias.

use crate::operator::mm::{plan_flat, require_rank};
use crate::operator::{MatmulOperator, MatmulRequest};
use crate::{promotion_rule, select_mm_backend, BackendVariant, MatmulPlan, PlanError, PlatformInfo, V3ShapeOracle};

/// `out = lhs @ rhs + bias` with a `[N]` or `[1, N]` bias.
#[derive(Debug, Clone, Copy, Default)]
pub struct Addmm;

impl Addmm {
    pub fn new() -> Self {
        Self
    }
}

impl MatmulOperator for Addmm {
    fn name(&self) -> &'static str {
        "addmm"
    }

    fn build_plan(&self, request: &MatmulRequest<'_>, platform: &PlatformInfo) -> Result<MatmulPlan, PlanError> {
        require_rank("mat1", request.lhs.rank(), 2..=2, "2")?;
        require_rank("mat2", request.rhs.rank(), 2..=2, "2")?;
        if let Some(bias) = request.bias {
            require_rank("bias", bias.rank(), 1..=2, "1 or 2")?;
        }
        let promotion = promotion_rule(platform).promote(
            request.lhs.dtype(),
            request.rhs.dtype(),
            request.bias.map(|b| b.dtype()),
            request.requested_out(),
            request.math,
        )?;
        plan_flat(self.name(), request, platform, promotion)
    }

    fn select_backend(&self, plan: &MatmulPlan, oracle: &dyn V3ShapeOracle, platform: &PlatformInfo) -> BackendVariant {
        select_mm_backend(plan, oracle, platform)
    }
}
