// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Flat (rank-2) matmul.
//!
//! Planning runs in a fixed order:
//!
//! 1. promotion by the five-rule ladder,
//! 2. layout resolution,
//! 3. split-K, which may widen or re-tile the output,
//! 4. single-core split-K on the mid-generation parts,
//! 5. a row-major lhs against a pre-tiled rhs keeps the rhs tiled.

use std::ops::RangeInclusive;

use tensor_core::{DType, Layout};
use tracing::debug;

use crate::operator::{MatmulOperator, MatmulRequest};
use crate::plan::PlanBuilder;
use crate::{
    is_split_k, resolve_layout, resolve_promotion, select_mm_backend, single_core_split_k, BackendVariant,
    CubeMathType, ImplMode, LayoutChoice, LayoutQuery, MatmulPlan, PlanError, PlatformInfo, Promotion, SocVersion,
    SplitKQuery, V3ShapeOracle,
};

/// `out = lhs @ rhs` on rank-2 operands.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mm;

impl Mm {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn require_rank(
    operand: &'static str,
    rank: usize,
    accepted: RangeInclusive<usize>,
    expected: &'static str,
) -> Result<(), PlanError> {
    if !accepted.contains(&rank) {
        return Err(PlanError::InvalidRank {
            operand,
            rank,
            expected,
        });
    }
    Ok(())
}

/// Shared flat-matmul planning once the promotion is known.
pub(crate) fn plan_flat(
    operator: &'static str,
    request: &MatmulRequest<'_>,
    platform: &PlatformInfo,
    promotion: Promotion,
) -> Result<MatmulPlan, PlanError> {
    let (lhs, rhs) = (request.lhs, request.rhs);
    let math = request.math;
    let soc = platform.soc;
    let compute = promotion.compute;

    let mut b = PlanBuilder::new(
        operator,
        soc,
        lhs,
        request.transpose_lhs,
        rhs,
        request.transpose_rhs,
        math,
    )?;
    if let Some(bias) = request.bias {
        b.bias(bias);
    }
    let requested = if math == CubeMathType::Fp16Fp32KeepDtype {
        DType::F32
    } else {
        request.requested_out()
    };
    b.requested_out(requested)
        .promotion(promotion)
        .impl_mode(ImplMode::for_matmul(math, soc));

    let dims = b.dims();
    let layouts = resolve_layout(
        &LayoutQuery {
            lhs,
            rhs,
            transpose_lhs: request.transpose_lhs,
            transpose_rhs: request.transpose_rhs,
            dims,
        },
        platform,
    );
    b.layout(layouts);

    let split_k = is_split_k(&SplitKQuery {
        lhs_dtype: compute,
        rhs_dtype: compute,
        dims,
        lhs_layout: layouts.lhs,
        out_layout: layouts.out,
        is_batched: false,
    });
    debug!("{split_k}");
    let mut use_split_k = split_k.holds();
    if use_split_k {
        match soc {
            SocVersion::Ascend310P => {
                b.out_dtype_override(DType::F32);
            }
            SocVersion::Ascend910 => {
                b.out_layout(Layout::Tiled).out_dtype_override(DType::F32);
            }
            _ => {}
        }
    }

    let single_core = single_core_split_k(lhs, rhs, compute, compute, &dims, platform);
    if single_core.holds() {
        debug!("{single_core}");
        b.layout(LayoutChoice::ALL_ROW_MAJOR);
        use_split_k = true;
    }

    if lhs.storage_layout() == Layout::RowMajor && rhs.storage_layout().is_tiled() {
        debug!("row-major lhs against pre-tiled rhs: keeping rhs tiled");
        b.rhs_layout(Layout::Tiled).out_dtype_override(rhs.dtype());
        use_split_k = false;
    }

    b.split_k(use_split_k);
    let widened = compute.is_half() && b.out_dtype() == DType::F32;
    b.fp16_bf16_in_fp32_out(widened);
    b.build()
}

impl MatmulOperator for Mm {
    fn name(&self) -> &'static str {
        "mm"
    }

    fn build_plan(&self, request: &MatmulRequest<'_>, platform: &PlatformInfo) -> Result<MatmulPlan, PlanError> {
        require_rank("lhs", request.lhs.rank(), 2..=2, "2")?;
        require_rank("rhs", request.rhs.rank(), 2..=2, "2")?;
        let promotion = resolve_promotion(request.lhs.dtype(), request.rhs.dtype(), request.math, platform);
        plan_flat(self.name(), request, platform, promotion)
    }

    fn select_backend(&self, plan: &MatmulPlan, oracle: &dyn V3ShapeOracle, platform: &PlatformInfo) -> BackendVariant {
        select_mm_backend(plan, oracle, platform)
    }
}
