// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Hardware-path selection.
//!
//! First decide whether the call takes the V3 path (any one scenario is
//! enough), then pick the entry point by resolved type and layout.

use tensor_core::{DType, Layout};
use tracing::debug;

use crate::{
    batch_count, BackendVariant, Eligibility, ImplMode, LayoutChoice, MatmulPlan, OracleQuery, PlatformInfo,
    SocVersion, V3ShapeOracle,
};

const BAND_310P_MIN: usize = 2048;
const BAND_310P_MAX: usize = 5504;
const FORCE_GRP_ACC_MIN_K: usize = 2048;
const V3_NZ_N_ALIGN: usize = 256;

fn oracle_query(plan: &MatmulPlan) -> OracleQuery {
    OracleQuery {
        lhs_shape: plan.lhs.shape.clone(),
        rhs_shape: plan.rhs.shape.clone(),
        transpose_lhs: plan.lhs.transposed,
        transpose_rhs: plan.rhs.transposed,
        lhs_layout: plan.lhs.layout,
        rhs_layout: plan.rhs.layout,
        lhs_dtype: plan.lhs.dtype,
        rhs_dtype: plan.rhs.dtype,
        split_k: plan.use_split_k,
        has_bias: plan.has_bias(),
        fp16_bf16_in_fp32_out: plan.fp16_bf16_in_fp32_out,
        dims: plan.dims,
        batch: plan.batch.count(),
    }
}

fn in_band(len: usize) -> bool {
    (BAND_310P_MIN..=BAND_310P_MAX).contains(&len)
}

/// V3 scenarios for the flat matmul.
pub fn mm_v3_scenario(plan: &MatmulPlan, oracle: &dyn V3ShapeOracle, platform: &PlatformInfo) -> Eligibility {
    let soc = platform.soc;
    let lhs_row_major = plan.lhs.layout == Layout::RowMajor;
    let dims = plan.dims;
    let layouts = plan.layouts();
    Eligibility::any("mm_v3")
        .check("newest_generation", soc.is_newest() && lhs_row_major)
        .check_with("mid_generation_oracle_hit", || {
            soc.is_mid_generation() && lhs_row_major && oracle.check_mm(&oracle_query(plan))
        })
        .check_with("row_major_310p_band", || {
            soc == SocVersion::Ascend310P
                && plan.lhs.original_dtype == DType::F16
                && plan.rhs.original_dtype == DType::F16
                && layouts.lhs == Layout::RowMajor
                && layouts.rhs == Layout::Tiled
                && layouts.out == Layout::RowMajor
                && in_band(dims.m)
                && in_band(dims.k)
                && in_band(dims.n)
        })
        .check(
            "force_group_accumulation",
            plan.impl_mode == ImplMode::FORCE_GRP_ACC
                && dims.k >= FORCE_GRP_ACC_MIN_K
                && plan.lhs.original_dtype == DType::F32,
        )
}

/// Picks the flat matmul entry point.
pub fn select_mm_backend(plan: &MatmulPlan, oracle: &dyn V3ShapeOracle, platform: &PlatformInfo) -> BackendVariant {
    let scenario = mm_v3_scenario(plan, oracle, platform);
    debug!("{scenario}");

    let layouts = plan.layouts();
    let widening = plan.out.dtype == DType::F32 && plan.is_half_pair() && !plan.has_bias();
    let v3_nz_aligned = platform.soc.is_mid_generation() && plan.dims.n % V3_NZ_N_ALIGN == 0;

    let backend = if scenario.holds() {
        if widening {
            BackendVariant::MatMulV3NdFp162Fp32
        } else {
            BackendVariant::MatMulV3Nd
        }
    } else if widening {
        if layouts.lhs == Layout::RowMajor && layouts.out == Layout::RowMajor {
            BackendVariant::MatMulNdFp162Fp32
        } else if v3_nz_aligned && layouts == LayoutChoice::ALL_TILED {
            BackendVariant::MatMulV3NzNzNdFp162Fp32
        } else {
            BackendVariant::MatMulNzFp162Fp32
        }
    } else if layouts.lhs == Layout::RowMajor {
        if layouts.rhs == Layout::RowMajor {
            BackendVariant::MatMulNd
        } else {
            BackendVariant::MatMulNdNz
        }
    } else if layouts.out == Layout::RowMajor {
        BackendVariant::MatMulNzNzNd
    } else if v3_nz_aligned {
        BackendVariant::MatMulV3NzNzNd
    } else {
        BackendVariant::MatMulNz
    };
    debug!("mm backend for {}: {backend}", plan.dims);
    backend
}

/// V3 scenarios for the batched family.
pub fn bmm_v3_scenario(plan: &MatmulPlan, oracle: &dyn V3ShapeOracle, platform: &PlatformInfo) -> Eligibility {
    let soc = platform.soc;
    let layouts = plan.layouts();
    Eligibility::any("bmm_v3")
        .check(
            "weight_prepacked",
            layouts.lhs == Layout::RowMajor && layouts.rhs != Layout::RowMajor,
        )
        .check("newest_generation", soc.is_newest())
        .check_with("mid_generation_oracle_hit", || {
            soc.is_mid_generation()
                && layouts.lhs == Layout::RowMajor
                && layouts.rhs == Layout::RowMajor
                && matches!(plan.lhs.dtype, DType::F16 | DType::BF16 | DType::F32)
                && plan.lhs.dtype == plan.rhs.dtype
                && !plan.has_bias()
                && oracle.check_bmm(&oracle_query(plan))
        })
}

/// Picks the batched entry point. `is_accumulate` marks the bias-add
/// variant.
pub fn select_bmm_backend(
    plan: &MatmulPlan,
    oracle: &dyn V3ShapeOracle,
    platform: &PlatformInfo,
    is_accumulate: bool,
) -> BackendVariant {
    let scenario = bmm_v3_scenario(plan, oracle, platform);
    debug!("{scenario}");

    let lhs_batch = batch_count(&plan.lhs.shape);
    let rhs_batch = batch_count(&plan.rhs.shape);
    let compute = plan.lhs.dtype;

    let backend = if scenario.holds() {
        if platform.soc.is_newest() && rhs_batch <= 1 && (!plan.lhs.transposed || lhs_batch <= 1) {
            BackendVariant::FoldedBatchToMatMul
        } else if compute.is_half() && is_accumulate {
            BackendVariant::BatchMatMulV3NdFp16Bf162Fp32
        } else {
            BackendVariant::BatchMatMulV3Nd
        }
    } else {
        let row_major = plan.lhs.layout == Layout::RowMajor;
        match (compute, plan.out.dtype) {
            (DType::F16, DType::F16) if row_major => BackendVariant::BatchMatMulNd,
            (DType::F16, DType::F16) => BackendVariant::BatchMatMulNzFp162Fp16,
            (DType::F16, DType::F32) if row_major => BackendVariant::BatchMatMulNdFp162Fp32,
            (DType::F16, DType::F32) => BackendVariant::BatchMatMulNzFp162Fp32,
            _ => BackendVariant::BatchMatMulNd,
        }
    };
    debug!("bmm backend for {} x{}: {backend}", plan.dims, plan.batch.count());
    backend
}
