// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operand layout selection and split-K eligibility.

use tensor_core::{DType, Layout, TensorDesc};
use tracing::debug;

use crate::{Eligibility, MatmulDims, PlatformInfo, SocVersion};

const SMALL_OPERAND_ELEMS: usize = 65535;
const MIN_INNER_AXIS: usize = 128;
const MAX_INNER_AXIS: usize = 65535;
const BLOCK: usize = 16;
const SPLIT_K_FORBID_MIN_K: usize = 15000;
const SPLIT_K_FORBID_TILE: usize = 128;
const SPLIT_K_MULTIPLE: usize = 8;
const SPLIT_K_MAX_MKN: f64 = 8e9;
const SPLIT_K_MAX_ASPECT: f64 = 50.0;
const SINGLE_CORE_SPLIT_K_MIN_K: usize = 27392;
const SINGLE_CORE_ALIGN_BYTES: usize = 256;

/// Resolved layout of each operand and the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LayoutChoice {
    pub lhs: Layout,
    pub rhs: Layout,
    pub out: Layout,
}

impl LayoutChoice {
    pub const ALL_ROW_MAJOR: LayoutChoice = LayoutChoice {
        lhs: Layout::RowMajor,
        rhs: Layout::RowMajor,
        out: Layout::RowMajor,
    };
    pub const ALL_TILED: LayoutChoice = LayoutChoice {
        lhs: Layout::Tiled,
        rhs: Layout::Tiled,
        out: Layout::Tiled,
    };
    pub const TILED_IN_ROW_MAJOR_OUT: LayoutChoice = LayoutChoice {
        lhs: Layout::Tiled,
        rhs: Layout::Tiled,
        out: Layout::RowMajor,
    };
}

impl std::fmt::Display for LayoutChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.lhs, self.rhs, self.out)
    }
}

/// Operands as the layout rules see them: caller dtypes, storage-order
/// shapes and transpose flags.
#[derive(Debug, Clone, Copy)]
pub struct LayoutQuery<'a> {
    pub lhs: &'a TensorDesc,
    pub rhs: &'a TensorDesc,
    pub transpose_lhs: bool,
    pub transpose_rhs: bool,
    pub dims: MatmulDims,
}

impl LayoutQuery<'_> {
    fn half_pair(&self) -> bool {
        matches!(
            (self.lhs.dtype(), self.rhs.dtype()),
            (DType::F16, DType::F16) | (DType::BF16, DType::BF16)
        )
    }
}

fn inner_axis_ok(len: usize) -> bool {
    (MIN_INNER_AXIS..=MAX_INNER_AXIS).contains(&len) || (len < MIN_INNER_AXIS && len % BLOCK == 0)
}

/// Large-K, few-tile shapes where split-K is not allowed to take over.
///
/// Tile counts round down.
pub fn split_k_forbidden(dims: &MatmulDims, transpose_lhs: bool, transpose_rhs: bool, cores: usize) -> bool {
    let tiles = (dims.m / SPLIT_K_FORBID_TILE) * (dims.n / SPLIT_K_FORBID_TILE);
    dims.k >= SPLIT_K_FORBID_MIN_K && tiles < cores / 2 && !(!transpose_lhs && transpose_rhs)
}

/// Whether row-major operands can be converted to tiled form on the fly.
pub fn is_nd_to_nz_on_the_fly(query: &LayoutQuery<'_>, platform: &PlatformInfo) -> bool {
    let (Some((lhs_outer, lhs_inner)), Some((rhs_outer, rhs_inner))) =
        (query.lhs.shape().last_two(), query.rhs.shape().last_two())
    else {
        return false;
    };
    let verdict = Eligibility::any("nd_to_nz_on_the_fly")
        .check(
            "small_operands",
            lhs_inner * lhs_outer <= SMALL_OPERAND_ELEMS && rhs_inner * rhs_outer <= SMALL_OPERAND_ELEMS,
        )
        .check("k_is_one", query.dims.k == 1)
        .check_with("split_k_forbidden", || {
            split_k_forbidden(
                &query.dims,
                query.transpose_lhs,
                query.transpose_rhs,
                platform.cube_core_count,
            )
        })
        .check("inner_axes_aligned", inner_axis_ok(lhs_inner) && inner_axis_ok(rhs_inner));
    debug!("{verdict}");
    verdict.holds()
}

/// Whether the row-major layout is usable for all three tensors.
pub fn is_format_support_nd(query: &LayoutQuery<'_>, platform: &PlatformInfo) -> bool {
    let caps = platform.capabilities();
    if platform.soc == SocVersion::Ascend950 {
        return true;
    }
    if !caps.nd_native {
        let aligned = [query.lhs.shape(), query.rhs.shape()]
            .iter()
            .all(|s| s.last_two().is_some_and(|(r, c)| r % BLOCK == 0 && c % BLOCK == 0));
        return aligned && query.lhs.dtype() == DType::F16;
    }
    if caps.nd_on_the_fly_check && query.half_pair() {
        return is_nd_to_nz_on_the_fly(query, platform);
    }
    true
}

/// Picks the operand and output layouts.
pub fn resolve_layout(query: &LayoutQuery<'_>, platform: &PlatformInfo) -> LayoutChoice {
    let choice = if is_format_support_nd(query, platform) {
        LayoutChoice::ALL_ROW_MAJOR
    } else if platform.capabilities().nz_nz_nd_output
        && query.dims.n % BLOCK == 0
        && query.lhs.dtype() == DType::F16
    {
        LayoutChoice::TILED_IN_ROW_MAJOR_OUT
    } else {
        LayoutChoice::ALL_TILED
    };
    debug!("layout for {}: {choice}", query.dims);
    choice
}

/// Inputs of the split-K rule.
#[derive(Debug, Clone, Copy)]
pub struct SplitKQuery {
    pub lhs_dtype: DType,
    pub rhs_dtype: DType,
    pub dims: MatmulDims,
    pub lhs_layout: Layout,
    pub out_layout: Layout,
    pub is_batched: bool,
}

/// Whether the reduction dimension should be split across cores.
pub fn is_split_k(query: &SplitKQuery) -> Eligibility {
    let dims = query.dims;
    Eligibility::all("split_k")
        .check("both_fp16", query.lhs_dtype == DType::F16 && query.rhs_dtype == DType::F16)
        .check("k_dominates", dims.k >= SPLIT_K_MULTIPLE * dims.max_mn())
        .check_with("shape_bounded", || {
            if query.is_batched {
                return true;
            }
            if query.lhs_layout == Layout::RowMajor && query.out_layout == Layout::RowMajor {
                return true;
            }
            let mkn = dims.m as f64 * dims.n as f64 * dims.k as f64;
            let aspect = dims.max_mn() as f64 / dims.min_mn().max(1) as f64;
            mkn < SPLIT_K_MAX_MKN && aspect < SPLIT_K_MAX_ASPECT
        })
}

/// Single-core split-K on the mid-generation parts.
pub fn single_core_split_k(
    lhs: &TensorDesc,
    rhs: &TensorDesc,
    lhs_dtype: DType,
    rhs_dtype: DType,
    dims: &MatmulDims,
    platform: &PlatformInfo,
) -> Eligibility {
    let elem = lhs_dtype.size_bytes();
    Eligibility::all("single_core_split_k")
        .check("mid_generation", platform.soc.is_mid_generation())
        .check(
            "half_pair",
            matches!((lhs_dtype, rhs_dtype), (DType::F16, DType::F16) | (DType::BF16, DType::BF16)),
        )
        .check(
            "k_large",
            dims.k >= SINGLE_CORE_SPLIT_K_MIN_K && dims.k >= 2 * dims.max_mn(),
        )
        .check_with("size_within_i32", || {
            if (dims.k * elem) % SINGLE_CORE_ALIGN_BYTES == 0 {
                return true;
            }
            let bytes = |d: &TensorDesc| d.shape().last_two().map_or(0, |(r, c)| r * c) * elem;
            bytes(lhs) + bytes(rhs) <= i32::MAX as usize
        })
}
