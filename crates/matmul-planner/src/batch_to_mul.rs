// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-generation predicates deciding whether a batched K=1 matmul may run
//! as an elementwise multiply.
//!
//! Each generation owns an independent predicate. They are looked up through
//! [`BATCH_TO_MUL_TABLE`] rather than merged into one formula.

use tensor_core::DType;

use crate::contiguity::load_balance_ratio;
use crate::gemm::ceil_align;
use crate::{MatmulDims, PlatformInfo, SocVersion};

const MIN_BATCH_NUM: usize = 128;
const BLOCK_BYTES: usize = 32;
const VECTOR_BYTES: usize = 256;
const BF16_MAX_N: usize = 4000;
const TILE_ALIGN: usize = 16;
const DOUBLE_BUFFER: usize = 2;
const ACCUMULATOR_BYTES: usize = 4;
const MIN_LOAD_BALANCE: f64 = 0.8;

/// Facts a batch-to-mul predicate may inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchToMulQuery {
    pub dims: MatmulDims,
    pub dtype: DType,
    pub transpose_lhs: bool,
    pub transpose_rhs: bool,
    pub lhs_batch: usize,
    pub rhs_batch: usize,
}

/// A generation's predicate.
pub type BatchToMulFn = fn(&BatchToMulQuery, &PlatformInfo) -> bool;

/// Generations with a dedicated predicate; everything else is refused.
pub static BATCH_TO_MUL_TABLE: [(SocVersion, BatchToMulFn); 3] = [
    (SocVersion::Ascend950, newest_generation),
    (SocVersion::Ascend910B, mid_generation),
    (SocVersion::Ascend910_93, mid_generation),
];

/// Looks up and evaluates the predicate for `platform`.
pub fn batch_to_mul_allowed(query: &BatchToMulQuery, platform: &PlatformInfo) -> bool {
    BATCH_TO_MUL_TABLE
        .iter()
        .find(|(soc, _)| *soc == platform.soc)
        .map_or(false, |(_, predicate)| predicate(query, platform))
}

fn mid_generation(query: &BatchToMulQuery, _platform: &PlatformInfo) -> bool {
    query.dtype != DType::BF16 || query.dims.n <= BF16_MAX_N
}

/// The cube unit wins when batches tile L1 well or when the vector unit
/// cannot hold a whole broadcast row.
fn newest_generation(query: &BatchToMulQuery, platform: &PlatformInfo) -> bool {
    !(fits_iter_batch(query, platform) || shape_equal_to_mul(query, platform))
}

fn fits_iter_batch(query: &BatchToMulQuery, platform: &PlatformInfo) -> bool {
    let elem = query.dtype.size_bytes();
    let c0 = BLOCK_BYTES / elem;
    let dims = query.dims;
    let m = ceil_align(dims.m, TILE_ALIGN);
    let n = ceil_align(dims.n, TILE_ALIGN);
    let ka = if query.transpose_lhs {
        ceil_align(dims.k, TILE_ALIGN)
    } else {
        ceil_align(dims.k, c0)
    };
    let kb = if query.transpose_rhs {
        ceil_align(dims.k, c0)
    } else {
        ceil_align(dims.k, TILE_ALIGN)
    };
    let buffers = &platform.buffers;
    let per_batch = (m * ka + kb * n) * elem;
    let fits = m * ka * elem * DOUBLE_BUFFER <= buffers.l0a
        && kb * n * elem * DOUBLE_BUFFER <= buffers.l0b
        && m * n * ACCUMULATOR_BYTES * DOUBLE_BUFFER <= buffers.l0c
        && per_batch * DOUBLE_BUFFER <= buffers.l1;
    let batch = query.lhs_batch.max(query.rhs_batch);
    if query.lhs_batch != query.rhs_batch || batch <= platform.cube_core_count {
        return false;
    }
    fits || load_balance_ratio(batch, per_batch, buffers.l1, platform.cube_core_count) >= MIN_LOAD_BALANCE
}

fn shape_equal_to_mul(query: &BatchToMulQuery, platform: &PlatformInfo) -> bool {
    let elem = query.dtype.size_bytes();
    let c0 = BLOCK_BYTES / elem;
    let per_vector = VECTOR_BYTES / elem;
    let n = query.dims.n;
    let batch = query.lhs_batch.max(query.rhs_batch);
    let m_aligned = ceil_align(query.dims.m, c0);
    let n_aligned = ceil_align(n, c0);
    let ub_bytes = (m_aligned + n_aligned + m_aligned * n_aligned) * elem;
    batch >= MIN_BATCH_NUM
        && !(n > c0 && n <= per_vector)
        && n != 1
        && ub_bytes <= platform.buffers.ub
        && n % per_vector != 0
}
