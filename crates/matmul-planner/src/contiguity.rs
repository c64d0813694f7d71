// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Detectors for strided views the backend can consume without a copy.
//!
//! Three patterns are recognised:
//!
//! ```text
//!   transpose-last-two   [.., M, K] with strides [.., 1, M]   -> swapped view, transpose flag
//!   slice (lhs, 3-D)     rows cut from a contiguous [B, S, K] -> strided view, m = B * m'
//!   transpose (rhs, 3-D) permuted contiguous storage          -> strided view, maybe swapped
//! ```
//!
//! Every detector is pure: it inspects a [`TensorDesc`] and returns a new
//! descriptor or a small value, never touching the input.

use tensor_core::{DType, Shape, TensorDesc};
use tracing::debug;

use crate::gemm::{ceil_align, ceil_div, dp_split_k_eligible, stream_k_eligible};
use crate::{Eligibility, MatmulDims, PlatformInfo, SocVersion};

const SLICE_TILE: usize = 256;
const SLICE_FP32_MAX_K: usize = 8192;
const TILE_ALIGN: usize = 16;
const DOUBLE_BUFFER: usize = 2;
const ACCUMULATOR_BYTES: usize = 4;
const MIN_LOAD_BALANCE: f64 = 0.8;

/// `true` when the view is a plain last-two-dims transpose of contiguous storage.
///
/// Such an operand is consumed as its swapped view with the transpose flag set.
pub fn detect_transpose_last_two(desc: &TensorDesc) -> bool {
    let rank = desc.rank();
    if !(2..=6).contains(&rank) {
        return false;
    }
    let dims = desc.shape().dims();
    let strides = desc.strides();
    if strides[rank - 2] != 1 || strides[rank - 1] != dims[rank - 2] {
        return false;
    }
    let mut expected = dims[rank - 1] * dims[rank - 2];
    for i in (0..rank - 2).rev() {
        if strides[i] != expected {
            return false;
        }
        expected *= dims[i];
    }
    !(dims[rank - 1] == 1 && dims[rank - 2] == 1)
}

/// The swapped, contiguous reading of a transposed view.
pub fn transposed_storage_view(desc: &TensorDesc) -> TensorDesc {
    desc.swap_last_two()
}

// ── Slice detection ─────────────────────────────────────────

/// A 3-D lhs that is a row slice of a larger contiguous tensor.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SliceView {
    pub batch: usize,
    pub slice_m: usize,
    pub k: usize,
    pub source_shape: Shape,
    pub offsets: Vec<usize>,
}

impl SliceView {
    /// Effective M once the batch is folded into rows.
    pub fn m(&self) -> usize {
        self.batch * self.slice_m
    }
}

fn slice_strides_valid(dims: &[usize], strides: &[usize]) -> bool {
    for i in 1..dims.len() {
        let (prev, cur) = (strides[i - 1], strides[i]);
        if cur == 0 || dims[i] == 1 {
            return false;
        }
        if prev < cur || prev % cur != 0 || prev < cur * dims[i] {
            return false;
        }
    }
    strides.last() == Some(&1)
}

/// Recovers the source tensor the slice was cut from.
fn slice_source(desc: &TensorDesc) -> Option<SliceView> {
    let dims = desc.shape().dims();
    let strides = desc.strides();
    let rank = dims.len();

    let mut source = vec![0usize; rank];
    for i in 0..rank - 1 {
        source[i + 1] = strides[i] / strides[i + 1];
    }
    let inner: usize = source[1..].iter().product();
    if inner == 0 || desc.storage_len() % inner != 0 {
        return None;
    }
    source[0] = desc.storage_len() / inner;

    let mut offsets = vec![0usize; rank];
    let mut remaining = desc.offset();
    for i in 0..rank {
        offsets[i] = remaining / strides[i];
        remaining %= strides[i];
        if source[i] < offsets[i] + dims[i] {
            return None;
        }
    }
    // Only the row axis may be cut.
    let only_rows_differ = (0..rank).all(|i| i == rank - 2 || source[i] == dims[i]);
    if !only_rows_differ || TILE_ALIGN % dims[rank - 2] != 0 {
        return None;
    }
    Some(SliceView {
        batch: dims[0],
        slice_m: dims[1],
        k: dims[2],
        source_shape: Shape::new(source),
        offsets,
    })
}

/// Detects a row-sliced 3-D lhs on the newest generation.
pub fn detect_slice(lhs: &TensorDesc, rhs: &TensorDesc, platform: &PlatformInfo) -> Option<SliceView> {
    let eligible = Eligibility::all("slice_view")
        .check("newest_generation", platform.soc == SocVersion::Ascend950)
        .check("lhs_non_contiguous", !lhs.is_contiguous())
        .check(
            "no_tiled_storage",
            !lhs.storage_layout().is_tiled() && !rhs.storage_layout().is_tiled(),
        )
        .check("dtypes_match", lhs.dtype() == rhs.dtype())
        .check("rank_three", lhs.rank() == 3)
        .check("storage_non_empty", lhs.storage_len() > 0)
        .check_with("strides_descending", || slice_strides_valid(lhs.shape().dims(), lhs.strides()));
    if !eligible.holds() {
        return None;
    }
    let slice = slice_source(lhs)?;
    debug!(
        "slice view detected: {} cut from {} at {:?}",
        lhs.shape(),
        slice.source_shape,
        slice.offsets
    );
    Some(slice)
}

/// Whether the backend can consume the slice directly for these dims.
pub fn slice_shape_supported(
    dims: &MatmulDims,
    lhs_dtype: DType,
    rhs_dtype: DType,
    hf32: bool,
    platform: &PlatformInfo,
) -> Eligibility {
    let cores = platform.cube_core_count;
    Eligibility::all("slice_shape")
        .check_with("not_stream_k", || !stream_k_eligible(dims, lhs_dtype, hf32, cores))
        .check_with("not_dp_split_k", || !dp_split_k_eligible(dims, lhs_dtype, hf32, cores))
        .check(
            "tiles_within_cores",
            ceil_div(dims.m, SLICE_TILE) * ceil_div(dims.n, SLICE_TILE) <= cores,
        )
        .check(
            "fp32_k_within_limit",
            !(rhs_dtype == DType::F32 && !hf32 && dims.k > SLICE_FP32_MAX_K),
        )
}

// ── Transposed rhs detection ────────────────────────────────

/// How a permuted rhs view is handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TransposeKind {
    /// Swap the two inner axes and set the transpose flag.
    NeedSwap,
    /// The view is consumed as-is.
    NoSwap,
}

/// Storage orders (outermost first) of the 3-D views the backend accepts.
const NEED_SWAP: [usize; 3] = [2, 0, 1];
const NO_SWAP: [usize; 3] = [1, 0, 2];

/// Detects a rhs whose storage is a contiguous permutation of its view.
pub fn detect_transpose_noncontiguous(desc: &TensorDesc, platform: &PlatformInfo) -> Option<TransposeKind> {
    let dims = desc.shape().dims();
    let strides = desc.strides();
    let eligible = Eligibility::all("transpose_view")
        .check("newest_generation", platform.soc == SocVersion::Ascend950)
        .check("rank_three", desc.rank() == 3)
        .check("non_contiguous", !desc.is_contiguous())
        .check("storage_non_empty", desc.storage_len() > 0)
        .check("no_zero_stride", strides.iter().all(|&s| s != 0))
        .check("no_unit_dim", dims.iter().all(|&d| d != 1))
        .check("has_stride_increase", strides.windows(2).any(|w| w[1] > w[0]));
    if !eligible.holds() {
        return None;
    }

    let mut order: Vec<(usize, usize, usize)> = strides
        .iter()
        .zip(dims)
        .enumerate()
        .map(|(idx, (&s, &d))| (s, idx, d))
        .collect();
    order.sort_unstable_by(|a, b| b.cmp(a));

    let mut expected = 1usize;
    for &(stride, _, dim) in order.iter().rev() {
        if stride != expected {
            return None;
        }
        expected *= dim;
    }

    let perm: Vec<usize> = order.iter().map(|&(_, idx, _)| idx).collect();
    if perm == NEED_SWAP {
        Some(TransposeKind::NeedSwap)
    } else if perm == NO_SWAP {
        Some(TransposeKind::NoSwap)
    } else {
        None
    }
}

/// Inputs of the transposed-rhs feasibility check.
#[derive(Debug, Clone, Copy)]
pub struct TransposeShapeQuery<'a> {
    pub lhs: &'a TensorDesc,
    pub rhs: &'a TensorDesc,
    pub dims: MatmulDims,
    pub has_bias: bool,
}

struct TileFit {
    l0a: bool,
    l0b: bool,
    l0c: bool,
    l1: bool,
    per_batch_bytes: usize,
}

fn tile_fit(dims: &MatmulDims, elem: usize, platform: &PlatformInfo) -> TileFit {
    let m = ceil_align(dims.m, TILE_ALIGN);
    let k = ceil_align(dims.k, TILE_ALIGN);
    let n = ceil_align(dims.n, TILE_ALIGN);
    let buffers = &platform.buffers;
    let per_batch_bytes = (m * k + k * n) * elem;
    TileFit {
        l0a: m * k * elem * DOUBLE_BUFFER <= buffers.l0a,
        l0b: k * n * elem * DOUBLE_BUFFER <= buffers.l0b,
        l0c: m * n * ACCUMULATOR_BYTES * DOUBLE_BUFFER <= buffers.l0c,
        l1: per_batch_bytes * DOUBLE_BUFFER <= buffers.l1,
        per_batch_bytes,
    }
}

/// Average per-core batch load divided by the worst-case load when L1 holds
/// `iter` batches at a time.
pub(crate) fn load_balance_ratio(batch: usize, per_batch_bytes: usize, l1: usize, cores: usize) -> f64 {
    if per_batch_bytes == 0 || cores == 0 {
        return 0.0;
    }
    let iter = (l1 / DOUBLE_BUFFER) / per_batch_bytes;
    if iter == 0 {
        return 0.0;
    }
    let worst = ceil_div(ceil_div(batch, iter), cores) * iter;
    (batch as f64 / cores as f64) / worst as f64
}

/// Whether a detected transposed rhs can be consumed without a copy.
pub fn transpose_shape_supported(query: &TransposeShapeQuery<'_>, platform: &PlatformInfo) -> Eligibility {
    let lhs = query.lhs;
    let rhs = query.rhs;
    let batch = crate::batch_count(lhs.shape());
    let cores = platform.cube_core_count;
    let fit = tile_fit(&query.dims, lhs.dtype().size_bytes(), platform);
    Eligibility::all("transpose_shape")
        .check(
            "no_tiled_storage",
            !lhs.storage_layout().is_tiled() && !rhs.storage_layout().is_tiled(),
        )
        .check("dtypes_match", lhs.dtype() == rhs.dtype())
        .check("no_bias", !query.has_bias)
        .check("batch_equal", crate::batch_equal(lhs.shape(), rhs.shape()))
        .check("batch_exceeds_cores", batch > cores)
        .check_with("tile_fits_or_balanced", || {
            (fit.l0a && fit.l0b && fit.l0c && fit.l1)
                || load_balance_ratio(batch, fit.per_batch_bytes, platform.buffers.l1, cores) >= MIN_LOAD_BALANCE
        })
}
