// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reference (batched) matrix multiplication.

use crate::{Shape, Tensor, TensorError};

/// Computes `op(lhs) @ op(rhs)` in `f32`, where `op` optionally transposes
/// the last two axes.
///
/// Operands are given in storage order: a transposed `lhs` of logical shape
/// `[M, K]` is passed as `[K, M]` with `transpose_lhs = true`. Leading batch
/// dimensions broadcast against each other. The result is an `F32` tensor of
/// shape `[...batch, M, N]`.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if ranks are below 2, contraction
/// sizes differ, or batch dimensions do not broadcast.
pub fn matmul(
    lhs: &Tensor,
    rhs: &Tensor,
    transpose_lhs: bool,
    transpose_rhs: bool,
) -> Result<Tensor, TensorError> {
    let mismatch = || TensorError::ShapeMismatch {
        op: "matmul",
        lhs: lhs.shape().clone(),
        rhs: rhs.shape().clone(),
    };
    let (l0, l1) = lhs.shape().last_two().ok_or_else(mismatch)?;
    let (r0, r1) = rhs.shape().last_two().ok_or_else(mismatch)?;
    let (m, k) = if transpose_lhs { (l1, l0) } else { (l0, l1) };
    let (k_rhs, n) = if transpose_rhs { (r1, r0) } else { (r0, r1) };
    if k != k_rhs {
        return Err(mismatch());
    }

    let lhs_batch = Shape::from(lhs.shape().batch_dims());
    let rhs_batch = Shape::from(rhs.shape().batch_dims());
    let out_batch = lhs_batch.broadcast_with(&rhs_batch).ok_or_else(mismatch)?;

    let mut out_dims = out_batch.dims().to_vec();
    out_dims.extend([m, n]);
    let out_shape = Shape::new(out_dims);

    let a_all = lhs.to_f32_vec();
    let b_all = rhs.to_f32_vec();
    let mut c_all = vec![0.0f32; out_shape.num_elements()];

    let mut a = vec![0.0f32; m * k];
    let mut b = vec![0.0f32; k * n];
    for batch in 0..out_batch.num_elements() {
        let la = broadcast_source_index(batch, &out_batch, &lhs_batch);
        let rb = broadcast_source_index(batch, &out_batch, &rhs_batch);
        load_matrix(&a_all[la * m * k..(la + 1) * m * k], &mut a, m, k, transpose_lhs);
        load_matrix(&b_all[rb * k * n..(rb + 1) * k * n], &mut b, k, n, transpose_rhs);
        matmul_f32_generic(&a, &b, &mut c_all[batch * m * n..(batch + 1) * m * n], m, k, n);
    }

    Tensor::from_f32(out_shape, &c_all)
}

/// Copies a `[rows, cols]` matrix out of its stored form into row-major
/// scratch; a transposed source is stored as `[cols, rows]`.
fn load_matrix(src: &[f32], dst: &mut [f32], rows: usize, cols: usize, transposed: bool) {
    if !transposed {
        dst.copy_from_slice(src);
        return;
    }
    for r in 0..rows {
        for c in 0..cols {
            dst[r * cols + c] = src[c * rows + r];
        }
    }
}

/// Maps a flat index over the broadcast batch shape to the flat index in an
/// operand's own (possibly shorter, possibly size-1) batch shape.
fn broadcast_source_index(flat: usize, out: &Shape, src: &Shape) -> usize {
    let out_dims = out.dims();
    let src_dims = src.dims();
    let pad = out_dims.len() - src_dims.len();
    let mut rem = flat;
    let mut index = 0usize;
    let mut src_stride = 1usize;
    for axis in (0..out_dims.len()).rev() {
        let coord = rem % out_dims[axis];
        rem /= out_dims[axis];
        if axis >= pad {
            let d = src_dims[axis - pad];
            if d != 1 {
                index += coord * src_stride;
            }
            src_stride *= d;
        }
    }
    index
}

/// Generic (portable) f32 matrix multiplication.
///
/// Uses a simple ikj loop order for better cache locality on the `b` matrix.
fn matmul_f32_generic(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    c.iter_mut().for_each(|x| *x = 0.0);

    // ikj: the inner loop is a saxpy on a row of C, sequential in memory.
    for i in 0..m {
        for p in 0..k {
            let a_ip = a[i * k + p];
            let c_row = &mut c[i * n..(i + 1) * n];
            let b_row = &b[p * n..(p + 1) * n];
            for j in 0..n {
                c_row[j] += a_ip * b_row[j];
            }
        }
    }
}
