// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Broadcasting elementwise kernels.

use crate::{DType, Shape, Tensor, TensorError};

/// Elementwise product with NumPy-style broadcasting.
///
/// The result keeps the operands' dtype when they agree and is `F32`
/// otherwise.
pub fn mul(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor, TensorError> {
    binary("mul", lhs, rhs, |a, b| a * b)
}

/// Elementwise sum with NumPy-style broadcasting.
pub fn add(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor, TensorError> {
    binary("add", lhs, rhs, |a, b| a + b)
}

/// Multiplies every element by `alpha`, keeping the dtype.
pub fn scale(input: &Tensor, alpha: f32) -> Result<Tensor, TensorError> {
    let values: Vec<f32> = input.to_f32_vec().into_iter().map(|v| v * alpha).collect();
    Tensor::from_f32_as(input.shape().clone(), input.dtype(), &values)
}

fn binary(
    op: &'static str,
    lhs: &Tensor,
    rhs: &Tensor,
    f: impl Fn(f32, f32) -> f32,
) -> Result<Tensor, TensorError> {
    let out_shape = lhs
        .shape()
        .broadcast_with(rhs.shape())
        .ok_or_else(|| TensorError::ShapeMismatch {
            op,
            lhs: lhs.shape().clone(),
            rhs: rhs.shape().clone(),
        })?;
    let out_dtype = if lhs.dtype() == rhs.dtype() {
        lhs.dtype()
    } else {
        DType::F32
    };

    let a = lhs.to_f32_vec();
    let b = rhs.to_f32_vec();
    let a_strides = broadcast_strides(lhs.shape(), &out_shape);
    let b_strides = broadcast_strides(rhs.shape(), &out_shape);
    let dims = out_shape.dims();

    let mut values = Vec::with_capacity(out_shape.num_elements());
    for flat in 0..out_shape.num_elements() {
        let mut rem = flat;
        let (mut ia, mut ib) = (0usize, 0usize);
        for axis in (0..dims.len()).rev() {
            let coord = rem % dims[axis];
            rem /= dims[axis];
            ia += coord * a_strides[axis];
            ib += coord * b_strides[axis];
        }
        values.push(f(a[ia], b[ib]));
    }
    Tensor::from_f32_as(out_shape, out_dtype, &values)
}

/// Row-major strides of `src` laid over `out`, with 0 on broadcast axes.
fn broadcast_strides(src: &Shape, out: &Shape) -> Vec<usize> {
    let pad = out.rank() - src.rank();
    let own = src.strides();
    (0..out.rank())
        .map(|axis| {
            if axis < pad || src.dims()[axis - pad] == 1 {
                0
            } else {
                own[axis - pad]
            }
        })
        .collect()
}
