// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Gather/scatter between flat storage and strided views.

use crate::{Tensor, TensorDesc, TensorError};

/// Storage offsets visited by a strided view, in row-major logical order.
pub fn strided_offsets(desc: &TensorDesc) -> impl Iterator<Item = usize> + '_ {
    let dims = desc.shape().dims();
    let strides = desc.strides();
    (0..desc.num_elements()).map(move |flat| {
        let mut rem = flat;
        let mut off = desc.offset();
        for axis in (0..dims.len()).rev() {
            off += (rem % dims[axis]) * strides[axis];
            rem /= dims[axis];
        }
        off
    })
}

/// Materialises the view `desc` of `storage` into a new contiguous tensor.
///
/// `storage` is the flat buffer the view points into; its dtype is kept.
pub fn gather_strided(storage: &Tensor, desc: &TensorDesc) -> Result<Tensor, TensorError> {
    check_fits(storage, desc)?;
    let values: Vec<f32> = strided_offsets(desc).map(|o| storage.get_f32(o)).collect();
    Tensor::from_f32_as(desc.shape().clone(), storage.dtype(), &values)
}

/// Writes `src` (contiguous, same element count) through the view `desc`
/// into `storage`.
pub fn scatter_strided(storage: &mut Tensor, desc: &TensorDesc, src: &Tensor) -> Result<(), TensorError> {
    check_fits(storage, desc)?;
    if src.shape().num_elements() != desc.num_elements() {
        return Err(TensorError::ShapeMismatch {
            op: "scatter_strided",
            lhs: desc.shape().clone(),
            rhs: src.shape().clone(),
        });
    }
    let values = src.to_f32_vec();
    let offsets: Vec<usize> = strided_offsets(desc).collect();
    for (o, v) in offsets.into_iter().zip(values) {
        storage.set_f32(o, v);
    }
    Ok(())
}

fn check_fits(storage: &Tensor, desc: &TensorDesc) -> Result<(), TensorError> {
    if desc.span() > storage.shape().num_elements() {
        return Err(TensorError::OutOfBounds {
            shape: desc.shape().clone(),
            strides: desc.strides().to_vec(),
            offset: desc.offset(),
            storage_len: storage.shape().num_elements(),
        });
    }
    Ok(())
}
