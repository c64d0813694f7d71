// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor operations.

use crate::Shape;

/// Errors that can occur during tensor operations.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer size does not match the expected size for the given shape and dtype.
    #[error("shape mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Two tensors have incompatible shapes for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// The requested data type is not supported for this operation.
    #[error("unsupported dtype {dtype:?} for operation {op}")]
    UnsupportedDType {
        op: &'static str,
        dtype: crate::DType,
    },

    /// A strided view addresses elements outside its storage.
    #[error("view out of bounds: {shape} with strides {strides:?} at offset {offset} exceeds storage of {storage_len} elements")]
    OutOfBounds {
        shape: Shape,
        strides: Vec<usize>,
        offset: usize,
        storage_len: usize,
    },

    /// A reshape changed the number of elements.
    #[error("cannot reshape {from} into {to}")]
    InvalidReshape { from: Shape, to: Shape },

    /// A textual value could not be parsed.
    #[error("cannot parse {what} from '{input}'")]
    Parse { what: &'static str, input: String },
}
