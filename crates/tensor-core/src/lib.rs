// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor metadata and host reference kernels for the matmul dispatcher.
//!
//! This crate provides:
//! - [`DType`] and [`Layout`]: element types and storage layout tags
//!   (row-major "ND" vs accelerator-tiled "NZ").
//! - [`Shape`]: immutable dimension descriptors.
//! - [`TensorDesc`] and [`TensorView`]: immutable strided views over a
//!   storage buffer identified by [`StorageId`]. Transposes, reshapes and
//!   retags always produce new values.
//! - [`Tensor`]: an owned host buffer, used by the reference executor.
//! - Reference kernels: batched [`matmul`], broadcasting [`mul`]/[`add`],
//!   [`scale`], and strided gather/scatter.
//!
//! # Design Goals
//! - No in-place mutation of view metadata.
//! - Clean error types via `thiserror`.

mod dtype;
mod error;
mod layout;
mod ops;
mod shape;
mod tensor;

pub use dtype::DType;
pub use error::TensorError;
pub use layout::Layout;
pub use ops::{add, gather_strided, matmul, mul, scale, scatter_strided, strided_offsets};
pub use shape::Shape;
pub use tensor::{StorageId, Tensor, TensorDesc, TensorView};
