// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host reference kernels.
//!
//! Plain loops over f32 values. They give the reference executor
//! something to run and the test suite a ground truth to compare rewritten
//! dispatch paths against; they are not the device kernels.

mod elementwise_op;
mod matmul_op;
mod strided_op;

pub use elementwise_op::{add, mul, scale};
pub use matmul_op::matmul;
pub use strided_op::{gather_strided, scatter_strided, strided_offsets};
