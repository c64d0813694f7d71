// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the matmul planner.

use tensor_core::{DType, Shape, TensorError};

use crate::{CubeMathType, SocVersion};

/// Errors that can occur while building or validating a matmul plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The operand element types cannot be combined on this generation.
    #[error("unsupported dtype combination {lhs} x {rhs} on {soc}: {reason}")]
    UnsupportedDTypeCombination {
        lhs: DType,
        rhs: DType,
        soc: SocVersion,
        reason: String,
    },

    /// The cube math type is not accepted for these inputs on this generation.
    #[error("cube math type {math} is not supported for {dtype} on {soc}")]
    UnsupportedMathType {
        math: CubeMathType,
        dtype: DType,
        soc: SocVersion,
    },

    /// A raw cube math type code outside the known range.
    #[error("unknown cube math type code {0}")]
    UnknownMathType(i8),

    /// An operand has a rank the operator cannot accept.
    #[error("{operand} has rank {rank}, expected {expected}")]
    InvalidRank {
        operand: &'static str,
        rank: usize,
        expected: &'static str,
    },

    /// The contraction dimensions of the two operands disagree.
    #[error("contraction mismatch: lhs {lhs} (k={lhs_k}) vs rhs {rhs} (k={rhs_k})")]
    ContractionMismatch {
        lhs: Shape,
        rhs: Shape,
        lhs_k: usize,
        rhs_k: usize,
    },

    /// The batch dimensions of the two operands cannot be broadcast.
    #[error("batch dims of {lhs} and {rhs} are not broadcast-compatible")]
    BatchMismatch { lhs: Shape, rhs: Shape },

    /// A bias is present where the result is empty but the bias is not.
    #[error("bias {bias} cannot accumulate into empty result {out}")]
    NonEmptyBias { bias: Shape, out: Shape },

    /// A finished plan violates one of its own invariants.
    #[error("invalid plan for '{operator}': {detail}")]
    InvalidPlan {
        operator: &'static str,
        detail: String,
    },

    /// Plan construction could not produce a usable plan.
    #[error("plan construction failed in '{operator}': {detail}")]
    ConstructionFailed {
        operator: &'static str,
        detail: String,
    },

    #[error(transparent)]
    Tensor(#[from] TensorError),
}
