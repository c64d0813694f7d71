// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the operator executor.

use tensor_core::{StorageId, TensorError};

/// Errors returned by an [`OperatorExecutor`](crate::OperatorExecutor).
///
/// Every variant is fatal for the call that triggered it; the dispatcher
/// aborts and reports it as an internal error.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The allocation would exceed the workspace budget.
    #[error("workspace exhausted: requested {requested_bytes} bytes, but only {available_bytes} available (budget: {budget_bytes})")]
    WorkspaceExhausted {
        requested_bytes: usize,
        available_bytes: usize,
        budget_bytes: usize,
    },

    /// A view refers to storage this executor never allocated.
    #[error("unknown tensor storage {storage}")]
    UnknownTensor { storage: StorageId },

    /// A kernel or backend entry point reported failure.
    #[error("kernel '{kernel}' failed: {detail}")]
    KernelFailed { kernel: String, detail: String },

    /// A workspace budget string could not be parsed.
    #[error("invalid workspace budget '{0}': expected a number followed by an optional suffix (K, M, G)")]
    InvalidBudget(String),

    /// Shape or buffer error from a reference kernel.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}
