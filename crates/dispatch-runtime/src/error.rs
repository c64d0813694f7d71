// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the dispatch runtime.

use matmul_planner::PlanError;
use op_executor::ExecutorError;

use crate::Stage;

/// The two caller-visible failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    /// The call's tensors or flags violate a precondition. Reported before
    /// any device work is issued.
    Parameter,
    /// An allocation, conversion or backend call failed mid-flight.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A precondition on the caller's tensors or flags does not hold.
    #[error("invalid parameter: {detail}")]
    Parameter { detail: String },

    /// An executor call failed while running `stage`.
    #[error("internal error during {stage}: {source}")]
    Internal {
        stage: crate::Stage,
        #[source]
        source: ExecutorError,
    },

    /// The planner rejected the call or produced an unusable plan.
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    /// An executor failure not yet attributed to a stage.
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A background planning task panicked or was cancelled.
    #[error("planning task failed: {0}")]
    Task(String),
}

impl DispatchError {
    pub(crate) fn parameter(detail: impl Into<String>) -> Self {
        DispatchError::Parameter { detail: detail.into() }
    }

    /// Maps this error onto the caller-visible taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Parameter { .. } | DispatchError::Config(_) => ErrorKind::Parameter,
            DispatchError::Internal { .. } | DispatchError::Executor(_) | DispatchError::Task(_) => {
                ErrorKind::Internal
            }
            DispatchError::Plan(e) => match e {
                PlanError::InvalidPlan { .. } | PlanError::ConstructionFailed { .. } | PlanError::Tensor(_) => {
                    ErrorKind::Internal
                }
                _ => ErrorKind::Parameter,
            },
        }
    }

    /// Stage an internal error occurred in, if known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DispatchError::Internal { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Attributes an executor failure to `stage`.
    pub(crate) fn at(self, stage: Stage) -> Self {
        match self {
            DispatchError::Executor(source) => DispatchError::Internal { stage, source },
            other => other,
        }
    }
}
