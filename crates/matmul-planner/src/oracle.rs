// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shape oracles that decide whether a shape should use the V3 backend.
//!
//! The real predicate is tuned per hardware generation and treated as a
//! black box; the planner only sees its boolean answer. Implementations
//! must be pure and `Send + Sync` so one oracle can serve concurrent plans.

use tensor_core::{DType, Layout, Shape};

use crate::MatmulDims;

/// Everything an oracle may inspect.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OracleQuery {
    pub lhs_shape: Shape,
    pub rhs_shape: Shape,
    pub transpose_lhs: bool,
    pub transpose_rhs: bool,
    pub lhs_layout: Layout,
    pub rhs_layout: Layout,
    pub lhs_dtype: DType,
    pub rhs_dtype: DType,
    pub split_k: bool,
    pub has_bias: bool,
    pub fp16_bf16_in_fp32_out: bool,
    pub dims: MatmulDims,
    pub batch: usize,
}

/// Per-generation V3 shape predicate.
pub trait V3ShapeOracle: Send + Sync {
    fn name(&self) -> &str;

    /// Flat matmul query.
    fn check_mm(&self, query: &OracleQuery) -> bool;

    /// Batched matmul query.
    fn check_bmm(&self, query: &OracleQuery) -> bool;
}

/// Threshold-based default oracle.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ThresholdOracle {
    pub min_dim: usize,
    pub min_k: usize,
    pub min_batch: usize,
}

impl Default for ThresholdOracle {
    fn default() -> Self {
        Self {
            min_dim: 64,
            min_k: 64,
            min_batch: 1,
        }
    }
}

impl ThresholdOracle {
    pub fn new(min_dim: usize, min_k: usize, min_batch: usize) -> Self {
        Self {
            min_dim,
            min_k,
            min_batch,
        }
    }

    fn large_enough(&self, query: &OracleQuery) -> bool {
        query.split_k || (query.dims.min_mn() >= self.min_dim && query.dims.k >= self.min_k)
    }
}

impl V3ShapeOracle for ThresholdOracle {
    fn name(&self) -> &str {
        "threshold"
    }

    fn check_mm(&self, query: &OracleQuery) -> bool {
        self.large_enough(query)
    }

    fn check_bmm(&self, query: &OracleQuery) -> bool {
        self.large_enough(query) && query.batch >= self.min_batch
    }
}

/// Oracle that always selects V3.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysV3;

impl V3ShapeOracle for AlwaysV3 {
    fn name(&self) -> &str {
        "always-v3"
    }

    fn check_mm(&self, _query: &OracleQuery) -> bool {
        true
    }

    fn check_bmm(&self, _query: &OracleQuery) -> bool {
        true
    }
}

/// Oracle that never selects V3.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverV3;

impl V3ShapeOracle for NeverV3 {
    fn name(&self) -> &str {
        "never-v3"
    }

    fn check_mm(&self, _query: &OracleQuery) -> bool {
        false
    }

    fn check_bmm(&self, _query: &OracleQuery) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(m: usize, k: usize, n: usize, batch: usize, split_k: bool) -> OracleQuery {
        OracleQuery {
            lhs_shape: Shape::matrix(m, k),
            rhs_shape: Shape::matrix(k, n),
            transpose_lhs: false,
            transpose_rhs: false,
            lhs_layout: Layout::RowMajor,
            rhs_layout: Layout::RowMajor,
            lhs_dtype: DType::F16,
            rhs_dtype: DType::F16,
            split_k,
            has_bias: false,
            fp16_bf16_in_fp32_out: false,
            dims: MatmulDims::new(m, k, n),
            batch,
        }
    }

    #[test]
    fn test_threshold_defaults() {
        let oracle = ThresholdOracle::default();
        assert!(!oracle.check_mm(&query(4, 16, 8, 1, false)));
        assert!(oracle.check_mm(&query(64, 64, 128, 1, false)));
        assert!(!oracle.check_mm(&query(63, 4096, 128, 1, false)));
        // Split-K shapes always hit.
        assert!(oracle.check_mm(&query(4, 4096, 8, 1, true)));
    }

    #[test]
    fn test_threshold_batch() {
        let oracle = ThresholdOracle::new(64, 64, 4);
        assert!(!oracle.check_bmm(&query(128, 128, 128, 2, false)));
        assert!(oracle.check_bmm(&query(128, 128, 128, 4, false)));
    }

    #[test]
    fn test_fixed_oracles() {
        let q = query(1, 1, 1, 1, false);
        assert!(AlwaysV3.check_mm(&q) && AlwaysV3.check_bmm(&q));
        assert!(!NeverV3.check_mm(&q) && !NeverV3.check_bmm(&q));
        assert_eq!(NeverV3.name(), "never-v3");
    }
}
