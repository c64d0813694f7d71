// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Backend entry points the dispatcher can target.

use std::fmt;

use tensor_core::Layout;

/// One backend entry point, named by path, layout and dtype pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum BackendVariant {
    // ── Flat matmul ─────────────────────────────────────────────
    MatMulV3Nd,
    MatMulV3NdFp162Fp32,
    MatMulNdFp162Fp32,
    MatMulV3NzNzNdFp162Fp32,
    MatMulNzFp162Fp32,
    MatMulNd,
    MatMulNdNz,
    MatMulNzNzNd,
    MatMulV3NzNzNd,
    MatMulNz,

    // ── Batched matmul ──────────────────────────────────────────
    BatchMatMulV3Nd,
    BatchMatMulV3NdFp16Bf162Fp32,
    /// A batched call with no real batching, run as one flat V3 matmul
    /// and reshaped back.
    FoldedBatchToMatMul,
    BatchMatMulNd,
    BatchMatMulNzFp162Fp16,
    BatchMatMulNdFp162Fp32,
    BatchMatMulNzFp162Fp32,

    // ── Other ───────────────────────────────────────────────────
    /// Fused `alpha * (a @ b) + beta * c` on the V3 path.
    GemmV3,
    /// The K=1 rewrite.
    ElementwiseMul,
}

impl BackendVariant {
    pub const ALL: [BackendVariant; 19] = [
        BackendVariant::MatMulV3Nd,
        BackendVariant::MatMulV3NdFp162Fp32,
        BackendVariant::MatMulNdFp162Fp32,
        BackendVariant::MatMulV3NzNzNdFp162Fp32,
        BackendVariant::MatMulNzFp162Fp32,
        BackendVariant::MatMulNd,
        BackendVariant::MatMulNdNz,
        BackendVariant::MatMulNzNzNd,
        BackendVariant::MatMulV3NzNzNd,
        BackendVariant::MatMulNz,
        BackendVariant::BatchMatMulV3Nd,
        BackendVariant::BatchMatMulV3NdFp16Bf162Fp32,
        BackendVariant::FoldedBatchToMatMul,
        BackendVariant::BatchMatMulNd,
        BackendVariant::BatchMatMulNzFp162Fp16,
        BackendVariant::BatchMatMulNdFp162Fp32,
        BackendVariant::BatchMatMulNzFp162Fp32,
        BackendVariant::GemmV3,
        BackendVariant::ElementwiseMul,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BackendVariant::MatMulV3Nd => "MatMulV3Nd",
            BackendVariant::MatMulV3NdFp162Fp32 => "MatMulV3NdFp162Fp32",
            BackendVariant::MatMulNdFp162Fp32 => "MatMulNdFp162Fp32",
            BackendVariant::MatMulV3NzNzNdFp162Fp32 => "MatMulV3NzNzNdFp162Fp32",
            BackendVariant::MatMulNzFp162Fp32 => "MatMulNzFp162Fp32",
            BackendVariant::MatMulNd => "MatMulNd",
            BackendVariant::MatMulNdNz => "MatMulNdNz",
            BackendVariant::MatMulNzNzNd => "MatMulNzNzNd",
            BackendVariant::MatMulV3NzNzNd => "MatMulV3NzNzNd",
            BackendVariant::MatMulNz => "MatMulNz",
            BackendVariant::BatchMatMulV3Nd => "BatchMatMulV3Nd",
            BackendVariant::BatchMatMulV3NdFp16Bf162Fp32 => "BatchMatMulV3NdFp16Bf162Fp32",
            BackendVariant::FoldedBatchToMatMul => "FoldedBatchToMatMul",
            BackendVariant::BatchMatMulNd => "BatchMatMulNd",
            BackendVariant::BatchMatMulNzFp162Fp16 => "BatchMatMulNzFp162Fp16",
            BackendVariant::BatchMatMulNdFp162Fp32 => "BatchMatMulNdFp162Fp32",
            BackendVariant::BatchMatMulNzFp162Fp32 => "BatchMatMulNzFp162Fp32",
            BackendVariant::GemmV3 => "GemmV3",
            BackendVariant::ElementwiseMul => "ElementwiseMul",
        }
    }

    /// Whether this entry point belongs to the wider V3 kernel family.
    pub fn is_v3(self) -> bool {
        matches!(
            self,
            BackendVariant::MatMulV3Nd
                | BackendVariant::MatMulV3NdFp162Fp32
                | BackendVariant::MatMulV3NzNzNdFp162Fp32
                | BackendVariant::MatMulV3NzNzNd
                | BackendVariant::BatchMatMulV3Nd
                | BackendVariant::BatchMatMulV3NdFp16Bf162Fp32
                | BackendVariant::FoldedBatchToMatMul
                | BackendVariant::GemmV3
        )
    }

    /// Whether the entry point consumes batch dimensions itself.
    pub fn is_batched(self) -> bool {
        matches!(
            self,
            BackendVariant::BatchMatMulV3Nd
                | BackendVariant::BatchMatMulV3NdFp16Bf162Fp32
                | BackendVariant::BatchMatMulNd
                | BackendVariant::BatchMatMulNzFp162Fp16
                | BackendVariant::BatchMatMulNdFp162Fp32
                | BackendVariant::BatchMatMulNzFp162Fp32
        )
    }

    /// Layout of the tensor the entry point returns.
    pub fn output_layout(self) -> Layout {
        match self {
            BackendVariant::MatMulNdNz
            | BackendVariant::MatMulNz
            | BackendVariant::MatMulNzFp162Fp32
            | BackendVariant::BatchMatMulNzFp162Fp16
            | BackendVariant::BatchMatMulNzFp162Fp32 => Layout::Tiled,
            _ => Layout::RowMajor,
        }
    }
}

impl fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
