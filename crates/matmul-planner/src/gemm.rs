// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Streaming split-K variants and the fused GemmV3 eligibility rules.
//!
//! The two GemmV3 rules are separate. The plain addmm check
//! validates the dtype/math combination and ignores the bias, while the
//! bias-aware check skips dtype validation and inspects the bias and output
//! tensors instead.

use tensor_core::{DType, TensorDesc};

use crate::{promotion_rule, CubeMathType, Eligibility, MatmulDims, PlatformInfo, SocVersion};

const STREAM_K_MAX_FP32_K: usize = 2_000_000;
const STREAM_K_MIN_K_BYTES: usize = 8192;
const STREAM_K_CORE_BYTES: usize = 256;
const DP_SPLIT_K_CORE_BYTES: usize = 128;
const BASE_TILE: usize = 256;
const FP32_TILE: usize = 32;
const GEMM_V3_MIN_MN: usize = 512;
const GEMM_V3_MIN_K: usize = 256;

pub(crate) fn ceil_div(a: usize, b: usize) -> usize {
    if b == 0 {
        0
    } else {
        a.div_ceil(b)
    }
}

pub(crate) fn ceil_align(a: usize, b: usize) -> usize {
    ceil_div(a, b) * b
}

fn full_fp32(dtype: DType, hf32: bool) -> bool {
    dtype == DType::F32 && !hf32
}

/// Whether the stream-K split-K variant would be chosen.
pub fn stream_k_eligible(dims: &MatmulDims, dtype: DType, hf32: bool, cores: usize) -> bool {
    let fp32 = full_fp32(dtype, hf32);
    if fp32 && dims.k > STREAM_K_MAX_FP32_K {
        return false;
    }
    let k_threshold = STREAM_K_MIN_K_BYTES.max(cores * STREAM_K_CORE_BYTES) / dtype.size_bytes();
    if ceil_align(dims.k, BASE_TILE) < k_threshold {
        return false;
    }
    let align = if fp32 { FP32_TILE } else { BASE_TILE };
    ceil_div(dims.m, align) * ceil_div(dims.n, align) <= cores / 2
}

/// Whether the data-parallel + split-K variant would be chosen.
pub fn dp_split_k_eligible(dims: &MatmulDims, dtype: DType, hf32: bool, cores: usize) -> bool {
    if cores == 0 || dims.m % BASE_TILE != 0 || dims.n % BASE_TILE != 0 {
        return false;
    }
    let k_threshold = STREAM_K_MIN_K_BYTES.max(cores * DP_SPLIT_K_CORE_BYTES) / dtype.size_bytes();
    if dims.k < k_threshold || full_fp32(dtype, hf32) {
        return false;
    }
    let tiles = ceil_div(dims.m, BASE_TILE) * ceil_div(dims.n, BASE_TILE);
    tiles >= cores && tiles % cores != 0 && tiles % cores <= cores / 2
}

/// GemmV3 only pays off for large tiles that neither split-K variant claims.
pub fn gemm_v3_shape_supported(dims: &MatmulDims, dtype: DType, hf32: bool, cores: usize) -> bool {
    !stream_k_eligible(dims, dtype, hf32, cores)
        && !dp_split_k_eligible(dims, dtype, hf32, cores)
        && dims.m >= GEMM_V3_MIN_MN
        && dims.n >= GEMM_V3_MIN_MN
        && dims.k > GEMM_V3_MIN_K
}

/// The two per-operator GemmV3 rules.
pub struct GemmV3Eligibility;

impl GemmV3Eligibility {
    fn common(rule: &'static str, mat1: &TensorDesc, mat2: &TensorDesc, platform: &PlatformInfo) -> Eligibility {
        let soc = platform.soc;
        let half_pair = matches!(
            (mat1.dtype(), mat2.dtype()),
            (DType::F16, DType::F16) | (DType::BF16, DType::BF16)
        );
        Eligibility::all(rule)
            .check("inputs_non_empty", !mat1.is_empty() && !mat2.is_empty())
            .check(
                "no_tiled_storage",
                !mat1.storage_layout().is_tiled() && !mat2.storage_layout().is_tiled(),
            )
            .check(
                "soc_supports_gemm_v3",
                matches!(soc, SocVersion::Ascend950 | SocVersion::Ascend910B | SocVersion::Ascend910_93),
            )
            .check("mid_generation_half_pair", !soc.is_mid_generation() || half_pair)
    }

    /// Rule used by addmm before choosing the fused graph.
    pub fn for_addmm_validated(
        mat1: &TensorDesc,
        mat2: &TensorDesc,
        dims: &MatmulDims,
        math: CubeMathType,
        platform: &PlatformInfo,
    ) -> Eligibility {
        Self::common("gemm_v3_addmm", mat1, mat2, platform)
            .check_with("dtype_math_valid", || {
                promotion_rule(platform)
                    .check_input(mat1.dtype(), mat2.dtype(), math)
                    .is_ok()
            })
            .check_with("shape_supported", || {
                gemm_v3_shape_supported(dims, mat1.dtype(), math.allows_hf32(), platform.cube_core_count)
            })
    }

    /// Rule applied again when the fused graph is about to launch.
    pub fn for_addmm_with_bias(
        mat1: &TensorDesc,
        mat2: &TensorDesc,
        bias: &TensorDesc,
        out: &TensorDesc,
        dims: &MatmulDims,
        math: CubeMathType,
        platform: &PlatformInfo,
    ) -> Eligibility {
        Self::common("gemm_v3_addmm_bias", mat1, mat2, platform)
            .check("bias_row_major", !bias.storage_layout().is_tiled())
            .check("out_row_major", !out.storage_layout().is_tiled())
            .check("out_is_fp32", out.dtype() == DType::F32)
            .check_with("shape_supported", || {
                gemm_v3_shape_supported(dims, mat1.dtype(), math.allows_hf32(), platform.cube_core_count)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{Layout, Shape};

    #[test]
    fn test_stream_k() {
        // Small M/N with a long K on 24 cores.
        let dims = MatmulDims::new(256, 16384, 256);
        assert!(stream_k_eligible(&dims, DType::F16, false, 24));
        // fp32 without HF32 tiles at 32, so 8x8 tiles is more than half the cores.
        assert!(!stream_k_eligible(&dims, DType::F32, false, 24));
        assert!(stream_k_eligible(&dims, DType::F32, true, 24));
        // Short K never streams.
        assert!(!stream_k_eligible(&MatmulDims::new(256, 1024, 256), DType::F16, false, 24));
        assert!(!stream_k_eligible(&MatmulDims::new(32, 2_000_001, 32), DType::F32, false, 24));
    }

    #[test]
    fn test_dp_split_k() {
        // 6x6 = 36 tiles on 24 cores: remainder 12 <= 12.
        let dims = MatmulDims::new(1536, 8192, 1536);
        assert!(dp_split_k_eligible(&dims, DType::F16, false, 24));
        assert!(!dp_split_k_eligible(&dims, DType::F32, false, 24));
        // 48 tiles divide evenly.
        assert!(!dp_split_k_eligible(&MatmulDims::new(2048, 8192, 1536), DType::F16, false, 24));
        assert!(!dp_split_k_eligible(&MatmulDims::new(1500, 8192, 1536), DType::F16, false, 24));
    }

    #[test]
    fn test_gemm_v3_shape() {
        assert!(gemm_v3_shape_supported(&MatmulDims::new(1024, 1024, 1024), DType::F16, false, 24));
        assert!(!gemm_v3_shape_supported(&MatmulDims::new(256, 1024, 1024), DType::F16, false, 24));
        assert!(!gemm_v3_shape_supported(&MatmulDims::new(1024, 256, 1024), DType::F16, false, 24));
        assert!(!gemm_v3_shape_supported(&MatmulDims::new(1536, 8192, 1536), DType::F16, false, 24));
    }

    fn desc(shape: Shape, dtype: DType) -> TensorDesc {
        TensorDesc::contiguous(shape, dtype, Layout::RowMajor)
    }

    #[test]
    fn test_gemm_v3_rules_diverge() {
        let platform = PlatformInfo::new(SocVersion::Ascend910B);
        let dims = MatmulDims::new(1024, 1024, 1024);
        let mat1 = desc(Shape::matrix(1024, 1024), DType::F16);
        let mat2 = desc(Shape::matrix(1024, 1024), DType::F16);
        let bias = desc(Shape::matrix(1024, 1024), DType::F32);
        let out = desc(Shape::matrix(1024, 1024), DType::F32);

        let plain = GemmV3Eligibility::for_addmm_validated(&mat1, &mat2, &dims, CubeMathType::KeepDtype, &platform);
        assert!(plain.holds());

        let tiled_out = out.with_storage_layout(Layout::Tiled);
        let with_bias = GemmV3Eligibility::for_addmm_with_bias(
            &mat1,
            &mat2,
            &bias,
            &tiled_out,
            &dims,
            CubeMathType::KeepDtype,
            &platform,
        );
        assert!(!with_bias.holds());
        assert_eq!(with_bias.first_failure(), Some("out_row_major"));
    }

    #[test]
    fn test_gemm_v3_requires_half_pair_on_mid_generation() {
        let dims = MatmulDims::new(1024, 1024, 1024);
        let mat1 = desc(Shape::matrix(1024, 1024), DType::F32);
        let mat2 = desc(Shape::matrix(1024, 1024), DType::F32);
        let e = GemmV3Eligibility::for_addmm_validated(
            &mat1,
            &mat2,
            &dims,
            CubeMathType::KeepDtype,
            &PlatformInfo::new(SocVersion::Ascend910B),
        );
        assert_eq!(e.first_failure(), Some("mid_generation_half_pair"));
        let e = GemmV3Eligibility::for_addmm_validated(
            &mat1,
            &mat2,
            &dims,
            CubeMathType::KeepDtype,
            &PlatformInfo::new(SocVersion::Ascend950),
        );
        assert!(e.holds());
        let e = GemmV3Eligibility::for_addmm_validated(
            &mat1,
            &mat2,
            &dims,
            CubeMathType::KeepDtype,
            &PlatformInfo::new(SocVersion::Ascend310P),
        );
        assert_eq!(e.first_failure(), Some("soc_supports_gemm_v3"));
    }
}
