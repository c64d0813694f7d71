// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batched matmul and its accumulate variant.
//!
//! Unlike [`crate::Mm`], the batched family promotes through the
//! per-generation rule tables and never splits K.

use tensor_core::{DType, Layout};
use tracing::debug;

use crate::operator::mm::require_rank;
use crate::operator::{MatmulOperator, MatmulRequest};
use crate::plan::PlanBuilder;
use crate::{
    promotion_rule, resolve_layout, select_bmm_backend, BackendVariant, CubeMathType, ImplMode, LayoutChoice,
    LayoutQuery, MatmulPlan, PlanError, PlatformInfo, V3ShapeOracle, MAX_RANK,
};

fn plan_batched(
    operator: &'static str,
    request: &MatmulRequest<'_>,
    platform: &PlatformInfo,
) -> Result<MatmulPlan, PlanError> {
    let (lhs, rhs) = (request.lhs, request.rhs);
    require_rank("lhs", lhs.rank(), 2..=MAX_RANK, "2..=6")?;
    require_rank("rhs", rhs.rank(), 2..=MAX_RANK, "2..=6")?;
    let math = request.math;
    let soc = platform.soc;

    let promotion = promotion_rule(platform).promote(
        lhs.dtype(),
        rhs.dtype(),
        request.bias.map(|b| b.dtype()),
        request.requested_out(),
        math,
    )?;
    let compute = promotion.compute;

    let mut b = PlanBuilder::new(
        operator,
        soc,
        lhs,
        request.transpose_lhs,
        rhs,
        request.transpose_rhs,
        math,
    )?;
    if let Some(bias) = request.bias {
        b.bias(bias);
    }
    b.requested_out(request.requested_out())
        .promotion(promotion)
        .batched(true)
        .split_k(false)
        .impl_mode(ImplMode::for_batched(math, compute, compute));

    let layouts = if soc.is_mid_generation() {
        let rhs_layout = if rhs.storage_layout().is_tiled() {
            Layout::Tiled
        } else {
            Layout::RowMajor
        };
        LayoutChoice {
            lhs: Layout::RowMajor,
            rhs: rhs_layout,
            out: Layout::RowMajor,
        }
    } else {
        resolve_layout(
            &LayoutQuery {
                lhs,
                rhs,
                transpose_lhs: request.transpose_lhs,
                transpose_rhs: request.transpose_rhs,
                dims: b.dims(),
            },
            platform,
        )
    };
    debug!("{operator} layout: {layouts}");
    b.layout(layouts);

    b.fp16_bf16_in_fp32_out(compute.is_half() && soc.is_mid_generation() && math == CubeMathType::KeepDtype);
    b.build()
}

/// `out = lhs @ rhs` over broadcast batch dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bmm;

impl Bmm {
    pub fn new() -> Self {
        Self
    }
}

impl MatmulOperator for Bmm {
    fn name(&self) -> &'static str {
        "bmm"
    }

    fn build_plan(&self, request: &MatmulRequest<'_>, platform: &PlatformInfo) -> Result<MatmulPlan, PlanError> {
        plan_batched(self.name(), request, platform)
    }

    fn select_backend(&self, plan: &MatmulPlan, oracle: &dyn V3ShapeOracle, platform: &PlatformInfo) -> BackendVariant {
        select_bmm_backend(plan, oracle, platform, false)
    }
}

/// `out = beta * bias + alpha * (lhs @ rhs)` over batch dimensions.
///
/// The plan covers the matmul part; scaling and the bias add run as
/// separate kernels around it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Baddbmm;

impl Baddbmm {
    pub fn new() -> Self {
        Self
    }
}

impl MatmulOperator for Baddbmm {
    fn name(&self) -> &'static str {
        "baddbmm"
    }

    fn build_plan(&self, request: &MatmulRequest<'_>, platform: &PlatformInfo) -> Result<MatmulPlan, PlanError> {
        plan_batched(self.name(), request, platform)
    }

    fn select_backend(&self, plan: &MatmulPlan, oracle: &dyn V3ShapeOracle, platform: &PlatformInfo) -> BackendVariant {
        select_bmm_backend(plan, oracle, platform, true)
    }
}

/// Output type the accumulate path should request: fp32 when fp16/bf16
/// inputs accumulate on a mid-generation part, otherwise the caller's.
pub fn accumulate_out_dtype(lhs: DType, rhs: DType, requested: DType, platform: &PlatformInfo) -> DType {
    if lhs == rhs && lhs.is_half() && platform.soc.is_mid_generation() {
        DType::F32
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NeverV3, SocVersion};
    use tensor_core::{Shape, TensorDesc};

    fn desc(dims: Vec<usize>, dtype: DType) -> TensorDesc {
        TensorDesc::contiguous(Shape::new(dims), dtype, Layout::RowMajor)
    }

    #[test]
    fn test_bmm_plan_basics() {
        let (a, b) = (desc(vec![4, 32, 64], DType::F16), desc(vec![4, 64, 48], DType::F16));
        let p = Bmm
            .build_plan(&MatmulRequest::new(&a, &b), &PlatformInfo::new(SocVersion::Ascend910B))
            .unwrap();
        assert!(p.is_batched);
        assert!(!p.use_split_k);
        assert_eq!(p.layouts(), LayoutChoice::ALL_ROW_MAJOR);
        assert_eq!(p.out.shape.dims(), &[4, 32, 48]);
        assert!(p.fp16_bf16_in_fp32_out);
    }

    #[test]
    fn test_bmm_keeps_pre_tiled_rhs_on_mid_generation() {
        let a = desc(vec![4, 32, 64], DType::F16);
        let b = TensorDesc::contiguous(Shape::new(vec![4, 64, 48]), DType::F16, Layout::Tiled);
        let p = Bmm
            .build_plan(&MatmulRequest::new(&a, &b), &PlatformInfo::new(SocVersion::Ascend910_93))
            .unwrap();
        assert_eq!(p.lhs.layout, Layout::RowMajor);
        assert_eq!(p.rhs.layout, Layout::Tiled);
        assert_eq!(p.out.layout, Layout::RowMajor);
    }

    #[test]
    fn test_bmm_hf32_only_for_fp32() {
        let p = PlatformInfo::new(SocVersion::Ascend910B);
        let (a, b) = (desc(vec![2, 8, 8], DType::F32), desc(vec![2, 8, 8], DType::F32));
        let request = MatmulRequest {
            math: CubeMathType::UseHf32,
            ..MatmulRequest::new(&a, &b)
        };
        assert!(Bmm.build_plan(&request, &p).unwrap().impl_mode.is_hf32());

        let (a, b) = (desc(vec![2, 8, 8], DType::F16), desc(vec![2, 8, 8], DType::F16));
        let request = MatmulRequest {
            math: CubeMathType::UseHf32,
            ..MatmulRequest::new(&a, &b)
        };
        assert_eq!(Bmm.build_plan(&request, &p).unwrap().impl_mode, ImplMode::DEFAULT);
    }

    #[test]
    fn test_bmm_rejects_rule_violation() {
        let (a, b) = (desc(vec![2, 8, 8], DType::F32), desc(vec![2, 8, 8], DType::F32));
        let err = Bmm
            .build_plan(&MatmulRequest::new(&a, &b), &PlatformInfo::new(SocVersion::Ascend310P))
            .unwrap_err();
        assert!(matches!(err, PlanError::UnsupportedMathType { .. }));
    }

    #[test]
    fn test_baddbmm_with_bias() {
        let p = PlatformInfo::new(SocVersion::Ascend950);
        let (a, b) = (desc(vec![4, 32, 64], DType::BF16), desc(vec![4, 64, 48], DType::BF16));
        let bias = desc(vec![48], DType::F32);
        let request = MatmulRequest {
            bias: Some(&bias),
            out_dtype: Some(DType::F32),
            ..MatmulRequest::new(&a, &b)
        };
        let plan = Baddbmm.build_plan(&request, &p).unwrap();
        assert_eq!(plan.operator, "baddbmm");
        assert_eq!(plan.bias.as_ref().map(|b| b.dtype), Some(DType::F32));
        assert_eq!(
            Baddbmm.select_backend(&plan, &NeverV3, &p),
            BackendVariant::BatchMatMulV3NdFp16Bf162Fp32
        );
    }

    #[test]
    fn test_accumulate_out_dtype() {
        let p = PlatformInfo::new(SocVersion::Ascend910B);
        assert_eq!(accumulate_out_dtype(DType::F16, DType::F16, DType::F16, &p), DType::F32);
        assert_eq!(accumulate_out_dtype(DType::F32, DType::F32, DType::F32, &p), DType::F32);
        let old = PlatformInfo::new(SocVersion::Ascend910);
        assert_eq!(accumulate_out_dtype(DType::F16, DType::F16, DType::F16, &old), DType::F16);
    }
}
