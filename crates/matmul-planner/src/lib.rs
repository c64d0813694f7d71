// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # matmul-planner
//!
//! Turns one matmul call (operand descriptors, transpose flags, a cube
//! math type) into a [`MatmulPlan`] and a [`BackendVariant`] for a given
//! hardware generation.
//!
//! # Operators
//!
//! | Operator | Promotion | Layout | Split-K |
//! |---|---|---|---|
//! | [`Mm`] | five-rule ladder | resolved | yes |
//! | [`Addmm`] | per-generation table, typed bias | resolved | yes |
//! | [`Bmm`] | per-generation table | row-major on mid-generation parts | no |
//! | [`Baddbmm`] | per-generation table, typed bias | as [`Bmm`] | no |
//!
//! # Trait-Based Extensibility
//!
//! Operators implement [`MatmulOperator`]; the V3 shape heuristic is an
//! injected [`V3ShapeOracle`]. Neither holds mutable state, so plans for
//! independent calls can be built concurrently.
//!
//! # Example
//! ```
//! use matmul_planner::{plan_call, Mm, MatmulRequest, PlatformInfo, SocVersion, ThresholdOracle};
//! use tensor_core::{DType, Layout, Shape, TensorDesc};
//!
//! let lhs = TensorDesc::contiguous(Shape::matrix(4, 16), DType::F16, Layout::RowMajor);
//! let rhs = TensorDesc::contiguous(Shape::matrix(16, 8), DType::F16, Layout::RowMajor);
//! let platform = PlatformInfo::new(SocVersion::Ascend910B);
//! let (plan, backend) =
//!     plan_call(&Mm, &MatmulRequest::new(&lhs, &rhs), &platform, &ThresholdOracle::default()).unwrap();
//! println!("{} -> {backend}", plan.summary());
//! ```

pub mod backend;
pub mod batch_to_mul;
pub mod contiguity;
pub mod dims;
mod error;
pub mod gemm;
pub mod layout;
pub mod math_mode;
pub mod operator;
pub mod oracle;
pub(crate) mod plan;
pub mod platform;
pub mod predicate;
pub mod promotion;
pub mod rewrite;
pub mod selector;

pub use backend::BackendVariant;
pub use batch_to_mul::{batch_to_mul_allowed, BatchToMulQuery, BATCH_TO_MUL_TABLE};
pub use contiguity::{
    detect_slice, detect_transpose_last_two, detect_transpose_noncontiguous, slice_shape_supported,
    transpose_shape_supported, transposed_storage_view, SliceView, TransposeKind, TransposeShapeQuery,
};
pub use dims::{
    batch_broadcast_compatible, batch_count, batch_dims, batch_equal, compute_mkn, infer_output_shape, BatchDims,
    MatmulDims, Side, MAX_BATCH_DIMS, MAX_RANK,
};
pub use error::PlanError;
pub use gemm::{dp_split_k_eligible, gemm_v3_shape_supported, stream_k_eligible, GemmV3Eligibility};
pub use layout::{
    is_format_support_nd, is_nd_to_nz_on_the_fly, is_split_k, resolve_layout, single_core_split_k,
    split_k_forbidden, LayoutChoice, LayoutQuery, SplitKQuery,
};
pub use math_mode::{CubeMathType, ImplMode, PrecisionMode};
pub use operator::addmm::Addmm;
pub use operator::bmm::{accumulate_out_dtype, Baddbmm, Bmm};
pub use operator::mm::Mm;
pub use operator::{MatmulOperator, MatmulRequest};
pub use oracle::{AlwaysV3, NeverV3, OracleQuery, ThresholdOracle, V3ShapeOracle};
pub use plan::{BiasPlan, MatmulPlan, OperandPlan, OutputPlan};
pub use platform::{Capabilities, OnChipBuffers, PlatformInfo, PromotionRuleKind, SocVersion, CAPABILITIES};
pub use predicate::{Check, Combine, Eligibility, Outcome};
pub use promotion::{promotion_rule, resolve_promotion, Promotion, PromotionRule, Rule310A, Rule910B, RuleWarning};
pub use rewrite::{
    empty_result, fold_k_equal_1, k_equal_1_eligible, promote_m_equal_1, promote_n_equal_1, AxisPromotion,
    EmptyCheck, KEqual1Context, KEqual1Rewrite,
};
pub use selector::{bmm_v3_scenario, mm_v3_scenario, select_bmm_backend, select_mm_backend};

/// Builds the plan for one call and selects its backend.
pub fn plan_call(
    operator: &dyn MatmulOperator,
    request: &MatmulRequest<'_>,
    platform: &PlatformInfo,
    oracle: &dyn V3ShapeOracle,
) -> Result<(MatmulPlan, BackendVariant), PlanError> {
    let plan = operator.build_plan(request, platform)?;
    let backend = operator.select_backend(&plan, oracle, platform);
    tracing::info!(
        "{} on {} via oracle '{}' → {backend}",
        operator.name(),
        platform.soc,
        oracle.name(),
    );
    Ok((plan, backend))
}
