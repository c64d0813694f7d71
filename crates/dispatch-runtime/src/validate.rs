// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Caller-facing parameter checks, run before any executor work.

use std::ops::RangeInclusive;

use matmul_planner::{infer_output_shape, promotion_rule, CubeMathType, PlanError, PlatformInfo};
use tensor_core::{DType, Shape, TensorView};

use crate::{AddmmArgs, DispatchError, MatmulArgs};

fn require_rank(
    operand: &'static str,
    view: &TensorView,
    accepted: RangeInclusive<usize>,
    expected: &'static str,
) -> Result<(), DispatchError> {
    let rank = view.shape().rank();
    if accepted.contains(&rank) {
        Ok(())
    } else {
        Err(PlanError::InvalidRank {
            operand,
            rank,
            expected,
        }
        .into())
    }
}

fn require_output_shape(out: &TensorView, expected: &Shape) -> Result<(), DispatchError> {
    if out.shape() == expected {
        Ok(())
    } else {
        Err(DispatchError::parameter(format!(
            "output shape {} does not match the result shape {expected}",
            out.shape()
        )))
    }
}

fn require_broadcastable(operand: &str, shape: &Shape, out: &Shape) -> Result<(), DispatchError> {
    if shape.broadcast_with(out).as_ref() == Some(out) {
        Ok(())
    } else {
        Err(DispatchError::parameter(format!(
            "{operand} {shape} cannot be broadcast to the output {out}"
        )))
    }
}

/// Element types and the cube math type against the generation.
fn check_dtypes(
    lhs: DType,
    rhs: DType,
    out: DType,
    math: CubeMathType,
    platform: &PlatformInfo,
) -> Result<(), DispatchError> {
    let uses_bf16 = [lhs, rhs, out].contains(&DType::BF16);
    if uses_bf16 && !platform.capabilities().bf16 {
        return Err(DispatchError::parameter(format!("bf16 is not supported on {}", platform.soc)));
    }
    let rule = promotion_rule(platform);
    if !rule.supported_dtypes().contains(&out) {
        return Err(DispatchError::parameter(format!(
            "output dtype {out} is not supported on {}",
            platform.soc
        )));
    }
    if math == CubeMathType::KeepDtype && (lhs == DType::F32 || rhs == DType::F32) && out == DType::F16 {
        return Err(DispatchError::parameter(
            "keep_dtype cannot narrow fp32 inputs to an fp16 output",
        ));
    }
    rule.check_input(lhs, rhs, math)?;
    Ok(())
}

/// Validates a flat `mm` call (optionally with a row bias).
pub fn validate_mm(args: &MatmulArgs<'_>, out: &TensorView, platform: &PlatformInfo) -> Result<(), DispatchError> {
    require_rank("lhs", args.lhs, 2..=2, "2")?;
    require_rank("rhs", args.rhs, 2..=2, "2")?;
    validate_common(args, out, platform)
}

/// Validates a `bmm` call.
pub fn validate_bmm(args: &MatmulArgs<'_>, out: &TensorView, platform: &PlatformInfo) -> Result<(), DispatchError> {
    require_rank("lhs", args.lhs, 3..=3, "3")?;
    require_rank("rhs", args.rhs, 3..=3, "3")?;
    validate_common(args, out, platform)
}

/// Validates a generic `matmul` call. Rank-1 operands are checked as the
/// matrices they are promoted to, and their unit axis is dropped from the
/// expected output.
pub fn validate_matmul(
    args: &MatmulArgs<'_>,
    out: &TensorView,
    platform: &PlatformInfo,
) -> Result<(), DispatchError> {
    require_rank("lhs", args.lhs, 1..=6, "1..=6")?;
    require_rank("rhs", args.rhs, 1..=6, "1..=6")?;
    let lhs_vector = args.lhs.shape().rank() == 1;
    let rhs_vector = args.rhs.shape().rank() == 1;
    if (lhs_vector && args.transpose_lhs) || (rhs_vector && args.transpose_rhs) {
        return Err(DispatchError::parameter("a rank-1 operand cannot be transposed"));
    }

    let lhs = promoted_shape(args.lhs.shape(), true);
    let rhs = promoted_shape(args.rhs.shape(), false);
    let full = infer_output_shape(&lhs, &rhs, args.transpose_lhs, args.transpose_rhs)?;
    let mut dims = full.dims().to_vec();
    if rhs_vector {
        dims.pop();
    }
    if lhs_vector {
        let at = dims.len() - 1 - usize::from(!rhs_vector);
        dims.remove(at);
    }
    require_output_shape(out, &Shape::new(dims))?;
    if let Some(bias) = args.bias {
        require_broadcastable("bias", bias.shape(), out.shape())?;
    }
    check_dtypes(args.lhs.dtype(), args.rhs.dtype(), out.dtype(), args.math, platform)
}

/// The flat flow folds a 3-D lhs into `[B * M, K]` rows, which only holds
/// for an untransposed lhs.
pub(crate) fn validate_flat_lhs(args: &MatmulArgs<'_>) -> Result<(), DispatchError> {
    if args.lhs.shape().rank() == 3 && args.transpose_lhs {
        return Err(DispatchError::parameter(format!(
            "flat matmul cannot fold a transposed 3-D lhs {}",
            args.lhs.shape()
        )));
    }
    Ok(())
}

/// `[K]` reads as `[1, K]` on the left and `[K, 1]` on the right.
pub(crate) fn promoted_shape(shape: &Shape, is_lhs: bool) -> Shape {
    match shape.dims() {
        [k] if is_lhs => Shape::matrix(1, *k),
        [k] => Shape::matrix(*k, 1),
        _ => shape.clone(),
    }
}

fn validate_common(args: &MatmulArgs<'_>, out: &TensorView, platform: &PlatformInfo) -> Result<(), DispatchError> {
    let expected = infer_output_shape(args.lhs.shape(), args.rhs.shape(), args.transpose_lhs, args.transpose_rhs)?;
    require_output_shape(out, &expected)?;
    if let Some(bias) = args.bias {
        require_rank("bias", bias, 1..=expected.rank(), "at most the output rank")?;
        require_broadcastable("bias", bias.shape(), &expected)?;
    }
    check_dtypes(args.lhs.dtype(), args.rhs.dtype(), out.dtype(), args.math, platform)
}

/// Validates `addmm` (`batched == false`, 2-D) or `baddbmm` (3-D).
pub fn validate_addmm(
    args: &AddmmArgs<'_>,
    out: &TensorView,
    batched: bool,
    platform: &PlatformInfo,
) -> Result<(), DispatchError> {
    let (rank, expected_rank) = if batched { (3..=3, "3") } else { (2..=2, "2") };
    require_rank("mat1", args.mat1, rank.clone(), expected_rank)?;
    require_rank("mat2", args.mat2, rank, expected_rank)?;
    let expected = infer_output_shape(args.mat1.shape(), args.mat2.shape(), false, false)?;
    require_output_shape(out, &expected)?;
    require_broadcastable("self", args.input.shape(), &expected)?;
    if !args.alpha.is_finite() || !args.beta.is_finite() {
        return Err(DispatchError::parameter(format!(
            "scalars must be finite, got beta={} alpha={}",
            args.beta, args.alpha
        )));
    }
    check_dtypes(args.mat1.dtype(), args.mat2.dtype(), out.dtype(), args.math, platform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use matmul_planner::SocVersion;
    use tensor_core::{Layout, StorageId, TensorDesc};

    fn view(dims: Vec<usize>, dtype: DType) -> TensorView {
        TensorView::new(
            StorageId(0),
            TensorDesc::contiguous(Shape::new(dims), dtype, Layout::RowMajor),
        )
    }

    #[test]
    fn test_mm_rank_and_shape() {
        let p = PlatformInfo::new(SocVersion::Ascend910B);
        let (a, b) = (view(vec![4, 16], DType::F16), view(vec![16, 8], DType::F16));
        let out = view(vec![4, 8], DType::F16);
        assert!(validate_mm(&MatmulArgs::new(&a, &b), &out, &p).is_ok());

        let wrong = view(vec![4, 9], DType::F16);
        assert_eq!(
            validate_mm(&MatmulArgs::new(&a, &b), &wrong, &p).unwrap_err().kind(),
            ErrorKind::Parameter
        );

        let c = view(vec![2, 4, 16], DType::F16);
        assert!(matches!(
            validate_mm(&MatmulArgs::new(&c, &b), &out, &p),
            Err(DispatchError::Plan(PlanError::InvalidRank { operand: "lhs", .. }))
        ));
    }

    #[test]
    fn test_contraction_mismatch() {
        let p = PlatformInfo::new(SocVersion::Ascend910B);
        let (a, b) = (view(vec![4, 16], DType::F32), view(vec![15, 8], DType::F32));
        let out = view(vec![4, 8], DType::F32);
        assert!(matches!(
            validate_mm(&MatmulArgs::new(&a, &b), &out, &p),
            Err(DispatchError::Plan(PlanError::ContractionMismatch { .. }))
        ));
    }

    #[test]
    fn test_bf16_needs_capability() {
        let (a, b) = (view(vec![4, 16], DType::BF16), view(vec![16, 8], DType::BF16));
        let out = view(vec![4, 8], DType::BF16);
        let args = MatmulArgs::new(&a, &b);
        assert!(validate_mm(&args, &out, &PlatformInfo::new(SocVersion::Ascend910B)).is_ok());
        let err = validate_mm(&args, &out, &PlatformInfo::new(SocVersion::Ascend310P)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
    }

    #[test]
    fn test_keep_rejects_fp32_to_fp16() {
        let p = PlatformInfo::new(SocVersion::Ascend910B);
        let (a, b) = (view(vec![4, 16], DType::F32), view(vec![16, 8], DType::F32));
        let out = view(vec![4, 8], DType::F16);
        let err = validate_mm(&MatmulArgs::new(&a, &b), &out, &p).unwrap_err();
        assert!(err.to_string().contains("keep_dtype"));
        let allowed = MatmulArgs::new(&a, &b).with_math(CubeMathType::AllowFp32DownPrecision);
        assert!(validate_mm(&allowed, &out, &p).is_ok());
    }

    #[test]
    fn test_matmul_vector_shapes() {
        let p = PlatformInfo::new(SocVersion::Ascend910B);
        let v = view(vec![16], DType::F32);
        let m = view(vec![16, 8], DType::F32);
        let b = view(vec![3, 4, 16], DType::F32);

        assert!(validate_matmul(&MatmulArgs::new(&v, &v), &view(vec![], DType::F32), &p).is_ok());
        assert!(validate_matmul(&MatmulArgs::new(&v, &m), &view(vec![8], DType::F32), &p).is_ok());
        assert!(validate_matmul(&MatmulArgs::new(&b, &v), &view(vec![3, 4], DType::F32), &p).is_ok());
        assert!(validate_matmul(&MatmulArgs::new(&b, &v), &view(vec![3, 4, 1], DType::F32), &p).is_err());
        let transposed = MatmulArgs::new(&v, &m).transposed(true, false);
        assert!(validate_matmul(&transposed, &view(vec![8], DType::F32), &p).is_err());
    }

    #[test]
    fn test_flat_lhs_rejects_transposed_3d() {
        let (a, b) = (view(vec![2, 16, 3], DType::F32), view(vec![16, 4], DType::F32));
        let transposed = MatmulArgs::new(&a, &b).transposed(true, false);
        assert_eq!(validate_flat_lhs(&transposed).unwrap_err().kind(), ErrorKind::Parameter);
        assert!(validate_flat_lhs(&MatmulArgs::new(&a, &b)).is_ok());

        let m = view(vec![16, 3], DType::F32);
        assert!(validate_flat_lhs(&MatmulArgs::new(&m, &b).transposed(true, false)).is_ok());
    }

    #[test]
    fn test_addmm_self_must_broadcast() {
        let p = PlatformInfo::new(SocVersion::Ascend910B);
        let (a, b) = (view(vec![4, 16], DType::F16), view(vec![16, 8], DType::F16));
        let out = view(vec![4, 8], DType::F16);
        let row = view(vec![8], DType::F16);
        let bad = view(vec![3], DType::F16);
        assert!(validate_addmm(&AddmmArgs::new(&row, &a, &b), &out, false, &p).is_ok());
        assert!(validate_addmm(&AddmmArgs::new(&bad, &a, &b), &out, false, &p).is_err());
        assert!(validate_addmm(&AddmmArgs::new(&row, &a, &b), &out, true, &p).is_err());
    }
}
