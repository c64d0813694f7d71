// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-type promotion.
//!
//! Two entry points exist because the operators resolve types differently:
//!
//! - [`resolve_promotion`] is the plain five-rule ladder used by the flat
//!   matmul operator.
//! - [`PromotionRule`] implementations are the per-generation tables used by
//!   the bias-fused and batched operators. [`promotion_rule`] picks one from
//!   the capability table.
//!
//! # Table layout
//!
//! ```text
//!                KEEP   ALLOW_DOWN  USE_FP16  HF32   FORCE_GRP  HIGH_PREC
//!   F32 + F32    f32    f32         f16       f32    f32        f32
//!   F32 + F16    f32    f32         f16       f32    f32        f32
//!   F16 + F16    f16    f16         f16       f16*   f16        f16
//!   F32 + BF16   f32    f32         f16*      f32    f32        f32
//!   F16 + BF16   f32*   f32*        f16*      f32*   f32        f32
//!   BF16 + BF16  bf16   bf16        bf16*     bf16*  bf16       bf16
//! ```
//!
//! Cells marked `*` carry a [`RuleWarning`].

use std::fmt;

use tensor_core::DType;
use tracing::{debug, warn};

use crate::{CubeMathType, PlanError, PlatformInfo, PromotionRuleKind, SocVersion};

/// Non-fatal notes produced by the promotion tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum RuleWarning {
    Hf32IgnoredForHalf,
    KeepIgnoredForMixedHalf,
    Fp16IgnoredForBf16,
    MixedHalfWithFp16,
    MixedHalfWithHf32,
    MixedHalfWithDownPrecision,
    Bf16CastToFp16,
}

impl RuleWarning {
    pub fn message(self) -> &'static str {
        match self {
            RuleWarning::Hf32IgnoredForHalf => {
                "The cubeMathType USE_HF32 will be ignored when the input dtype is FP16 or BF16."
            }
            RuleWarning::KeepIgnoredForMixedHalf => {
                "The cubeMathType KEEP_DTYPE will be ignored when the inputs dtype are BF16 and FP16."
            }
            RuleWarning::Fp16IgnoredForBf16 => {
                "The cubeMathType USE_FP16 will be ignored when all inputs dtype are BF16."
            }
            RuleWarning::MixedHalfWithFp16 => "The inputs are BF16 and FP16 with cubeMathType USE_FP16.",
            RuleWarning::MixedHalfWithHf32 => "The inputs are BF16 and FP16 with cubeMathType USE_HF32.",
            RuleWarning::MixedHalfWithDownPrecision => {
                "The inputs are BF16 and FP16 with cubeMathType ALLOW_FP32_DOWN_PRECISION."
            }
            RuleWarning::Bf16CastToFp16 => {
                "The inputs are BF16 and FP32 with cubeMathType USE_FP16, BF16 will be cast to FP16 for computation."
            }
        }
    }
}

impl fmt::Display for RuleWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Result of type promotion.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Promotion {
    /// Type both operands are cast to before the matmul.
    pub compute: DType,
    /// Type the backend emits.
    pub output: DType,
    pub bias: Option<DType>,
    pub warnings: Vec<RuleWarning>,
}

impl Promotion {
    fn new(compute: DType, output: DType) -> Self {
        Self {
            compute,
            output,
            bias: None,
            warnings: Vec::new(),
        }
    }
}

/// The five-rule promotion ladder. `compute` is symmetric in the operands.
pub fn resolve_promotion(lhs: DType, rhs: DType, math: CubeMathType, platform: &PlatformInfo) -> Promotion {
    let caps = platform.capabilities();
    let involves_bf16 = lhs == DType::BF16 || rhs == DType::BF16;

    let promotion = if !caps.fp32_compute {
        Promotion::new(DType::F16, DType::F16)
    } else if math == CubeMathType::UseFp16 && !involves_bf16 {
        Promotion::new(DType::F16, DType::F16)
    } else if lhs != rhs {
        Promotion::new(DType::F32, DType::F32)
    } else if lhs.is_half()
        && (math == CubeMathType::UseHighPrecMode
            || (math == CubeMathType::Fp16Fp32KeepDtype && platform.soc.is_mid_generation()))
    {
        Promotion::new(lhs, DType::F32)
    } else {
        Promotion::new(lhs, lhs)
    };

    debug!(
        "promotion {lhs} x {rhs} ({math}) on {}: compute={} output={}",
        platform.soc, promotion.compute, promotion.output
    );
    promotion
}

/// A per-generation promotion table.
pub trait PromotionRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Element types this generation's matmul accepts.
    fn supported_dtypes(&self) -> &'static [DType];

    /// Rejects dtype/math combinations the generation cannot run.
    fn check_input(&self, lhs: DType, rhs: DType, math: CubeMathType) -> Result<(), PlanError>;

    /// The type both inputs are raised to, plus any table warnings.
    fn upper_input_dtype(
        &self,
        lhs: DType,
        rhs: DType,
        math: CubeMathType,
    ) -> Result<(DType, Vec<RuleWarning>), PlanError>;

    /// Output type given the upper input type and the caller's output type.
    fn output_dtype(&self, upper: DType, requested: DType, math: CubeMathType) -> DType;

    /// Bias type given the upper input type.
    fn bias_dtype(&self, upper: DType, bias: DType, math: CubeMathType) -> DType;

    /// Full promotion for one call.
    fn promote(
        &self,
        lhs: DType,
        rhs: DType,
        bias: Option<DType>,
        requested_out: DType,
        math: CubeMathType,
    ) -> Result<Promotion, PlanError> {
        self.check_input(lhs, rhs, math)?;
        let (upper, warnings) = self.upper_input_dtype(lhs, rhs, math)?;
        for w in &warnings {
            warn!("{w}");
        }
        Ok(Promotion {
            compute: upper,
            output: self.output_dtype(upper, requested_out, math),
            bias: bias.map(|b| self.bias_dtype(upper, b, math)),
            warnings,
        })
    }
}

/// Selects the rule object for a platform from the capability table.
pub fn promotion_rule(platform: &PlatformInfo) -> Box<dyn PromotionRule> {
    match platform.capabilities().promotion_rule {
        PromotionRuleKind::Rule910B => Box::new(Rule910B::new(platform.soc)),
        PromotionRuleKind::Rule310A => Box::new(Rule310A::new(platform.soc)),
    }
}

#[derive(Debug, Clone, Copy)]
enum Cell {
    To(DType),
    Warn(DType, RuleWarning),
    Reject,
}

/// Unordered input pair → table row.
fn input_case(lhs: DType, rhs: DType) -> Option<usize> {
    use DType::*;
    match (lhs, rhs) {
        (F32, F32) => Some(0),
        (F32, F16) | (F16, F32) => Some(1),
        (F16, F16) => Some(2),
        (F32, BF16) | (BF16, F32) => Some(3),
        (F16, BF16) | (BF16, F16) => Some(4),
        (BF16, BF16) => Some(5),
        _ => None,
    }
}

fn unsupported(lhs: DType, rhs: DType, soc: SocVersion, reason: &str) -> PlanError {
    PlanError::UnsupportedDTypeCombination {
        lhs,
        rhs,
        soc,
        reason: reason.to_string(),
    }
}

fn lookup(
    cell: Cell,
    lhs: DType,
    rhs: DType,
    math: CubeMathType,
    soc: SocVersion,
) -> Result<(DType, Vec<RuleWarning>), PlanError> {
    match cell {
        Cell::To(d) => Ok((d, Vec::new())),
        Cell::Warn(d, w) => Ok((d, vec![w])),
        Cell::Reject => Err(PlanError::UnsupportedMathType {
            math,
            dtype: if lhs == DType::F32 { lhs } else { rhs },
            soc,
        }),
    }
}

// ── 910B family ─────────────────────────────────────────────

const TO_F32: Cell = Cell::To(DType::F32);
const TO_F16: Cell = Cell::To(DType::F16);
const TO_BF16: Cell = Cell::To(DType::BF16);

static TABLE_910B: [[Cell; 6]; 6] = [
    [TO_F32, TO_F32, TO_F16, TO_F32, TO_F32, TO_F32],
    [TO_F32, TO_F32, TO_F16, TO_F32, TO_F32, TO_F32],
    [TO_F16, TO_F16, TO_F16, Cell::Warn(DType::F16, RuleWarning::Hf32IgnoredForHalf), TO_F16, TO_F16],
    [TO_F32, TO_F32, Cell::Warn(DType::F16, RuleWarning::Bf16CastToFp16), TO_F32, TO_F32, TO_F32],
    [
        Cell::Warn(DType::F32, RuleWarning::KeepIgnoredForMixedHalf),
        Cell::Warn(DType::F32, RuleWarning::MixedHalfWithDownPrecision),
        Cell::Warn(DType::F16, RuleWarning::MixedHalfWithFp16),
        Cell::Warn(DType::F32, RuleWarning::MixedHalfWithHf32),
        TO_F32,
        TO_F32,
    ],
    [
        TO_BF16,
        TO_BF16,
        Cell::Warn(DType::BF16, RuleWarning::Fp16IgnoredForBf16),
        Cell::Warn(DType::BF16, RuleWarning::Hf32IgnoredForHalf),
        TO_BF16,
        TO_BF16,
    ],
];

/// Rule for generations with fp32 and bf16 compute.
#[derive(Debug, Clone, Copy)]
pub struct Rule910B {
    soc: SocVersion,
}

impl Rule910B {
    pub fn new(soc: SocVersion) -> Self {
        Self { soc }
    }
}

impl PromotionRule for Rule910B {
    fn name(&self) -> &'static str {
        "rule-910b"
    }

    fn supported_dtypes(&self) -> &'static [DType] {
        &[DType::F32, DType::F16, DType::BF16]
    }

    fn check_input(&self, lhs: DType, rhs: DType, math: CubeMathType) -> Result<(), PlanError> {
        if input_case(lhs, rhs).is_none() {
            return Err(unsupported(lhs, rhs, self.soc, "dtype not supported by the cube unit"));
        }
        // The fp16-in/fp32-out keep mode only exists on the mid-generation parts.
        if math == CubeMathType::Fp16Fp32KeepDtype && !self.soc.is_mid_generation() {
            return Err(PlanError::UnsupportedMathType {
                math,
                dtype: lhs,
                soc: self.soc,
            });
        }
        Ok(())
    }

    fn upper_input_dtype(
        &self,
        lhs: DType,
        rhs: DType,
        math: CubeMathType,
    ) -> Result<(DType, Vec<RuleWarning>), PlanError> {
        let row = input_case(lhs, rhs).ok_or_else(|| unsupported(lhs, rhs, self.soc, "no table row"))?;
        lookup(TABLE_910B[row][math.table_column()], lhs, rhs, math, self.soc)
    }

    fn output_dtype(&self, upper: DType, requested: DType, math: CubeMathType) -> DType {
        if math == CubeMathType::Fp16Fp32KeepDtype {
            return DType::F32;
        }
        if self.soc.is_mid_generation() && math != CubeMathType::UseFp16 && requested == DType::F32 {
            DType::F32
        } else {
            upper
        }
    }

    fn bias_dtype(&self, upper: DType, bias: DType, math: CubeMathType) -> DType {
        if math == CubeMathType::Fp16Fp32KeepDtype || bias == DType::F32 || bias != upper {
            DType::F32
        } else if self.soc.is_mid_generation() && upper == DType::BF16 {
            DType::F32
        } else {
            upper
        }
    }
}

// ── 310A family ─────────────────────────────────────────────

static TABLE_310A: [[Cell; 4]; 3] = [
    [Cell::Reject, TO_F16, TO_F16, Cell::Reject],
    [Cell::Reject, TO_F16, TO_F16, Cell::Reject],
    [TO_F16, TO_F16, TO_F16, Cell::Warn(DType::F16, RuleWarning::Hf32IgnoredForHalf)],
];

/// Rule for generations without fp32 compute.
#[derive(Debug, Clone, Copy)]
pub struct Rule310A {
    soc: SocVersion,
}

impl Rule310A {
    pub fn new(soc: SocVersion) -> Self {
        Self { soc }
    }
}

impl PromotionRule for Rule310A {
    fn name(&self) -> &'static str {
        "rule-310a"
    }

    fn supported_dtypes(&self) -> &'static [DType] {
        &[DType::F32, DType::F16]
    }

    fn check_input(&self, lhs: DType, rhs: DType, math: CubeMathType) -> Result<(), PlanError> {
        match input_case(lhs, rhs) {
            Some(0..=2) => {}
            _ => return Err(unsupported(lhs, rhs, self.soc, "only f32 and f16 are supported")),
        }
        let has_fp32 = lhs == DType::F32 || rhs == DType::F32;
        let fp32_rejecting = matches!(
            math,
            CubeMathType::KeepDtype | CubeMathType::UseHf32 | CubeMathType::Fp16Fp32KeepDtype
        );
        if has_fp32 && fp32_rejecting {
            return Err(PlanError::UnsupportedMathType {
                math,
                dtype: DType::F32,
                soc: self.soc,
            });
        }
        Ok(())
    }

    fn upper_input_dtype(
        &self,
        lhs: DType,
        rhs: DType,
        math: CubeMathType,
    ) -> Result<(DType, Vec<RuleWarning>), PlanError> {
        let row = input_case(lhs, rhs)
            .filter(|&r| r <= 2)
            .ok_or_else(|| unsupported(lhs, rhs, self.soc, "no table row"))?;
        let column = math.table_column();
        let cell = match TABLE_310A[row].get(column) {
            Some(&cell) => cell,
            // Columns beyond HF32 only apply to fp16, which never widens here.
            None if row == 2 => TO_F16,
            None => Cell::Reject,
        };
        lookup(cell, lhs, rhs, math, self.soc)
    }

    fn output_dtype(&self, upper: DType, requested: DType, _math: CubeMathType) -> DType {
        if requested == DType::F32 {
            DType::F32
        } else {
            upper
        }
    }

    fn bias_dtype(&self, _upper: DType, bias: DType, _math: CubeMathType) -> DType {
        if bias == DType::F32 {
            DType::F32
        } else {
            DType::F16
        }
    }

    fn promote(
        &self,
        lhs: DType,
        rhs: DType,
        bias: Option<DType>,
        requested_out: DType,
        math: CubeMathType,
    ) -> Result<Promotion, PlanError> {
        self.check_input(lhs, rhs, math)?;
        let (upper, warnings) = self.upper_input_dtype(lhs, rhs, math)?;
        for w in &warnings {
            warn!("{w}");
        }
        let mut output = self.output_dtype(upper, requested_out, math);
        // Output and bias widen together.
        let bias = bias.map(|b| {
            if b == DType::F32 || output == DType::F32 {
                output = DType::F32;
                DType::F32
            } else {
                self.bias_dtype(upper, b, math)
            }
        });
        Ok(Promotion {
            compute: upper,
            output,
            bias,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn platform(soc: SocVersion) -> PlatformInfo {
        PlatformInfo::new(soc)
    }

    #[test]
    fn test_rule1_oldest_forces_fp16() {
        let p = resolve_promotion(DType::F32, DType::F32, CubeMathType::KeepDtype, &platform(SocVersion::Ascend310));
        assert_eq!((p.compute, p.output), (DType::F16, DType::F16));
    }

    #[test]
    fn test_rule2_use_fp16() {
        let p910b = platform(SocVersion::Ascend910B);
        let p = resolve_promotion(DType::F32, DType::F32, CubeMathType::UseFp16, &p910b);
        assert_eq!((p.compute, p.output), (DType::F16, DType::F16));
        // bf16 ignores the request.
        let p = resolve_promotion(DType::BF16, DType::BF16, CubeMathType::UseFp16, &p910b);
        assert_eq!((p.compute, p.output), (DType::BF16, DType::BF16));
    }

    #[test]
    fn test_rule3_mixed_widens_both_orders() {
        let p910b = platform(SocVersion::Ascend910B);
        for (a, b) in [(DType::F32, DType::F16), (DType::F16, DType::F32), (DType::F16, DType::BF16)] {
            let p = resolve_promotion(a, b, CubeMathType::KeepDtype, &p910b);
            assert_eq!(p.compute, DType::F32);
            assert_eq!(p.output, DType::F32);
        }
    }

    #[test]
    fn test_rule4_high_precision() {
        let p910b = platform(SocVersion::Ascend910B);
        let p = resolve_promotion(DType::F16, DType::F16, CubeMathType::UseHighPrecMode, &p910b);
        assert_eq!((p.compute, p.output), (DType::F16, DType::F32));
        let p = resolve_promotion(DType::BF16, DType::BF16, CubeMathType::Fp16Fp32KeepDtype, &p910b);
        assert_eq!((p.compute, p.output), (DType::BF16, DType::F32));
    }

    #[test]
    fn test_rule5_keeps_type() {
        let p = resolve_promotion(DType::F16, DType::F16, CubeMathType::KeepDtype, &platform(SocVersion::Ascend950));
        assert_eq!((p.compute, p.output), (DType::F16, DType::F16));
    }

    #[test]
    fn test_910b_table_cells() {
        let rule = Rule910B::new(SocVersion::Ascend910B);
        let (t, w) = rule.upper_input_dtype(DType::F16, DType::F16, CubeMathType::UseHf32).unwrap();
        assert_eq!(t, DType::F16);
        assert_eq!(w, vec![RuleWarning::Hf32IgnoredForHalf]);

        let (t, w) = rule.upper_input_dtype(DType::BF16, DType::F32, CubeMathType::UseFp16).unwrap();
        assert_eq!(t, DType::F16);
        assert_eq!(w, vec![RuleWarning::Bf16CastToFp16]);

        let (t, w) = rule.upper_input_dtype(DType::F16, DType::BF16, CubeMathType::KeepDtype).unwrap();
        assert_eq!(t, DType::F32);
        assert_eq!(w, vec![RuleWarning::KeepIgnoredForMixedHalf]);

        let (t, w) = rule.upper_input_dtype(DType::F32, DType::F32, CubeMathType::UseHighPrecMode).unwrap();
        assert_eq!(t, DType::F32);
        assert!(w.is_empty());
    }

    #[test]
    fn test_910b_output_and_bias() {
        let rule = Rule910B::new(SocVersion::Ascend910B);
        let p = rule
            .promote(DType::F16, DType::F16, Some(DType::F16), DType::F32, CubeMathType::KeepDtype)
            .unwrap();
        assert_eq!(p.compute, DType::F16);
        assert_eq!(p.output, DType::F32);
        assert_eq!(p.bias, Some(DType::F16));

        let p = rule
            .promote(DType::BF16, DType::BF16, Some(DType::BF16), DType::BF16, CubeMathType::KeepDtype)
            .unwrap();
        assert_eq!(p.output, DType::BF16);
        assert_eq!(p.bias, Some(DType::F32));

        // USE_FP16 never widens the output.
        let p = rule
            .promote(DType::F32, DType::F32, None, DType::F32, CubeMathType::UseFp16)
            .unwrap();
        assert_eq!((p.compute, p.output), (DType::F16, DType::F16));
    }

    #[test]
    fn test_fp16fp32_keep_accepted_on_mid_generation_only() {
        let rule = Rule910B::new(SocVersion::Ascend910_93);
        let p = rule
            .promote(DType::F16, DType::F16, Some(DType::F16), DType::F16, CubeMathType::Fp16Fp32KeepDtype)
            .unwrap();
        assert_eq!(p.compute, DType::F16);
        assert_eq!(p.output, DType::F32);
        assert_eq!(p.bias, Some(DType::F32));

        let rule = Rule910B::new(SocVersion::Ascend950);
        assert!(matches!(
            rule.promote(DType::F16, DType::F16, None, DType::F16, CubeMathType::Fp16Fp32KeepDtype),
            Err(PlanError::UnsupportedMathType { .. })
        ));
    }

    #[test]
    fn test_310a_rejects_fp32_keep() {
        let rule = Rule310A::new(SocVersion::Ascend310P);
        assert!(rule.check_input(DType::F32, DType::F16, CubeMathType::KeepDtype).is_err());
        assert!(rule.check_input(DType::F32, DType::F32, CubeMathType::UseHf32).is_err());
        assert!(rule.check_input(DType::BF16, DType::BF16, CubeMathType::AllowFp32DownPrecision).is_err());
        let p = rule
            .promote(DType::F32, DType::F16, None, DType::F16, CubeMathType::AllowFp32DownPrecision)
            .unwrap();
        assert_eq!((p.compute, p.output), (DType::F16, DType::F16));
    }

    #[test]
    fn test_310a_bias_widens_output() {
        let rule = Rule310A::new(SocVersion::Ascend310P);
        let p = rule
            .promote(DType::F16, DType::F16, Some(DType::F32), DType::F16, CubeMathType::KeepDtype)
            .unwrap();
        assert_eq!(p.output, DType::F32);
        assert_eq!(p.bias, Some(DType::F32));
        let p = rule
            .promote(DType::F16, DType::F16, Some(DType::F16), DType::F16, CubeMathType::UseHf32)
            .unwrap();
        assert_eq!(p.output, DType::F16);
        assert_eq!(p.bias, Some(DType::F16));
        assert_eq!(p.warnings, vec![RuleWarning::Hf32IgnoredForHalf]);
    }

    #[test]
    fn test_rule_selection() {
        assert_eq!(promotion_rule(&platform(SocVersion::Ascend950)).name(), "rule-910b");
        assert_eq!(promotion_rule(&platform(SocVersion::Ascend910)).name(), "rule-310a");
    }

    fn dtype() -> impl Strategy<Value = DType> {
        prop_oneof![Just(DType::F32), Just(DType::F16), Just(DType::BF16)]
    }

    fn math() -> impl Strategy<Value = CubeMathType> {
        prop::sample::select(CubeMathType::ALL.to_vec())
    }

    fn soc() -> impl Strategy<Value = SocVersion> {
        prop::sample::select(SocVersion::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_compute_type_is_order_independent(a in dtype(), b in dtype(), m in math(), s in soc()) {
            let p = platform(s);
            prop_assert_eq!(resolve_promotion(a, b, m, &p).compute, resolve_promotion(b, a, m, &p).compute);

            let rule = promotion_rule(&p);
            let ab = rule.upper_input_dtype(a, b, m).map(|(t, _)| t).ok();
            let ba = rule.upper_input_dtype(b, a, m).map(|(t, _)| t).ok();
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn prop_promotion_is_pure(a in dtype(), b in dtype(), m in math(), s in soc()) {
            let p = platform(s);
            prop_assert_eq!(resolve_promotion(a, b, m, &p), resolve_promotion(a, b, m, &p));
        }
    }
}
