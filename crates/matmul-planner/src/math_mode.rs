// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Cube math types, implementation-mode bits and the precision knob.

use std::fmt;
use std::str::FromStr;

use tensor_core::DType;

use crate::{PlanError, SocVersion};

/// Caller-selected precision/throughput trade-off for the cube unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i8)]
pub enum CubeMathType {
    #[default]
    KeepDtype = 0,
    AllowFp32DownPrecision = 1,
    UseFp16 = 2,
    UseHf32 = 3,
    ForceGrpAccForFp32 = 4,
    UseHighPrecMode = 5,
    /// fp16/bf16 inputs with fp32 output and fp32 bias.
    Fp16Fp32KeepDtype = -1,
}

impl CubeMathType {
    pub const ALL: [CubeMathType; 7] = [
        CubeMathType::KeepDtype,
        CubeMathType::AllowFp32DownPrecision,
        CubeMathType::UseFp16,
        CubeMathType::UseHf32,
        CubeMathType::ForceGrpAccForFp32,
        CubeMathType::UseHighPrecMode,
        CubeMathType::Fp16Fp32KeepDtype,
    ];

    /// Raw integer code.
    pub fn code(self) -> i8 {
        self as i8
    }

    /// `true` for the two modes that allow fp32 to run as HF32.
    pub fn allows_hf32(self) -> bool {
        matches!(self, CubeMathType::AllowFp32DownPrecision | CubeMathType::UseHf32)
    }

    /// Column of the promotion tables. The fp16-in/fp32-out keep mode shares
    /// the `KeepDtype` column.
    pub(crate) fn table_column(self) -> usize {
        match self {
            CubeMathType::KeepDtype | CubeMathType::Fp16Fp32KeepDtype => 0,
            CubeMathType::AllowFp32DownPrecision => 1,
            CubeMathType::UseFp16 => 2,
            CubeMathType::UseHf32 => 3,
            CubeMathType::ForceGrpAccForFp32 => 4,
            CubeMathType::UseHighPrecMode => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CubeMathType::KeepDtype => "keep_dtype",
            CubeMathType::AllowFp32DownPrecision => "allow_fp32_down_precision",
            CubeMathType::UseFp16 => "use_fp16",
            CubeMathType::UseHf32 => "use_hf32",
            CubeMathType::ForceGrpAccForFp32 => "force_grp_acc_for_fp32",
            CubeMathType::UseHighPrecMode => "use_high_prec_mode",
            CubeMathType::Fp16Fp32KeepDtype => "fp16fp32_keep_dtype",
        }
    }
}

impl TryFrom<i8> for CubeMathType {
    type Error = PlanError;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        CubeMathType::ALL
            .into_iter()
            .find(|m| m.code() == code)
            .ok_or(PlanError::UnknownMathType(code))
    }
}

impl fmt::Display for CubeMathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CubeMathType {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        if let Ok(code) = wanted.parse::<i8>() {
            return CubeMathType::try_from(code);
        }
        CubeMathType::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or(PlanError::Tensor(tensor_core::TensorError::Parse {
                what: "cube math type",
                input: s.to_string(),
            }))
    }
}

/// Implementation-mode bit pattern handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct ImplMode(pub u32);

impl ImplMode {
    pub const DEFAULT: ImplMode = ImplMode(0x1);
    pub const FORCE_GRP_ACC: ImplMode = ImplMode(0x4);
    pub const HF32: ImplMode = ImplMode(0x40);

    /// Mode for the flat matmul family.
    pub fn for_matmul(math: CubeMathType, soc: SocVersion) -> Self {
        if math.allows_hf32() {
            ImplMode::HF32
        } else if math == CubeMathType::ForceGrpAccForFp32 && soc.is_mid_generation() {
            ImplMode::FORCE_GRP_ACC
        } else {
            ImplMode::DEFAULT
        }
    }

    /// Mode for the batched family; HF32 only applies to fp32 inputs.
    pub fn for_batched(math: CubeMathType, lhs: DType, rhs: DType) -> Self {
        if math.allows_hf32() && lhs == DType::F32 && rhs == DType::F32 {
            ImplMode::HF32
        } else {
            ImplMode::DEFAULT
        }
    }

    pub fn is_hf32(self) -> bool {
        self == ImplMode::HF32
    }
}

impl fmt::Display for ImplMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Tri-state precision knob carried on the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PrecisionMode {
    /// Compute in the operands' own type.
    Keep,
    /// fp32 may be computed at reduced precision.
    Downgrade,
    /// Accumulate and emit at full precision.
    HighPrecision,
}

impl From<CubeMathType> for PrecisionMode {
    fn from(math: CubeMathType) -> Self {
        match math {
            CubeMathType::AllowFp32DownPrecision | CubeMathType::UseHf32 | CubeMathType::UseFp16 => {
                PrecisionMode::Downgrade
            }
            CubeMathType::UseHighPrecMode
            | CubeMathType::Fp16Fp32KeepDtype
            | CubeMathType::ForceGrpAccForFp32 => PrecisionMode::HighPrecision,
            CubeMathType::KeepDtype => PrecisionMode::Keep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for m in CubeMathType::ALL {
            assert_eq!(CubeMathType::try_from(m.code()).unwrap(), m);
            assert_eq!(m.as_str().parse::<CubeMathType>().unwrap(), m);
        }
        assert_eq!(CubeMathType::Fp16Fp32KeepDtype.code(), -1);
        assert!(matches!(CubeMathType::try_from(9), Err(PlanError::UnknownMathType(9))));
        assert_eq!("3".parse::<CubeMathType>().unwrap(), CubeMathType::UseHf32);
        assert!("fastest".parse::<CubeMathType>().is_err());
    }

    #[test]
    fn test_impl_mode_for_matmul() {
        let soc = SocVersion::Ascend910B;
        assert_eq!(ImplMode::for_matmul(CubeMathType::UseHf32, soc), ImplMode::HF32);
        assert_eq!(ImplMode::for_matmul(CubeMathType::AllowFp32DownPrecision, soc), ImplMode::HF32);
        assert_eq!(ImplMode::for_matmul(CubeMathType::ForceGrpAccForFp32, soc), ImplMode::FORCE_GRP_ACC);
        assert_eq!(
            ImplMode::for_matmul(CubeMathType::ForceGrpAccForFp32, SocVersion::Ascend950),
            ImplMode::DEFAULT
        );
        assert_eq!(ImplMode::for_matmul(CubeMathType::KeepDtype, soc), ImplMode::DEFAULT);
    }

    #[test]
    fn test_impl_mode_for_batched_requires_fp32() {
        assert_eq!(ImplMode::for_batched(CubeMathType::UseHf32, DType::F32, DType::F32), ImplMode::HF32);
        assert_eq!(ImplMode::for_batched(CubeMathType::UseHf32, DType::F16, DType::F16), ImplMode::DEFAULT);
        assert_eq!(ImplMode::HF32.to_string(), "0x40");
    }

    #[test]
    fn test_precision_mode() {
        assert_eq!(PrecisionMode::from(CubeMathType::UseHf32), PrecisionMode::Downgrade);
        assert_eq!(PrecisionMode::from(CubeMathType::UseHighPrecMode), PrecisionMode::HighPrecision);
        assert_eq!(PrecisionMode::from(CubeMathType::KeepDtype), PrecisionMode::Keep);
    }
}
