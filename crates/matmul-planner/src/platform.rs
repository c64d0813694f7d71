// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Hardware generations and their capability table.
//!
//! Every generation-dependent decision in the planner reads one row of
//! [`CAPABILITIES`] through [`SocVersion::capabilities`]. The table is a
//! plain `static`; [`PlatformInfo`] is an immutable value built once per
//! configuration and passed explicitly into every planning call.

use std::fmt;
use std::str::FromStr;

use crate::PlanError;

/// Accelerator hardware generation, ordered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocVersion {
    Ascend310,
    Ascend310P,
    Ascend910,
    Ascend910B,
    #[serde(rename = "ascend910_93")]
    Ascend910_93,
    Ascend950,
}

/// Which promotion rule family a generation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PromotionRuleKind {
    /// Six-case table with bf16 and high-precision columns.
    Rule910B,
    /// Three-case table; no native fp32 compute.
    Rule310A,
}

/// Static per-generation capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Capabilities {
    pub fp32_compute: bool,
    pub bf16: bool,
    /// Row-major matmul without 16-alignment requirements.
    pub nd_native: bool,
    /// Row-major fp16/bf16 inputs are gated by the on-the-fly conversion check.
    pub nd_on_the_fly_check: bool,
    /// Batched K=1 may run as an elementwise multiply.
    pub k_equal1_mul: bool,
    /// Tiled inputs may produce a row-major output.
    pub nz_nz_nd_output: bool,
    pub default_cube_cores: usize,
    pub default_vector_cores: usize,
    pub promotion_rule: PromotionRuleKind,
}

/// One row per generation, in [`SocVersion`] order.
pub static CAPABILITIES: [(SocVersion, Capabilities); 6] = [
    (
        SocVersion::Ascend310,
        Capabilities {
            fp32_compute: false,
            bf16: false,
            nd_native: false,
            nd_on_the_fly_check: false,
            k_equal1_mul: false,
            nz_nz_nd_output: false,
            default_cube_cores: 2,
            default_vector_cores: 2,
            promotion_rule: PromotionRuleKind::Rule310A,
        },
    ),
    (
        SocVersion::Ascend310P,
        Capabilities {
            fp32_compute: false,
            bf16: false,
            nd_native: false,
            nd_on_the_fly_check: false,
            k_equal1_mul: false,
            nz_nz_nd_output: true,
            default_cube_cores: 8,
            default_vector_cores: 8,
            promotion_rule: PromotionRuleKind::Rule310A,
        },
    ),
    (
        SocVersion::Ascend910,
        Capabilities {
            fp32_compute: false,
            bf16: false,
            nd_native: false,
            nd_on_the_fly_check: false,
            k_equal1_mul: false,
            nz_nz_nd_output: false,
            default_cube_cores: 32,
            default_vector_cores: 32,
            promotion_rule: PromotionRuleKind::Rule310A,
        },
    ),
    (
        SocVersion::Ascend910B,
        Capabilities {
            fp32_compute: true,
            bf16: true,
            nd_native: true,
            nd_on_the_fly_check: true,
            k_equal1_mul: true,
            nz_nz_nd_output: false,
            default_cube_cores: 24,
            default_vector_cores: 48,
            promotion_rule: PromotionRuleKind::Rule910B,
        },
    ),
    (
        SocVersion::Ascend910_93,
        Capabilities {
            fp32_compute: true,
            bf16: true,
            nd_native: true,
            nd_on_the_fly_check: true,
            k_equal1_mul: true,
            nz_nz_nd_output: false,
            default_cube_cores: 24,
            default_vector_cores: 48,
            promotion_rule: PromotionRuleKind::Rule910B,
        },
    ),
    (
        SocVersion::Ascend950,
        Capabilities {
            fp32_compute: true,
            bf16: true,
            nd_native: true,
            nd_on_the_fly_check: false,
            k_equal1_mul: false,
            nz_nz_nd_output: false,
            default_cube_cores: 32,
            default_vector_cores: 64,
            promotion_rule: PromotionRuleKind::Rule910B,
        },
    ),
];

impl SocVersion {
    pub const ALL: [SocVersion; 6] = [
        SocVersion::Ascend310,
        SocVersion::Ascend310P,
        SocVersion::Ascend910,
        SocVersion::Ascend910B,
        SocVersion::Ascend910_93,
        SocVersion::Ascend950,
    ];

    /// Looks up this generation's row of the capability table.
    pub fn capabilities(self) -> &'static Capabilities {
        // The table is indexed in declaration order.
        &CAPABILITIES[self as usize].1
    }

    /// The newest supported generation.
    pub fn is_newest(self) -> bool {
        self == SocVersion::Ascend950
    }

    /// One of the two mid-generation families (910B and 910_93).
    pub fn is_mid_generation(self) -> bool {
        matches!(self, SocVersion::Ascend910B | SocVersion::Ascend910_93)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SocVersion::Ascend310 => "ascend310",
            SocVersion::Ascend310P => "ascend310p",
            SocVersion::Ascend910 => "ascend910",
            SocVersion::Ascend910B => "ascend910b",
            SocVersion::Ascend910_93 => "ascend910_93",
            SocVersion::Ascend950 => "ascend950",
        }
    }
}

impl fmt::Display for SocVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocVersion {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        SocVersion::ALL
            .into_iter()
            .find(|soc| soc.as_str() == wanted)
            .ok_or(PlanError::Tensor(tensor_core::TensorError::Parse {
                what: "soc version",
                input: s.to_string(),
            }))
    }
}

/// On-chip buffer capacities in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OnChipBuffers {
    pub l0a: usize,
    pub l0b: usize,
    pub l0c: usize,
    pub l1: usize,
    pub ub: usize,
}

impl Default for OnChipBuffers {
    fn default() -> Self {
        Self {
            l0a: 64 * 1024,
            l0b: 64 * 1024,
            l0c: 256 * 1024,
            l1: 512 * 1024,
            ub: 248 * 1024,
        }
    }
}

/// Immutable description of the target device, built once per configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PlatformInfo {
    pub soc: SocVersion,
    pub cube_core_count: usize,
    pub vector_core_count: usize,
    pub buffers: OnChipBuffers,
}

impl PlatformInfo {
    /// Platform with the table's default core counts and buffer sizes.
    pub fn new(soc: SocVersion) -> Self {
        let caps = soc.capabilities();
        Self {
            soc,
            cube_core_count: caps.default_cube_cores,
            vector_core_count: caps.default_vector_cores,
            buffers: OnChipBuffers::default(),
        }
    }

    pub fn with_cube_cores(mut self, cores: usize) -> Self {
        self.cube_core_count = cores.max(1);
        self
    }

    pub fn with_vector_cores(mut self, cores: usize) -> Self {
        self.vector_core_count = cores.max(1);
        self
    }

    pub fn with_buffers(mut self, buffers: OnChipBuffers) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn capabilities(&self) -> &'static Capabilities {
        self.soc.capabilities()
    }
}
