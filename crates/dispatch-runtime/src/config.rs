// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dispatch configuration loaded from TOML files or constructed programmatically.
//!
//! The configuration is read once and turned into an immutable
//! [`PlatformInfo`] plus an injected [`V3ShapeOracle`]; nothing in the
//! dispatcher consults global state.
//!
//! # TOML Format
//! ```toml
//! soc = "ascend910b"
//! cube_core_count = 24
//! workspace_budget = "512M"
//! math_type = "keep_dtype"
//! oracle = "threshold"
//! enable_profiling = true
//!
//! [threshold]
//! min_dim = 64
//! min_k = 64
//! min_batch = 1
//!
//! [buffers]
//! l1 = 524288
//! ```

use std::path::Path;

use matmul_planner::{
    AlwaysV3, CubeMathType, NeverV3, OnChipBuffers, PlatformInfo, SocVersion, ThresholdOracle, V3ShapeOracle,
};
use op_executor::WorkspaceBudget;

use crate::DispatchError;

/// Configuration for the dispatch engine.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DispatchConfig {
    /// Hardware generation, e.g. `"ascend910b"` or `"ascend950"`.
    pub soc: String,
    /// Overrides the generation's default cube core count.
    pub cube_core_count: Option<usize>,
    pub vector_core_count: Option<usize>,
    /// Executor workspace budget (human-readable, e.g. `"512M"`).
    pub workspace_budget: String,
    /// Default cube math type for calls that do not name one.
    pub math_type: String,
    /// V3 shape oracle: `"threshold"`, `"always-v3"` or `"never-v3"`.
    pub oracle: String,
    /// Whether to record per-stage metrics.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
    /// Parameters of the threshold oracle.
    #[serde(default)]
    pub threshold: ThresholdOracle,
    /// Overrides the default on-chip buffer sizes.
    pub buffers: Option<OnChipBuffers>,
}

fn default_true() -> bool {
    true
}

impl DispatchConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, DispatchError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::Config(format!("cannot read config '{}': {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, DispatchError> {
        toml::from_str(toml_str).map_err(|e| DispatchError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, DispatchError> {
        toml::to_string_pretty(self).map_err(|e| DispatchError::Config(format!("TOML serialise error: {e}")))
    }

    pub fn soc_version(&self) -> Result<SocVersion, DispatchError> {
        self.soc
            .parse()
            .map_err(|e| DispatchError::Config(format!("invalid soc: {e}")))
    }

    /// Builds the immutable platform description.
    pub fn platform(&self) -> Result<PlatformInfo, DispatchError> {
        let mut platform = PlatformInfo::new(self.soc_version()?);
        if let Some(cores) = self.cube_core_count {
            if cores == 0 {
                return Err(DispatchError::Config("cube_core_count must be positive".into()));
            }
            platform = platform.with_cube_cores(cores);
        }
        if let Some(cores) = self.vector_core_count {
            platform = platform.with_vector_cores(cores);
        }
        if let Some(buffers) = self.buffers {
            platform = platform.with_buffers(buffers);
        }
        Ok(platform)
    }

    /// Parses the workspace budget string into a [`WorkspaceBudget`].
    pub fn parse_budget(&self) -> Result<WorkspaceBudget, DispatchError> {
        WorkspaceBudget::parse(&self.workspace_budget)
            .map_err(|e| DispatchError::Config(format!("invalid budget: {e}")))
    }

    pub fn default_math(&self) -> Result<CubeMathType, DispatchError> {
        self.math_type
            .parse()
            .map_err(|e| DispatchError::Config(format!("invalid math type: {e}")))
    }

    /// Creates the V3 shape oracle specified by this config.
    pub fn create_oracle(&self) -> Result<Box<dyn V3ShapeOracle>, DispatchError> {
        match self.oracle.to_lowercase().as_str() {
            "threshold" => Ok(Box::new(self.threshold.clone())),
            "always-v3" | "always" => Ok(Box::new(AlwaysV3)),
            "never-v3" | "never" => Ok(Box::new(NeverV3)),
            other => Err(DispatchError::Config(format!(
                "unknown oracle '{other}'; expected 'threshold', 'always-v3', or 'never-v3'"
            ))),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            soc: SocVersion::Ascend910B.as_str().to_string(),
            cube_core_count: None,
            vector_core_count: None,
            workspace_budget: "512M".to_string(),
            math_type: CubeMathType::KeepDtype.as_str().to_string(),
            oracle: "threshold".to_string(),
            enable_profiling: true,
            threshold: ThresholdOracle::default(),
            buffers: None,
        }
    }
}
