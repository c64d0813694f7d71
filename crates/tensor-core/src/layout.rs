// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory layout tags.

use std::fmt;
use std::str::FromStr;

use crate::TensorError;

/// Memory layout of a tensor's storage.
///
/// `RowMajor` is the caller-facing flat layout ("ND"). `Tiled` is the
/// accelerator-native blocked layout ("NZ"); its exact byte arrangement is
/// owned by the device and never interpreted on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum Layout {
    #[default]
    #[serde(rename = "nd", alias = "row_major")]
    RowMajor,
    #[serde(rename = "nz", alias = "tiled")]
    Tiled,
}

impl Layout {
    /// Short name used in logs and backend names.
    pub fn as_str(self) -> &'static str {
        match self {
            Layout::RowMajor => "ND",
            Layout::Tiled => "NZ",
        }
    }

    pub fn is_tiled(self) -> bool {
        self == Layout::Tiled
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layout {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nd" | "row_major" | "row-major" => Ok(Layout::RowMajor),
            "nz" | "tiled" => Ok(Layout::Tiled),
            other => Err(TensorError::Parse {
                what: "layout",
                input: other.to_string(),
            }),
        }
    }
}
