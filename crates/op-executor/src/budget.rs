// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Workspace budget configuration and parsing.
//!
//! A [`WorkspaceBudget`] caps the scratch memory a single executor may hand
//! out. It supports human-readable strings so it can live in a TOML config.

use crate::ExecutorError;
use std::fmt;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// A hard ceiling on executor-owned scratch memory.
///
/// # Parsing
/// - `"512M"` or `"512MB"` → 512 × 1024² bytes
/// - `"1G"` or `"1GB"` → 1 × 1024³ bytes
/// - `"64K"` or `"64KB"` → 64 × 1024 bytes
/// - `"1048576"` → raw byte count
///
/// # Examples
/// ```
/// use op_executor::WorkspaceBudget;
///
/// let b = WorkspaceBudget::parse("1G").unwrap();
/// assert_eq!(b.as_mb(), 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkspaceBudget {
    bytes: usize,
}

impl WorkspaceBudget {
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MB }
    }

    pub fn from_gb(gb: usize) -> Self {
        Self { bytes: gb * GB }
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Budget in megabytes, truncated.
    pub fn as_mb(&self) -> usize {
        self.bytes / MB
    }

    /// Parses a budget string such as `"512M"`. Case-insensitive; zero is
    /// rejected.
    pub fn parse(s: &str) -> Result<Self, ExecutorError> {
        let trimmed = s.trim();
        let upper = trimmed.to_uppercase();
        let invalid = || ExecutorError::InvalidBudget(s.to_string());

        let (digits, multiplier) = [("GB", GB), ("G", GB), ("MB", MB), ("M", MB), ("KB", KB), ("K", KB), ("B", 1)]
            .iter()
            .find_map(|&(suffix, mult)| upper.strip_suffix(suffix).map(|d| (d, mult)))
            .unwrap_or((upper.as_str(), 1));

        let value: usize = digits.trim().parse().map_err(|_| invalid())?;
        let bytes = value.checked_mul(multiplier).ok_or_else(invalid)?;
        if bytes == 0 {
            return Err(invalid());
        }
        Ok(Self { bytes })
    }
}

impl Default for WorkspaceBudget {
    fn default() -> Self {
        Self::from_gb(1)
    }
}

impl fmt::Display for WorkspaceBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes >= GB && self.bytes % GB == 0 {
            write!(f, "{} GB", self.bytes / GB)
        } else if self.bytes >= MB && self.bytes % MB == 0 {
            write!(f, "{} MB", self.bytes / MB)
        } else if self.bytes >= KB && self.bytes % KB == 0 {
            write!(f, "{} KB", self.bytes / KB)
        } else {
            write!(f, "{} B", self.bytes)
        }
    }
}
