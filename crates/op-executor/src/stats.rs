// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Executor statistics for profiling and diagnostics.

/// Cumulative counters kept by the host executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    /// Fresh storage buffers handed out.
    pub allocations: u64,
    /// Zero-copy views created over existing storage.
    pub views: u64,
    /// Kernels and backend entry points run, failed ones included.
    pub kernel_launches: u64,
    /// Launches that returned an error.
    pub failed_launches: u64,
    /// Allocation requests refused by the workspace budget.
    pub exhausted_count: u64,
    /// High-water mark of live bytes.
    pub peak_bytes: usize,
}

impl ExecutorStats {
    pub(crate) fn record_allocation(&mut self, live_bytes: usize) {
        self.allocations += 1;
        self.peak_bytes = self.peak_bytes.max(live_bytes);
    }

    pub(crate) fn record_view(&mut self) {
        self.views += 1;
    }

    pub(crate) fn record_launch(&mut self, ok: bool) {
        self.kernel_launches += 1;
        if !ok {
            self.failed_launches += 1;
        }
    }

    pub(crate) fn record_exhausted(&mut self) {
        self.exhausted_count += 1;
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_mb = self.peak_bytes as f64 / (1024.0 * 1024.0);
        format!(
            "Executor: {} allocations, {} views, {} launches ({} failed), {} exhausted, peak {:.2} MB",
            self.allocations, self.views, self.kernel_launches, self.failed_launches, self.exhausted_count, peak_mb,
        )
    }
}
