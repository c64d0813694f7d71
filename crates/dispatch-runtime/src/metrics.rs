// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dispatch profiling metrics.
//!
//! [`DispatchMetrics`] aggregates stage timings and backend, graph and
//! rewrite counters over many calls. These are the numbers to compare when
//! tuning the V3 oracle thresholds for a generation.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::{DispatchError, DispatchOutcome, ErrorKind, Stage};

/// Time spent in one stage across all recorded calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StageMetrics {
    pub visits: usize,
    pub total_duration: Duration,
}

/// Aggregate metrics over a sequence of dispatched calls.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatchMetrics {
    /// Calls that completed.
    pub calls: usize,
    pub parameter_errors: usize,
    pub internal_errors: usize,
    /// Sum of stage durations of completed calls.
    pub total_duration: Duration,
    pub stages: BTreeMap<Stage, StageMetrics>,
    /// Completed calls per backend entry point name.
    pub backends: BTreeMap<String, usize>,
    pub graphs: BTreeMap<String, usize>,
    pub rewrites: BTreeMap<String, usize>,
    /// Largest executor workspace seen after a call.
    pub peak_workspace_bytes: usize,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed call.
    pub fn record(&mut self, outcome: &DispatchOutcome) {
        self.calls += 1;
        for record in outcome.trace.records() {
            let entry = self.stages.entry(record.stage).or_default();
            entry.visits += 1;
            entry.total_duration += record.duration;
        }
        self.total_duration += outcome.trace.total();
        if let Some(backend) = outcome.backend {
            *self.backends.entry(backend.name().to_string()).or_default() += 1;
        }
        if let Some(graph) = outcome.graph {
            *self.graphs.entry(graph.as_str().to_string()).or_default() += 1;
        }
        for rewrite in &outcome.rewrites {
            *self.rewrites.entry(format!("{rewrite:?}")).or_default() += 1;
        }
        self.peak_workspace_bytes = self.peak_workspace_bytes.max(outcome.workspace_size);
    }

    /// Records one failed call.
    pub fn record_failure(&mut self, error: &DispatchError) {
        match error.kind() {
            ErrorKind::Parameter => self.parameter_errors += 1,
            ErrorKind::Internal => self.internal_errors += 1,
        }
    }

    /// Mean duration of completed calls.
    pub fn mean_call_duration(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.calls as u32
    }

    /// Stage with the largest accumulated time.
    pub fn slowest_stage(&self) -> Option<Stage> {
        self.stages
            .iter()
            .max_by_key(|(_, m)| m.total_duration)
            .map(|(stage, _)| *stage)
    }

    /// Serialises the metrics as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, DispatchError> {
        serde_json::to_string_pretty(self).map_err(|e| DispatchError::Config(format!("JSON serialise error: {e}")))
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let backends: Vec<String> = self.backends.iter().map(|(b, n)| format!("{b}×{n}")).collect();
        let workspace_kb = self.peak_workspace_bytes as f64 / 1024.0;
        format!(
            "Dispatch: {} calls ({} parameter / {} internal errors), {:.3}ms mean, \
             slowest stage {}, backends [{}], peak workspace {:.1} KB",
            self.calls,
            self.parameter_errors,
            self.internal_errors,
            self.mean_call_duration().as_secs_f64() * 1000.0,
            self.slowest_stage().map_or("-", Stage::as_str),
            backends.join(", "),
            workspace_kb,
        )
    }
}
