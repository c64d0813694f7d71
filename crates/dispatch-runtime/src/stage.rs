// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-call stage machine and its timing trace.
//!
//! ```text
//! Start → EmptyCheck → FormatNormalize → NonContiguousDetection
//!       → ContiguityAndCast → DegenerateRewriteCheck → BackendDispatch
//!       → OutputConvert → WriteBack → Done
//! ```
//!
//! `EmptyCheck` may jump straight to `WriteBack`; any stage may end the
//! call with an error.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum Stage {
    Start,
    EmptyCheck,
    FormatNormalize,
    NonContiguousDetection,
    ContiguityAndCast,
    DegenerateRewriteCheck,
    BackendDispatch,
    OutputConvert,
    WriteBack,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Start,
        Stage::EmptyCheck,
        Stage::FormatNormalize,
        Stage::NonContiguousDetection,
        Stage::ContiguityAndCast,
        Stage::DegenerateRewriteCheck,
        Stage::BackendDispatch,
        Stage::OutputConvert,
        Stage::WriteBack,
        Stage::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Start => "Start",
            Stage::EmptyCheck => "EmptyCheck",
            Stage::FormatNormalize => "FormatNormalize",
            Stage::NonContiguousDetection => "NonContiguousDetection",
            Stage::ContiguityAndCast => "ContiguityAndCast",
            Stage::DegenerateRewriteCheck => "DegenerateRewriteCheck",
            Stage::BackendDispatch => "BackendDispatch",
            Stage::OutputConvert => "OutputConvert",
            Stage::WriteBack => "WriteBack",
            Stage::Done => "Done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One visited stage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub duration: Duration,
    pub ok: bool,
}

/// Ordered record of the stages one call went through.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StageTrace {
    records: Vec<StageRecord>,
}

impl StageTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    /// Visited stages in order.
    pub fn stages(&self) -> Vec<Stage> {
        self.records.iter().map(|r| r.stage).collect()
    }

    pub fn visited(&self, stage: Stage) -> bool {
        self.records.iter().any(|r| r.stage == stage)
    }

    pub fn last(&self) -> Option<Stage> {
        self.records.last().map(|r| r.stage)
    }

    /// Sum of all stage durations.
    pub fn total(&self) -> Duration {
        self.records.iter().map(|r| r.duration).sum()
    }

    /// Records a stage with no work attached.
    pub(crate) fn mark(&mut self, stage: Stage) {
        debug!("stage {stage}");
        self.records.push(StageRecord {
            stage,
            duration: Duration::ZERO,
            ok: true,
        });
    }

    /// Runs `body` as `stage`, timing it and attributing executor failures
    /// to the stage.
    pub(crate) fn run<T>(
        &mut self,
        stage: Stage,
        body: impl FnOnce() -> Result<T, DispatchError>,
    ) -> Result<T, DispatchError> {
        let start = Instant::now();
        let result = body().map_err(|e| e.at(stage));
        let duration = start.elapsed();
        self.records.push(StageRecord {
            stage,
            duration,
            ok: result.is_ok(),
        });
        match &result {
            Ok(_) => debug!("stage {stage} ok ({:.3}ms)", duration.as_secs_f64() * 1000.0),
            Err(e) => debug!("stage {stage} failed: {e}"),
        }
        result
    }
}
