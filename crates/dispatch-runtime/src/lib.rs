// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # dispatch-runtime
//!
//! Orchestrates one matmul call from caller tensors to a filled output.
//!
//! The runtime takes:
//! - Caller views and an output view allocated on an `OperatorExecutor`.
//! - A `PlatformInfo` and a `V3ShapeOracle` from `matmul-planner`.
//!
//! And drives the call through a fixed sequence of stages:
//! ```text
//! Start → EmptyCheck → FormatNormalize → NonContiguousDetection
//!       → ContiguityAndCast → DegenerateRewriteCheck → BackendDispatch
//!       → OutputConvert → WriteBack → Done
//! ```
//! A failure at any stage leaves the caller's output untouched. Parameter
//! errors are reported before the first executor call.
//!
//! # Entry Points
//! - [`mm`], [`bmm`] and the rank-generic [`matmul`].
//! - [`addmm`] and [`baddbmm`], which first pick an [`AddmmGraph`].
//! - [`DispatchEngine`], a configured owner of the platform, oracle and a
//!   host executor.
//!
//! # Type-State Pipeline
//! ```text
//! DispatchEngine<Idle> → DispatchEngine<Configured> → DispatchEngine<Ready>
//! ```
//! Transitions are compile-time checked.

mod addmm;
mod batched;
mod config;
mod context;
mod degenerate;
mod engine;
mod error;
mod flat;
mod matmul;
mod metrics;
mod stage;
mod validate;

pub use addmm::{addmm, baddbmm, bias_convertible, select_addmm_graph, AddmmArgs, AddmmGraph};
pub use batched::execute_batched_matmul;
pub use config::DispatchConfig;
pub use context::{DispatchContext, DispatchOutcome, MatmulArgs, RewriteKind};
pub use engine::{Configured, DispatchEngine, EngineState, Idle, OperatorKind, PlanJob, PlannedCall, Ready};
pub use error::{DispatchError, ErrorKind};
pub use flat::execute_matmul;
pub use matmul::{bmm, matmul, mm};
pub use metrics::{DispatchMetrics, StageMetrics};
pub use stage::{Stage, StageRecord, StageTrace};
pub use validate::{validate_addmm, validate_bmm, validate_matmul, validate_mm};
