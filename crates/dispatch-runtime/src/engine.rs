// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The dispatch engine with a type-state–enforced setup pipeline.
//!
//! ```text
//! DispatchEngine<Idle>
//!     │  .configure()
//!     ▼
//! DispatchEngine<Configured>
//!     │  .prepare()
//!     ▼
//! DispatchEngine<Ready>
//!     │  .mm() / .bmm() / .matmul() / .addmm() / .baddbmm() / .plan_many()
//!     ▼
//!   DispatchOutcome
//! ```
//!
//! Each transition consumes the old value. The data a state needs lives in
//! the state itself, so a `Ready` engine always has a platform, an oracle
//! and an executor.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use matmul_planner::{
    plan_call, Addmm, Baddbmm, BackendVariant, Bmm, CubeMathType, MatmulOperator, MatmulPlan, MatmulRequest, Mm,
    PlatformInfo, V3ShapeOracle,
};
use op_executor::{HostExecutor, WorkspaceBudget};
use tensor_core::{DType, TensorDesc, TensorView};

use crate::{
    addmm, baddbmm, bmm, matmul, mm, AddmmArgs, DispatchConfig, DispatchContext, DispatchError, DispatchMetrics,
    DispatchOutcome, MatmulArgs,
};

// ── Type-state markers ─────────────────────────────────────────

/// Engine holds a configuration that has not been checked yet.
#[derive(Debug)]
pub struct Idle;

/// Platform, oracle and defaults are resolved.
pub struct Configured {
    platform: PlatformInfo,
    oracle: Arc<dyn V3ShapeOracle>,
    budget: WorkspaceBudget,
    math: CubeMathType,
}

/// An executor is attached and calls can be dispatched.
pub struct Ready {
    configured: Configured,
    executor: Arc<HostExecutor>,
    metrics: Mutex<DispatchMetrics>,
}

impl fmt::Debug for Configured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configured")
            .field("soc", &self.platform.soc)
            .field("oracle", &self.oracle.name())
            .field("budget", &self.budget)
            .field("math", &self.math)
            .finish()
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ready")
            .field("configured", &self.configured)
            .field("workspace_bytes", &op_executor::OperatorExecutor::workspace_size(self.executor.as_ref()))
            .finish()
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Idle {}
    impl Sealed for super::Configured {}
    impl Sealed for super::Ready {}
}

/// Sealed trait for engine states.
pub trait EngineState: sealed::Sealed + fmt::Debug {}
impl EngineState for Idle {}
impl EngineState for Configured {}
impl EngineState for Ready {}

// ── Planning jobs ──────────────────────────────────────────────

/// The four planner operators, addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorKind {
    Mm,
    Addmm,
    Bmm,
    Baddbmm,
}

impl OperatorKind {
    pub fn operator(self) -> &'static dyn MatmulOperator {
        match self {
            OperatorKind::Mm => &Mm,
            OperatorKind::Addmm => &Addmm,
            OperatorKind::Bmm => &Bmm,
            OperatorKind::Baddbmm => &Baddbmm,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperatorKind::Mm => "mm",
            OperatorKind::Addmm => "addmm",
            OperatorKind::Bmm => "bmm",
            OperatorKind::Baddbmm => "baddbmm",
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mm" => Ok(OperatorKind::Mm),
            "addmm" => Ok(OperatorKind::Addmm),
            "bmm" => Ok(OperatorKind::Bmm),
            "baddbmm" => Ok(OperatorKind::Baddbmm),
            other => Err(DispatchError::parameter(format!(
                "unknown operator '{other}'; expected 'mm', 'addmm', 'bmm', or 'baddbmm'"
            ))),
        }
    }
}

/// An owned planning request that can move onto a worker thread.
#[derive(Debug, Clone)]
pub struct PlanJob {
    pub operator: OperatorKind,
    pub lhs: TensorDesc,
    pub rhs: TensorDesc,
    pub bias: Option<TensorDesc>,
    pub out_dtype: Option<DType>,
    pub transpose_lhs: bool,
    pub transpose_rhs: bool,
    pub math: CubeMathType,
}

impl PlanJob {
    pub fn new(operator: OperatorKind, lhs: TensorDesc, rhs: TensorDesc) -> Self {
        Self {
            operator,
            lhs,
            rhs,
            bias: None,
            out_dtype: None,
            transpose_lhs: false,
            transpose_rhs: false,
            math: CubeMathType::KeepDtype,
        }
    }

    pub fn with_bias(mut self, bias: TensorDesc) -> Self {
        self.bias = Some(bias);
        self
    }

    pub fn with_out_dtype(mut self, dtype: DType) -> Self {
        self.out_dtype = Some(dtype);
        self
    }

    pub fn transposed(mut self, transpose_lhs: bool, transpose_rhs: bool) -> Self {
        self.transpose_lhs = transpose_lhs;
        self.transpose_rhs = transpose_rhs;
        self
    }

    pub fn with_math(mut self, math: CubeMathType) -> Self {
        self.math = math;
        self
    }

    /// Plans this job without touching an executor.
    pub fn plan(&self, platform: &PlatformInfo, oracle: &dyn V3ShapeOracle) -> Result<PlannedCall, DispatchError> {
        let request = MatmulRequest {
            lhs: &self.lhs,
            rhs: &self.rhs,
            bias: self.bias.as_ref(),
            out_dtype: self.out_dtype,
            transpose_lhs: self.transpose_lhs,
            transpose_rhs: self.transpose_rhs,
            math: self.math,
        };
        let (plan, backend) = plan_call(self.operator.operator(), &request, platform, oracle)?;
        Ok(PlannedCall { plan, backend })
    }
}

/// A plan and the backend chosen for it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PlannedCall {
    pub plan: MatmulPlan,
    pub backend: BackendVariant,
}

// ── Engine ─────────────────────────────────────────────────────

/// The primary dispatch engine.
///
/// `S` is a type-state marker: dispatch methods exist only on
/// `DispatchEngine<Ready>`.
///
/// # Example
/// ```
/// use dispatch_runtime::{DispatchConfig, DispatchEngine};
/// use op_executor::OperatorExecutor;
/// use tensor_core::{Layout, Shape, Tensor};
///
/// let engine = DispatchEngine::new(DispatchConfig::default())
///     .configure()
///     .unwrap()
///     .prepare();
/// let exec = engine.executor();
/// let a = Tensor::from_f32(Shape::matrix(2, 3), &[1.0; 6]).unwrap();
/// let b = Tensor::from_f32(Shape::matrix(3, 2), &[1.0; 6]).unwrap();
/// let (a, b) = (exec.upload(&a, Layout::RowMajor).unwrap(), exec.upload(&b, Layout::RowMajor).unwrap());
/// let out = exec.alloc_tensor(&Shape::matrix(2, 2), a.dtype(), Layout::RowMajor).unwrap();
///
/// engine.mm(&engine.args(&a, &b), &out).unwrap();
/// assert_eq!(exec.download(&out).unwrap().to_f32_vec(), vec![3.0; 4]);
/// ```
pub struct DispatchEngine<S: EngineState = Idle> {
    config: DispatchConfig,
    state: S,
}

impl<S: EngineState> fmt::Debug for DispatchEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("state", &self.state)
            .field("soc", &self.config.soc)
            .field("oracle", &self.config.oracle)
            .finish()
    }
}

impl<S: EngineState> DispatchEngine<S> {
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }
}

// ── Idle → Configured ──────────────────────────────────────────

impl DispatchEngine<Idle> {
    pub fn new(config: DispatchConfig) -> Self {
        tracing::info!("engine created for '{}' with oracle '{}'", config.soc, config.oracle);
        Self { config, state: Idle }
    }

    /// Resolves the platform, oracle, budget and default math type.
    pub fn configure(self) -> Result<DispatchEngine<Configured>, DispatchError> {
        let platform = self.config.platform()?;
        let oracle: Arc<dyn V3ShapeOracle> = Arc::from(self.config.create_oracle()?);
        let budget = self.config.parse_budget()?;
        let math = self.config.default_math()?;
        tracing::info!(
            "configured {} ({} cube cores), budget {budget}, math {math}",
            platform.soc,
            platform.cube_core_count
        );
        Ok(DispatchEngine {
            config: self.config,
            state: Configured {
                platform,
                oracle,
                budget,
                math,
            },
        })
    }
}

// ── Configured → Ready ─────────────────────────────────────────

impl DispatchEngine<Configured> {
    pub fn platform(&self) -> &PlatformInfo {
        &self.state.platform
    }

    /// Replaces the configured oracle.
    pub fn with_oracle(mut self, oracle: Arc<dyn V3ShapeOracle>) -> Self {
        tracing::debug!("oracle '{}' replaced by '{}'", self.state.oracle.name(), oracle.name());
        self.state.oracle = oracle;
        self
    }

    /// Attaches a host executor sized to the workspace budget.
    pub fn prepare(self) -> DispatchEngine<Ready> {
        let executor = Arc::new(HostExecutor::new(self.state.budget));
        tracing::info!("engine ready, workspace budget {}", self.state.budget);
        DispatchEngine {
            config: self.config,
            state: Ready {
                configured: self.state,
                executor,
                metrics: Mutex::new(DispatchMetrics::new()),
            },
        }
    }
}

// ── Ready: dispatch ────────────────────────────────────────────

fn lock(m: &Mutex<DispatchMetrics>) -> MutexGuard<'_, DispatchMetrics> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DispatchEngine<Ready> {
    pub fn platform(&self) -> &PlatformInfo {
        &self.state.configured.platform
    }

    pub fn oracle(&self) -> &dyn V3ShapeOracle {
        self.state.configured.oracle.as_ref()
    }

    pub fn executor(&self) -> &HostExecutor {
        &self.state.executor
    }

    pub fn default_math(&self) -> CubeMathType {
        self.state.configured.math
    }

    /// Borrowed context for the free dispatch functions.
    pub fn context(&self) -> DispatchContext<'_> {
        DispatchContext::new(self.platform(), self.oracle(), self.state.executor.as_ref())
    }

    /// Matmul arguments carrying the configured default math type.
    pub fn args<'a>(&self, lhs: &'a TensorView, rhs: &'a TensorView) -> MatmulArgs<'a> {
        MatmulArgs::new(lhs, rhs).with_math(self.default_math())
    }

    /// Addmm arguments carrying the configured default math type.
    pub fn addmm_args<'a>(
        &self,
        input: &'a TensorView,
        mat1: &'a TensorView,
        mat2: &'a TensorView,
    ) -> AddmmArgs<'a> {
        AddmmArgs::new(input, mat1, mat2).with_math(self.default_math())
    }

    pub fn mm(&self, args: &MatmulArgs<'_>, out: &TensorView) -> Result<DispatchOutcome, DispatchError> {
        self.observe(mm(&self.context(), args, out))
    }

    pub fn bmm(&self, args: &MatmulArgs<'_>, out: &TensorView) -> Result<DispatchOutcome, DispatchError> {
        self.observe(bmm(&self.context(), args, out))
    }

    pub fn matmul(&self, args: &MatmulArgs<'_>, out: &TensorView) -> Result<DispatchOutcome, DispatchError> {
        self.observe(matmul(&self.context(), args, out))
    }

    pub fn addmm(&self, args: &AddmmArgs<'_>, out: &TensorView) -> Result<DispatchOutcome, DispatchError> {
        self.observe(addmm(&self.context(), args, out))
    }

    pub fn baddbmm(&self, args: &AddmmArgs<'_>, out: &TensorView) -> Result<DispatchOutcome, DispatchError> {
        self.observe(baddbmm(&self.context(), args, out))
    }

    /// Plans one job on the calling thread.
    pub fn plan(&self, job: &PlanJob) -> Result<PlannedCall, DispatchError> {
        job.plan(self.platform(), self.oracle())
    }

    /// Plans independent jobs concurrently on the blocking pool.
    ///
    /// Results come back in job order.
    pub async fn plan_many(&self, jobs: Vec<PlanJob>) -> Vec<Result<PlannedCall, DispatchError>> {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let platform = self.state.configured.platform.clone();
                let oracle = Arc::clone(&self.state.configured.oracle);
                tokio::task::spawn_blocking(move || job.plan(&platform, oracle.as_ref()))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(DispatchError::Task(e.to_string())),
            });
        }
        tracing::debug!("planned {} jobs", results.len());
        results
    }

    /// Snapshot of the accumulated metrics.
    pub fn metrics(&self) -> DispatchMetrics {
        lock(&self.state.metrics).clone()
    }

    pub fn reset_metrics(&self) {
        *lock(&self.state.metrics) = DispatchMetrics::new();
    }

    fn observe(&self, result: Result<DispatchOutcome, DispatchError>) -> Result<DispatchOutcome, DispatchError> {
        if self.config.enable_profiling {
            let mut metrics = lock(&self.state.metrics);
            match &result {
                Ok(outcome) => metrics.record(outcome),
                Err(e) => metrics.record_failure(e),
            }
        }
        if let Err(e) = &result {
            tracing::warn!("dispatch failed: {e}");
        }
        result
    }
}
