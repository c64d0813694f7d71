// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The executor interface the dispatcher drives.
//!
//! An [`OperatorExecutor`] owns every buffer a dispatch touches and behaves
//! as an arena: tensors are allocated during a call and released together
//! when the executor is dropped. All methods take `&self` so one executor
//! can serve concurrent calls.

use matmul_planner::{BackendVariant, ImplMode};
use tensor_core::{DType, Layout, Shape, Tensor, TensorView};

use crate::ExecutorError;

/// One invocation of a matmul backend entry point.
#[derive(Debug, Clone, Copy)]
pub struct BackendCall<'a> {
    pub backend: BackendVariant,
    pub lhs: &'a TensorView,
    pub rhs: &'a TensorView,
    pub bias: Option<&'a TensorView>,
    pub transpose_lhs: bool,
    pub transpose_rhs: bool,
    pub impl_mode: ImplMode,
    /// Element type the entry point writes.
    pub out_dtype: DType,
}

/// A kernel launch as seen by the executor's log.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LaunchRecord {
    /// Kernel or entry point name, e.g. `"Cast"` or `"MatMulV3Nd"`.
    pub kernel: String,
    /// Set for matmul entry points only.
    pub backend: Option<BackendVariant>,
    pub impl_mode: Option<ImplMode>,
    /// Input shapes in argument order.
    pub shapes: Vec<Shape>,
}

impl LaunchRecord {
    pub fn kernel(kernel: &str, shapes: Vec<Shape>) -> Self {
        Self {
            kernel: kernel.to_string(),
            backend: None,
            impl_mode: None,
            shapes,
        }
    }

    pub fn backend(call: &BackendCall<'_>) -> Self {
        let mut shapes = vec![call.lhs.shape().clone(), call.rhs.shape().clone()];
        if let Some(bias) = call.bias {
            shapes.push(bias.shape().clone());
        }
        Self {
            kernel: call.backend.name().to_string(),
            backend: Some(call.backend),
            impl_mode: Some(call.impl_mode),
            shapes,
        }
    }
}

/// Allocation, view, conversion and launch services for matmul dispatch.
///
/// Every method either returns a valid handle or an error; there is no
/// partial failure. Views returned by the executor are immutable: every
/// transformation produces a new [`TensorView`].
pub trait OperatorExecutor: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    // ── Allocation and views ──────────────────────────────────

    /// Allocates a zero-filled contiguous tensor.
    fn alloc_tensor(&self, shape: &Shape, dtype: DType, layout: Layout) -> Result<TensorView, ExecutorError>;

    /// Zero-copy reinterpretation of `base`'s storage.
    fn create_view(
        &self,
        base: &TensorView,
        shape: Shape,
        strides: Vec<usize>,
        offset: usize,
    ) -> Result<TensorView, ExecutorError>;

    /// Uploads a host array (scalars are length-1) as a 1-D tensor.
    fn convert_to_tensor(&self, values: &[f64], dtype: DType) -> Result<TensorView, ExecutorError>;

    /// Cumulative bytes allocated so far.
    fn workspace_size(&self) -> usize;

    /// Copies a host tensor into executor storage.
    fn upload(&self, tensor: &Tensor, layout: Layout) -> Result<TensorView, ExecutorError>;

    /// Materialises a view into a contiguous host tensor.
    fn download(&self, view: &TensorView) -> Result<Tensor, ExecutorError>;

    // ── Kernels ───────────────────────────────────────────────

    /// Returns `view` itself when already contiguous, a packed copy otherwise.
    fn contiguous(&self, view: &TensorView) -> Result<TensorView, ExecutorError>;

    fn cast(&self, view: &TensorView, dtype: DType) -> Result<TensorView, ExecutorError>;

    /// Converts between storage layouts.
    fn trans_data(&self, view: &TensorView, layout: Layout) -> Result<TensorView, ExecutorError>;

    fn fill(&self, shape: &Shape, dtype: DType, value: f64) -> Result<TensorView, ExecutorError>;

    /// Broadcasting elementwise product.
    fn mul(&self, lhs: &TensorView, rhs: &TensorView) -> Result<TensorView, ExecutorError>;

    /// Broadcasting elementwise sum.
    fn add(&self, lhs: &TensorView, rhs: &TensorView) -> Result<TensorView, ExecutorError>;

    fn scale(&self, view: &TensorView, alpha: f64) -> Result<TensorView, ExecutorError>;

    /// Reshape, copying first if the view is not contiguous.
    fn reshape(&self, view: &TensorView, shape: Shape) -> Result<TensorView, ExecutorError>;

    /// Runs a matmul backend entry point.
    fn launch(&self, call: &BackendCall<'_>) -> Result<TensorView, ExecutorError>;

    /// Writes `src` through the (possibly strided) `dst` view, casting to
    /// `dst`'s element type.
    fn view_copy(&self, src: &TensorView, dst: &TensorView) -> Result<(), ExecutorError>;
}
