// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-memory reference executor.
//!
//! [`HostExecutor`] keeps every buffer in an arena keyed by [`StorageId`].
//! Buffers are never freed individually; the whole arena goes away with the
//! executor. Kernels compute through `f32` with the `tensor-core` reference
//! kernels and round to the requested element type.
//!
//! # Thread Safety
//! The arena, statistics and launch log sit behind separate mutexes, so a
//! `HostExecutor` is `Send + Sync` and can be shared via `Arc`.
//!
//! Tiled ("NZ") tensors are stored as row-major bytes tagged `Tiled`; the
//! tag travels with the view but the data is never reordered.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use matmul_planner::BackendVariant;
use tensor_core::{DType, Layout, Shape, StorageId, Tensor, TensorDesc, TensorView};
use tracing::{debug, trace, warn};

use crate::{BackendCall, ExecutorError, ExecutorStats, LaunchRecord, OperatorExecutor, WorkspaceBudget};

#[derive(Default)]
struct Arena {
    buffers: HashMap<StorageId, Tensor>,
    next_id: u64,
    live_bytes: usize,
}

/// The reference [`OperatorExecutor`].
///
/// # Example
/// ```
/// use op_executor::{HostExecutor, OperatorExecutor, WorkspaceBudget};
/// use tensor_core::{DType, Layout, Shape};
///
/// let exec = HostExecutor::new(WorkspaceBudget::from_mb(1));
/// let t = exec.alloc_tensor(&Shape::matrix(4, 4), DType::F16, Layout::RowMajor).unwrap();
/// assert_eq!(exec.workspace_size(), 32);
/// assert!(t.is_contiguous());
/// ```
pub struct HostExecutor {
    budget: WorkspaceBudget,
    arena: Mutex<Arena>,
    stats: Mutex<ExecutorStats>,
    launches: Mutex<Vec<LaunchRecord>>,
    failing: Mutex<HashSet<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HostExecutor {
    pub fn new(budget: WorkspaceBudget) -> Self {
        Self {
            budget,
            arena: Mutex::new(Arena::default()),
            stats: Mutex::new(ExecutorStats::default()),
            launches: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn budget(&self) -> WorkspaceBudget {
        self.budget
    }

    /// Makes every later launch of `kernel` fail with
    /// [`ExecutorError::KernelFailed`]. Matches either a kernel name such as
    /// `"Cast"` or a backend name such as `"MatMulV3Nd"`.
    pub fn fail_on(&self, kernel: &str) {
        lock(&self.failing).insert(kernel.to_string());
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ExecutorStats {
        lock(&self.stats).clone()
    }

    /// Every kernel launched so far, in order.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        lock(&self.launches).clone()
    }

    /// Backends launched so far, in order, skipping helper kernels.
    pub fn backends_launched(&self) -> Vec<BackendVariant> {
        lock(&self.launches).iter().filter_map(|r| r.backend).collect()
    }

    pub fn clear_launches(&self) {
        lock(&self.launches).clear();
    }

    /// Number of live storage buffers.
    pub fn buffer_count(&self) -> usize {
        lock(&self.arena).buffers.len()
    }

    // ── Internals ─────────────────────────────────────────────

    fn store(&self, tensor: Tensor, layout: Layout) -> Result<TensorView, ExecutorError> {
        let shape = tensor.shape().clone();
        let dtype = tensor.dtype();
        let bytes = tensor.size_bytes();
        let flat = tensor.reshape(Shape::vector(shape.num_elements()))?;

        let budget = self.budget.as_bytes();
        let mut arena = lock(&self.arena);
        if arena.live_bytes + bytes > budget {
            let available = budget.saturating_sub(arena.live_bytes);
            drop(arena);
            lock(&self.stats).record_exhausted();
            warn!("workspace exhausted: {bytes} bytes requested, {available} available");
            return Err(ExecutorError::WorkspaceExhausted {
                requested_bytes: bytes,
                available_bytes: available,
                budget_bytes: budget,
            });
        }
        let id = StorageId(arena.next_id);
        arena.next_id += 1;
        arena.live_bytes += bytes;
        arena.buffers.insert(id, flat);
        let live = arena.live_bytes;
        drop(arena);

        lock(&self.stats).record_allocation(live);
        trace!("allocated {id}: {shape} {dtype} {layout} ({bytes} bytes)");
        Ok(TensorView::new(id, TensorDesc::contiguous(shape, dtype, layout)))
    }

    fn read(&self, view: &TensorView) -> Result<Tensor, ExecutorError> {
        let arena = lock(&self.arena);
        let storage = arena
            .buffers
            .get(&view.storage())
            .ok_or(ExecutorError::UnknownTensor {
                storage: view.storage(),
            })?;
        let gathered = tensor_core::gather_strided(storage, view.desc())?;
        Ok(gathered.cast(view.dtype()))
    }

    /// Runs `body` as kernel `record.kernel`, honouring fault injection and
    /// updating the log and counters.
    fn run<T>(
        &self,
        record: LaunchRecord,
        body: impl FnOnce() -> Result<T, ExecutorError>,
    ) -> Result<T, ExecutorError> {
        let kernel = record.kernel.clone();
        let result = if lock(&self.failing).contains(&kernel) {
            Err(ExecutorError::KernelFailed {
                kernel: kernel.clone(),
                detail: "injected failure".to_string(),
            })
        } else {
            body()
        };
        lock(&self.stats).record_launch(result.is_ok());
        lock(&self.launches).push(record);
        match &result {
            Ok(_) => debug!("kernel {kernel} ok"),
            Err(e) => warn!("kernel {kernel} failed: {e}"),
        }
        result
    }
}

impl Default for HostExecutor {
    fn default() -> Self {
        Self::new(WorkspaceBudget::default())
    }
}

impl std::fmt::Debug for HostExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostExecutor")
            .field("budget", &self.budget)
            .field("workspace_size", &self.workspace_size())
            .field("buffers", &self.buffer_count())
            .finish()
    }
}

impl OperatorExecutor for HostExecutor {
    fn name(&self) -> &str {
        "host"
    }

    fn alloc_tensor(&self, shape: &Shape, dtype: DType, layout: Layout) -> Result<TensorView, ExecutorError> {
        self.store(Tensor::zeros(shape.clone(), dtype), layout)
    }

    fn create_view(
        &self,
        base: &TensorView,
        shape: Shape,
        strides: Vec<usize>,
        offset: usize,
    ) -> Result<TensorView, ExecutorError> {
        if !lock(&self.arena).buffers.contains_key(&base.storage()) {
            return Err(ExecutorError::UnknownTensor {
                storage: base.storage(),
            });
        }
        let desc = base.desc().restride(shape, strides, offset)?;
        lock(&self.stats).record_view();
        Ok(base.with_desc(desc))
    }

    fn convert_to_tensor(&self, values: &[f64], dtype: DType) -> Result<TensorView, ExecutorError> {
        // Round straight from f64 so half types are not rounded twice.
        let rounded: Vec<f32> = values
            .iter()
            .map(|&v| match dtype {
                DType::F16 => half::f16::from_f64(v).to_f32(),
                DType::BF16 => half::bf16::from_f64(v).to_f32(),
                _ => v as f32,
            })
            .collect();
        let tensor = Tensor::from_f32_as(Shape::vector(values.len()), dtype, &rounded)?;
        self.store(tensor, Layout::RowMajor)
    }

    fn workspace_size(&self) -> usize {
        lock(&self.arena).live_bytes
    }

    fn upload(&self, tensor: &Tensor, layout: Layout) -> Result<TensorView, ExecutorError> {
        self.store(tensor.clone(), layout)
    }

    fn download(&self, view: &TensorView) -> Result<Tensor, ExecutorError> {
        self.read(view)
    }

    fn contiguous(&self, view: &TensorView) -> Result<TensorView, ExecutorError> {
        if view.is_contiguous() {
            return Ok(view.clone());
        }
        self.run(LaunchRecord::kernel("Contiguous", vec![view.shape().clone()]), || {
            let packed = self.read(view)?;
            self.store(packed, view.layout())
        })
    }

    fn cast(&self, view: &TensorView, dtype: DType) -> Result<TensorView, ExecutorError> {
        if view.dtype() == dtype {
            return Ok(view.clone());
        }
        self.run(LaunchRecord::kernel("Cast", vec![view.shape().clone()]), || {
            let converted = self.read(view)?.cast(dtype);
            self.store(converted, view.layout())
        })
    }

    fn trans_data(&self, view: &TensorView, layout: Layout) -> Result<TensorView, ExecutorError> {
        if view.layout() == layout && view.storage_layout() == layout {
            return Ok(view.clone());
        }
        self.run(LaunchRecord::kernel("TransData", vec![view.shape().clone()]), || {
            let data = self.read(view)?;
            self.store(data, layout)
        })
    }

    fn fill(&self, shape: &Shape, dtype: DType, value: f64) -> Result<TensorView, ExecutorError> {
        self.run(LaunchRecord::kernel("Fill", vec![shape.clone()]), || {
            let mut t = Tensor::zeros(shape.clone(), dtype);
            t.fill(value as f32);
            self.store(t, Layout::RowMajor)
        })
    }

    fn mul(&self, lhs: &TensorView, rhs: &TensorView) -> Result<TensorView, ExecutorError> {
        let shapes = vec![lhs.shape().clone(), rhs.shape().clone()];
        self.run(LaunchRecord::kernel("Mul", shapes), || {
            let out = tensor_core::mul(&self.read(lhs)?, &self.read(rhs)?)?;
            self.store(out, Layout::RowMajor)
        })
    }

    fn add(&self, lhs: &TensorView, rhs: &TensorView) -> Result<TensorView, ExecutorError> {
        let shapes = vec![lhs.shape().clone(), rhs.shape().clone()];
        self.run(LaunchRecord::kernel("Add", shapes), || {
            let out = tensor_core::add(&self.read(lhs)?, &self.read(rhs)?)?;
            self.store(out, Layout::RowMajor)
        })
    }

    fn scale(&self, view: &TensorView, alpha: f64) -> Result<TensorView, ExecutorError> {
        self.run(LaunchRecord::kernel("Muls", vec![view.shape().clone()]), || {
            let out = tensor_core::scale(&self.read(view)?, alpha as f32)?;
            self.store(out, view.layout())
        })
    }

    fn reshape(&self, view: &TensorView, shape: Shape) -> Result<TensorView, ExecutorError> {
        let packed = self.contiguous(view)?;
        let desc = packed.desc().reshape(shape)?;
        lock(&self.stats).record_view();
        Ok(packed.with_desc(desc))
    }

    fn launch(&self, call: &BackendCall<'_>) -> Result<TensorView, ExecutorError> {
        self.run(LaunchRecord::backend(call), || {
            let lhs = self.read(call.lhs)?;
            let rhs = self.read(call.rhs)?;
            let product = match call.backend {
                BackendVariant::ElementwiseMul => {
                    if call.transpose_lhs || call.transpose_rhs {
                        return Err(ExecutorError::KernelFailed {
                            kernel: call.backend.name().to_string(),
                            detail: "elementwise multiply takes untransposed operands".to_string(),
                        });
                    }
                    tensor_core::mul(&lhs, &rhs)?
                }
                _ => tensor_core::matmul(&lhs, &rhs, call.transpose_lhs, call.transpose_rhs)?,
            };
            let out = match call.bias {
                Some(bias) => tensor_core::add(&product, &self.read(bias)?)?,
                None => product,
            };
            self.store(out.cast(call.out_dtype), call.backend.output_layout())
        })
    }

    fn view_copy(&self, src: &TensorView, dst: &TensorView) -> Result<(), ExecutorError> {
        let shapes = vec![src.shape().clone(), dst.shape().clone()];
        self.run(LaunchRecord::kernel("ViewCopy", shapes), || {
            let data = self.read(src)?;
            let mut arena = lock(&self.arena);
            let storage = arena
                .buffers
                .get_mut(&dst.storage())
                .ok_or(ExecutorError::UnknownTensor {
                    storage: dst.storage(),
                })?;
            let data = data.cast(storage.dtype());
            tensor_core::scatter_strided(storage, dst.desc(), &data)?;
            Ok(())
        })
    }
}
