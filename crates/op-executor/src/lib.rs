// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # op-executor
//!
//! The executor a matmul dispatch runs against, and a host-memory
//! reference implementation of it.
//!
//! # Key Components
//!
//! - [`OperatorExecutor`]: allocation, zero-copy views, helper kernels
//!   (cast, contiguous copy, layout conversion, broadcast multiply/add) and
//!   matmul backend launches.
//! - [`HostExecutor`]: arena-backed implementation that computes in `f32`
//!   and keeps a [`LaunchRecord`] log.
//! - [`WorkspaceBudget`]: a hard ceiling on scratch memory with
//!   human-readable parsing (`"512M"`, `"1G"`).
//! - [`ExecutorStats`]: allocation, view and launch counters.
//!
//! # Ownership Model
//!
//! ```text
//! dispatch ──► alloc_tensor / cast / launch ──► TensorView (StorageId + desc)
//!                                                   │
//!                                   arena: StorageId → host buffer
//!                                                   │
//!                                   released when the executor drops
//! ```
//!
//! Views are plain values; the arena owns the bytes. Nothing is freed per
//! tensor, matching the acquire-many/release-once discipline of a device
//! executor.

mod budget;
mod error;
mod executor;
mod host;
mod stats;

pub use budget::WorkspaceBudget;
pub use error::ExecutorError;
pub use executor::{BackendCall, LaunchRecord, OperatorExecutor};
pub use host::HostExecutor;
pub use stats::ExecutorStats;
