// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor descriptors, immutable views, and the owned host tensor.
//!
//! ```text
//!   StorageId ──┐
//!               ├──► TensorView  (cheap, Clone, never mutated)
//!   TensorDesc ─┘        │
//!                        │  with_*/swap/reshape
//!                        ▼
//!                   new TensorView over the same storage
//! ```
//!
//! A [`TensorView`] pairs a storage handle with a [`TensorDesc`]. Every
//! reinterpretation (transposed view, reshape, dtype/layout retag) produces
//! a new value, so two logical views of one buffer can never influence
//! each other through shared mutable metadata.

use crate::{DType, Layout, Shape, TensorError};

/// Opaque handle to a storage buffer owned by an operator executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StorageId(pub u64);

impl std::fmt::Display for StorageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical description of a tensor: shape, element strides, storage offset,
/// element type, and layout tags.
///
/// `layout` is the declared (view) format; `storage_layout` is the format the
/// bytes are actually stored in. They differ only transiently, e.g. when a
/// caller declares a private tiled tensor as row-major.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TensorDesc {
    shape: Shape,
    strides: Vec<usize>,
    offset: usize,
    dtype: DType,
    layout: Layout,
    storage_layout: Layout,
    storage_len: usize,
}

impl TensorDesc {
    /// Describes a freshly allocated, contiguous tensor.
    pub fn contiguous(shape: Shape, dtype: DType, layout: Layout) -> Self {
        let strides = shape.strides();
        let storage_len = shape.num_elements();
        Self {
            shape,
            strides,
            offset: 0,
            dtype,
            layout,
            storage_layout: layout,
            storage_len,
        }
    }

    /// Describes an arbitrary strided window into a storage buffer of
    /// `storage_len` elements.
    ///
    /// # Errors
    /// [`TensorError::OutOfBounds`] if any addressed element lies outside the storage.
    pub fn strided(
        shape: Shape,
        strides: Vec<usize>,
        offset: usize,
        dtype: DType,
        storage_len: usize,
    ) -> Result<Self, TensorError> {
        let desc = Self {
            shape,
            strides,
            offset,
            dtype,
            layout: Layout::RowMajor,
            storage_layout: Layout::RowMajor,
            storage_len,
        };
        desc.check_bounds()?;
        Ok(desc)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Declared (view) layout.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Layout of the underlying storage.
    pub fn storage_layout(&self) -> Layout {
        self.storage_layout
    }

    /// Number of elements in the underlying storage buffer.
    pub fn storage_len(&self) -> usize {
        self.storage_len
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// `true` if any dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.shape.has_zero_dim()
    }

    /// `true` if the view walks its storage in row-major order without gaps.
    ///
    /// Size-1 dimensions may carry any stride.
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 1usize;
        for (&d, &s) in self.shape.dims().iter().zip(&self.strides).rev() {
            if d != 1 && s != expected {
                return false;
            }
            expected *= d;
        }
        true
    }

    /// Offset of the element one past the furthest addressed element.
    pub fn span(&self) -> usize {
        if self.is_empty() {
            return self.offset;
        }
        let furthest: usize = self
            .shape
            .dims()
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| (d - 1) * s)
            .sum();
        self.offset + furthest + 1
    }

    fn check_bounds(&self) -> Result<(), TensorError> {
        if self.strides.len() != self.shape.rank() || self.span() > self.storage_len {
            return Err(TensorError::OutOfBounds {
                shape: self.shape.clone(),
                strides: self.strides.clone(),
                offset: self.offset,
                storage_len: self.storage_len,
            });
        }
        Ok(())
    }

    /// Same view, different element type tag.
    pub fn with_dtype(&self, dtype: DType) -> Self {
        Self {
            dtype,
            ..self.clone()
        }
    }

    /// Same view, different declared layout; the storage layout is untouched.
    pub fn with_layout(&self, layout: Layout) -> Self {
        Self {
            layout,
            ..self.clone()
        }
    }

    /// Same view with both declared and storage layout retagged.
    pub fn with_storage_layout(&self, layout: Layout) -> Self {
        Self {
            layout,
            storage_layout: layout,
            ..self.clone()
        }
    }

    /// Reinterprets a contiguous view with a new shape of equal element count.
    pub fn reshape(&self, shape: Shape) -> Result<Self, TensorError> {
        if shape.num_elements() != self.shape.num_elements() || !self.is_contiguous() {
            return Err(TensorError::InvalidReshape {
                from: self.shape.clone(),
                to: shape,
            });
        }
        Ok(Self {
            strides: shape.strides(),
            shape,
            ..self.clone()
        })
    }

    /// Transposed view: exchanges both the sizes and the strides of the last
    /// two dimensions. No data moves.
    pub fn swap_last_two(&self) -> Self {
        let rank = self.rank();
        if rank < 2 {
            return self.clone();
        }
        let mut strides = self.strides.clone();
        strides.swap(rank - 2, rank - 1);
        Self {
            shape: self.shape.with_last_two_swapped(),
            strides,
            ..self.clone()
        }
    }

    /// Replaces shape, strides and offset, keeping the storage.
    pub fn restride(&self, shape: Shape, strides: Vec<usize>, offset: usize) -> Result<Self, TensorError> {
        let desc = Self {
            shape,
            strides,
            offset,
            ..self.clone()
        };
        desc.check_bounds()?;
        Ok(desc)
    }
}

/// An immutable handle to a logical tensor: storage plus descriptor.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TensorView {
    storage: StorageId,
    desc: TensorDesc,
}

impl TensorView {
    pub fn new(storage: StorageId, desc: TensorDesc) -> Self {
        Self { storage, desc }
    }

    pub fn storage(&self) -> StorageId {
        self.storage
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn shape(&self) -> &Shape {
        self.desc.shape()
    }

    pub fn dtype(&self) -> DType {
        self.desc.dtype()
    }

    pub fn layout(&self) -> Layout {
        self.desc.layout()
    }

    pub fn storage_layout(&self) -> Layout {
        self.desc.storage_layout()
    }

    pub fn is_empty(&self) -> bool {
        self.desc.is_empty()
    }

    pub fn is_contiguous(&self) -> bool {
        self.desc.is_contiguous()
    }

    /// A new view over the same storage with a different descriptor.
    pub fn with_desc(&self, desc: TensorDesc) -> Self {
        Self {
            storage: self.storage,
            desc,
        }
    }

    /// `true` if both views address the same storage buffer.
    pub fn aliases(&self, other: &TensorView) -> bool {
        self.storage == other.storage
    }
}

/// An owned, n-dimensional tensor stored contiguously in host memory.
///
/// # Memory Layout
/// Data is stored in row-major (C) order as a flat little-endian byte
/// buffer in the tensor's own [`DType`]. Values are read and written through
/// `f32` with [`to_f32_vec`](Tensor::to_f32_vec) and
/// [`from_f32_as`](Tensor::from_f32_as).
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    data: Vec<u8>,
}

impl Tensor {
    /// Creates a new tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape, DType};
    /// let t = Tensor::zeros(Shape::matrix(2, 3), DType::F16);
    /// assert_eq!(t.size_bytes(), 12);
    /// ```
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let size = shape.size_bytes(dtype);
        Self {
            shape,
            dtype,
            data: vec![0u8; size],
        }
    }

    /// Creates a tensor from raw bytes.
    ///
    /// Returns an error if the buffer size does not match `shape.size_bytes(dtype)`.
    pub fn from_bytes(shape: Shape, dtype: DType, data: Vec<u8>) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, dtype, data })
    }

    /// Creates an `F32` tensor from a slice of values.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(t.to_f32_vec(), vec![1.0, 2.0, 3.0]);
    /// ```
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        Self::from_f32_as(shape, DType::F32, values)
    }

    /// Creates a tensor of `dtype` from `f32` values, rounding as the target
    /// type requires.
    pub fn from_f32_as(shape: Shape, dtype: DType, values: &[f32]) -> Result<Self, TensorError> {
        if values.len() != shape.num_elements() {
            return Err(TensorError::BufferSizeMismatch {
                expected: shape.size_bytes(dtype),
                actual: values.len() * dtype.size_bytes(),
            });
        }
        let mut data = Vec::with_capacity(shape.size_bytes(dtype));
        for &v in values {
            encode(dtype, v, &mut data);
        }
        Ok(Self { shape, dtype, data })
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the raw byte slice backing this tensor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the memory footprint of this tensor in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Reads element `index` (flat, row-major) as `f32`.
    pub fn get_f32(&self, index: usize) -> f32 {
        let size = self.dtype.size_bytes();
        decode(self.dtype, &self.data[index * size..(index + 1) * size])
    }

    /// Writes element `index` (flat, row-major) from an `f32`.
    pub fn set_f32(&mut self, index: usize, value: f32) {
        let size = self.dtype.size_bytes();
        let mut buf = Vec::with_capacity(size);
        encode(self.dtype, value, &mut buf);
        self.data[index * size..(index + 1) * size].copy_from_slice(&buf);
    }

    /// Decodes every element to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.data
            .chunks_exact(self.dtype.size_bytes())
            .map(|chunk| decode(self.dtype, chunk))
            .collect()
    }

    /// Converts to another element type, rounding through `f32`.
    pub fn cast(&self, dtype: DType) -> Tensor {
        if dtype == self.dtype {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.shape.size_bytes(dtype));
        for chunk in self.data.chunks_exact(self.dtype.size_bytes()) {
            encode(dtype, decode(self.dtype, chunk), &mut data);
        }
        Tensor {
            shape: self.shape.clone(),
            dtype,
            data,
        }
    }

    /// Same bytes, new shape of equal element count.
    pub fn reshape(self, shape: Shape) -> Result<Tensor, TensorError> {
        if shape.num_elements() != self.shape.num_elements() {
            return Err(TensorError::InvalidReshape {
                from: self.shape,
                to: shape,
            });
        }
        Ok(Tensor { shape, ..self })
    }

    /// Fills the tensor with a constant value.
    pub fn fill(&mut self, value: f32) {
        let mut one = Vec::with_capacity(self.dtype.size_bytes());
        encode(self.dtype, value, &mut one);
        for chunk in self.data.chunks_exact_mut(one.len()) {
            chunk.copy_from_slice(&one);
        }
    }
}

fn decode(dtype: DType, bytes: &[u8]) -> f32 {
    match dtype {
        DType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        DType::F16 => half::f16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
        DType::BF16 => half::bf16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
        DType::I8 => bytes[0] as i8 as f32,
    }
}

fn encode(dtype: DType, value: f32, out: &mut Vec<u8>) {
    match dtype {
        DType::F32 => out.extend_from_slice(&value.to_le_bytes()),
        DType::F16 => out.extend_from_slice(&half::f16::from_f32(value).to_le_bytes()),
        DType::BF16 => out.extend_from_slice(&half::bf16::from_f32(value).to_le_bytes()),
        DType::I8 => out.push(value.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8 as u8),
    }
}
