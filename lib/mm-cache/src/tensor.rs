// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Dense numeric buffers with an explicit dtype and shape.
//!
//! [`TensorData`] is the hashing-side counterpart of decoded media: raw
//! little-endian element bytes plus the metadata needed to reproduce the
//! logical row-major layout. Buffers may be strided views into a larger
//! allocation; the encoder gathers those into a contiguous copy.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use ndarray::{ArrayBase, Data, Dimension};

use crate::error::{MmCacheError, Result};

/// Element type of a [`TensorData`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F16,
    F32,
    F64,
}

impl DType {
    /// Size of a single element in bytes.
    pub const fn item_size(self) -> usize {
        match self {
            DType::Bool | DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 | DType::F16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    /// NumPy-style type string (byte order, kind, item size).
    ///
    /// This string is part of the canonical encoding and must never change
    /// for an existing variant.
    pub const fn type_str(self) -> &'static str {
        match self {
            DType::Bool => "|b1",
            DType::U8 => "|u1",
            DType::I8 => "|i1",
            DType::U16 => "<u2",
            DType::I16 => "<i2",
            DType::U32 => "<u4",
            DType::I32 => "<i4",
            DType::U64 => "<u8",
            DType::I64 => "<i8",
            DType::F16 => "<f2",
            DType::F32 => "<f4",
            DType::F64 => "<f8",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_str())
    }
}

/// Element types that can be copied out of an `ndarray` array.
pub trait TensorElement: Copy {
    const DTYPE: DType;

    fn write_le(&self, out: &mut Vec<u8>);
}

macro_rules! impl_tensor_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl TensorElement for $ty {
                const DTYPE: DType = DType::$dtype;

                #[inline]
                fn write_le(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_tensor_element!(
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
);

impl TensorElement for bool {
    const DTYPE: DType = DType::Bool;

    #[inline]
    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }
}

/// A dense numeric buffer: dtype tag, shape, and raw little-endian bytes.
#[derive(Clone, Debug)]
pub struct TensorData {
    dtype: DType,
    shape: Vec<usize>,
    // element strides; None means C-contiguous starting at `offset`
    strides: Option<Vec<isize>>,
    offset: usize,
    data: Bytes,
}

impl TensorData {
    /// Wrap a C-contiguous buffer.
    pub fn new(dtype: DType, shape: Vec<usize>, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = checked_size_bytes(dtype, &shape)?;
        if data.len() != expected {
            return Err(MmCacheError::InvalidInput(format!(
                "buffer of {} bytes does not match shape {:?} with dtype {} ({} bytes)",
                data.len(),
                shape,
                dtype,
                expected
            )));
        }

        Ok(Self {
            dtype,
            shape,
            strides: None,
            offset: 0,
            data,
        })
    }

    /// Wrap a strided view into `data`.
    ///
    /// `strides` and `offset` are expressed in elements, not bytes. Negative
    /// strides are allowed as long as every addressed element lies inside
    /// the buffer.
    pub fn strided(
        dtype: DType,
        shape: Vec<usize>,
        strides: Vec<isize>,
        offset: usize,
        data: impl Into<Bytes>,
    ) -> Result<Self> {
        let data = data.into();
        if strides.len() != shape.len() {
            return Err(MmCacheError::InvalidInput(format!(
                "strides {:?} do not match rank of shape {:?}",
                strides, shape
            )));
        }

        let item_size = dtype.item_size();
        if data.len() % item_size != 0 {
            return Err(MmCacheError::InvalidInput(format!(
                "buffer of {} bytes is not a multiple of dtype {} item size",
                data.len(),
                dtype
            )));
        }

        if checked_size_bytes(dtype, &shape)? > 0 {
            let out_of_bounds = || {
                MmCacheError::InvalidInput(format!(
                    "strided view (shape {:?}, strides {:?}, offset {}) exceeds buffer of {} elements",
                    shape,
                    strides,
                    offset,
                    data.len() / item_size
                ))
            };

            // buffers never exceed isize::MAX bytes, so the element count fits
            let capacity = (data.len() / item_size) as isize;
            let mut lowest = isize::try_from(offset).map_err(|_| out_of_bounds())?;
            let mut highest = lowest;
            for (&dim, &stride) in shape.iter().zip(&strides) {
                let span = isize::try_from(dim - 1)
                    .ok()
                    .and_then(|extent| stride.checked_mul(extent))
                    .ok_or_else(out_of_bounds)?;
                if span < 0 {
                    lowest = lowest.checked_add(span).ok_or_else(out_of_bounds)?;
                } else {
                    highest = highest.checked_add(span).ok_or_else(out_of_bounds)?;
                }
            }
            if lowest < 0 || highest >= capacity {
                return Err(out_of_bounds());
            }
        }

        Ok(Self {
            dtype,
            shape,
            strides: Some(strides),
            offset,
            data,
        })
    }

    /// Copy an `ndarray` array in logical row-major order, whatever its
    /// memory layout.
    pub fn from_ndarray<A, S, D>(array: &ArrayBase<S, D>) -> Self
    where
        A: TensorElement,
        S: Data<Elem = A>,
        D: Dimension,
    {
        let mut bytes = Vec::with_capacity(array.len() * A::DTYPE.item_size());
        for elem in array.iter() {
            elem.write_le(&mut bytes);
        }

        Self {
            dtype: A::DTYPE,
            shape: array.shape().to_vec(),
            strides: None,
            offset: 0,
            data: Bytes::from(bytes),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn num_elements(&self) -> usize {
        num_elements(&self.shape)
    }

    /// Logical size of the tensor in bytes (excludes unused strided gaps).
    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype.item_size()
    }

    /// Whether the logical elements are laid out contiguously in row-major
    /// order. Strides of unit-length dimensions are ignored.
    pub fn is_contiguous(&self) -> bool {
        let Some(strides) = &self.strides else {
            return true;
        };

        let mut expected: isize = 1;
        for (&dim, &stride) in self.shape.iter().zip(strides).rev() {
            if dim > 1 && stride != expected {
                return false;
            }
            expected *= dim as isize;
        }
        true
    }

    /// Row-major element bytes. Borrowed when the buffer is already
    /// contiguous, otherwise gathered into a fresh allocation.
    pub fn contiguous_bytes(&self) -> Cow<'_, [u8]> {
        let item_size = self.dtype.item_size();
        let numel = self.num_elements();

        if numel == 0 {
            return Cow::Borrowed(&[]);
        }

        if self.is_contiguous() {
            let start = self.offset * item_size;
            return Cow::Borrowed(&self.data[start..start + numel * item_size]);
        }

        // is_contiguous() is only false for explicit strides
        let strides = self.strides.as_deref().unwrap_or_default();
        let mut out = Vec::with_capacity(numel * item_size);
        let mut index = vec![0usize; self.shape.len()];
        for _ in 0..numel {
            let elem = self.offset as isize
                + index
                    .iter()
                    .zip(strides)
                    .map(|(&i, &s)| i as isize * s)
                    .sum::<isize>();
            let start = elem as usize * item_size;
            out.extend_from_slice(&self.data[start..start + item_size]);

            // advance the row-major multi-index
            for axis in (0..index.len()).rev() {
                index[axis] += 1;
                if index[axis] < self.shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        Cow::Owned(out)
    }
}

// Only called on shapes already validated by `checked_size_bytes`.
fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Byte size of a dense `shape`, rejecting shapes whose element count or
/// byte size cannot be addressed.
fn checked_size_bytes(dtype: DType, shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .and_then(|numel| numel.checked_mul(dtype.item_size()))
        .filter(|&bytes| bytes <= isize::MAX as usize)
        .ok_or_else(|| {
            MmCacheError::InvalidInput(format!(
                "shape {:?} with dtype {} is too large to address",
                shape, dtype
            ))
        })
}
