// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Canonical byte encoding of [`Value`] trees.
//!
//! A value is flattened into an ordered stream of [`Segment`]s, one per leaf.
//! Each segment carries the dotted path of the leaf (`field.2.sub`) and the
//! leaf's fixed per-kind payload. The path keeps structurally different
//! inputs apart even when their leaves concatenate to the same bytes, e.g.
//! `["ab"]` and `["a", "b"]`.
//!
//! Leaf payloads:
//!
//! | kind            | payload                                                    |
//! |-----------------|------------------------------------------------------------|
//! | text            | UTF-8 bytes                                                |
//! | bytes           | the bytes, borrowed                                        |
//! | scalar          | type string (`<i8`, `<f8`, `\|b1`) + little-endian value    |
//! | array           | `ndarray.dtype` typestr, `ndarray.shape.<i>` dims, `ndarray.data` bytes |
//! | tensor          | `tensor` + array payload                                   |
//! | image           | `image` + array payload of the `(h, w, 4)` RGBA8 pixels    |
//! | opaque          | sorted-key JSON, subject to [`OpaquePolicy`]                |

use std::borrow::Cow;

use image::DynamicImage;

use crate::config::OpaquePolicy;
use crate::error::{MmCacheError, Result};
use crate::tensor::{DType, TensorData};
use crate::value::{Opaque, Scalar, Value};

/// One encoded leaf: its path label and canonical payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub label: String,
    pub payload: Cow<'a, [u8]>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder {
    opaque_policy: OpaquePolicy,
}

impl Encoder {
    pub fn new(opaque_policy: OpaquePolicy) -> Self {
        Self { opaque_policy }
    }

    /// Lazily flatten `value` into leaf segments rooted at `label`.
    ///
    /// Sequences expand element `i` under `label.i`; mappings expand key `k`
    /// under `label.k` in insertion order. Empty containers yield nothing.
    pub fn encode<'a>(&self, label: impl Into<String>, value: &'a Value) -> Segments<'a> {
        Segments {
            stack: vec![(label.into(), value)],
            opaque_policy: self.opaque_policy,
        }
    }

    /// Concatenate `label ‖ payload` for every segment of `value`.
    pub fn item_to_bytes(&self, label: impl Into<String>, value: &Value) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for segment in self.encode(label, value) {
            let segment = segment?;
            out.extend_from_slice(segment.label.as_bytes());
            out.extend_from_slice(&segment.payload);
        }
        Ok(out)
    }
}

/// Iterator returned by [`Encoder::encode`]. Stops after the first error.
pub struct Segments<'a> {
    stack: Vec<(String, &'a Value)>,
    opaque_policy: OpaquePolicy,
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<Segment<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((label, value)) = self.stack.pop() {
            match value {
                Value::Sequence(items) => {
                    // reversed so the first element is popped first
                    for (i, item) in items.iter().enumerate().rev() {
                        self.stack.push((format!("{label}.{i}"), item));
                    }
                }
                Value::Mapping(entries) => {
                    for (key, item) in entries.iter().rev() {
                        self.stack.push((format!("{label}.{key}"), item));
                    }
                }
                leaf => {
                    let result = serialize_leaf(leaf, self.opaque_policy);
                    if result.is_err() {
                        self.stack.clear();
                    }
                    return Some(result.map(|payload| Segment { label, payload }));
                }
            }
        }
        None
    }
}

fn serialize_leaf(value: &Value, opaque_policy: OpaquePolicy) -> Result<Cow<'_, [u8]>> {
    let payload = match value {
        Value::Text(s) => Cow::Borrowed(s.as_bytes()),
        Value::Bytes(b) => Cow::Borrowed(b.as_ref()),
        Value::Scalar(scalar) => Cow::Owned(scalar_bytes(*scalar)),
        Value::Image(img) => Cow::Owned(image_bytes(img)),
        Value::Tensor(tensor) => {
            let mut out = b"tensor".to_vec();
            out.extend(array_bytes(tensor));
            Cow::Owned(out)
        }
        Value::Array(array) => Cow::Owned(array_bytes(array)),
        Value::Opaque(opaque) => Cow::Owned(opaque_bytes(opaque, opaque_policy)?),
        Value::Sequence(_) | Value::Mapping(_) => {
            return Err(MmCacheError::UnsupportedValue(format!(
                "{} is not a leaf value",
                value.kind()
            )));
        }
    };
    Ok(payload)
}

fn scalar_bytes(scalar: Scalar) -> Vec<u8> {
    let mut out = Vec::with_capacity(11);
    match scalar {
        Scalar::Int(v) => {
            out.extend_from_slice(DType::I64.type_str().as_bytes());
            out.extend_from_slice(&v.to_le_bytes());
        }
        Scalar::Float(v) => {
            out.extend_from_slice(DType::F64.type_str().as_bytes());
            out.extend_from_slice(&v.to_le_bytes());
        }
        Scalar::Bool(v) => {
            out.extend_from_slice(DType::Bool.type_str().as_bytes());
            out.push(v as u8);
        }
    }
    out
}

/// Images hash by their RGBA8 pixels so that the same picture decoded from
/// RGB, RGBA or palette sources yields the same payload.
fn image_bytes(img: &DynamicImage) -> Vec<u8> {
    let rgba = img.to_rgba8();
    let shape = [rgba.height() as usize, rgba.width() as usize, 4];

    let mut out = b"image".to_vec();
    out.extend(compound_array_bytes(DType::U8, &shape, rgba.as_raw()));
    out
}

fn array_bytes(tensor: &TensorData) -> Vec<u8> {
    let data = tensor.contiguous_bytes();
    compound_array_bytes(tensor.dtype(), tensor.shape(), &data)
}

// Flattened form of the mapping {dtype, shape: [..], data} labelled `ndarray`.
fn compound_array_bytes(dtype: DType, shape: &[usize], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 32 * (shape.len() + 3));
    out.extend_from_slice(b"ndarray.dtype");
    out.extend_from_slice(dtype.type_str().as_bytes());
    for (i, &dim) in shape.iter().enumerate() {
        out.extend_from_slice(format!("ndarray.shape.{i}").as_bytes());
        out.extend(scalar_bytes(Scalar::Int(dim as i64)));
    }
    out.extend_from_slice(b"ndarray.data");
    out.extend_from_slice(data);
    out
}

fn opaque_bytes(opaque: &Opaque, policy: OpaquePolicy) -> Result<Vec<u8>> {
    if !opaque.is_vetted() {
        match policy {
            OpaquePolicy::Allow => {}
            OpaquePolicy::Warn => {
                tracing::warn!(
                    type_name = opaque.type_name(),
                    "No canonical encoding for value. Falling back to JSON serialization."
                );
            }
            OpaquePolicy::Deny => {
                return Err(MmCacheError::UnsupportedValue(format!(
                    "{} has no canonical encoding and is not vetted for deterministic serialization",
                    opaque.type_name()
                )));
            }
        }
    }
    opaque.to_canonical_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};
    use ndarray::Array2;

    fn labels(value: &Value) -> Vec<String> {
        Encoder::default()
            .encode("x", value)
            .map(|s| s.unwrap().label)
            .collect()
    }

    #[test]
    fn test_nested_labels() {
        let value = Value::mapping([
            ("a", Value::sequence(["p", "q"])),
            ("b", Value::mapping([("c", 1i64)])),
        ]);
        assert_eq!(labels(&value), vec!["x.a.0", "x.a.1", "x.b.c"]);
    }

    #[test]
    fn test_empty_containers_yield_nothing() {
        assert!(labels(&Value::Sequence(vec![])).is_empty());
        assert!(labels(&Value::mapping(Vec::<(String, Value)>::new())).is_empty());
    }

    #[test]
    fn test_text_and_bytes_are_borrowed() {
        let text = Value::text("hello");
        let segment = Encoder::default().encode("t", &text).next().unwrap().unwrap();
        assert_eq!(segment.label, "t");
        assert!(matches!(segment.payload, Cow::Borrowed(b"hello")));

        let bytes = Value::bytes(vec![1u8, 2, 3]);
        let segment = Encoder::default().encode("b", &bytes).next().unwrap().unwrap();
        assert!(matches!(segment.payload, Cow::Borrowed(_)));
        assert_eq!(segment.payload.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_scalar_tagging() {
        let int = scalar_bytes(Scalar::Int(1));
        let float = scalar_bytes(Scalar::Float(1.0));
        assert_ne!(int, float);
        assert_eq!(&int[..3], b"<i8");
        assert_eq!(&int[3..], &1i64.to_le_bytes());

        // zero has an all-zero bit pattern in both representations
        assert_ne!(scalar_bytes(Scalar::Int(0)), scalar_bytes(Scalar::Float(0.0)));
        assert_ne!(scalar_bytes(Scalar::Bool(true)), scalar_bytes(Scalar::Int(1)));
    }

    #[test]
    fn test_array_payload_layout() {
        let array = Array2::from_shape_vec((1, 2), vec![7u8, 8]).unwrap();
        let value = Value::Array(TensorData::from_ndarray(&array));
        let payload = Encoder::default().item_to_bytes("", &value).unwrap();

        let mut expected = b"ndarray.dtype|u1".to_vec();
        expected.extend_from_slice(b"ndarray.shape.0<i8");
        expected.extend_from_slice(&1i64.to_le_bytes());
        expected.extend_from_slice(b"ndarray.shape.1<i8");
        expected.extend_from_slice(&2i64.to_le_bytes());
        expected.extend_from_slice(b"ndarray.data");
        expected.extend_from_slice(&[7, 8]);
        assert_eq!(payload, expected);
    }

    #[test]
    fn test_tensor_and_array_are_distinct() {
        let array = Array2::<f32>::zeros((2, 2));
        let tensor = TensorData::from_ndarray(&array);
        let encoder = Encoder::default();

        let as_tensor = encoder.item_to_bytes("x", &Value::Tensor(tensor.clone())).unwrap();
        let as_array = encoder.item_to_bytes("x", &Value::Array(tensor)).unwrap();
        assert_ne!(as_tensor, as_array);
        assert!(as_tensor.starts_with(b"xtensorndarray.dtype<f4"));
    }

    #[test]
    fn test_strided_array_matches_contiguous() {
        let contiguous = TensorData::new(DType::U8, vec![3, 2], vec![1u8, 4, 2, 5, 3, 6]).unwrap();
        let strided =
            TensorData::strided(DType::U8, vec![3, 2], vec![1, 3], 0, vec![1u8, 2, 3, 4, 5, 6])
                .unwrap();

        let encoder = Encoder::default();
        assert_eq!(
            encoder.item_to_bytes("a", &Value::Array(contiguous)).unwrap(),
            encoder.item_to_bytes("a", &Value::Array(strided)).unwrap()
        );
    }

    #[test]
    fn test_image_normalized_to_rgba() {
        let rgb = ImageBuffer::from_pixel(2, 3, Rgb([10u8, 20, 30]));
        let rgba = ImageBuffer::from_pixel(2, 3, Rgba([10u8, 20, 30, 255]));

        let a = image_bytes(&DynamicImage::ImageRgb8(rgb));
        let b = image_bytes(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(a, b);
        assert!(a.starts_with(b"imagendarray.dtype|u1"));
        assert!(a.ends_with(&[10, 20, 30, 255]));
        // three "ndarray.shape.<i><i8" dims, then 3 rows x 2 columns x 4 channels
        assert_eq!(a.len(), b"imagendarray.dtype|u1".len() + 3 * 26 + 12 + 24);
    }

    #[test]
    fn test_opaque_policy() {
        #[derive(serde::Serialize)]
        struct Custom {
            id: u32,
        }
        let value = Value::Opaque(Opaque::new(&Custom { id: 7 }).unwrap());

        let denied = Encoder::new(OpaquePolicy::Deny).item_to_bytes("o", &value);
        assert!(matches!(denied, Err(MmCacheError::UnsupportedValue(_))));

        let allowed = Encoder::new(OpaquePolicy::Allow).item_to_bytes("o", &value).unwrap();
        assert_eq!(allowed, br#"o{"id":7}"#.to_vec());

        let warned = Encoder::new(OpaquePolicy::Warn).item_to_bytes("o", &value).unwrap();
        assert_eq!(allowed, warned);

        let vetted = Value::Opaque(Opaque::vetted(&Custom { id: 7 }).unwrap());
        assert!(Encoder::new(OpaquePolicy::Deny).item_to_bytes("o", &vetted).is_ok());
    }

    #[test]
    fn test_error_stops_iteration() {
        #[derive(serde::Serialize)]
        struct Custom;
        let value = Value::sequence([
            Value::Opaque(Opaque::new(&Custom).unwrap()),
            Value::text("after"),
        ]);

        let mut segments = Encoder::new(OpaquePolicy::Deny).encode("s", &value);
        assert!(segments.next().unwrap().is_err());
        assert!(segments.next().is_none());
    }
}
