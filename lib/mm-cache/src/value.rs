// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Hashable multimodal values.
//!
//! [`Value`] is a closed set of input kinds; every variant has exactly one
//! canonical encoding in [`crate::encoder`]. New kinds are added by extending
//! the enum and the encoder's match, never by runtime type inspection.

use bytes::Bytes;
use image::DynamicImage;
use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{MmCacheError, Result};
use crate::tensor::TensorData;

/// Ordered field set: the top-level input of the hasher and the resolver.
pub type Fields = IndexMap<String, Value>;

/// A numeric scalar. Integers and floats never share an encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Bytes(Bytes),
    Scalar(Scalar),
    /// Decoded image, normalized to RGBA8 when encoded.
    Image(DynamicImage),
    Tensor(TensorData),
    Array(TensorData),
    Sequence(Vec<Value>),
    /// Insertion-ordered; keys are not sorted before encoding.
    Mapping(IndexMap<String, Value>),
    Opaque(Opaque),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn bytes(b: impl Into<Bytes>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn sequence<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Sequence(items.into_iter().map(Into::into).collect())
    }

    pub fn mapping<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Short kind name, used in log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Scalar(_) => "scalar",
            Value::Image(_) => "image",
            Value::Tensor(_) => "tensor",
            Value::Array(_) => "array",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Opaque(_) => "opaque",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether encoding this value yields at least one leaf. Empty
    /// sequences and mappings, and nestings of them, yield none.
    pub fn has_leaves(&self) -> bool {
        let mut stack = vec![self];
        while let Some(value) = stack.pop() {
            match value {
                Value::Sequence(items) => stack.extend(items),
                Value::Mapping(entries) => stack.extend(entries.values()),
                _ => return true,
            }
        }
        false
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Scalar(Scalar::Int(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Scalar(Scalar::Int(v as i64))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(Scalar::Float(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Scalar(Scalar::Bool(v))
    }
}

impl From<DynamicImage> for Value {
    fn from(img: DynamicImage) -> Self {
        Value::Image(img)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Value::Opaque(o)
    }
}

/// Escape hatch for values without a canonical encoding.
///
/// The value is captured as JSON at construction. Object keys serialize in
/// sorted order, so the bytes depend only on the data. Whether the source
/// type itself serializes deterministically (no hash-map iteration order,
/// no addresses or timestamps) is something only the caller can vouch for:
/// [`Opaque::vetted`] records that promise, [`Opaque::new`] does not.
#[derive(Debug, Clone)]
pub struct Opaque {
    type_name: &'static str,
    body: serde_json::Value,
    vetted: bool,
}

impl Opaque {
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::capture(value, false)
    }

    /// Capture a value whose type is known to serialize deterministically.
    pub fn vetted<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::capture(value, true)
    }

    fn capture<T: Serialize + ?Sized>(value: &T, vetted: bool) -> Result<Self> {
        let type_name = std::any::type_name::<T>();
        let body = serde_json::to_value(value).map_err(|e| {
            MmCacheError::UnsupportedValue(format!("cannot serialize {type_name}: {e}"))
        })?;

        Ok(Self {
            type_name,
            body,
            vetted,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_vetted(&self) -> bool {
        self.vetted
    }

    pub(crate) fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.body).map_err(|e| {
            MmCacheError::UnsupportedValue(format!("cannot serialize {}: {e}", self.type_name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_conversions() {
        assert!(matches!(Value::from("a"), Value::Text(_)));
        assert!(matches!(Value::from(1i64), Value::Scalar(Scalar::Int(1))));
        assert!(matches!(Value::from(true), Value::Scalar(Scalar::Bool(true))));
        assert!(matches!(
            Value::sequence(["a", "b"]),
            Value::Sequence(ref items) if items.len() == 2
        ));
    }

    #[test]
    fn test_mapping_keeps_insertion_order() {
        let value = Value::mapping([("z", 1i64), ("a", 2i64)]);
        let Value::Mapping(map) = value else {
            panic!("expected mapping");
        };
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_has_leaves() {
        assert!(Value::text("").has_leaves());
        assert!(Value::bytes(Vec::<u8>::new()).has_leaves());
        assert!(!Value::Sequence(vec![]).has_leaves());
        assert!(!Value::mapping(Vec::<(String, Value)>::new()).has_leaves());

        let nested_empty = Value::sequence([
            Value::Sequence(vec![]),
            Value::mapping([("a", Value::Sequence(vec![]))]),
        ]);
        assert!(!nested_empty.has_leaves());

        let nested_leaf = Value::sequence([Value::Sequence(vec![]), Value::from(0i64)]);
        assert!(nested_leaf.has_leaves());
    }

    #[test]
    fn test_opaque_sorted_keys() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("k{i}"), i);
        }

        let a = Opaque::new(&first).unwrap().to_canonical_bytes().unwrap();
        let b = Opaque::new(&second).unwrap().to_canonical_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_opaque_rejects_non_string_keys() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);
        let result = Opaque::new(&map);
        assert!(matches!(result, Err(MmCacheError::UnsupportedValue(_))));
    }

    #[test]
    fn test_opaque_vetted_flag() {
        #[derive(Serialize)]
        struct Params {
            temperature: f32,
        }

        let params = Params { temperature: 0.5 };
        assert!(!Opaque::new(&params).unwrap().is_vetted());
        let vetted = Opaque::vetted(&params).unwrap();
        assert!(vetted.is_vetted());
        assert!(vetted.type_name().ends_with("Params"));
    }
}
