// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use bytesize::ByteSize;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{MmCacheError, Result};

/// One gibibyte, the unit the media cache capacity is usually expressed in.
pub const GIB_BYTES: usize = 1 << 30;

/// ENV used to override the media cache capacity ("2GiB", "512MiB", raw bytes)
pub const DYN_MM_CACHE_SIZE: &str = "DYN_MM_CACHE_SIZE";

/// Helper type for accepting both string sizes ("1GiB") and raw bytes (usize)
#[derive(Debug, Clone)]
pub enum SizeInput {
    Bytes(usize),
    Str(String),
}

impl SizeInput {
    /// Convert to bytes, parsing string if needed
    pub fn to_bytes(&self) -> std::result::Result<usize, String> {
        match self {
            Self::Bytes(b) => Ok(*b),
            Self::Str(s) => s
                .trim()
                .parse::<ByteSize>()
                .map(|bs| bs.as_u64() as usize)
                .map_err(|e| format!("invalid size format '{}': {}", s, e)),
        }
    }
}

impl From<usize> for SizeInput {
    fn from(v: usize) -> Self {
        Self::Bytes(v)
    }
}

impl From<&str> for SizeInput {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for SizeInput {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Configuration for [`crate::MediaCache`]
#[derive(Debug, Clone, Builder)]
#[builder(build_fn(validate = "Self::validate", error = "MmCacheError"))]
pub struct MediaCacheConfig {
    /// Total byte budget shared by all cached payloads
    #[builder(private, default = "GIB_BYTES", setter(name = "_capacity_bytes"))]
    pub capacity_bytes: usize,
}

impl MediaCacheConfigBuilder {
    /// Set the cache capacity (accepts "1GiB" or raw usize)
    pub fn capacity(&mut self, size: impl Into<SizeInput>) -> &mut Self {
        match size.into().to_bytes() {
            Ok(bytes) => {
                self.capacity_bytes = Some(bytes);
            }
            Err(e) => {
                tracing::warn!("Invalid media cache capacity: {}", e);
                self.capacity_bytes = Some(0); // Will fail validation
            }
        }
        self
    }

    /// Set the cache capacity in (possibly fractional) gibibytes
    pub fn capacity_gb(&mut self, gb: f64) -> &mut Self {
        self.capacity_bytes = Some((GIB_BYTES as f64 * gb) as usize);
        self
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.capacity_bytes.unwrap_or(GIB_BYTES) == 0 {
            return Err("capacity must be greater than 0".into());
        }
        Ok(())
    }
}

impl MediaCacheConfig {
    /// Read the capacity from `DYN_MM_CACHE_SIZE`, defaulting to 1GiB when
    /// the variable is not set.
    pub fn from_env() -> Result<Self> {
        let mut builder = MediaCacheConfigBuilder::default();
        if let Ok(size) = std::env::var(DYN_MM_CACHE_SIZE) {
            builder.capacity(size);
        }
        builder.build()
    }
}

impl Default for MediaCacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: GIB_BYTES,
        }
    }
}

/// Byte layout used when feeding encoded segments into the hasher.
///
/// Changing the scheme changes every digest; it is selected explicitly and
/// never switched under existing callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashScheme {
    /// Label bytes then payload bytes, no separators.
    #[default]
    Concat,
    /// Every label and payload prefixed by its length as a little-endian u64.
    LengthPrefixed,
}

/// What to do when an unvetted [`crate::Opaque`] value is hashed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpaquePolicy {
    Allow,
    /// Hash it, but log a warning naming the type.
    #[default]
    Warn,
    /// Fail with [`MmCacheError::UnsupportedValue`].
    Deny,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HasherConfig {
    #[serde(default)]
    pub scheme: HashScheme,
    #[serde(default)]
    pub opaque_policy: OpaquePolicy,
}
