// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors raised while deriving cache keys or filling the media cache.
///
/// Cache lookups and inserts are infallible; only key derivation, opaque
/// serialization, configuration and external payload suppliers can fail.
#[derive(Debug, Error)]
pub enum MmCacheError {
    /// No cache key can be derived from the given input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A value has no canonical encoding, or its fallback serialization
    /// failed or was disallowed.
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The external payload supplier passed to `get_or_derive` failed.
    #[error("Media supplier failed: {0}")]
    Supplier(#[source] anyhow::Error),
}

impl From<String> for MmCacheError {
    fn from(s: String) -> Self {
        MmCacheError::InvalidConfig(s)
    }
}

impl From<derive_builder::UninitializedFieldError> for MmCacheError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        MmCacheError::InvalidConfig(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MmCacheError>;
