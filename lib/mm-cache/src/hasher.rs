// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! BLAKE3 digests over canonical value encodings.

use blake3::Hasher;

use crate::config::{HashScheme, HasherConfig};
use crate::encoder::Encoder;
use crate::error::Result;
use crate::value::{Fields, Value};

/// Lowercase hex BLAKE3 digest (64 characters).
pub type Digest = String;

/// Streaming hasher for keyword-style field sets.
///
/// Fields are hashed in the order given. Callers must pass them in a stable
/// order, so logically identical requests produce identical digests.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiModalHasher {
    config: HasherConfig,
}

impl MultiModalHasher {
    pub fn new(config: HasherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HasherConfig {
        &self.config
    }

    /// Digest an ordered sequence of `(name, value)` pairs.
    pub fn hash_kwargs<'a, I>(&self, kwargs: I) -> Result<Digest>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let encoder = Encoder::new(self.config.opaque_policy);
        let mut hasher = Hasher::new();

        for (name, value) in kwargs {
            for segment in encoder.encode(name, value) {
                let segment = segment?;
                self.update(&mut hasher, segment.label.as_bytes());
                self.update(&mut hasher, &segment.payload);
            }
        }

        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Digest every entry of `fields` in insertion order.
    pub fn hash_fields(&self, fields: &Fields) -> Result<Digest> {
        self.hash_kwargs(fields.iter().map(|(k, v)| (k.as_str(), v)))
    }

    #[inline]
    fn update(&self, hasher: &mut Hasher, bytes: &[u8]) {
        if self.config.scheme == HashScheme::LengthPrefixed {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
        }
        hasher.update(bytes);
    }
}

/// [`MultiModalHasher::hash_kwargs`] with the default configuration.
pub fn hash_kwargs<'a, I>(kwargs: I) -> Result<Digest>
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    MultiModalHasher::default().hash_kwargs(kwargs)
}

/// BLAKE3 hex digest of a URL string, used as the cache key for media
/// referenced by URL.
pub fn hash_url(url: &str) -> Digest {
    blake3::hash(url.as_bytes()).to_hex().to_string()
}
