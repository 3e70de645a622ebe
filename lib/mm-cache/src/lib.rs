// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! # Multimodal cache keys and media cache
//!
//! Deduplicates media work across inference requests:
//! - Canonical byte encoding of structured request values (text, bytes,
//!   scalars, images, tensors, nested sequences and mappings)
//! - BLAKE3 digests over that encoding
//! - Cache key resolution: caller UUIDs first, then a URL shortcut, then a
//!   full content digest
//! - A byte-weighted LRU cache of decoded media
//!
//! ## Example
//!
//! ```no_run
//! use dynamo_mm_cache::{Fields, MediaCache, MediaCacheConfigBuilder, MediaData, Value, resolve_keys};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MediaCacheConfigBuilder::default().capacity("2GiB").build()?;
//! let cache = Arc::new(MediaCache::from_config(&config));
//!
//! let mut fields = Fields::new();
//! fields.insert("image_url".into(), Value::text("https://example.com/cat.png"));
//! let keys = resolve_keys(&fields)?;
//!
//! let media = cache.get_or_derive(None, Some("https://example.com/cat.png"), || {
//!     Ok(MediaData::Bytes(std::fs::read("cat.png")?.into()))
//! })?;
//! println!("{} keys, {} bytes cached", keys.len(), media.size_bytes());
//! # Ok(())
//! # }
//! ```

mod config;
mod encoder;
mod error;
mod hasher;
mod media_cache;
mod resolver;
mod stats;
mod tensor;
mod value;

pub use config::{
    DYN_MM_CACHE_SIZE, GIB_BYTES, HashScheme, HasherConfig, MediaCacheConfig,
    MediaCacheConfigBuilder, OpaquePolicy, SizeInput,
};
pub use encoder::{Encoder, Segment, Segments};
pub use error::{MmCacheError, Result};
pub use hasher::{Digest, MultiModalHasher, hash_kwargs, hash_url};
pub use media_cache::{MediaCache, MediaData};
pub use resolver::{CacheKey, DEFAULT_MODALITIES, KeyResolver, resolve_keys};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use tensor::{DType, TensorData, TensorElement};
pub use value::{Fields, Opaque, Scalar, Value};
