// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Byte-weighted LRU cache of decoded media shared across requests.
//!
//! One [`MediaCache`] is created at startup and handed to every component
//! that needs it as an `Arc<MediaCache>`. A single mutex guards the LRU
//! index and the running byte total; it is never held while a payload is
//! being fetched or decoded.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;
use lru::LruCache;
use parking_lot::Mutex;

use crate::config::{GIB_BYTES, MediaCacheConfig};
use crate::error::{MmCacheError, Result};
use crate::hasher::hash_url;
use crate::resolver::CacheKey;
use crate::stats::CacheStats;
use crate::tensor::TensorData;

/// Decoded media held by the cache.
#[derive(Debug, Clone)]
pub enum MediaData {
    Bytes(Bytes),
    Text(String),
    Image(DynamicImage),
    Tensor(TensorData),
}

impl MediaData {
    /// Footprint estimate used for capacity accounting. Depends only on the
    /// payload, so the same payload always reports the same size.
    pub fn size_bytes(&self) -> usize {
        match self {
            MediaData::Bytes(b) => b.len(),
            MediaData::Text(s) => s.len(),
            MediaData::Image(img) => img.as_bytes().len(),
            MediaData::Tensor(t) => t.size_bytes(),
        }
    }
}

impl From<Bytes> for MediaData {
    fn from(b: Bytes) -> Self {
        MediaData::Bytes(b)
    }
}

impl From<Vec<u8>> for MediaData {
    fn from(v: Vec<u8>) -> Self {
        MediaData::Bytes(Bytes::from(v))
    }
}

impl From<String> for MediaData {
    fn from(s: String) -> Self {
        MediaData::Text(s)
    }
}

impl From<DynamicImage> for MediaData {
    fn from(img: DynamicImage) -> Self {
        MediaData::Image(img)
    }
}

impl From<TensorData> for MediaData {
    fn from(t: TensorData) -> Self {
        MediaData::Tensor(t)
    }
}

struct CacheEntry {
    payload: Arc<MediaData>,
    size_bytes: usize,
}

/// Entries pushed out by an insert.
struct Displaced {
    replaced: Option<CacheEntry>,
    evicted: Vec<CacheEntry>,
}

struct Inner {
    entries: LruCache<CacheKey, CacheEntry>,
    total_bytes: usize,
}

pub struct MediaCache {
    inner: Mutex<Inner>,
    capacity: usize,
    stats: CacheStats,
}

impl MediaCache {
    /// Create a cache holding at most `capacity_bytes` of payload (a single
    /// larger payload is still admitted on its own).
    pub fn new(capacity_bytes: usize) -> Self {
        tracing::debug!(capacity_bytes, "Media cache created");
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            capacity: capacity_bytes,
            stats: CacheStats::new(),
        }
    }

    pub fn with_capacity_gb(capacity_gb: f64) -> Self {
        Self::new((GIB_BYTES as f64 * capacity_gb) as usize)
    }

    pub fn from_config(config: &MediaCacheConfig) -> Self {
        Self::new(config.capacity_bytes)
    }

    /// Look up `key`, promoting it to most recently used on a hit.
    pub fn get(&self, key: &str) -> Option<Arc<MediaData>> {
        let hit = self
            .inner
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.payload.clone());

        match hit {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        hit
    }

    /// Insert or replace `key` as most recently used, then evict least
    /// recently used entries until the total fits the capacity.
    ///
    /// A payload larger than the whole capacity is kept alone: everything
    /// else is evicted, and it goes with the next insert.
    pub fn put(&self, key: impl Into<CacheKey>, payload: impl Into<Arc<MediaData>>) {
        let key = key.into();
        let payload = payload.into();
        let size_bytes = payload.size_bytes();

        if size_bytes > self.capacity {
            tracing::warn!(
                key = %key,
                size_bytes,
                capacity = self.capacity,
                "Media payload exceeds cache capacity, caching it alone"
            );
        }

        let displaced = self.insert(
            key,
            CacheEntry {
                payload,
                size_bytes,
            },
        );

        if displaced.replaced.is_some() {
            tracing::trace!(size_bytes, "Replaced cached media");
        }
        let evicted = displaced.evicted.len() as u64;
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted least recently used media");
        }
        self.stats.record_insert(evicted);
    }

    // Index mutation only; displaced payloads are returned so they are
    // dropped after the lock is released.
    fn insert(&self, key: CacheKey, entry: CacheEntry) -> Displaced {
        let mut inner = self.inner.lock();
        let size_bytes = entry.size_bytes;

        let replaced = inner.entries.put(key, entry);
        if let Some(old) = &replaced {
            inner.total_bytes -= old.size_bytes;
        }
        inner.total_bytes += size_bytes;

        let mut evicted = Vec::new();
        while inner.total_bytes > self.capacity && inner.entries.len() > 1 {
            let Some((_, lru)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_bytes -= lru.size_bytes;
            evicted.push(lru);
        }

        Displaced { replaced, evicted }
    }

    /// Remove `key`, returning its payload if it was cached.
    pub fn remove(&self, key: &str) -> Option<Arc<MediaData>> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.pop(key)?;
        inner.total_bytes -= entry.size_bytes;
        Some(entry.payload)
    }

    /// Check for `key` without touching its recency.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains(key)
    }

    pub fn clear(&self) {
        let cleared = self.take_all();
        tracing::debug!(entries = cleared.len(), "Media cache cleared");
    }

    fn take_all(&self) -> LruCache<CacheKey, CacheEntry> {
        let mut inner = self.inner.lock();
        inner.total_bytes = 0;
        std::mem::replace(&mut inner.entries, LruCache::unbounded())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Return the media for `uuid` (preferred) or `url`, calling `supplier`
    /// to produce and cache it on a miss.
    ///
    /// The supplier runs without the cache lock, so a slow fetch or decode
    /// never blocks lookups of other keys. Concurrent misses on the same key
    /// may each run the supplier; the last insert wins.
    pub fn get_or_derive<F>(
        &self,
        uuid: Option<&str>,
        url: Option<&str>,
        supplier: F,
    ) -> Result<Arc<MediaData>>
    where
        F: FnOnce() -> anyhow::Result<MediaData>,
    {
        let key = Self::media_key(uuid, url)?;
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }

        let payload = Arc::new(supplier().map_err(MmCacheError::Supplier)?);
        tracing::debug!(key = %key, size_bytes = payload.size_bytes(), "Filled media cache miss");
        self.put(key, payload.clone());
        Ok(payload)
    }

    /// [`MediaCache::get_or_derive`] for async suppliers such as a fetch
    /// followed by a decode on a blocking pool.
    pub async fn get_or_derive_async<F, Fut>(
        &self,
        uuid: Option<&str>,
        url: Option<&str>,
        supplier: F,
    ) -> Result<Arc<MediaData>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<MediaData>>,
    {
        let key = Self::media_key(uuid, url)?;
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }

        let payload = Arc::new(supplier().await.map_err(MmCacheError::Supplier)?);
        tracing::debug!(key = %key, size_bytes = payload.size_bytes(), "Filled media cache miss");
        self.put(key, payload.clone());
        Ok(payload)
    }

    /// Key for a single media item: the UUID itself, else the URL hash.
    pub fn media_key(uuid: Option<&str>, url: Option<&str>) -> Result<CacheKey> {
        match (uuid.filter(|u| !u.is_empty()), url.filter(|u| !u.is_empty())) {
            (Some(uuid), _) => Ok(uuid.to_string()),
            (None, Some(url)) => Ok(hash_url(url)),
            (None, None) => Err(MmCacheError::InvalidInput(
                "either a media uuid or url must be provided".into(),
            )),
        }
    }
}

impl Default for MediaCache {
    fn default() -> Self {
        Self::from_config(&MediaCacheConfig::default())
    }
}

impl std::fmt::Debug for MediaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MediaCache")
            .field("capacity", &self.capacity)
            .field("total_bytes", &inner.total_bytes)
            .field("entries", &inner.entries.len())
            .finish()
    }
}
