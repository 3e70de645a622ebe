// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cache key derivation for multimodal request fields.
//!
//! Resolution order:
//! 1. `<modality>_uuids` fields: caller-asserted identifiers, used verbatim.
//! 2. Otherwise one digest over all fields, where `*_url` fields contribute
//!    their URL string only. The URL is never fetched, so two requests that
//!    reference the same URL share a key even if the remote content changed.

use crate::error::{MmCacheError, Result};
use crate::hasher::MultiModalHasher;
use crate::value::{Fields, Value};

/// Key into the media cache: a caller UUID, a URL hash or a content digest.
pub type CacheKey = String;

pub const DEFAULT_MODALITIES: [&str; 3] = ["image", "video", "audio"];

const UUIDS_SUFFIX: &str = "_uuids";
const URL_SUFFIX: &str = "_url";

#[derive(Debug, Clone)]
pub struct KeyResolver {
    modalities: Vec<String>,
    hasher: MultiModalHasher,
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self::new(MultiModalHasher::default())
    }
}

impl KeyResolver {
    pub fn new(hasher: MultiModalHasher) -> Self {
        Self {
            modalities: DEFAULT_MODALITIES.iter().map(|m| m.to_string()).collect(),
            hasher,
        }
    }

    /// Register an additional modality whose `<modality>_uuids` field is
    /// honored. Registering an existing modality is a no-op.
    pub fn with_modality(mut self, modality: impl Into<String>) -> Self {
        let modality = modality.into();
        if !self.modalities.contains(&modality) {
            self.modalities.push(modality);
        }
        self
    }

    pub fn modalities(&self) -> &[String] {
        &self.modalities
    }

    /// Derive the cache keys for a request's multimodal fields.
    ///
    /// Returns the UUIDs of every modality (modality order, then element
    /// order) when any are present, else a single content digest.
    pub fn resolve_keys(&self, fields: &Fields) -> Result<Vec<CacheKey>> {
        let keys = self.uuid_keys(fields)?;
        if !keys.is_empty() {
            tracing::trace!(
                count = keys.len(),
                "Using caller-supplied media UUIDs as cache keys"
            );
            return Ok(keys);
        }

        // an all-empty field set would hash zero bytes and collide with every other one
        if !fields.values().any(Value::has_leaves) {
            return Err(MmCacheError::InvalidInput(
                "no UUIDs or hashable fields to derive a cache key from".into(),
            ));
        }

        Ok(vec![self.hash_with_url_shortcut(fields)?])
    }

    fn uuid_keys(&self, fields: &Fields) -> Result<Vec<CacheKey>> {
        let mut keys = Vec::new();
        for modality in &self.modalities {
            let field = format!("{modality}{UUIDS_SUFFIX}");
            let Some(value) = fields.get(&field) else {
                continue;
            };

            // empty identifiers count as absent, as in MediaCache::media_key
            match value {
                Value::Text(uuid) if uuid.is_empty() => {}
                Value::Text(uuid) => keys.push(uuid.clone()),
                Value::Sequence(items) => {
                    for item in items {
                        let uuid = item.as_text().ok_or_else(|| {
                            MmCacheError::InvalidInput(format!(
                                "{field} must contain strings, found {}",
                                item.kind()
                            ))
                        })?;
                        if !uuid.is_empty() {
                            keys.push(uuid.to_string());
                        }
                    }
                }
                other => {
                    return Err(MmCacheError::InvalidInput(format!(
                        "{field} must be a string or a list of strings, found {}",
                        other.kind()
                    )));
                }
            }
        }
        Ok(keys)
    }

    fn hash_with_url_shortcut(&self, fields: &Fields) -> Result<CacheKey> {
        let kwargs = fields.iter().map(|(name, value)| {
            if is_url_reference(name, value) {
                tracing::trace!(field = %name, "Hashing media URL instead of content");
            }
            (name.as_str(), value)
        });
        self.hasher.hash_kwargs(kwargs)
    }
}

/// Whether `name`/`value` is a URL reference hashed by its string alone.
/// Non-text values under a `_url` name are hashed by full content.
fn is_url_reference(name: &str, value: &Value) -> bool {
    if !name.ends_with(URL_SUFFIX) {
        return false;
    }
    match value {
        Value::Text(_) => true,
        Value::Sequence(items) => items.iter().all(|item| item.as_text().is_some()),
        _ => false,
    }
}

/// [`KeyResolver::resolve_keys`] with the default modalities and hasher.
pub fn resolve_keys(fields: &Fields) -> Result<Vec<CacheKey>> {
    KeyResolver::default().resolve_keys(fields)
}
