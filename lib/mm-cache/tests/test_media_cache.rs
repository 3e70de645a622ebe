// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the shared media cache

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use dynamo_mm_cache::{
        Fields, MediaCache, MediaCacheConfigBuilder, MediaData, TensorData, Value, hash_url,
        resolve_keys,
    };
    use image::{DynamicImage, ImageBuffer, Rgb};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    fn blob(size: usize, fill: u8) -> MediaData {
        MediaData::Bytes(Bytes::from(vec![fill; size]))
    }

    #[test]
    fn test_capacity_respected_under_mixed_payloads() {
        init_tracing();
        let cache = MediaCache::new(4096);

        for i in 0..32usize {
            let payload = match i % 3 {
                0 => blob(500, i as u8),
                1 => MediaData::Image(DynamicImage::ImageRgb8(ImageBuffer::from_pixel(
                    10,
                    10,
                    Rgb([i as u8, 0, 0]),
                ))),
                _ => MediaData::Tensor(TensorData::from_ndarray(
                    &ndarray::Array1::<f64>::zeros(64),
                )),
            };
            cache.put(format!("key-{i}"), payload);
            assert!(cache.total_bytes() <= cache.capacity());
        }

        // most recent insert always survives
        assert!(cache.contains("key-31"));
        assert!(!cache.contains("key-0"));
        assert!(cache.stats().evictions() > 0);
    }

    #[test]
    fn test_concurrent_access() {
        init_tracing();
        let cache = Arc::new(MediaCache::new(64 * 1024));
        let supplied = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                let supplied = supplied.clone();
                std::thread::spawn(move || {
                    for i in 0..200usize {
                        let key = format!("thread-{t}-{}", i % 16);
                        cache
                            .get_or_derive(Some(&key), None, || {
                                supplied.fetch_add(1, Ordering::Relaxed);
                                Ok::<_, anyhow::Error>(blob(256, t as u8))
                            })
                            .unwrap();
                        cache.get(&format!("thread-{}-0", (t + 1) % 8));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // 8 threads * 16 keys * 256 bytes fits, so each key is supplied once
        assert_eq!(supplied.load(Ordering::Relaxed), 8 * 16);
        assert_eq!(cache.len(), 8 * 16);
        assert_eq!(cache.total_bytes(), 8 * 16 * 256);
    }

    #[test]
    fn test_concurrent_eviction_keeps_accounting() {
        init_tracing();
        // room for 8 of the 128 distinct payloads, so every thread evicts
        let cache = Arc::new(MediaCache::new(8 * 256));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500usize {
                        let key = format!("thread-{t}-{}", i % 16);
                        let size = 128 + (i % 3) * 64;
                        cache
                            .get_or_derive(Some(&key), None, || {
                                Ok::<_, anyhow::Error>(blob(size, t as u8))
                            })
                            .unwrap();
                        if i % 7 == 0 {
                            cache.remove(&format!("thread-{}-{}", (t + 3) % 8, i % 16));
                        }
                        assert!(cache.total_bytes() <= cache.capacity());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.stats().evictions() > 0);
        assert!(cache.total_bytes() <= cache.capacity());

        // the byte total matches the payloads still cached
        let mut cached_bytes = 0;
        let mut cached = 0;
        for t in 0..8 {
            for i in 0..16 {
                let key = format!("thread-{t}-{i}");
                if cache.contains(&key) {
                    cached += 1;
                    cached_bytes += cache.get(&key).unwrap().size_bytes();
                }
            }
        }
        assert_eq!(cached, cache.len());
        assert_eq!(cached_bytes, cache.total_bytes());
    }

    #[test]
    fn test_resolved_key_lookup() {
        // a request carrying a UUID reuses media cached under that UUID
        let cache = MediaCache::new(1024);
        cache.put("img-42", blob(100, 1));

        let mut fields = Fields::new();
        fields.insert("image_uuids".into(), Value::sequence(["img-42"]));
        let keys = resolve_keys(&fields).unwrap();

        let hits: Vec<_> = keys.iter().filter_map(|k| cache.get(k)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].size_bytes(), 100);
    }

    #[test]
    fn test_url_and_uuid_keys_are_separate() {
        let cache = MediaCache::new(1024);
        let url = "https://example.com/cat.png";

        cache
            .get_or_derive(None, Some(url), || Ok::<_, anyhow::Error>(blob(10, 1)))
            .unwrap();
        cache
            .get_or_derive(Some("cat"), Some(url), || {
                Ok::<_, anyhow::Error>(blob(20, 2))
            })
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&hash_url(url)).unwrap().size_bytes(), 10);
        assert_eq!(cache.get("cat").unwrap().size_bytes(), 20);
    }

    #[tokio::test]
    async fn test_async_supplier_shared_cache() {
        init_tracing();
        let config = MediaCacheConfigBuilder::default()
            .capacity("1MiB")
            .build()
            .unwrap();
        let cache = Arc::new(MediaCache::from_config(&config));

        let mut tasks = Vec::new();
        for i in 0..4usize {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                let url = format!("https://example.com/{i}.png");
                cache
                    .get_or_derive_async(None, Some(&url), || async move {
                        tokio::task::yield_now().await;
                        Ok::<_, anyhow::Error>(blob(1024, i as u8))
                    })
                    .await
                    .map(|media| media.size_bytes())
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1024);
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.total_bytes(), 4 * 1024);
    }
}
