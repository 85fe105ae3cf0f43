//! Tests for restore-image acquisition.
//!
//! Validates the cache-hit shortcut and download delegation through a
//! mock source.

mod common;

use async_trait::async_trait;
use common::test_store;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use vmnest::{CatalogEntry, ProgressFn, RestoreImageSource, Result, ensure_restore_image};

/// Counts downloads so tests can assert the cache shortcut.
struct MockSource {
    downloads: Mutex<u32>,
}

impl MockSource {
    fn new() -> Self {
        Self {
            downloads: Mutex::new(0),
        }
    }

    fn download_count(&self) -> u32 {
        *self.downloads.lock().unwrap()
    }
}

#[async_trait]
impl RestoreImageSource for MockSource {
    fn name(&self) -> &str {
        "mock-catalog"
    }

    async fn fetch_latest_catalog_entry(&self) -> Result<CatalogEntry> {
        Ok(CatalogEntry {
            url: "https://example.com/images/Restore-26.1.img".to_string(),
            label: "26.1".to_string(),
        })
    }

    async fn download_to(
        &self,
        _url: &str,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        *self.downloads.lock().unwrap() += 1;
        progress(0.5);
        fs::write(dest, b"restore image bytes")?;
        progress(1.0);
        Ok(())
    }
}

#[tokio::test]
async fn test_download_lands_in_image_cache() {
    let (_temp, store) = test_store();
    let source = MockSource::new();

    let path = ensure_restore_image(&source, &store, &|_| {}).await.unwrap();

    assert!(path.starts_with(store.images_dir()));
    assert_eq!(fs::read(&path).unwrap(), b"restore image bytes");
    assert_eq!(source.download_count(), 1);
}

#[tokio::test]
async fn test_cached_image_skips_download() {
    let (_temp, store) = test_store();
    let source = MockSource::new();

    let first = ensure_restore_image(&source, &store, &|_| {}).await.unwrap();
    let second = ensure_restore_image(&source, &store, &|_| {}).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(source.download_count(), 1, "second call must not download");
}

#[tokio::test]
async fn test_cache_hit_still_reports_completion() {
    let (_temp, store) = test_store();
    let source = MockSource::new();

    ensure_restore_image(&source, &store, &|_| {}).await.unwrap();

    let seen: Mutex<Vec<f64>> = Mutex::new(Vec::new());
    ensure_restore_image(&source, &store, &|p| seen.lock().unwrap().push(p))
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1.0]);
}
