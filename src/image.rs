//! # Restore-Image Acquisition
//!
//! The installer needs a local restore image. Where that image comes from
//! (catalog lookup, network download, resumability) is an external
//! collaborator consumed through [`RestoreImageSource`]; this module only
//! defines the capability and the caching shortcut around it.
//!
//! ## Idempotence
//!
//! [`ensure_restore_image`] skips the download entirely when the cached
//! file already exists, the same "already have it → skip" shortcut the
//! blob store applies to layers. It does not validate freshness; deleting
//! the cached file forces a re-download.

use crate::bundle::BundleStore;
use crate::engine::ProgressFn;
use crate::error::Result;
use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// One downloadable restore image from the collaborator's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Download location.
    pub url: String,
    /// Human-readable label (build/version string).
    pub label: String,
}

/// The restore-image acquisition capability.
#[async_trait]
pub trait RestoreImageSource: Send + Sync {
    /// Returns the source name for logs.
    fn name(&self) -> &str;

    /// Looks up the latest available restore image.
    async fn fetch_latest_catalog_entry(&self) -> Result<CatalogEntry>;

    /// Downloads `url` to `dest`, reporting fractional progress.
    ///
    /// Must be idempotent when `dest` already exists: return immediately
    /// without re-downloading. Whether an interrupted download resumes or
    /// restarts is the implementation's choice.
    async fn download_to(
        &self,
        url: &str,
        dest: &std::path::Path,
        progress: ProgressFn<'_>,
    ) -> Result<()>;
}

/// Resolves the latest restore image into the store's image cache,
/// downloading only if it is not already present.
pub async fn ensure_restore_image(
    source: &dyn RestoreImageSource,
    store: &BundleStore,
    progress: ProgressFn<'_>,
) -> Result<PathBuf> {
    let entry = source.fetch_latest_catalog_entry().await?;
    let dest = store.images_dir().join(cache_file_name(&entry));

    if dest.is_file() {
        info!(image = %dest.display(), label = %entry.label, "restore image cached");
        progress(1.0);
        return Ok(dest);
    }

    fs::create_dir_all(store.images_dir())?;
    info!(url = %entry.url, label = %entry.label, "downloading restore image");
    source.download_to(&entry.url, &dest, progress).await?;
    debug!(image = %dest.display(), "restore image downloaded");

    Ok(dest)
}

/// Derives a stable cache file name from a catalog entry.
///
/// Uses the URL's final path segment when it looks like a file name,
/// falling back to the sanitized label.
fn cache_file_name(entry: &CatalogEntry) -> String {
    let from_url = entry
        .url
        .rsplit('/')
        .next()
        .filter(|seg| !seg.is_empty() && seg.contains('.'));

    let raw = from_url.unwrap_or(&entry.label);
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches('.').is_empty() {
        "restore.img".to_string()
    } else {
        sanitized
    }
}
