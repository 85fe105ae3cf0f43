//! # Clone Operator - All-or-Nothing Bundle Copies
//!
//! Materializes a new session bundle from a source bundle (base, primary,
//! or any session). The copy is all-or-nothing: artifacts land in a
//! staging directory that is atomically renamed into place, and any
//! failure discards the staging directory entirely.
//!
//! ## Copy Strategy
//!
//! Disk images are tens of gigabytes, so copies go through a
//! copy-on-write reflink when the filesystem supports it (`FICLONE` on
//! Linux, `clonefile` on macOS). The fallback is a plain byte copy:
//! correct, but slow for large images, and logged as such.
//!
//! ## Ordering
//!
//! Artifacts copy in the fixed order disk → auxiliary storage → hardware
//! model → machine identifier, with session metadata written last, so
//! metadata presence can double as a "fully cloned" signal for display
//! purposes. [`crate::bundle::Bundle::verify_complete`] remains the
//! authoritative check.

use crate::bundle::{Bundle, BundleStore};
use crate::error::{Error, Result};
use crate::session::Session;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

// =============================================================================
// Reflink-Preferring Copy
// =============================================================================

/// Copies one artifact, preferring a copy-on-write clone.
///
/// Verifies the copy fully landed (destination length equals source
/// length) before returning; a short copy is a [`Error::CopyFailed`].
pub(crate) fn copy_artifact(src: &Path, dst: &Path, label: &str) -> Result<()> {
    let src_len = fs::metadata(src)
        .map_err(|e| Error::CopyFailed {
            label: label.to_string(),
            reason: format!("source unreadable: {}", e),
        })?
        .len();

    let cloned = try_reflink(src, dst).unwrap_or(false);
    if cloned {
        debug!(artifact = label, "reflinked");
    } else {
        // Byte-copy fallback; correct everywhere, slow for big images.
        debug!(artifact = label, "reflink unsupported; byte copy");
        fs::copy(src, dst).map_err(|e| Error::CopyFailed {
            label: label.to_string(),
            reason: e.to_string(),
        })?;
    }

    let dst_len = fs::metadata(dst).map(|m| m.len()).unwrap_or(0);
    if dst_len != src_len {
        let _ = fs::remove_file(dst);
        return Err(Error::CopyFailed {
            label: label.to_string(),
            reason: format!("short copy: {} of {} bytes", dst_len, src_len),
        });
    }

    Ok(())
}

/// Attempts a filesystem-level clone. `Ok(false)` means the filesystem
/// declined and the caller should byte-copy instead.
#[cfg(target_os = "linux")]
fn try_reflink(src: &Path, dst: &Path) -> std::io::Result<bool> {
    use std::os::fd::AsRawFd;

    // ioctl(FICLONE) from linux/fs.h.
    const FICLONE: libc::c_ulong = 0x4004_9409;

    let src_file = fs::File::open(src)?;
    let dst_file = fs::File::create(dst)?;
    let rc = unsafe { libc::ioctl(dst_file.as_raw_fd(), FICLONE as _, src_file.as_raw_fd()) };
    if rc == 0 {
        Ok(true)
    } else {
        // EOPNOTSUPP/EXDEV on non-reflink filesystems; remove the empty
        // destination so the fallback starts clean.
        drop(dst_file);
        let _ = fs::remove_file(dst);
        Ok(false)
    }
}

#[cfg(target_os = "macos")]
fn try_reflink(src: &Path, dst: &Path) -> std::io::Result<bool> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_src = CString::new(src.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let c_dst = CString::new(dst.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let rc = unsafe { libc::clonefile(c_src.as_ptr(), c_dst.as_ptr(), 0) };
    Ok(rc == 0)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn try_reflink(_src: &Path, _dst: &Path) -> std::io::Result<bool> {
    Ok(false)
}

// =============================================================================
// Clone Operator
// =============================================================================

/// Copies source bundles into new session bundles.
#[derive(Debug, Clone)]
pub struct CloneOperator {
    store: BundleStore,
}

impl CloneOperator {
    /// Creates a clone operator over the given store.
    pub fn new(store: BundleStore) -> Self {
        Self { store }
    }

    /// Clones `source` into the bundle for `descriptor`'s session id.
    ///
    /// - Destination exists and `overwrite` is false: returns the
    ///   existing session descriptor without copying (supports the
    ///   "ensure primary exists" call pattern).
    /// - Destination exists and `overwrite` is true: the destination is
    ///   destroyed first.
    /// - Cloning from the base requires the base ready marker.
    ///
    /// Any failure leaves no destination directory behind.
    pub fn clone_bundle(
        &self,
        source: &Bundle,
        descriptor: &Session,
        overwrite: bool,
    ) -> Result<Session> {
        let dest = self.store.session(&descriptor.id);

        if dest.exists() && !overwrite {
            debug!(session = %descriptor.id, "destination exists; returning existing session");
            return Ok(Session::load_or_default(&dest, &descriptor.id));
        }

        // Gate before any destructive or copying step so a refused clone
        // leaves both source and destination untouched.
        if source.dir() == self.store.base().dir()
            && !source.artifacts().ready_marker.is_file()
        {
            return Err(Error::BaseNotReady);
        }
        source.verify_complete()?;

        let src_disk_len = fs::metadata(&source.artifacts().disk).map(|m| m.len()).unwrap_or(0);
        if src_disk_len == 0 {
            return Err(Error::InvalidDiskImage(format!(
                "source disk in '{}' is empty",
                source.label()
            )));
        }

        if dest.exists() {
            warn!(session = %descriptor.id, "overwriting existing session bundle");
            dest.remove()?;
        }

        let staging = dest.begin_staging()?;
        let from = source.artifacts();
        let to = staging.artifacts();

        for ((label, src), (_, dst)) in from.mandatory().into_iter().zip(to.mandatory()) {
            copy_artifact(src, dst, label)?;
        }

        // Metadata last: its presence marks a fully copied artifact set.
        descriptor.write_to(&to.metadata)?;
        staging.commit()?;

        info!(
            session = %descriptor.id,
            kind = %descriptor.kind,
            source = %source.label(),
            "session bundle cloned"
        );

        Ok(descriptor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_artifact_verifies_length() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::write(&src, b"payload").unwrap();

        copy_artifact(&src, &dst, "test").unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn test_copy_artifact_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("absent");
        let dst = temp.path().join("dst");

        let result = copy_artifact(&src, &dst, "test");
        assert!(matches!(result, Err(Error::CopyFailed { .. })));
    }
}
