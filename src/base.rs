//! # Base Lifecycle - Install, First-Boot Setup, Ready
//!
//! Owns the single base (template) bundle. Lifecycle on disk:
//!
//! ```text
//!   ┌────────┐  install   ┌───────────┐  mark_ready  ┌───────┐
//!   │ Absent │ ─────────► │ Installed │ ───────────► │ Ready │
//!   └────────┘            └───────────┘              └───────┘
//!        ▲                                               │
//!        └──────────────────── delete ───────────────────┘
//! ```
//!
//! `Installed` means the artifacts exist; `Ready` is a separate,
//! explicitly-set marker meaning first-boot setup has completed and the
//! base is safe to clone from. The marker is one-way: only full base
//! deletion clears it. Only a ready base may be cloned.
//!
//! Installation delegates to the engine's installer capability and
//! targets a staging directory, so a failed or interrupted install never
//! presents as an installed base.

use crate::bundle::{Bundle, BundleStore};
use crate::constants::MIN_DISK_SIZE_BYTES;
use crate::engine::{InstallSpec, ProgressFn, VmEngine};
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Observed lifecycle state of the base bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseState {
    /// No base bundle on disk.
    Absent,
    /// Artifacts exist; first-boot setup not yet completed.
    Installed,
    /// Ready marker present; cloning is permitted.
    Ready,
}

impl std::fmt::Display for BaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Installed => write!(f, "installed"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Manages the base (template) bundle.
#[derive(Debug, Clone)]
pub struct BaseManager {
    store: BundleStore,
}

impl BaseManager {
    /// Creates a base manager over the given store.
    pub fn new(store: BundleStore) -> Self {
        Self { store }
    }

    /// Returns the base bundle.
    pub fn bundle(&self) -> Bundle {
        self.store.base()
    }

    /// Returns the observed lifecycle state.
    pub fn state(&self) -> BaseState {
        if !self.bundle().exists() {
            BaseState::Absent
        } else if self.is_ready() {
            BaseState::Ready
        } else {
            BaseState::Installed
        }
    }

    /// Returns `true` iff the base bundle exists on disk.
    pub fn is_installed(&self) -> bool {
        self.bundle().exists()
    }

    /// Marker presence check only; does not re-verify artifact
    /// completeness. Cheap enough for frequent polling by display
    /// callers.
    pub fn is_ready(&self) -> bool {
        self.bundle().artifacts().ready_marker.is_file()
    }

    /// Installs the base from a restore image via the engine's installer.
    ///
    /// Idempotent: an already-installed base is a no-op, not an error.
    /// Progress is reported as a fraction in `[0, 1]`. On any underlying
    /// failure the staging directory is discarded and the base remains
    /// absent.
    pub async fn install(
        &self,
        engine: &dyn VmEngine,
        restore_image: &Path,
        spec: &InstallSpec,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        let bundle = self.bundle();
        if bundle.exists() {
            info!("base already installed; skipping");
            return Ok(());
        }

        if spec.disk_size_bytes < MIN_DISK_SIZE_BYTES {
            return Err(Error::InstallationFailed(format!(
                "disk size {} below minimum {}",
                spec.disk_size_bytes, MIN_DISK_SIZE_BYTES
            )));
        }

        if !engine.is_available() {
            return Err(Error::EngineUnavailable {
                engine: engine.name().to_string(),
                reason: engine
                    .unavailable_reason()
                    .unwrap_or_else(|| "unknown".to_string()),
            });
        }

        info!(
            image = %restore_image.display(),
            disk_size = spec.disk_size_bytes,
            "installing base"
        );

        let staging = bundle.begin_staging()?;
        engine
            .install_from_image(restore_image, &staging.artifacts(), &spec.clamped(), progress)
            .await
            .map_err(|e| Error::InstallationFailed(e.to_string()))?;

        // The engine contract says all four artifacts were produced;
        // hold it to that before the bundle becomes visible.
        for (name, path) in staging.artifacts().mandatory() {
            if !path.is_file() {
                return Err(Error::InstallationFailed(format!(
                    "installer did not produce {}",
                    name
                )));
            }
        }

        staging.commit()?;
        info!("base installed");
        Ok(())
    }

    /// Writes the ready marker, permitting clones.
    ///
    /// One-way: there is no unmark operation; only [`BaseManager::delete`]
    /// clears it.
    pub fn mark_ready(&self) -> Result<()> {
        let bundle = self.bundle();
        if !bundle.exists() {
            return Err(Error::BaseNotInstalled);
        }
        fs::write(bundle.artifacts().ready_marker, b"")?;
        info!("base marked ready");
        Ok(())
    }

    /// Removes the entire base bundle subtree.
    ///
    /// Permitted at any time; the caller layer is responsible for
    /// checking that no live instance currently references the base.
    pub fn delete(&self) -> Result<()> {
        debug!("deleting base bundle");
        self.bundle().remove()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> BaseManager {
        let store = BundleStore::with_path(temp.path().to_path_buf()).unwrap();
        BaseManager::new(store)
    }

    #[test]
    fn test_state_absent_initially() {
        let temp = TempDir::new().unwrap();
        let base = manager(&temp);
        assert_eq!(base.state(), BaseState::Absent);
        assert!(!base.is_ready());
    }

    #[test]
    fn test_mark_ready_requires_install() {
        let temp = TempDir::new().unwrap();
        let base = manager(&temp);
        assert!(matches!(base.mark_ready(), Err(Error::BaseNotInstalled)));
    }

    #[test]
    fn test_ready_is_one_way_until_delete() {
        let temp = TempDir::new().unwrap();
        let base = manager(&temp);

        fs::create_dir_all(base.bundle().dir()).unwrap();
        base.mark_ready().unwrap();
        assert_eq!(base.state(), BaseState::Ready);

        base.delete().unwrap();
        assert_eq!(base.state(), BaseState::Absent);
        assert!(!base.is_ready());
    }
}
