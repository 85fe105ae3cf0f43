//! # Bundle Store - Artifact Layout & Crash-Consistent Creation
//!
//! A bundle is a directory holding one VM's artifacts: disk image,
//! auxiliary boot storage, hardware-model descriptor, machine-identity
//! descriptor, plus optional session metadata and the base ready marker.
//!
//! ## Storage Model
//!
//! ```text
//! ~/.vmnest/
//! ├── base/                          the template bundle
//! │   ├── Disk.img
//! │   ├── AuxiliaryStorage
//! │   ├── HardwareModel
//! │   ├── MachineIdentifier
//! │   └── BaseReady                  (marker, written by mark_ready)
//! └── sessions/
//!     └── primary/
//!         ├── Disk.img
//!         ├── AuxiliaryStorage
//!         ├── HardwareModel
//!         ├── MachineIdentifier
//!         ├── Session.json
//!         └── checkpoints/
//!             └── <checkpoint-id>/
//! ```
//!
//! ## Crash Consistency
//!
//! Directory existence is the creation-completion signal: a bundle either
//! has all four mandatory artifacts or does not exist at all. Creation
//! therefore writes into a `<dir>.partial` staging sibling and renames it
//! into place only after every artifact has landed: the temp-file +
//! atomic-rename pattern applied to whole directories. A crash mid-copy
//! leaves only a `.partial` directory, which `exists()` ignores and the
//! next creation attempt sweeps.
//!
//! `exists()` implies completeness under this protocol, but an
//! interrupted *manual* edit can still break the invariant, so
//! [`Bundle::verify_complete`] remains the authoritative check before any
//! attempt to build a live instance from a bundle.

use crate::constants::{
    AUX_STORAGE_NAME, BASE_DIR, CHECKPOINTS_DIR, DISK_IMAGE_NAME, HARDWARE_MODEL_NAME,
    IMAGES_DIR, MACHINE_IDENTIFIER_NAME, PARTIAL_SUFFIX, READY_MARKER_NAME,
    SESSION_METADATA_NAME, SESSIONS_DIR,
};
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// =============================================================================
// Bundle Store
// =============================================================================

/// Root of the on-disk session store.
///
/// Resolves bundle locations; all path construction funnels through here
/// so the layout in [`crate::constants`] stays the single source of truth.
#[derive(Debug, Clone)]
pub struct BundleStore {
    /// Base directory for all bundles.
    root: PathBuf,
}

impl BundleStore {
    /// Creates a store at the default location (`~/.vmnest`).
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_path())
    }

    /// Creates a store rooted at the specified path.
    pub fn with_path(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|e| Error::StoreInitFailed {
            path: root.clone(),
            reason: e.to_string(),
        })?;

        info!("session store initialized at: {}", root.display());

        Ok(Self { root })
    }

    /// Returns the default store path.
    fn default_path() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            home.join(".vmnest")
        } else {
            PathBuf::from(".vmnest")
        }
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the base (template) bundle.
    pub fn base(&self) -> Bundle {
        Bundle::at(self.root.join(BASE_DIR))
    }

    /// Returns the bundle for a session id. No I/O; the bundle may not
    /// exist on disk.
    pub fn session(&self, id: &str) -> Bundle {
        Bundle::at(self.root.join(SESSIONS_DIR).join(id))
    }

    /// Returns the directory that holds all session bundles.
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    /// Returns the cache directory for downloaded restore images.
    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// One bundle directory (base or session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    dir: PathBuf,
}

impl Bundle {
    /// Wraps an existing or prospective bundle directory.
    pub fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Returns the bundle directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns a short label for logs and error messages (the directory
    /// name, falling back to the full path).
    pub fn label(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.dir.display().to_string())
    }

    /// Returns `true` iff the bundle directory is present.
    ///
    /// Under the staging protocol this is also the creation-completion
    /// signal; a `.partial` staging directory never satisfies it.
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Returns deterministic paths for every artifact slot. No I/O.
    pub fn artifacts(&self) -> BundleArtifacts {
        BundleArtifacts::in_dir(&self.dir)
    }

    /// Returns the per-session checkpoints directory.
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.dir.join(CHECKPOINTS_DIR)
    }

    /// Checks each mandatory artifact individually, failing with the
    /// first missing one.
    ///
    /// Must run before building a live instance: a bundle directory
    /// existing does not by itself guarantee every artifact inside it is
    /// present (an interrupted manual copy, for example).
    pub fn verify_complete(&self) -> Result<()> {
        if !self.exists() {
            return Err(Error::MissingArtifact {
                bundle: self.label(),
                artifact: "bundle directory".to_string(),
            });
        }

        let artifacts = self.artifacts();
        for (name, path) in artifacts.mandatory() {
            if !path.is_file() {
                return Err(Error::MissingArtifact {
                    bundle: self.label(),
                    artifact: name.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Returns the staging sibling used while this bundle is written.
    ///
    /// Exposed so callers can observe whether an interrupted creation
    /// left anything behind; normal flows never touch it directly.
    pub fn partial_dir(&self) -> PathBuf {
        let mut name = self
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(PARTIAL_SUFFIX);
        self.dir.with_file_name(name)
    }

    /// Begins staged creation of this bundle.
    ///
    /// Any stale `.partial` leftover from a crashed prior attempt is
    /// swept first.
    pub fn begin_staging(&self) -> Result<BundleStaging> {
        BundleStaging::begin(self)
    }

    /// Removes the bundle subtree (and any stale staging sibling).
    pub fn remove(&self) -> Result<()> {
        let partial = self.partial_dir();
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
            info!(bundle = %self.label(), "bundle removed");
        }
        Ok(())
    }
}

// =============================================================================
// Artifact Paths
// =============================================================================

/// Deterministic paths for every artifact slot of one bundle directory.
#[derive(Debug, Clone)]
pub struct BundleArtifacts {
    /// Block-device image.
    pub disk: PathBuf,
    /// Boot firmware / NVRAM blob.
    pub aux_storage: PathBuf,
    /// Hardware-model descriptor.
    pub hardware_model: PathBuf,
    /// Machine-identity descriptor.
    pub machine_identifier: PathBuf,
    /// Session metadata document (optional slot).
    pub metadata: PathBuf,
    /// Base ready marker (optional slot).
    pub ready_marker: PathBuf,
}

impl BundleArtifacts {
    /// Resolves the artifact slots inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            disk: dir.join(DISK_IMAGE_NAME),
            aux_storage: dir.join(AUX_STORAGE_NAME),
            hardware_model: dir.join(HARDWARE_MODEL_NAME),
            machine_identifier: dir.join(MACHINE_IDENTIFIER_NAME),
            metadata: dir.join(SESSION_METADATA_NAME),
            ready_marker: dir.join(READY_MARKER_NAME),
        }
    }

    /// The four mandatory artifacts, in creation/copy order.
    pub fn mandatory(&self) -> [(&'static str, &Path); 4] {
        [
            (DISK_IMAGE_NAME, self.disk.as_path()),
            (AUX_STORAGE_NAME, self.aux_storage.as_path()),
            (HARDWARE_MODEL_NAME, self.hardware_model.as_path()),
            (MACHINE_IDENTIFIER_NAME, self.machine_identifier.as_path()),
        ]
    }
}

// =============================================================================
// Staged Creation
// =============================================================================

/// In-progress bundle creation.
///
/// Artifacts are written into a `.partial` sibling directory; `commit`
/// renames it to the final location in one atomic step. Dropping the
/// staging without committing removes the partial directory, so every
/// error path cleans up without explicit handling.
pub struct BundleStaging {
    dir: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl BundleStaging {
    fn begin(bundle: &Bundle) -> Result<Self> {
        let dir = bundle.partial_dir();

        if dir.exists() {
            warn!(staging = %dir.display(), "sweeping stale partial bundle");
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        debug!(staging = %dir.display(), "bundle staging started");

        Ok(Self {
            dir,
            target: bundle.dir().to_path_buf(),
            committed: false,
        })
    }

    /// Returns the staging directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns artifact paths inside the staging directory.
    pub fn artifacts(&self) -> BundleArtifacts {
        BundleArtifacts::in_dir(&self.dir)
    }

    /// Atomically renames the staging directory into its final location.
    pub fn commit(mut self) -> Result<()> {
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&self.dir, &self.target)?;
        self.committed = true;
        debug!(bundle = %self.target.display(), "bundle staging committed");
        Ok(())
    }
}

impl Drop for BundleStaging {
    fn drop(&mut self) {
        if !self.committed && self.dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!(
                    staging = %self.dir.display(),
                    error = %e,
                    "failed to clean up partial bundle"
                );
            }
        }
    }
}
