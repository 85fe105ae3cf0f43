//! # Checkpoint Manager - Point-in-Time Captures
//!
//! A checkpoint is an immutable capture of one session: a cloned disk
//! image plus, for live captures, the serialized execution state of the
//! paused VM. Each checkpoint lives in its own directory under the
//! owning session's bundle:
//!
//! ```text
//! sessions/<id>/checkpoints/<checkpoint-id>/
//! ├── Disk.img          cloned disk
//! ├── State.bin         execution state (live captures only)
//! └── Checkpoint.json   {id, sessionId, name, createdAt, hasState}
//! ```
//!
//! ## Live Capture Protocol
//!
//! ```text
//! pause ──► save_state ──► clone disk ──► metadata ──► resume
//!   │            │              │             │          ▲
//!   │            └──────────────┴─────────────┴──────────┘
//!   │                   any failure still resumes
//!   └─ pause failure aborts; nothing to undo, no resume attempt
//! ```
//!
//! The resume is unconditional: once `pause()` succeeded, every exit
//! path, success or error, attempts `resume()` before the result
//! propagates, so a failed checkpoint never leaves the VM frozen. A
//! failed resume is logged but does not mask the original error.
//!
//! ## Restore Is Destructive
//!
//! Restoring overwrites the session's live disk with the checkpoint's
//! disk before the fresh instance boots. Failures after that point leave
//! the overwrite in place; there is no rollback of the prior disk state.
//! The error names the checkpoint so the caller can simply restore again.

use crate::bundle::{Bundle, BundleStore};
use crate::clone::copy_artifact;
use crate::constants::{
    CHECKPOINT_METADATA_NAME, DISK_IMAGE_NAME, PARTIAL_SUFFIX, STATE_BLOB_NAME, validate_id,
};
use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::session::Session;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

// =============================================================================
// Checkpoint Record
// =============================================================================

/// Metadata for one checkpoint, as persisted in `Checkpoint.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Generated unique identifier; also the directory name.
    pub id: String,
    /// Owning session.
    #[serde(rename = "sessionID")]
    pub session_id: String,
    /// Caller-supplied display name.
    pub name: String,
    /// Capture time.
    pub created_at: DateTime<Utc>,
    /// `true` iff the capture includes serialized execution state
    /// (taken live via pause+snapshot); `false` for offline disk clones.
    pub has_state: bool,
}

/// Resolved paths inside one checkpoint directory.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    /// The checkpoint directory.
    pub dir: PathBuf,
    /// Cloned disk image.
    pub disk: PathBuf,
    /// Execution-state blob (present iff `has_state`).
    pub state_blob: PathBuf,
    /// Metadata document.
    pub metadata: PathBuf,
}

impl CheckpointPaths {
    fn in_dir(dir: PathBuf) -> Self {
        Self {
            disk: dir.join(DISK_IMAGE_NAME),
            state_blob: dir.join(STATE_BLOB_NAME),
            metadata: dir.join(CHECKPOINT_METADATA_NAME),
            dir,
        }
    }
}

// =============================================================================
// Checkpoint Manager
// =============================================================================

/// Creates, restores, lists, and deletes checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    store: BundleStore,
}

impl CheckpointManager {
    /// Creates a checkpoint manager over the given store.
    pub fn new(store: BundleStore) -> Self {
        Self { store }
    }

    /// Resolves the paths for a checkpoint of a session. No I/O.
    pub fn paths(&self, session_id: &str, checkpoint_id: &str) -> CheckpointPaths {
        let dir = self
            .store
            .session(session_id)
            .checkpoints_dir()
            .join(checkpoint_id);
        CheckpointPaths::in_dir(dir)
    }

    /// Captures a live checkpoint of the session bound to `instance`.
    ///
    /// Requires the instance to be running against `session`'s bundle.
    /// On success the session keeps running; on failure the original
    /// error is surfaced and the VM is resumed (best effort).
    pub async fn save_live(
        &self,
        session: &Session,
        instance: &Instance,
        name: &str,
    ) -> Result<Checkpoint> {
        let bundle = self.store.session(&session.id);
        if !bundle.exists() {
            return Err(Error::SessionNotFound(session.id.clone()));
        }

        let checkpoint = new_record(&session.id, name, true);
        let staging = self.begin(&bundle, &checkpoint.id)?;
        let live_disk = bundle.artifacts().disk;

        info!(
            checkpoint = %checkpoint.id,
            session = %session.id,
            name,
            "capturing live checkpoint"
        );

        // Step 2: pause. A pause failure aborts outright; the VM was
        // never observed paused, so there is nothing to resume.
        instance.pause().await?;

        // Steps 3-5 run under the pause guard: the resume below executes
        // on every exit path once the pause has succeeded.
        let result = async {
            instance
                .save_state(&staging.paths.state_blob)
                .await?;
            copy_artifact(&live_disk, &staging.paths.disk, "checkpoint disk")?;
            write_metadata(&checkpoint, &staging.paths.metadata)?;
            staging.commit()
        }
        .await;

        // Step 6: resume unconditionally. A resume failure is logged but
        // never masks the checkpoint error.
        if let Err(resume_err) = instance.resume().await {
            warn!(
                checkpoint = %checkpoint.id,
                error = %resume_err,
                "failed to resume after checkpoint"
            );
        }

        result?;
        info!(checkpoint = %checkpoint.id, "live checkpoint captured");
        Ok(checkpoint)
    }

    /// Captures a disk-only checkpoint of a session that is not running.
    ///
    /// `active_session` is the id bound to the current live instance, if
    /// any; checkpointing it through this path is refused because its
    /// disk is concurrently written by the running VM. Use
    /// [`CheckpointManager::save_live`] instead.
    pub async fn save_offline(
        &self,
        session_id: &str,
        name: &str,
        active_session: Option<&str>,
    ) -> Result<Checkpoint> {
        let bundle = self.store.session(session_id);
        if !bundle.exists() {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        if active_session == Some(session_id) {
            return Err(Error::SessionBusy(session_id.to_string()));
        }
        bundle.verify_complete()?;

        let checkpoint = new_record(session_id, name, false);
        let staging = self.begin(&bundle, &checkpoint.id)?;

        info!(
            checkpoint = %checkpoint.id,
            session = session_id,
            name,
            "capturing offline checkpoint"
        );

        copy_artifact(&bundle.artifacts().disk, &staging.paths.disk, "checkpoint disk")?;
        write_metadata(&checkpoint, &staging.paths.metadata)?;
        staging.commit()?;

        info!(checkpoint = %checkpoint.id, "offline checkpoint captured");
        Ok(checkpoint)
    }

    /// Performs the file-level half of a restore: verifies the
    /// checkpoint's artifacts and overwrites the owning session's live
    /// disk with a clone of the checkpoint disk.
    ///
    /// Destructive by design; see the module docs. The caller builds the
    /// fresh instance afterwards and, for `has_state` captures, restores
    /// the blob at the returned path.
    pub fn restore_files(&self, checkpoint: &Checkpoint) -> Result<CheckpointPaths> {
        let paths = self.paths(&checkpoint.session_id, &checkpoint.id);

        if !paths.disk.is_file() {
            return Err(Error::CheckpointIncomplete {
                id: checkpoint.id.clone(),
                detail: format!("{} missing", DISK_IMAGE_NAME),
            });
        }
        if checkpoint.has_state && !paths.state_blob.is_file() {
            return Err(Error::CheckpointIncomplete {
                id: checkpoint.id.clone(),
                detail: format!("{} missing", STATE_BLOB_NAME),
            });
        }

        let bundle = self.store.session(&checkpoint.session_id);
        if !bundle.exists() {
            return Err(Error::SessionNotFound(checkpoint.session_id.clone()));
        }

        let live_disk = bundle.artifacts().disk;
        info!(
            checkpoint = %checkpoint.id,
            session = %checkpoint.session_id,
            "overwriting session disk from checkpoint"
        );
        if live_disk.exists() {
            fs::remove_file(&live_disk)?;
        }
        copy_artifact(&paths.disk, &live_disk, "restored disk")?;

        Ok(paths)
    }

    /// Finds a checkpoint by id across all sessions.
    pub fn find(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        validate_id(checkpoint_id).map_err(|reason| Error::InvalidId {
            id: checkpoint_id.to_string(),
            reason,
        })?;

        let sessions_dir = self.store.sessions_dir();
        if sessions_dir.is_dir() {
            for entry in fs::read_dir(&sessions_dir)? {
                let session_dir = entry?.path();
                if !session_dir.is_dir() {
                    continue;
                }
                let metadata = self
                    .paths_in(&session_dir, checkpoint_id)
                    .metadata;
                if metadata.is_file() {
                    return read_metadata(&metadata);
                }
            }
        }

        Err(Error::CheckpointNotFound(checkpoint_id.to_string()))
    }

    /// Lists a session's checkpoints, newest first.
    ///
    /// Unreadable entries are skipped with a warning rather than failing
    /// the whole enumeration.
    pub fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let dir = self.store.session(session_id).checkpoints_dir();
        let mut checkpoints = Vec::new();

        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if !path.is_dir()
                    || path
                        .file_name()
                        .is_some_and(|n| n.to_string_lossy().ends_with(PARTIAL_SUFFIX))
                {
                    continue;
                }
                match read_metadata(&path.join(CHECKPOINT_METADATA_NAME)) {
                    Ok(checkpoint) => checkpoints.push(checkpoint),
                    Err(e) => {
                        warn!(
                            dir = %path.display(),
                            error = %e,
                            "skipping unreadable checkpoint"
                        );
                    }
                }
            }
        }

        // UUIDv7 ids are time-ordered, so they break created_at ties from
        // captures within the same clock tick.
        checkpoints.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        debug!(session = session_id, count = checkpoints.len(), "checkpoints listed");
        Ok(checkpoints)
    }

    /// Deletes a checkpoint's entire directory. No effect on the owning
    /// session.
    pub fn delete(&self, checkpoint_id: &str) -> Result<()> {
        let checkpoint = self.find(checkpoint_id)?;
        let paths = self.paths(&checkpoint.session_id, &checkpoint.id);
        fs::remove_dir_all(&paths.dir)?;
        info!(checkpoint = checkpoint_id, "checkpoint deleted");
        Ok(())
    }

    fn paths_in(&self, session_dir: &std::path::Path, checkpoint_id: &str) -> CheckpointPaths {
        CheckpointPaths::in_dir(
            Bundle::at(session_dir.to_path_buf())
                .checkpoints_dir()
                .join(checkpoint_id),
        )
    }

    /// Begins staged creation of a checkpoint directory.
    fn begin(&self, bundle: &Bundle, checkpoint_id: &str) -> Result<CheckpointStaging> {
        let checkpoints_dir = bundle.checkpoints_dir();
        fs::create_dir_all(&checkpoints_dir)?;

        let target = checkpoints_dir.join(checkpoint_id);
        let staging_dir = checkpoints_dir.join(format!("{}{}", checkpoint_id, PARTIAL_SUFFIX));

        if staging_dir.exists() {
            warn!(staging = %staging_dir.display(), "sweeping stale partial checkpoint");
            fs::remove_dir_all(&staging_dir)?;
        }
        fs::create_dir_all(&staging_dir)?;

        Ok(CheckpointStaging {
            paths: CheckpointPaths::in_dir(staging_dir),
            target,
            committed: false,
        })
    }
}

// =============================================================================
// Staging & Metadata Helpers
// =============================================================================

/// In-progress checkpoint directory; same staging discipline as bundle
/// creation (write into `.partial`, atomic rename on commit, swept on
/// drop otherwise).
struct CheckpointStaging {
    paths: CheckpointPaths,
    target: PathBuf,
    committed: bool,
}

impl CheckpointStaging {
    fn commit(mut self) -> Result<()> {
        fs::rename(&self.paths.dir, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for CheckpointStaging {
    fn drop(&mut self) {
        if !self.committed && self.paths.dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.paths.dir) {
                warn!(
                    staging = %self.paths.dir.display(),
                    error = %e,
                    "failed to clean up partial checkpoint"
                );
            }
        }
    }
}

fn new_record(session_id: &str, name: &str, has_state: bool) -> Checkpoint {
    Checkpoint {
        id: format!("ckpt-{}", Uuid::now_v7().simple()),
        session_id: session_id.to_string(),
        name: name.to_string(),
        created_at: Utc::now(),
        has_state,
    }
}

fn write_metadata(checkpoint: &Checkpoint, path: &std::path::Path) -> Result<()> {
    let json = serde_json::to_string_pretty(checkpoint)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    fs::write(path, json)?;
    Ok(())
}

fn read_metadata(path: &std::path::Path) -> Result<Checkpoint> {
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| Error::Serialization(e.to_string()))
}
