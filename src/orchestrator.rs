//! # Orchestrator - The Single Owning Context
//!
//! Ties the components together around one explicit piece of runtime
//! state: the optional active instance. At most one VM runs at a time in
//! this design; the slot is a plain `Option<Instance>` field injected
//! into every operation that needs a "is this bundle live" answer,
//! never ambient or global state. Generalizing to N concurrent
//! instances means replacing the slot with a map keyed by session id
//! and re-deriving every busy check below over that map.
//!
//! ## Sequencing Discipline
//!
//! Lifecycle operations (install, clone, checkpoint save/restore) are
//! async but not internally parallelized against each other. Callers
//! route them through one orchestrator, one at a time; concurrent
//! operations on the same bundle race on the same files with no locking
//! provided here. This limitation is inherited from the design, not an
//! oversight to fix with a lock.
//!
//! ## Teardown Policy
//!
//! Stopping the active instance consults its mode exhaustively:
//! disposable session bundles are deleted immediately after a successful
//! stop; primary and base-setup bundles are left untouched.

use crate::base::BaseManager;
use crate::bundle::BundleStore;
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::clone::CloneOperator;
use crate::engine::{InstallSpec, ProgressFn, VmEngine, VmSpec};
use crate::error::{Error, Result};
use crate::instance::{Instance, InstanceMode};
use crate::session::{Session, SessionKind, SessionRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the store, the component managers, and the single active
/// instance slot.
pub struct Orchestrator {
    engine: Arc<dyn VmEngine>,
    store: BundleStore,
    registry: SessionRegistry,
    base: BaseManager,
    cloner: CloneOperator,
    checkpoints: CheckpointManager,
    /// The one live instance, if any.
    active: Option<Instance>,
}

impl Orchestrator {
    /// Creates an orchestrator over the default store location.
    pub fn new(engine: Arc<dyn VmEngine>) -> Result<Self> {
        Ok(Self::with_store(engine, BundleStore::new()?))
    }

    /// Creates an orchestrator over a specific store.
    pub fn with_store(engine: Arc<dyn VmEngine>, store: BundleStore) -> Self {
        Self {
            engine,
            registry: SessionRegistry::new(store.clone()),
            base: BaseManager::new(store.clone()),
            cloner: CloneOperator::new(store.clone()),
            checkpoints: CheckpointManager::new(store.clone()),
            store,
            active: None,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &BundleStore {
        &self.store
    }

    /// Returns the base lifecycle manager.
    pub fn base(&self) -> &BaseManager {
        &self.base
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Returns the session id bound to the active instance, if any.
    pub fn active_session(&self) -> Option<&str> {
        self.active.as_ref().and_then(|i| i.session_id())
    }

    /// Returns the active instance, if any.
    pub fn active(&self) -> Option<&Instance> {
        self.active.as_ref()
    }

    // =========================================================================
    // Base Lifecycle
    // =========================================================================

    /// Installs the base from a restore image. Idempotent if already
    /// installed.
    pub async fn install_base(
        &self,
        restore_image: &Path,
        spec: &InstallSpec,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        self.base
            .install(self.engine.as_ref(), restore_image, spec, progress)
            .await
    }

    /// Boots the base for first-boot setup, before `mark_base_ready`.
    pub async fn start_base_setup(&mut self, spec: &VmSpec) -> Result<()> {
        self.ensure_slot_free()?;
        if !self.base.is_installed() {
            return Err(Error::BaseNotInstalled);
        }

        let instance = Instance::build(
            self.engine.as_ref(),
            &self.base.bundle(),
            InstanceMode::BaseSetup,
            "base",
            spec,
        )
        .await?;
        instance.start().await?;
        self.active = Some(instance);
        Ok(())
    }

    /// Marks the base ready for cloning. One-way.
    pub fn mark_base_ready(&self) -> Result<()> {
        self.base.mark_ready()
    }

    /// Deletes the base bundle. Refused while an instance runs against
    /// it.
    pub fn delete_base(&self) -> Result<()> {
        if self
            .active
            .as_ref()
            .is_some_and(|i| i.mode() == InstanceMode::BaseSetup)
        {
            return Err(Error::SessionBusy("base".to_string()));
        }
        self.base.delete()
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Ensures the primary session's bundle exists, cloning it from the
    /// base if needed. Idempotent: an existing primary is returned as-is.
    pub async fn ensure_primary(&self) -> Result<Session> {
        self.cloner
            .clone_bundle(&self.base.bundle(), &Session::primary(), false)
    }

    /// Re-clones the primary session from the base, destroying the
    /// existing primary bundle. Refused while primary is running.
    pub async fn reset_primary(&self) -> Result<Session> {
        if self.active_session() == Some(crate::constants::PRIMARY_SESSION_ID) {
            return Err(Error::SessionBusy(
                crate::constants::PRIMARY_SESSION_ID.to_string(),
            ));
        }
        self.cloner
            .clone_bundle(&self.base.bundle(), &Session::primary(), true)
    }

    /// Creates a disposable session cloned from the base.
    pub async fn create_disposable(&self, name: &str) -> Result<Session> {
        self.cloner
            .clone_bundle(&self.base.bundle(), &Session::disposable(name), false)
    }

    /// Creates a disposable session cloned from an existing session's
    /// bundle (fork of its current disk state).
    pub async fn fork_session(&self, source_id: &str, name: &str) -> Result<Session> {
        if self.active_session() == Some(source_id) {
            return Err(Error::SessionBusy(source_id.to_string()));
        }
        let source = self.registry.bundle(source_id)?;
        if !source.exists() {
            return Err(Error::SessionNotFound(source_id.to_string()));
        }
        self.cloner
            .clone_bundle(&source, &Session::disposable(name), false)
    }

    /// Lists all sessions (implicit primary first).
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        self.registry.list()
    }

    /// Deletes a session's bundle (checkpoints included).
    ///
    /// Refused for the session bound to the active instance; stop it
    /// first. The primary session remains enumerable afterwards; only
    /// its bundle is removed.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        if self.active_session() == Some(id) {
            return Err(Error::SessionBusy(id.to_string()));
        }
        let bundle = self.registry.bundle(id)?;
        if !bundle.exists() {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        bundle.remove()?;
        info!(session = id, "session deleted");
        Ok(())
    }

    // =========================================================================
    // Instance Control
    // =========================================================================

    /// Builds and starts an instance for a session.
    pub async fn start_session(&mut self, id: &str, spec: &VmSpec) -> Result<()> {
        self.ensure_slot_free()?;

        let session = self.registry.get(id)?;
        let bundle = self.registry.bundle(id)?;
        if !bundle.exists() {
            return Err(Error::SessionNotFound(id.to_string()));
        }

        let instance = Instance::build(
            self.engine.as_ref(),
            &bundle,
            InstanceMode::Session(session.kind),
            id,
            spec,
        )
        .await?;
        instance.start().await?;
        self.active = Some(instance);
        info!(session = id, "session started");
        Ok(())
    }

    /// Stops the active instance and applies the teardown policy.
    ///
    /// No-op when nothing is running. On stop failure the instance stays
    /// in the slot (it may still be running) and the error propagates.
    pub async fn stop_active(&mut self) -> Result<()> {
        let Some(instance) = self.active.take() else {
            debug!("stop requested with no active instance");
            return Ok(());
        };

        if let Err(e) = instance.stop().await {
            self.active = Some(instance);
            return Err(e);
        }

        match instance.mode() {
            InstanceMode::BaseSetup => {}
            InstanceMode::Session(SessionKind::Primary) => {}
            InstanceMode::Session(SessionKind::Disposable) => {
                // Disposable sessions are not meant to persist.
                info!(
                    session = instance.label(),
                    "removing disposable session after stop"
                );
                instance.bundle().remove()?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Checkpoints
    // =========================================================================

    /// Captures a live checkpoint of a running session.
    ///
    /// The target session must be the one bound to the active instance.
    pub async fn checkpoint_live(&self, session_id: &str, name: &str) -> Result<Checkpoint> {
        let instance = match &self.active {
            Some(instance) if instance.session_id() == Some(session_id) => instance,
            _ => return Err(Error::InstanceNotRunning(session_id.to_string())),
        };
        let session = self.registry.get(session_id)?;
        self.checkpoints.save_live(&session, instance, name).await
    }

    /// Captures a disk-only checkpoint of a session that is not running.
    pub async fn checkpoint_offline(&self, session_id: &str, name: &str) -> Result<Checkpoint> {
        self.checkpoints
            .save_offline(session_id, name, self.active_session())
            .await
    }

    /// Restores a checkpoint into its owning session and boots a fresh
    /// instance from it.
    ///
    /// Any currently active instance is stopped first (its teardown
    /// policy applies). The session's live disk is overwritten before
    /// the new instance boots; failures after that point leave the
    /// overwrite in place.
    pub async fn restore_checkpoint(
        &mut self,
        checkpoint_id: &str,
        spec: &VmSpec,
    ) -> Result<Checkpoint> {
        let checkpoint = self.checkpoints.find(checkpoint_id)?;
        let session = self.registry.get(&checkpoint.session_id)?;

        if self.active.is_some() {
            info!(
                checkpoint = checkpoint_id,
                "stopping active instance before restore"
            );
            self.stop_active().await?;
        }

        let paths = self.checkpoints.restore_files(&checkpoint)?;

        let bundle = self.registry.bundle(&checkpoint.session_id)?;
        let instance = Instance::build(
            self.engine.as_ref(),
            &bundle,
            InstanceMode::Session(session.kind),
            session.id.as_str(),
            spec,
        )
        .await?;

        if checkpoint.has_state {
            instance.restore_state(&paths.state_blob).await?;
            instance.resume().await?;
        } else {
            instance.start().await?;
        }

        self.active = Some(instance);
        info!(
            checkpoint = checkpoint_id,
            session = %checkpoint.session_id,
            has_state = checkpoint.has_state,
            "checkpoint restored"
        );
        Ok(checkpoint)
    }

    /// Lists a session's checkpoints, newest first.
    pub fn list_checkpoints(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        self.checkpoints.list(session_id)
    }

    /// Deletes a checkpoint. No effect on the owning session.
    pub fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<()> {
        self.checkpoints.delete(checkpoint_id)
    }

    fn ensure_slot_free(&self) -> Result<()> {
        if let Some(instance) = &self.active {
            return Err(Error::SessionBusy(instance.label().to_string()));
        }
        Ok(())
    }
}
