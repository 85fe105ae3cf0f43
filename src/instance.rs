//! # Instance Controller - Driving One Live VM
//!
//! Thin per-run wrapper around a [`VmHandle`] obtained from the execution
//! engine. Every transition is logged with the pre- and post-operation
//! state, and every engine failure is wrapped into the matching domain
//! error carrying the engine's message.
//!
//! Engine-originated state changes (guest-initiated shutdown, unexpected
//! stop) are observed by a background logging task and surfaced as
//! `tracing` events only; this layer takes no automatic action on them
//! (no auto-restart; a stopped guest stays stopped until the caller acts).

use crate::bundle::Bundle;
use crate::engine::{VmEngine, VmHandle, VmSpec, VmState};
use crate::error::{Error, Result};
use crate::session::SessionKind;
use std::path::Path;
use tracing::{debug, info, warn};

// =============================================================================
// Instance Mode
// =============================================================================

/// What happens when this instance is torn down.
///
/// Matched exhaustively at teardown: disposable sessions are deleted on
/// stop; primary and base-setup instances leave their bundle untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceMode {
    /// The base booted for first-boot setup, before `mark_ready`.
    BaseSetup,
    /// A session VM of the given kind.
    Session(SessionKind),
}

impl std::fmt::Display for InstanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BaseSetup => write!(f, "base-setup"),
            Self::Session(kind) => write!(f, "session({})", kind),
        }
    }
}

// =============================================================================
// Instance
// =============================================================================

/// Runtime-only association between a bundle and a running VM handle.
pub struct Instance {
    label: String,
    mode: InstanceMode,
    bundle: Bundle,
    handle: Box<dyn VmHandle>,
}

impl Instance {
    /// Builds an instance against a bundle's artifacts.
    ///
    /// Verifies the bundle is complete first: a bundle directory
    /// existing does not guarantee every artifact survived an
    /// interrupted clone. The handle starts stopped; call
    /// [`Instance::start`] (or restore a checkpoint) afterwards.
    pub async fn build(
        engine: &dyn VmEngine,
        bundle: &Bundle,
        mode: InstanceMode,
        label: impl Into<String>,
        spec: &VmSpec,
    ) -> Result<Self> {
        let label = label.into();

        if !engine.is_available() {
            return Err(Error::EngineUnavailable {
                engine: engine.name().to_string(),
                reason: engine
                    .unavailable_reason()
                    .unwrap_or_else(|| "unknown".to_string()),
            });
        }

        bundle.verify_complete()?;

        let handle = engine
            .create_handle(&bundle.artifacts(), &spec.clamped())
            .await
            .map_err(|e| Error::StartFailed(e.to_string()))?;

        spawn_state_logger(&label, handle.as_ref());

        debug!(instance = %label, mode = %mode, "instance built");

        Ok(Self {
            label,
            mode,
            bundle: bundle.clone(),
            handle,
        })
    }

    /// Returns the teardown mode.
    pub fn mode(&self) -> InstanceMode {
        self.mode
    }

    /// Returns the log label (session id, or "base" for base setup).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the session id this instance runs against, if it is a
    /// session instance.
    pub fn session_id(&self) -> Option<&str> {
        match self.mode {
            InstanceMode::Session(_) => Some(&self.label),
            InstanceMode::BaseSetup => None,
        }
    }

    /// Returns the bundle this instance runs against.
    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    /// Returns the last observed VM state.
    pub fn state(&self) -> VmState {
        self.handle.current_state()
    }

    /// Starts the VM (cold boot).
    pub async fn start(&self) -> Result<()> {
        let pre = self.handle.current_state();
        let result = self.handle.start().await;
        self.log_transition("start", &pre, &result);
        result.map_err(|e| Error::StartFailed(e.to_string()))
    }

    /// Stops the VM.
    pub async fn stop(&self) -> Result<()> {
        let pre = self.handle.current_state();
        let result = self.handle.stop().await;
        self.log_transition("stop", &pre, &result);
        result.map_err(|e| Error::StopFailed(e.to_string()))
    }

    /// Pauses the VM, freezing guest execution.
    pub async fn pause(&self) -> Result<()> {
        let pre = self.handle.current_state();
        let result = self.handle.pause().await;
        self.log_transition("pause", &pre, &result);
        result.map_err(|e| Error::PauseFailed(e.to_string()))
    }

    /// Resumes a paused VM.
    pub async fn resume(&self) -> Result<()> {
        let pre = self.handle.current_state();
        let result = self.handle.resume().await;
        self.log_transition("resume", &pre, &result);
        result.map_err(|e| Error::ResumeFailed(e.to_string()))
    }

    /// Serializes the paused execution state to `path`.
    pub async fn save_state(&self, path: &Path) -> Result<()> {
        let pre = self.handle.current_state();
        let result = self.handle.save_state(path).await;
        self.log_transition("save_state", &pre, &result);
        result.map_err(|e| Error::SaveStateFailed(e.to_string()))
    }

    /// Restores execution state from `path`; the VM ends paused.
    pub async fn restore_state(&self, path: &Path) -> Result<()> {
        let pre = self.handle.current_state();
        let result = self.handle.restore_state(path).await;
        self.log_transition("restore_state", &pre, &result);
        result.map_err(|e| Error::RestoreStateFailed(e.to_string()))
    }

    fn log_transition(
        &self,
        op: &str,
        pre: &VmState,
        result: &crate::engine::EngineResult<()>,
    ) {
        let post = self.handle.current_state();
        match result {
            Ok(()) => info!(
                instance = %self.label,
                op,
                pre = %pre,
                post = %post,
                "instance transition"
            ),
            Err(e) => warn!(
                instance = %self.label,
                op,
                pre = %pre,
                post = %post,
                error = %e,
                "instance transition failed"
            ),
        }
    }
}

/// Spawns a background task that logs engine-pushed state changes.
///
/// Observation only; guest-initiated transitions are surfaced, never
/// reacted to.
fn spawn_state_logger(label: &str, handle: &dyn VmHandle) {
    let mut rx = handle.watch_state();
    let label = label.to_string();

    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow().clone();
            info!(instance = %label, state = %state, "engine state change");
            if matches!(state, VmState::Stopped | VmState::Failed(_)) {
                debug!(instance = %label, "state logger exiting");
                return;
            }
        }
    });
}
