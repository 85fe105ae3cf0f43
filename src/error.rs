//! Error types for the session orchestration layer.

use std::path::PathBuf;

/// Result type alias for session orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the session orchestration layer.
///
/// Low-level copy and engine failures are wrapped with enough context
/// (which artifact, which bundle) to be actionable, then surfaced to the
/// caller unmodified. No variant triggers an automatic retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Bundle / Artifact Errors
    // =========================================================================
    /// A mandatory artifact is missing from a bundle directory.
    #[error("bundle '{bundle}' is missing artifact '{artifact}'")]
    MissingArtifact { bundle: String, artifact: String },

    /// A disk image failed a sanity check (zero-length or unreadable).
    #[error("invalid disk image: {0}")]
    InvalidDiskImage(String),

    /// An artifact copy failed.
    #[error("failed to copy {label}: {reason}")]
    CopyFailed { label: String, reason: String },

    /// Store root could not be initialized.
    #[error("failed to initialize store at {path}: {reason}")]
    StoreInitFailed { path: PathBuf, reason: String },

    // =========================================================================
    // Base Lifecycle Errors
    // =========================================================================
    /// The base bundle has not been installed yet.
    #[error("base is not installed")]
    BaseNotInstalled,

    /// The base exists but its first-boot setup has not been completed.
    #[error("base is not marked ready; complete first-boot setup first")]
    BaseNotReady,

    /// The engine's installer failed.
    #[error("installation failed: {0}")]
    InstallationFailed(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// Session not found (no bundle on disk).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session is bound to the active live instance and cannot be the
    /// target of this operation until it is stopped.
    #[error("session '{0}' is currently running; stop it first")]
    SessionBusy(String),

    /// The operation needs a live instance for this session and none is
    /// active.
    #[error("session '{0}' has no live instance")]
    InstanceNotRunning(String),

    /// A session or checkpoint identifier failed validation.
    #[error("invalid identifier '{id}': {reason}")]
    InvalidId { id: String, reason: &'static str },

    // =========================================================================
    // Checkpoint Errors
    // =========================================================================
    /// Checkpoint not found.
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Checkpoint directory exists but is missing required files.
    #[error("checkpoint '{id}' is incomplete: {detail}")]
    CheckpointIncomplete { id: String, detail: String },

    // =========================================================================
    // Instance / Engine Errors
    // =========================================================================
    /// The execution engine is not usable on this host.
    #[error("engine '{engine}' not available: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    /// Instance start failed.
    #[error("failed to start instance: {0}")]
    StartFailed(String),

    /// Instance stop failed.
    #[error("failed to stop instance: {0}")]
    StopFailed(String),

    /// Instance pause failed.
    #[error("failed to pause instance: {0}")]
    PauseFailed(String),

    /// Instance resume failed.
    #[error("failed to resume instance: {0}")]
    ResumeFailed(String),

    /// Execution-state serialization failed.
    #[error("failed to save instance state: {0}")]
    SaveStateFailed(String),

    /// Execution-state restoration failed.
    #[error("failed to restore instance state: {0}")]
    RestoreStateFailed(String),

    // =========================================================================
    // Restore-Image Acquisition Errors
    // =========================================================================
    /// Restore-image download failed.
    #[error("failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}
