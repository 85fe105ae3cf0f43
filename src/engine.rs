//! Execution-engine trait - the seam to the external hypervisor.
//!
//! This trait pair defines everything the orchestration layer consumes
//! from a VM execution engine:
//! - `VmEngine::install_from_image`: Materialize a base bundle's artifacts
//! - `VmEngine::create_handle`: Build a live handle against a bundle
//! - `VmHandle`: Drive one VM through start/stop/pause/resume/save/restore
//!
//! # Boundary
//!
//! Boot, CPU/memory virtualization, device emulation, and the execution
//! state serialization format all live behind these traits. The
//! orchestration layer never inspects artifact contents; it only moves
//! the files around and sequences handle operations.
//!
//! # Error Model
//!
//! Engine methods fail with [`EngineError`], an opaque engine-reported
//! message. The instance controller wraps these into domain errors
//! (`StartFailed`, `StopFailed`, ...) without altering the text.

use crate::bundle::BundleArtifacts;
use crate::constants::{
    DEFAULT_CPU_COUNT, DEFAULT_DISK_SIZE_BYTES, DEFAULT_DISPLAY_HEIGHT, DEFAULT_DISPLAY_PPI,
    DEFAULT_DISPLAY_WIDTH, DEFAULT_MEMORY_BYTES, MAX_CPU_COUNT, MAX_MEMORY_BYTES,
};
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::watch;

/// Result type for raw engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Opaque error text reported by the execution engine.
///
/// The orchestration layer carries this message verbatim into its domain
/// errors; it never parses or reinterprets it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    /// Creates an engine error from any displayable value.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// VM State
// =============================================================================

/// Observed lifecycle state of a VM handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    /// The VM is not running.
    Stopped,
    /// The VM is executing.
    Running,
    /// Execution is suspended; the guest is frozen but resumable.
    Paused,
    /// A stop was requested and the engine is winding down.
    Stopping,
    /// The engine reported an unrecoverable fault.
    Failed(String),
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopping => write!(f, "stopping"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

// =============================================================================
// Resource Specifications
// =============================================================================

/// Guest display geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixels per inch.
    pub ppi: u32,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self {
            width: DEFAULT_DISPLAY_WIDTH,
            height: DEFAULT_DISPLAY_HEIGHT,
            ppi: DEFAULT_DISPLAY_PPI,
        }
    }
}

/// Resources for a base installation.
#[derive(Debug, Clone)]
pub struct InstallSpec {
    /// Size of the disk image to create.
    pub disk_size_bytes: u64,
    /// Virtual CPU count.
    pub cpu_count: u32,
    /// Guest memory in bytes.
    pub memory_bytes: u64,
    /// Display geometry.
    pub display: DisplayGeometry,
}

impl Default for InstallSpec {
    fn default() -> Self {
        Self {
            disk_size_bytes: DEFAULT_DISK_SIZE_BYTES,
            cpu_count: DEFAULT_CPU_COUNT,
            memory_bytes: DEFAULT_MEMORY_BYTES,
            display: DisplayGeometry::default(),
        }
    }
}

impl InstallSpec {
    /// Returns a copy with cpu/memory clamped to the configured ceilings.
    pub fn clamped(&self) -> Self {
        Self {
            disk_size_bytes: self.disk_size_bytes,
            cpu_count: self.cpu_count.min(MAX_CPU_COUNT),
            memory_bytes: self.memory_bytes.min(MAX_MEMORY_BYTES),
            display: self.display,
        }
    }
}

/// Resources for running a VM against an existing bundle.
#[derive(Debug, Clone)]
pub struct VmSpec {
    /// Virtual CPU count.
    pub cpu_count: u32,
    /// Guest memory in bytes.
    pub memory_bytes: u64,
    /// Display geometry.
    pub display: DisplayGeometry,
}

impl Default for VmSpec {
    fn default() -> Self {
        Self {
            cpu_count: DEFAULT_CPU_COUNT,
            memory_bytes: DEFAULT_MEMORY_BYTES,
            display: DisplayGeometry::default(),
        }
    }
}

impl VmSpec {
    /// Returns a copy with cpu/memory clamped to the configured ceilings.
    pub fn clamped(&self) -> Self {
        Self {
            cpu_count: self.cpu_count.min(MAX_CPU_COUNT),
            memory_bytes: self.memory_bytes.min(MAX_MEMORY_BYTES),
            display: self.display,
        }
    }
}

// =============================================================================
// Engine Traits
// =============================================================================

/// Fractional-progress callback in `[0, 1]`.
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// The VM execution engine capability consumed by this crate.
///
/// Implementations wrap a concrete hypervisor (Virtualization.framework,
/// vfkit, a test double). One engine instance serves all bundles; the
/// per-VM state lives in the handles it creates.
#[async_trait]
pub trait VmEngine: Send + Sync {
    /// Returns the engine name for logs and error messages.
    fn name(&self) -> &str;

    /// Checks if this engine is usable on the current host.
    fn is_available(&self) -> bool;

    /// Returns the reason why this engine is unavailable (if any).
    fn unavailable_reason(&self) -> Option<String>;

    /// Installs a base bundle from a restore image.
    ///
    /// Materializes the disk image, auxiliary storage, hardware model,
    /// and machine identifier at the paths given in `artifacts`. Progress
    /// is reported as a fraction in `[0, 1]`.
    ///
    /// The caller points `artifacts` into a staging directory; on failure
    /// the caller discards that directory, so the engine does not need to
    /// clean up partially written files.
    async fn install_from_image(
        &self,
        image: &Path,
        artifacts: &BundleArtifacts,
        spec: &InstallSpec,
        progress: ProgressFn<'_>,
    ) -> EngineResult<()>;

    /// Builds a live handle against a bundle's artifacts.
    ///
    /// Fails if the artifacts are malformed or incompatible with the
    /// host. The handle starts in [`VmState::Stopped`].
    async fn create_handle(
        &self,
        artifacts: &BundleArtifacts,
        spec: &VmSpec,
    ) -> EngineResult<Box<dyn VmHandle>>;
}

/// A live handle to one VM.
///
/// All operations are asynchronous and must be awaited strictly in
/// sequence per handle; issuing `resume` before a prior `save_state`
/// completes is undefined behavior that callers (not the engine) must
/// prevent.
#[async_trait]
pub trait VmHandle: Send + Sync {
    /// Starts the VM (cold boot from the bundle's disk).
    async fn start(&self) -> EngineResult<()>;

    /// Stops the VM.
    async fn stop(&self) -> EngineResult<()>;

    /// Pauses execution, freezing the guest.
    async fn pause(&self) -> EngineResult<()>;

    /// Resumes a paused VM.
    async fn resume(&self) -> EngineResult<()>;

    /// Serializes the paused execution state to `path`.
    async fn save_state(&self, path: &Path) -> EngineResult<()>;

    /// Restores execution state previously written by `save_state`.
    ///
    /// The handle must not have been started; after a successful restore
    /// the VM is paused and a `resume` completes the transition.
    async fn restore_state(&self, path: &Path) -> EngineResult<()>;

    /// Returns the last observed state.
    fn current_state(&self) -> VmState;

    /// Subscribes to asynchronous state-change notifications.
    ///
    /// The engine pushes guest-initiated transitions (shutdown,
    /// unexpected stop) here; the orchestration layer observes and logs
    /// them but takes no automatic action.
    fn watch_state(&self) -> watch::Receiver<VmState>;
}
