//! # Session Store Constants
//!
//! Defines the on-disk artifact names, store layout, and resource bounds
//! for the session orchestration layer. These constants are the **single
//! source of truth** for the persisted layout: every component resolves
//! paths through them, never through hand-built strings.
//!
//! ## Layout Stability
//!
//! The artifact file names below are load-bearing: bundles written by one
//! version of the crate must remain readable by the next. Renaming any of
//! them is a breaking change to every existing store on disk.
//!
//! ## Cross-References
//!
//! - [`crate::bundle`]: Resolves artifact paths from these names
//! - [`crate::clone`]: Copies artifacts in the documented order
//! - [`crate::checkpoint`]: Uses the checkpoint subdirectory layout
//! - [`crate::engine`]: Clamps resource requests to the ceilings here

// =============================================================================
// Bundle Artifact Names
// =============================================================================
//
// A bundle directory holds exactly these files. The first four are
// mandatory; Session.json and BaseReady are optional markers. Creation
// order is Disk.img → AuxiliaryStorage → HardwareModel → MachineIdentifier
// → Session.json, so metadata presence doubles as a "fully cloned" signal
// for display purposes.
// =============================================================================

/// Block-device image backing the VM (mandatory).
pub const DISK_IMAGE_NAME: &str = "Disk.img";

/// Boot firmware / NVRAM blob (mandatory).
pub const AUX_STORAGE_NAME: &str = "AuxiliaryStorage";

/// Opaque hardware-model descriptor produced once at install time and
/// copied verbatim into every clone (mandatory).
pub const HARDWARE_MODEL_NAME: &str = "HardwareModel";

/// Opaque machine-identity descriptor, copied verbatim like the hardware
/// model (mandatory).
pub const MACHINE_IDENTIFIER_NAME: &str = "MachineIdentifier";

/// Session descriptor metadata (optional, advisory).
pub const SESSION_METADATA_NAME: &str = "Session.json";

/// Presence-only marker gating cloning from the base. Content irrelevant.
pub const READY_MARKER_NAME: &str = "BaseReady";

// =============================================================================
// Checkpoint Artifact Names
// =============================================================================

/// Checkpoint metadata document.
pub const CHECKPOINT_METADATA_NAME: &str = "Checkpoint.json";

/// Serialized execution-state blob, present iff the checkpoint was taken
/// from a live (paused) instance.
pub const STATE_BLOB_NAME: &str = "State.bin";

// =============================================================================
// Store Layout
// =============================================================================
//
// The store root defaults to `~/.vmnest`. Everything below is relative to
// that root:
//
//   <root>/base/                               the template bundle
//   <root>/sessions/<id>/                      one bundle per session
//   <root>/sessions/<id>/checkpoints/<ckpt>/   one dir per checkpoint
//   <root>/images/                             cached restore images
// =============================================================================

/// Subdirectory holding the single base (template) bundle.
pub const BASE_DIR: &str = "base";

/// Subdirectory holding one bundle per session.
pub const SESSIONS_DIR: &str = "sessions";

/// Per-session subdirectory holding checkpoints.
pub const CHECKPOINTS_DIR: &str = "checkpoints";

/// Subdirectory for downloaded restore images.
pub const IMAGES_DIR: &str = "images";

/// Suffix appended to a bundle directory while it is being written.
///
/// A `.partial` directory is never reported by `exists()` and is swept
/// before any retry, so a crash mid-copy cannot present as a complete
/// bundle.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// The one session id that always exists in enumeration, even before its
/// bundle is materialized on disk.
pub const PRIMARY_SESSION_ID: &str = "primary";

// =============================================================================
// Resource Defaults & Ceilings
// =============================================================================
//
// Requests above a ceiling are clamped, not rejected; the engine receives
// the clamped value. Ceilings bound host impact from a misconfigured
// caller, defaults suit a general-purpose desktop guest.
// =============================================================================

/// Default virtual CPU count for a session VM.
pub const DEFAULT_CPU_COUNT: u32 = 4;

/// Maximum virtual CPU count handed to the engine.
pub const MAX_CPU_COUNT: u32 = 16;

/// Default guest memory (8 GiB).
pub const DEFAULT_MEMORY_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Maximum guest memory (64 GiB).
pub const MAX_MEMORY_BYTES: u64 = 64 * 1024 * 1024 * 1024;

/// Default install-time disk size (64 GiB).
pub const DEFAULT_DISK_SIZE_BYTES: u64 = 64 * 1024 * 1024 * 1024;

/// Minimum install-time disk size (8 GiB). Below this a guest install
/// cannot complete, so requests are rejected rather than clamped.
pub const MIN_DISK_SIZE_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Default display geometry.
pub const DEFAULT_DISPLAY_WIDTH: u32 = 1920;
pub const DEFAULT_DISPLAY_HEIGHT: u32 = 1200;
pub const DEFAULT_DISPLAY_PPI: u32 = 80;

// =============================================================================
// Identifier Validation
// =============================================================================
//
// Session and checkpoint ids are used as path components under the store
// root. Validation is allowlist-based: only listed characters are
// permitted, which rules out traversal (`..`, `/`) by construction.
// =============================================================================

/// Valid characters for session and checkpoint identifiers.
pub const ID_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Maximum identifier length.
///
/// 64 characters accommodates a UUID with a short prefix while keeping
/// paths well under filesystem limits.
pub const MAX_ID_LEN: usize = 64;

/// Validates a session or checkpoint identifier for use as a path
/// component.
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` describing the failure.
#[inline]
#[must_use = "validation result must be checked before using the id in a path"]
pub fn validate_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("identifier cannot be empty");
    }
    if id.len() > MAX_ID_LEN {
        return Err("identifier exceeds maximum length");
    }
    if !id.chars().all(|c| ID_VALID_CHARS.contains(c)) {
        return Err("identifier contains invalid characters");
    }
    Ok(())
}
