//! # vmnest
//!
//! **VM Session Lifecycle Orchestration**
//!
//! This crate manages virtual-machine "sessions" built from a single
//! reusable template (the "base") image: installing the base, cloning it
//! into persistent or disposable sessions, starting and stopping those
//! sessions, and capturing/restoring point-in-time checkpoints. The VM
//! execution engine itself is an external collaborator consumed through
//! the [`VmEngine`]/[`VmHandle`] traits.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                            vmnest                                  │
//! ├────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────────────────────────────────────────┐    │
//! │  │                      Orchestrator                          │    │
//! │  │   single active-instance slot │ teardown policy │ busy     │    │
//! │  │   checks for clone/checkpoint/delete                       │    │
//! │  └──────┬──────────┬──────────┬──────────┬─────────┬──────────┘    │
//! │         │          │          │          │         │               │
//! │   BaseManager  CloneOperator  │   CheckpointMgr  Instance          │
//! │         │          │     SessionRegistry  │         │              │
//! │  ┌──────┴──────────┴──────────┴───────────┴─────┐   │              │
//! │  │                 BundleStore                  │   │              │
//! │  │  Disk.img │ AuxiliaryStorage │ HardwareModel │   │              │
//! │  │  MachineIdentifier │ Session.json │ BaseReady│   │              │
//! │  └──────────────────────────────────────────────┘   │              │
//! ├─────────────────────────────────────────────────────┼──────────────┤
//! │              External collaborators (traits)        │              │
//! │  ┌──────────────────────┐  ┌────────────────────────┴───────────┐  │
//! │  │  RestoreImageSource  │  │        VmEngine / VmHandle         │  │
//! │  │  catalog + download  │  │ install │ start/stop/pause/resume  │  │
//! │  └──────────────────────┘  │ save_state / restore_state         │  │
//! │                            └────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!                install          mark_ready
//!   base: Absent ───────► Installed ────────► Ready
//!                                               │ clone
//!                                               ▼
//!              start    ┌─────────┐   pause   ┌────────┐
//!   session: ─────────► │ Running │ ────────► │ Paused │
//!                       └─┬─────▲─┘           └───┬────┘
//!                    stop │     │ resume          │ save_state
//!                         ▼     └─────────────────┘ + disk clone
//!                   ┌─────────┐                      = checkpoint
//!                   │ Stopped │  (disposable sessions are deleted
//!                   └─────────┘   on stop; primary persists)
//! ```
//!
//! # Key Invariants
//!
//! - **No partial bundles**: a bundle either has all four mandatory
//!   artifacts or does not exist. Creation stages into a `.partial`
//!   directory and renames atomically (see [`bundle`]).
//! - **Only a ready base clones**: the one-way `BaseReady` marker gates
//!   every clone from the base (see [`base`]).
//! - **Checkpoints never leave a VM paused**: once a live capture has
//!   paused the VM, every exit path resumes it before the result
//!   propagates (see [`checkpoint`]).
//! - **One live instance**: a single optional slot on the
//!   [`Orchestrator`]; busy checks derive from it, not from file locks.
//!
//! # Concurrency Model
//!
//! Operations are async but not internally parallelized. Callers
//! serialize lifecycle operations through one [`Orchestrator`];
//! concurrent operations against the same bundle are undefined (no file
//! locking is provided, a documented limitation of the design, preserved here).
//! File copies block the calling task and are not cancellable mid-copy;
//! abandoning an await does not abort an in-flight engine call.
//!
//! # Example
//!
//! ```rust,ignore
//! use vmnest::{Orchestrator, BundleStore, InstallSpec, VmSpec};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> vmnest::Result<()> {
//!     let engine = Arc::new(MyEngine::new());
//!     let store = BundleStore::new()?;
//!     let mut nest = Orchestrator::with_store(engine, store);
//!
//!     // Install the template and complete first-boot setup.
//!     nest.install_base("restore.img".as_ref(), &InstallSpec::default(), &|p| {
//!         println!("install: {:.0}%", p * 100.0);
//!     })
//!     .await?;
//!     nest.mark_base_ready()?;
//!
//!     // Clone, boot, checkpoint.
//!     let primary = nest.ensure_primary().await?;
//!     nest.start_session(&primary.id, &VmSpec::default()).await?;
//!     let ckpt = nest.checkpoint_live(&primary.id, "fresh").await?;
//!     nest.stop_active().await?;
//!     nest.restore_checkpoint(&ckpt.id, &VmSpec::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod base;
pub mod bundle;
pub mod checkpoint;
pub mod clone;
pub mod constants;
pub mod engine;
pub mod error;
pub mod image;
pub mod instance;
pub mod orchestrator;
pub mod session;

// Re-exports
pub use base::{BaseManager, BaseState};
pub use bundle::{Bundle, BundleArtifacts, BundleStore};
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointPaths};
pub use clone::CloneOperator;
pub use constants::*;
pub use engine::{
    DisplayGeometry, EngineError, EngineResult, InstallSpec, ProgressFn, VmEngine, VmHandle,
    VmSpec, VmState,
};
pub use error::{Error, Result};
pub use image::{CatalogEntry, RestoreImageSource, ensure_restore_image};
pub use instance::{Instance, InstanceMode};
pub use orchestrator::Orchestrator;
pub use session::{Session, SessionKind, SessionRegistry};
