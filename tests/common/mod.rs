//! Shared test fixtures: a scriptable mock execution engine and bundle
//! helpers.
//!
//! `MockEngine` records every operation (engine- and handle-level) in a
//! shared log so tests can assert on exact call sequences, and can be
//! told to fail specific operations to exercise error paths.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::watch;
use vmnest::{
    BundleArtifacts, BundleStore, EngineError, EngineResult, InstallSpec, Orchestrator,
    ProgressFn, VmEngine, VmHandle, VmSpec, VmState,
};

/// Bytes the mock installer writes into the base disk image.
pub const BASE_DISK_BYTES: &[u8] = b"base-disk-contents";

/// Bytes the mock handle writes as serialized execution state.
pub const STATE_BYTES: &[u8] = b"vm-exec-state";

// =============================================================================
// Mock Engine
// =============================================================================

/// Scriptable in-memory execution engine.
pub struct MockEngine {
    ops: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<HashSet<String>>>,
    available: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(Mutex::new(HashSet::new())),
            available: true,
        }
    }

    /// An engine that reports itself unusable on this host.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Makes the named operation fail until cleared.
    pub fn fail_on(&self, op: &str) {
        self.fail.lock().unwrap().insert(op.to_string());
    }

    /// Clears a scripted failure.
    pub fn clear_failure(&self, op: &str) {
        self.fail.lock().unwrap().remove(op);
    }

    /// Returns the recorded operation sequence so far.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: &str) -> EngineResult<()> {
        record(&self.ops, &self.fail, op)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn record(
    ops: &Arc<Mutex<Vec<String>>>,
    fail: &Arc<Mutex<HashSet<String>>>,
    op: &str,
) -> EngineResult<()> {
    ops.lock().unwrap().push(op.to_string());
    if fail.lock().unwrap().contains(op) {
        Err(EngineError::new(format!("mock {} failure", op)))
    } else {
        Ok(())
    }
}

#[async_trait]
impl VmEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn unavailable_reason(&self) -> Option<String> {
        if self.available {
            None
        } else {
            Some("mock engine disabled for this test".to_string())
        }
    }

    async fn install_from_image(
        &self,
        _image: &Path,
        artifacts: &BundleArtifacts,
        _spec: &InstallSpec,
        progress: ProgressFn<'_>,
    ) -> EngineResult<()> {
        self.record("install")?;
        progress(0.25);
        fs::write(&artifacts.disk, BASE_DISK_BYTES).map_err(|e| EngineError::new(e.to_string()))?;
        fs::write(&artifacts.aux_storage, b"aux").map_err(|e| EngineError::new(e.to_string()))?;
        fs::write(&artifacts.hardware_model, b"hw").map_err(|e| EngineError::new(e.to_string()))?;
        fs::write(&artifacts.machine_identifier, b"mid")
            .map_err(|e| EngineError::new(e.to_string()))?;
        progress(1.0);
        Ok(())
    }

    async fn create_handle(
        &self,
        _artifacts: &BundleArtifacts,
        _spec: &VmSpec,
    ) -> EngineResult<Box<dyn VmHandle>> {
        self.record("create_handle")?;
        Ok(Box::new(MockHandle::new(
            self.ops.clone(),
            self.fail.clone(),
        )))
    }
}

// =============================================================================
// Mock Handle
// =============================================================================

/// One mock VM; state transitions mirror the real engine contract.
pub struct MockHandle {
    ops: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<HashSet<String>>>,
    state: watch::Sender<VmState>,
}

impl MockHandle {
    fn new(ops: Arc<Mutex<Vec<String>>>, fail: Arc<Mutex<HashSet<String>>>) -> Self {
        let (state, _) = watch::channel(VmState::Stopped);
        Self { ops, fail, state }
    }

    fn transition(&self, op: &str, next: VmState) -> EngineResult<()> {
        record(&self.ops, &self.fail, op)?;
        // send_replace keeps working even with no subscribed receivers.
        self.state.send_replace(next);
        Ok(())
    }
}

#[async_trait]
impl VmHandle for MockHandle {
    async fn start(&self) -> EngineResult<()> {
        self.transition("start", VmState::Running)
    }

    async fn stop(&self) -> EngineResult<()> {
        self.transition("stop", VmState::Stopped)
    }

    async fn pause(&self) -> EngineResult<()> {
        self.transition("pause", VmState::Paused)
    }

    async fn resume(&self) -> EngineResult<()> {
        self.transition("resume", VmState::Running)
    }

    async fn save_state(&self, path: &Path) -> EngineResult<()> {
        record(&self.ops, &self.fail, "save_state")?;
        fs::write(path, STATE_BYTES).map_err(|e| EngineError::new(e.to_string()))?;
        Ok(())
    }

    async fn restore_state(&self, path: &Path) -> EngineResult<()> {
        record(&self.ops, &self.fail, "restore_state")?;
        if !path.is_file() {
            return Err(EngineError::new("state blob missing"));
        }
        self.state.send_replace(VmState::Paused);
        Ok(())
    }

    fn current_state(&self) -> VmState {
        self.state.borrow().clone()
    }

    fn watch_state(&self) -> watch::Receiver<VmState> {
        self.state.subscribe()
    }
}

// =============================================================================
// Store Fixtures
// =============================================================================

/// A fresh store in a temp directory.
pub fn test_store() -> (TempDir, BundleStore) {
    let temp = TempDir::new().unwrap();
    let store = BundleStore::with_path(temp.path().join("store")).unwrap();
    (temp, store)
}

/// Writes a complete fake base bundle directly (bypassing the engine).
pub fn install_fake_base(store: &BundleStore) {
    let bundle = store.base();
    fs::create_dir_all(bundle.dir()).unwrap();
    let artifacts = bundle.artifacts();
    fs::write(&artifacts.disk, BASE_DISK_BYTES).unwrap();
    fs::write(&artifacts.aux_storage, b"aux").unwrap();
    fs::write(&artifacts.hardware_model, b"hw").unwrap();
    fs::write(&artifacts.machine_identifier, b"mid").unwrap();
}

/// Marks the fake base ready for cloning.
pub fn mark_fake_base_ready(store: &BundleStore) {
    fs::write(store.base().artifacts().ready_marker, b"").unwrap();
}

/// An orchestrator over a ready fake base, plus the shared mock engine.
pub fn ready_orchestrator() -> (TempDir, Orchestrator, Arc<MockEngine>) {
    let (temp, store) = test_store();
    install_fake_base(&store);
    mark_fake_base_ready(&store);

    let engine = Arc::new(MockEngine::new());
    let nest = Orchestrator::with_store(engine.clone(), store);
    (temp, nest, engine)
}
