//! Tests for the orchestrator.
//!
//! Validates the single-instance slot, the teardown policy per instance
//! mode, busy checks on deletion, and the full install-to-restore
//! scenario.

mod common;

use common::{MockEngine, ready_orchestrator, test_store};
use std::fs;
use std::sync::Arc;
use vmnest::{
    Error, InstallSpec, Orchestrator, PRIMARY_SESSION_ID, SessionKind, VmSpec, VmState,
};

fn spec() -> VmSpec {
    VmSpec::default()
}

// =============================================================================
// Single-Slot Tests
// =============================================================================

#[tokio::test]
async fn test_only_one_instance_at_a_time() {
    let (_temp, mut nest, _engine) = ready_orchestrator();
    let primary = nest.ensure_primary().await.unwrap();
    let scratch = nest.create_disposable("scratch").await.unwrap();

    nest.start_session(&primary.id, &spec()).await.unwrap();

    let result = nest.start_session(&scratch.id, &spec()).await;
    assert!(matches!(result, Err(Error::SessionBusy(_))));
    assert_eq!(nest.active_session(), Some(PRIMARY_SESSION_ID));
}

#[tokio::test]
async fn test_stop_with_no_active_instance_is_noop() {
    let (_temp, mut nest, engine) = ready_orchestrator();
    nest.stop_active().await.unwrap();
    assert!(engine.ops().is_empty());
}

#[tokio::test]
async fn test_failed_stop_keeps_instance_in_slot() {
    let (_temp, mut nest, engine) = ready_orchestrator();
    let primary = nest.ensure_primary().await.unwrap();
    nest.start_session(&primary.id, &spec()).await.unwrap();

    engine.fail_on("stop");
    let result = nest.stop_active().await;
    assert!(matches!(result, Err(Error::StopFailed(_))));
    assert_eq!(
        nest.active_session(),
        Some(PRIMARY_SESSION_ID),
        "a possibly-still-running instance stays tracked"
    );

    engine.clear_failure("stop");
    nest.stop_active().await.unwrap();
    assert_eq!(nest.active_session(), None);
}

#[tokio::test]
async fn test_start_requires_materialized_bundle() {
    let (_temp, mut nest, _engine) = ready_orchestrator();

    // Primary is enumerable but its bundle does not exist yet.
    let result = nest.start_session(PRIMARY_SESSION_ID, &spec()).await;
    assert!(matches!(result, Err(Error::SessionNotFound(_))));
}

#[tokio::test]
async fn test_start_refuses_incomplete_bundle() {
    let (_temp, mut nest, _engine) = ready_orchestrator();
    let primary = nest.ensure_primary().await.unwrap();

    fs::remove_file(nest.store().session(&primary.id).artifacts().aux_storage).unwrap();

    let result = nest.start_session(&primary.id, &spec()).await;
    assert!(matches!(result, Err(Error::MissingArtifact { .. })));
}

// =============================================================================
// Teardown Policy Tests
// =============================================================================

#[tokio::test]
async fn test_primary_bundle_survives_stop() {
    let (_temp, mut nest, _engine) = ready_orchestrator();
    let primary = nest.ensure_primary().await.unwrap();

    nest.start_session(&primary.id, &spec()).await.unwrap();
    nest.stop_active().await.unwrap();

    assert!(nest.store().session(&primary.id).exists());
}

#[tokio::test]
async fn test_disposable_bundle_deleted_on_stop() {
    let (_temp, mut nest, _engine) = ready_orchestrator();
    let scratch = nest.create_disposable("scratch").await.unwrap();
    assert_eq!(scratch.kind, SessionKind::Disposable);

    nest.start_session(&scratch.id, &spec()).await.unwrap();
    nest.stop_active().await.unwrap();

    assert!(
        !nest.store().session(&scratch.id).exists(),
        "disposable sessions do not persist"
    );
    let sessions = nest.list_sessions().unwrap();
    assert!(sessions.iter().all(|s| s.id != scratch.id));
}

#[tokio::test]
async fn test_base_setup_leaves_base_intact() {
    let (_temp, store) = test_store();
    let engine = Arc::new(MockEngine::new());
    let mut nest = Orchestrator::with_store(engine.clone(), store);

    nest.install_base("restore.img".as_ref(), &InstallSpec::default(), &|_| {})
        .await
        .unwrap();

    nest.start_base_setup(&spec()).await.unwrap();
    assert_eq!(nest.active_session(), None, "base setup is not a session");

    nest.stop_active().await.unwrap();
    assert!(nest.base().is_installed());

    nest.mark_base_ready().unwrap();
    assert!(nest.base().is_ready());
}

// =============================================================================
// Deletion Busy-Check Tests
// =============================================================================

#[tokio::test]
async fn test_delete_active_session_refused_until_stopped() {
    let (_temp, mut nest, _engine) = ready_orchestrator();
    let scratch = nest.create_disposable("scratch").await.unwrap();
    nest.start_session(&scratch.id, &spec()).await.unwrap();

    let result = nest.delete_session(&scratch.id);
    assert!(matches!(result, Err(Error::SessionBusy(_))));
    assert!(nest.store().session(&scratch.id).exists());

    nest.stop_active().await.unwrap();
    // Already removed by the disposable teardown policy.
    assert!(!nest.store().session(&scratch.id).exists());
}

#[tokio::test]
async fn test_delete_stopped_session_removes_bundle() {
    let (_temp, mut nest, _engine) = ready_orchestrator();
    let primary = nest.ensure_primary().await.unwrap();
    nest.start_session(&primary.id, &spec()).await.unwrap();
    nest.stop_active().await.unwrap();

    nest.delete_session(&primary.id).unwrap();
    assert!(!nest.store().session(&primary.id).exists());

    // The primary slot itself remains enumerable.
    let sessions = nest.list_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, PRIMARY_SESSION_ID);
}

#[tokio::test]
async fn test_delete_base_refused_during_setup() {
    let (_temp, store) = test_store();
    let engine = Arc::new(MockEngine::new());
    let mut nest = Orchestrator::with_store(engine.clone(), store);

    nest.install_base("restore.img".as_ref(), &InstallSpec::default(), &|_| {})
        .await
        .unwrap();
    nest.start_base_setup(&spec()).await.unwrap();

    assert!(matches!(nest.delete_base(), Err(Error::SessionBusy(_))));

    nest.stop_active().await.unwrap();
    nest.delete_base().unwrap();
    assert!(!nest.base().is_installed());
}

// =============================================================================
// Cloning Entry-Point Tests
// =============================================================================

#[tokio::test]
async fn test_ensure_primary_is_idempotent() {
    let (_temp, nest, _engine) = ready_orchestrator();

    let first = nest.ensure_primary().await.unwrap();
    let second = nest.ensure_primary().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_reset_primary_requires_stopped() {
    let (_temp, mut nest, _engine) = ready_orchestrator();
    let primary = nest.ensure_primary().await.unwrap();
    nest.start_session(&primary.id, &spec()).await.unwrap();

    assert!(matches!(
        nest.reset_primary().await,
        Err(Error::SessionBusy(_))
    ));
}

#[tokio::test]
async fn test_fork_session_clones_current_disk() {
    let (_temp, nest, _engine) = ready_orchestrator();
    let primary = nest.ensure_primary().await.unwrap();

    let disk = nest.store().session(&primary.id).artifacts().disk;
    fs::write(&disk, b"diverged state").unwrap();

    let fork = nest.fork_session(&primary.id, "experiment").await.unwrap();
    let fork_disk = nest.store().session(&fork.id).artifacts().disk;
    assert_eq!(fs::read(&fork_disk).unwrap(), b"diverged state");
}

// =============================================================================
// End-to-End Scenario
// =============================================================================

/// install base → mark ready → clone primary → start → live checkpoint →
/// stop → restore → disk equals checkpoint bytes, instance running.
#[tokio::test]
async fn test_full_lifecycle_scenario() {
    let (_temp, store) = test_store();
    let engine = Arc::new(MockEngine::new());
    let mut nest = Orchestrator::with_store(engine.clone(), store);

    nest.install_base("restore.img".as_ref(), &InstallSpec::default(), &|_| {})
        .await
        .unwrap();

    // Cloning before mark_ready is refused, leaving no destination.
    assert!(matches!(
        nest.ensure_primary().await,
        Err(Error::BaseNotReady)
    ));
    assert!(!nest.store().session(PRIMARY_SESSION_ID).exists());

    nest.mark_base_ready().unwrap();
    let primary = nest.ensure_primary().await.unwrap();
    nest.start_session(&primary.id, &spec()).await.unwrap();

    let disk = nest.store().session(&primary.id).artifacts().disk;
    fs::write(&disk, b"work in progress").unwrap();

    let ckpt = nest.checkpoint_live(&primary.id, "ckpt-A").await.unwrap();
    assert!(ckpt.has_state);

    fs::write(&disk, b"overwritten later").unwrap();
    nest.stop_active().await.unwrap();

    nest.restore_checkpoint(&ckpt.id, &spec()).await.unwrap();

    assert_eq!(fs::read(&disk).unwrap(), b"work in progress");
    assert_eq!(
        nest.active().unwrap().state(),
        VmState::Running,
        "restored instance ends running, not stopped"
    );
}
