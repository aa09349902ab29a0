//! Tests for the reconciler's event-driven entry points and its
//! mirror-drift healing, run against a `Reconciler` sharing attachment
//! state with a `Controller` the way a real deployment wires them.

mod support;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use csi_attach::mirror::{self, PersistentMirror};
use csi_attach::AttachmentManager;
use csi_backend::{BackendClient, CreateVolumeOptions};
use csi_controller::orchestrator::OrchestratorClient;
use csi_controller::reconciler::Reconciler;
use csi_core::AccessMode;
use csi_telemetry::EventSink;

use support::{new_controller_with_attach, node, vol, MemoryBackend, MemoryMirror, MemoryOrchestrator};

async fn seed_backend_volume(backend: &MemoryBackend, volume_id: &csi_core::VolumeId) {
    backend
        .create_volume(
            CreateVolumeOptions {
                slot_id: volume_id.clone(),
                size_bytes: csi_core::capacity::MIN_CAPACITY_BYTES,
                volume_path: "/storage-pool/metal-csi".to_string(),
                nvme_port: 4420,
            },
            CancellationToken::new(),
        )
        .await
        .expect("seed backend volume");
}

#[tokio::test]
async fn reconcile_one_heals_drift_against_the_persisted_mirror() {
    let orchestrator = Arc::new(MemoryOrchestrator::with_nodes(&["node-a", "node-b"]));
    let mirror = Arc::new(MemoryMirror::default());
    let attach = Arc::new(AttachmentManager::new(mirror.clone()));

    let volume_id = vol("10101010-1010-1010-1010-101010101010");
    let now = Utc::now();
    attach.track_primary(&volume_id, node("node-a"), AccessMode::SingleWriter, now).await;

    // Simulate the mirror having been updated by another controller
    // replica without this process's in-memory map observing it.
    let mirrored_state = csi_core::AttachmentState::new_primary(node("node-b"), AccessMode::SingleWriter, now);
    mirror
        .write(&volume_id, &mirror::encode(&mirrored_state).expect("encode"))
        .await
        .expect("seed mirror");

    let (controller, backend, events, metrics) = new_controller_with_attach(orchestrator.clone(), attach.clone()).await;
    seed_backend_volume(&backend, &volume_id).await;

    let reconciler = Reconciler::new(
        attach.clone(),
        backend as Arc<dyn BackendClient>,
        orchestrator as Arc<dyn OrchestratorClient>,
        events as Arc<dyn EventSink>,
        metrics,
    );

    let report = reconciler.on_node_event(CancellationToken::new()).await;
    assert_eq!(report.mirror_disagreements_healed, 1);
    assert!(attach.is_attached_to_node(&volume_id, &node("node-b")));
    assert!(!attach.is_attached_to_node(&volume_id, &node("node-a")));

    // The controller now agrees with the healed state.
    drop(controller);
}

#[tokio::test]
async fn on_node_event_prunes_attachments_to_deleted_nodes() {
    let orchestrator = Arc::new(MemoryOrchestrator::with_nodes(&["node-a"]));
    let mirror = Arc::new(MemoryMirror::default());
    let attach = Arc::new(AttachmentManager::new(mirror));

    let volume_id = vol("20202020-2020-2020-2020-202020202020");
    let now = Utc::now();
    attach.track_primary(&volume_id, node("node-a"), AccessMode::SingleWriter, now).await;

    let (_controller, backend, events, metrics) = new_controller_with_attach(orchestrator.clone(), attach.clone()).await;
    seed_backend_volume(&backend, &volume_id).await;

    orchestrator.remove_node(&node("node-a"));

    let reconciler = Reconciler::new(
        attach.clone(),
        backend as Arc<dyn BackendClient>,
        orchestrator as Arc<dyn OrchestratorClient>,
        events as Arc<dyn EventSink>,
        metrics,
    );

    let report = reconciler.on_node_event(CancellationToken::new()).await;
    assert_eq!(report.stale_nodes_pruned, 1);
    assert!(attach.get_attachment(&volume_id).is_none());
}

#[tokio::test]
async fn backend_reconnect_and_disconnect_toggle_the_connection_gauge() {
    let orchestrator = Arc::new(MemoryOrchestrator::with_nodes(&["node-a"]));
    let attach = Arc::new(AttachmentManager::new(Arc::new(MemoryMirror::default())));
    let (_controller, backend, events, metrics) = new_controller_with_attach(orchestrator.clone(), attach.clone()).await;

    let reconciler = Reconciler::new(
        attach,
        backend.clone() as Arc<dyn BackendClient>,
        orchestrator as Arc<dyn OrchestratorClient>,
        events as Arc<dyn EventSink>,
        metrics.clone(),
    );

    reconciler.on_backend_disconnected();
    assert_eq!(metrics.connection_state(backend.address()), Some(false));

    reconciler.on_backend_reconnected(CancellationToken::new()).await;
    assert_eq!(metrics.connection_state(backend.address()), Some(true));
}

#[tokio::test]
async fn run_once_reports_a_timed_out_migration_without_resolving_it() {
    let orchestrator = Arc::new(MemoryOrchestrator::with_nodes(&["node-a", "node-b"]));
    let mirror = Arc::new(MemoryMirror::default());

    let volume_id = vol("30303030-3030-3030-3030-303030303030");
    let started = Utc::now() - chrono::Duration::seconds(600);
    let mut state = csi_core::AttachmentState::new_primary(node("node-a"), AccessMode::MultiWriter, started);
    state.add_secondary(node("node-b"), started, chrono::Duration::seconds(30));
    mirror
        .write(&volume_id, &mirror::encode(&state).expect("encode"))
        .await
        .expect("seed mirror");

    let attach = Arc::new(AttachmentManager::new(mirror));
    attach.initialize().await.expect("initialize");

    let (_controller, backend, events, metrics) = new_controller_with_attach(orchestrator.clone(), attach.clone()).await;
    seed_backend_volume(&backend, &volume_id).await;

    let reconciler = Reconciler::new(
        attach.clone(),
        backend as Arc<dyn BackendClient>,
        orchestrator as Arc<dyn OrchestratorClient>,
        events as Arc<dyn EventSink>,
        metrics,
    );

    let report = reconciler.run_once(CancellationToken::new()).await;
    assert_eq!(report.migrations_timed_out, 1);
    // The window stays open; an operator decision resolves it, not the sweep.
    assert!(attach.is_migrating(&volume_id));
}
