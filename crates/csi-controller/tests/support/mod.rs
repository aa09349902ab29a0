//! In-memory test doubles shared by the end-to-end scenario and
//! reconciler test binaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use csi_attach::mirror::anyhow_compat;
use csi_attach::{AttachmentManager, PersistentMirror};
use csi_backend::{BackendClient, CapacityInfo, CreateVolumeOptions, RestoreOptions, SnapshotFilter};
use csi_controller::orchestrator::{OrchestratorClient, OrchestratorError};
use csi_controller::types::{PublishRequest, VolumeCapability};
use csi_controller::Controller;
use csi_core::{AccessMode, NodeId, Snapshot, SnapshotId, Volume, VolumeId};
use csi_grouper::VmiGrouper;
use csi_telemetry::{EventSink, Metrics, RecordingEventSink};

#[derive(Default)]
pub struct MemoryMirror {
    store: StdMutex<HashMap<VolumeId, String>>,
}

#[async_trait]
impl PersistentMirror for MemoryMirror {
    async fn read(&self, volume_id: &VolumeId) -> anyhow_compat::Result<Option<String>> {
        Ok(self.store.lock().unwrap_or_else(|p| p.into_inner()).get(volume_id).cloned())
    }

    async fn write(&self, volume_id: &VolumeId, raw: &str) -> anyhow_compat::Result<()> {
        self.store.lock().unwrap_or_else(|p| p.into_inner()).insert(volume_id.clone(), raw.to_string());
        Ok(())
    }

    async fn list_all(&self) -> anyhow_compat::Result<Vec<(VolumeId, String)>> {
        Ok(self
            .store
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    volumes: StdMutex<HashMap<VolumeId, Volume>>,
    snapshots: StdMutex<HashMap<SnapshotId, Snapshot>>,
}

#[async_trait]
impl BackendClient for MemoryBackend {
    async fn create_volume(
        &self,
        opts: CreateVolumeOptions,
        _cancel: CancellationToken,
    ) -> csi_backend::Result<Volume> {
        let target_name = csi_core::target_qualified_name(&opts.slot_id);
        let path = csi_core::file_path(&opts.volume_path, &opts.slot_id);
        let volume = Volume {
            slot_id: opts.slot_id.clone(),
            path,
            size_bytes: opts.size_bytes,
            port: opts.nvme_port,
            target_name,
        };
        self.volumes.lock().unwrap_or_else(|p| p.into_inner()).insert(opts.slot_id, volume.clone());
        Ok(volume)
    }

    async fn delete_volume(&self, slot_id: &VolumeId, _cancel: CancellationToken) -> csi_backend::Result<()> {
        match self.volumes.lock().unwrap_or_else(|p| p.into_inner()).remove(slot_id) {
            Some(_) => Ok(()),
            None => Err(csi_backend::BackendError::VolumeNotFound),
        }
    }

    async fn get_volume(&self, slot_id: &VolumeId, _cancel: CancellationToken) -> csi_backend::Result<Volume> {
        self.volumes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(slot_id)
            .cloned()
            .ok_or(csi_backend::BackendError::VolumeNotFound)
    }

    async fn list_volumes(&self, _cancel: CancellationToken) -> csi_backend::Result<Vec<Volume>> {
        Ok(self.volumes.lock().unwrap_or_else(|p| p.into_inner()).values().cloned().collect())
    }

    async fn resize_volume(
        &self,
        slot_id: &VolumeId,
        new_size_bytes: i64,
        _cancel: CancellationToken,
    ) -> csi_backend::Result<Volume> {
        let mut volumes = self.volumes.lock().unwrap_or_else(|p| p.into_inner());
        let volume = volumes.get_mut(slot_id).ok_or(csi_backend::BackendError::VolumeNotFound)?;
        volume.size_bytes = volume.size_bytes.max(new_size_bytes);
        Ok(volume.clone())
    }

    async fn get_capacity(&self, _base_path: &str, _cancel: CancellationToken) -> csi_backend::Result<CapacityInfo> {
        Ok(CapacityInfo {
            total_bytes: csi_core::capacity::MAX_CAPACITY_BYTES,
            available_bytes: csi_core::capacity::MAX_CAPACITY_BYTES,
        })
    }

    async fn create_snapshot(
        &self,
        source_slot_id: &VolumeId,
        snapshot_id: &SnapshotId,
        _cancel: CancellationToken,
    ) -> csi_backend::Result<Snapshot> {
        let size_bytes = self
            .volumes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(source_slot_id)
            .map(|v| v.size_bytes)
            .ok_or(csi_backend::BackendError::VolumeNotFound)?;
        let snapshot = Snapshot {
            id: snapshot_id.clone(),
            source_slot_id: source_slot_id.clone(),
            size_bytes,
            created_at: Utc::now(),
        };
        self.snapshots.lock().unwrap_or_else(|p| p.into_inner()).insert(snapshot_id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn delete_snapshot(&self, snapshot_id: &SnapshotId, _cancel: CancellationToken) -> csi_backend::Result<()> {
        match self.snapshots.lock().unwrap_or_else(|p| p.into_inner()).remove(snapshot_id) {
            Some(_) => Ok(()),
            None => Err(csi_backend::BackendError::SnapshotNotFound),
        }
    }

    async fn get_snapshot(&self, snapshot_id: &SnapshotId, _cancel: CancellationToken) -> csi_backend::Result<Snapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(snapshot_id)
            .cloned()
            .ok_or(csi_backend::BackendError::SnapshotNotFound)
    }

    async fn list_snapshots(&self, filter: SnapshotFilter, _cancel: CancellationToken) -> csi_backend::Result<Vec<Snapshot>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|s| filter.source_slot_id.as_ref().is_none_or(|src| src == &s.source_slot_id))
            .filter(|s| filter.snapshot_id.as_ref().is_none_or(|id| id == &s.id))
            .cloned()
            .collect())
    }

    async fn restore_snapshot(&self, opts: RestoreOptions, _cancel: CancellationToken) -> csi_backend::Result<Volume> {
        let target_name = csi_core::target_qualified_name(&opts.slot_id);
        let path = csi_core::file_path(&opts.volume_path, &opts.slot_id);
        let volume = Volume {
            slot_id: opts.slot_id.clone(),
            path,
            size_bytes: opts.size_bytes,
            port: opts.nvme_port,
            target_name,
        };
        self.volumes.lock().unwrap_or_else(|p| p.into_inner()).insert(opts.slot_id, volume.clone());
        Ok(volume)
    }

    fn address(&self) -> &str {
        "10.0.0.1"
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&self) -> csi_backend::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryOrchestrator {
    nodes: StdMutex<Vec<NodeId>>,
}

impl MemoryOrchestrator {
    pub fn with_nodes(names: &[&str]) -> Self {
        Self {
            nodes: StdMutex::new(names.iter().map(|n| NodeId::new(*n).expect("valid node id")).collect()),
        }
    }

    pub fn remove_node(&self, node_id: &NodeId) {
        self.nodes.lock().unwrap_or_else(|p| p.into_inner()).retain(|n| n != node_id);
    }
}

#[async_trait]
impl OrchestratorClient for MemoryOrchestrator {
    async fn node_exists(&self, node_id: &NodeId) -> Result<bool, OrchestratorError> {
        Ok(self.nodes.lock().unwrap_or_else(|p| p.into_inner()).contains(node_id))
    }

    async fn list_node_ids(&self) -> Result<Vec<NodeId>, OrchestratorError> {
        Ok(self.nodes.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }
}

pub fn node(name: &str) -> NodeId {
    NodeId::new(name).expect("valid node id")
}

pub fn vol(suffix: &str) -> VolumeId {
    VolumeId::new(format!("pvc-{suffix}")).expect("valid volume id")
}

pub async fn new_controller(
    orchestrator: Arc<MemoryOrchestrator>,
) -> (Controller, Arc<MemoryBackend>, Arc<RecordingEventSink>, Arc<Metrics>) {
    let attach = Arc::new(AttachmentManager::new(Arc::new(MemoryMirror::default())));
    attach.initialize().await.expect("initialize");
    new_controller_with_attach(orchestrator, attach).await
}

pub async fn new_controller_with_attach(
    orchestrator: Arc<MemoryOrchestrator>,
    attach: Arc<AttachmentManager>,
) -> (Controller, Arc<MemoryBackend>, Arc<RecordingEventSink>, Arc<Metrics>) {
    let backend = Arc::new(MemoryBackend::default());
    let grouper = Arc::new(VmiGrouper::disabled());
    let events = Arc::new(RecordingEventSink::new());
    let metrics = Arc::new(Metrics::new());

    let controller = Controller::new(
        attach,
        backend.clone() as Arc<dyn BackendClient>,
        grouper,
        orchestrator as Arc<dyn OrchestratorClient>,
        events.clone() as Arc<dyn EventSink>,
        metrics.clone(),
    );
    (controller, backend, events, metrics)
}

pub fn block_capability(mode: AccessMode) -> VolumeCapability {
    VolumeCapability::block(mode)
}

pub fn publish_request(volume_id: VolumeId, node_id: NodeId, mode: AccessMode) -> PublishRequest {
    PublishRequest {
        volume_id,
        node_id,
        namespace: "default".to_string(),
        pvc_name: "data".to_string(),
        capability: block_capability(mode),
        parameters: HashMap::new(),
    }
}
