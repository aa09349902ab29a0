//! The controller RPC surface: the decision procedures behind every
//! CSI controller call, independent of the gRPC transport that carries
//! them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use csi_attach::AttachmentManager;
use csi_backend::{BackendClient, CreateVolumeOptions, RestoreOptions, SnapshotFilter};
use csi_core::{capacity, ids, AccessMode, NodeId, SnapshotId, VolumeId};
use csi_grouper::{PvcRef, VmiGrouper};
use csi_telemetry::{AttachmentOp, Event, EventSink, Metrics, MigrationResult};

use crate::error::{conflict_error, map_backend_error, ControllerError, Result};
use crate::orchestrator::OrchestratorClient;
use crate::types::{
    ContentSource, CreateVolumeRequest, CreateVolumeResponse, ExpandVolumeResponse,
    ListSnapshotsResponse, PublishContext, PublishRequest,
};

/// The default grace period during which a fresh single-writer
/// attachment supersedes a just-released one without treating the new
/// node as a conflict.
pub const DEFAULT_GRACE_PERIOD: ChronoDuration = ChronoDuration::seconds(30);

/// A controller capability this driver advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCapability {
    /// Supports `CreateVolume`/`DeleteVolume`.
    CreateDeleteVolume,
    /// Supports `ControllerPublishVolume`/`ControllerUnpublishVolume`.
    PublishUnpublishVolume,
    /// Supports `ListVolumes`.
    ListVolumes,
    /// Supports `GetCapacity`.
    GetCapacity,
    /// Supports `CreateSnapshot`/`DeleteSnapshot`.
    CreateDeleteSnapshot,
    /// Supports `ListSnapshots`.
    ListSnapshots,
    /// Supports `ControllerExpandVolume`.
    ExpandVolume,
}

/// The controller RPC surface.
pub struct Controller {
    attach: Arc<AttachmentManager>,
    backend: Arc<dyn BackendClient>,
    grouper: Arc<VmiGrouper>,
    orchestrator: Arc<dyn OrchestratorClient>,
    events: Arc<dyn EventSink>,
    metrics: Arc<Metrics>,
    grace_period: ChronoDuration,
}

impl Controller {
    /// Builds a controller over its collaborators, using the default
    /// grace period.
    #[must_use]
    pub fn new(
        attach: Arc<AttachmentManager>,
        backend: Arc<dyn BackendClient>,
        grouper: Arc<VmiGrouper>,
        orchestrator: Arc<dyn OrchestratorClient>,
        events: Arc<dyn EventSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            attach,
            backend,
            grouper,
            orchestrator,
            events,
            metrics,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Overrides the grace period.
    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: ChronoDuration) -> Self {
        self.grace_period = grace_period;
        self
    }

    fn validate_capabilities(caps: &[crate::types::VolumeCapability]) -> Result<()> {
        if caps.is_empty() {
            return Err(ControllerError::invalid_argument(
                "at least one volume capability is required",
            ));
        }
        for cap in caps {
            if cap.is_filesystem() && !cap.access_mode.compatible_with_filesystem() {
                return Err(ControllerError::invalid_argument(
                    "multi-writer access mode is not supported for filesystem volumes",
                ));
            }
        }
        Ok(())
    }

    /// Validates that every capability in `caps` is one this driver
    /// supports, without provisioning or publishing anything.
    pub fn validate_volume_capabilities(&self, caps: &[crate::types::VolumeCapability]) -> Result<()> {
        Self::validate_capabilities(caps)
    }

    /// The controller capabilities this driver advertises.
    #[must_use]
    pub fn controller_get_capabilities(&self) -> Vec<ControllerCapability> {
        vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::PublishUnpublishVolume,
            ControllerCapability::ListVolumes,
            ControllerCapability::GetCapacity,
            ControllerCapability::CreateDeleteSnapshot,
            ControllerCapability::ListSnapshots,
            ControllerCapability::ExpandVolume,
        ]
    }

    fn build_context(
        &self,
        path: &str,
        params: &csi_core::ResolvedParams,
        target_name: &str,
    ) -> HashMap<String, String> {
        let mut ctx = HashMap::new();
        ctx.insert("backendAddress".to_string(), self.backend.address().to_string());
        ctx.insert("nvmeAddress".to_string(), params.nvme_address.clone());
        ctx.insert("nvmePort".to_string(), params.nvme_port.to_string());
        ctx.insert("targetQualifiedName".to_string(), target_name.to_string());
        ctx.insert("filePath".to_string(), path.to_string());
        ctx.insert("ctrlLossTmo".to_string(), params.reconnect.ctrl_loss_tmo.to_string());
        ctx.insert("reconnectDelay".to_string(), params.reconnect.reconnect_delay.to_string());
        ctx.insert("keepAliveTmo".to_string(), params.reconnect.keep_alive_tmo.to_string());
        ctx.insert(
            "migrationTimeoutSeconds".to_string(),
            params.migration_timeout.num_seconds().to_string(),
        );
        ctx
    }

    /// Provisions a new volume, or from a snapshot if `content_source`
    /// names one. Idempotent by `volume_id`.
    pub async fn create_volume(
        &self,
        req: CreateVolumeRequest,
        cancel: CancellationToken,
    ) -> Result<CreateVolumeResponse> {
        Self::validate_capabilities(&req.capabilities)?;

        let params = csi_core::resolve_params(&req.parameters, self.backend.address())?;
        let resolved_size = capacity::resolve_capacity(
            req.required_bytes,
            if req.limit_bytes > 0 { Some(req.limit_bytes) } else { None },
        )?;

        let target_name = ids::target_qualified_name(&req.volume_id);
        let path = ids::file_path(&params.volume_path, &req.volume_id);

        let volume = match &req.content_source {
            Some(ContentSource::Volume(_)) => {
                return Err(ControllerError::invalid_argument(
                    "provisioning a volume by cloning a live volume is not supported; use a snapshot",
                ));
            }
            Some(ContentSource::Snapshot(snapshot_id)) => {
                let snapshot = self
                    .backend
                    .get_snapshot(snapshot_id, cancel.clone())
                    .await
                    .map_err(|e| map_backend_error(&e))?;
                let size = resolved_size.max(snapshot.size_bytes);
                self.backend
                    .restore_snapshot(
                        RestoreOptions {
                            slot_id: req.volume_id.clone(),
                            snapshot_id: snapshot_id.clone(),
                            size_bytes: size,
                            volume_path: params.volume_path.clone(),
                            nvme_port: params.nvme_port,
                        },
                        cancel,
                    )
                    .await
                    .map_err(|e| map_backend_error(&e))?
            }
            None => self
                .backend
                .create_volume(
                    CreateVolumeOptions {
                        slot_id: req.volume_id.clone(),
                        size_bytes: resolved_size,
                        volume_path: params.volume_path.clone(),
                        nvme_port: params.nvme_port,
                    },
                    cancel,
                )
                .await
                .map_err(|e| map_backend_error(&e))?,
        };

        info!(volume_id = %req.volume_id, size_bytes = volume.size_bytes, "volume created");

        Ok(CreateVolumeResponse {
            volume_id: req.volume_id,
            capacity_bytes: volume.size_bytes,
            context: self.build_context(&path, &params, &target_name),
            content_source: req.content_source,
        })
    }

    /// Deletes a volume. Idempotent: a volume that does not exist is a
    /// success.
    pub async fn delete_volume(&self, volume_id: &VolumeId, cancel: CancellationToken) -> Result<()> {
        match self.backend.delete_volume(volume_id, cancel).await {
            Ok(()) | Err(csi_backend::BackendError::VolumeNotFound) => {
                self.attach.destroy(volume_id).await;
                info!(volume_id = %volume_id, "volume deleted");
                Ok(())
            }
            Err(e) => Err(map_backend_error(&e)),
        }
    }

    /// The full attachment decision procedure.
    pub async fn controller_publish_volume(
        &self,
        req: PublishRequest,
        cancel: CancellationToken,
    ) -> Result<PublishContext> {
        Self::validate_capabilities(std::slice::from_ref(&req.capability))?;

        if !self
            .orchestrator
            .node_exists(&req.node_id)
            .await
            .map_err(|e| ControllerError::internal(format!("failed to query orchestrator for node existence: {e}")))?
        {
            return Err(ControllerError::not_found(format!("node {} does not exist", req.node_id)));
        }

        let params = csi_core::resolve_params(&req.parameters, self.backend.address())?;
        let now = Utc::now();

        let pvc = PvcRef::new(req.namespace.clone(), req.pvc_name.clone());
        let vm_key = self.grouper.resolve(&pvc, now).await;
        let (_vm_key, _vm_guard) = self.grouper.lock_vmi(vm_key).await;

        let volume = self
            .backend
            .get_volume(&req.volume_id, cancel.clone())
            .await
            .map_err(|e| map_backend_error(&e))?;

        let _volume_guard = self.attach.locks().lock(&req.volume_id).await;

        let context = PublishContext {
            address: params.nvme_address.clone(),
            port: params.nvme_port,
            target_qualified_name: volume.target_name.clone(),
            fs_type: req.capability.fs_type.clone(),
        };

        let existing = self.attach.get_attachment(&req.volume_id);

        let Some(state) = existing else {
            self.attach
                .track_primary(&req.volume_id, req.node_id.clone(), req.capability.access_mode, now)
                .await;
            self.metrics.record_attachment_op(AttachmentOp::Publish);
            self.events.emit(Event::new(
                req.volume_id.clone(),
                csi_telemetry::Reason::VolumeAttached,
                format!("attached to node {}", req.node_id),
                now,
            ));
            return Ok(context);
        };

        if state.is_attached_to(&req.node_id) {
            return Ok(context);
        }

        match state.access_mode() {
            AccessMode::MultiWriter => {
                // A timed-out migration is reported as such even when it
                // also happens to be at the two-node ceiling — the
                // timeout is the more actionable diagnosis.
                if state.is_migration_timed_out(now) {
                    let elapsed = state
                        .migration_started_at()
                        .map_or(ChronoDuration::zero(), |started| now - started);
                    self.metrics.record_migration_result(MigrationResult::TimedOut, elapsed);
                    self.events.emit(Event::migration_failed(req.volume_id.clone(), now));
                    return Err(ControllerError::failed_precondition(format!(
                        "volume {} is mid-migration and its migration timeout exceeded",
                        req.volume_id
                    )));
                }
                if state.node_count() >= 2 {
                    return Err(ControllerError::failed_precondition(format!(
                        "volume {} has reached its live-migration limit of two attached nodes",
                        req.volume_id
                    )));
                }
                self.attach
                    .track_secondary(&req.volume_id, req.node_id.clone(), now, params.migration_timeout)
                    .await?;
                self.metrics.record_attachment_op(AttachmentOp::Publish);
                self.events.emit(Event::new(
                    req.volume_id.clone(),
                    csi_telemetry::Reason::MigrationStarted,
                    format!("live migration to node {} started", req.node_id),
                    now,
                ));
                Ok(context)
            }
            AccessMode::SingleWriter => {
                if self.attach.is_within_grace_period(&req.volume_id, now, self.grace_period) {
                    self.attach.destroy(&req.volume_id).await;
                    self.attach
                        .track_primary(&req.volume_id, req.node_id.clone(), req.capability.access_mode, now)
                        .await;
                    self.metrics.record_grace_period_used();
                    self.metrics.record_attachment_op(AttachmentOp::Publish);
                    self.events.emit(Event::new(
                        req.volume_id.clone(),
                        csi_telemetry::Reason::VolumeAttached,
                        format!("attached to node {} within handoff grace period", req.node_id),
                        now,
                    ));
                    return Ok(context);
                }

                let Some(blocking) = state.primary().map(|p| p.node_id.clone()) else {
                    return Err(ControllerError::internal("attachment state has no primary node"));
                };

                match self.orchestrator.node_exists(&blocking).await {
                    Ok(true) => {
                        self.metrics.record_conflict();
                        self.events.emit(Event::attachment_conflict(req.volume_id.clone(), &blocking, now));
                        Err(conflict_error(&req.volume_id, &blocking))
                    }
                    Ok(false) => {
                        warn!(volume_id = %req.volume_id, node_id = %blocking, "blocking node no longer exists; self-healing stale attachment");
                        self.attach.destroy(&req.volume_id).await;
                        self.attach
                            .track_primary(&req.volume_id, req.node_id.clone(), req.capability.access_mode, now)
                            .await;
                        self.events.emit(Event::new(
                            req.volume_id.clone(),
                            csi_telemetry::Reason::StaleMountDetected,
                            format!("node {blocking} no longer exists; attachment reassigned"),
                            now,
                        ));
                        self.metrics.record_attachment_op(AttachmentOp::Publish);
                        Ok(context)
                    }
                    Err(e) => Err(ControllerError::internal(format!(
                        "failed to query orchestrator for node existence: {e}"
                    ))),
                }
            }
        }
    }

    /// Detaches a node from a volume. Idempotent; an empty `node_id`
    /// forces detachment of every node. If exactly one node remains
    /// after removal, any in-progress migration is resolved: the
    /// removed node is treated as the migration source, the remaining
    /// node as the target.
    pub async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: Option<&NodeId>,
        _cancel: CancellationToken,
    ) -> Result<()> {
        let now = Utc::now();
        let _guard = self.attach.locks().lock(volume_id).await;

        let Some(state) = self.attach.get_attachment(volume_id) else {
            return Ok(());
        };

        let was_migrating = state.is_migrating();
        let migration_started = state.migration_started_at();

        let targets: Vec<NodeId> = match node_id {
            Some(n) => vec![n.clone()],
            None => state.nodes().iter().map(|n| n.node_id.clone()).collect(),
        };

        let mut last_destroyed = false;
        for target in &targets {
            if !self.attach.is_attached_to_node(volume_id, target) {
                continue;
            }
            last_destroyed = self.attach.remove_node(volume_id, target, now).await?;
            self.metrics.record_attachment_op(AttachmentOp::Unpublish);
            self.events.emit(Event::new(
                volume_id.clone(),
                csi_telemetry::Reason::VolumeDetached,
                format!("detached from node {target}"),
                now,
            ));
            if last_destroyed {
                break;
            }
        }

        if was_migrating && !last_destroyed {
            if let Some(remaining) = self.attach.get_attachment(volume_id) {
                if remaining.node_count() == 1 {
                    let elapsed = migration_started.map_or(ChronoDuration::zero(), |s| now - s);
                    self.metrics.record_migration_result(MigrationResult::Completed, elapsed);
                    self.events.emit(Event::migration_completed(volume_id.clone(), elapsed, now));
                }
            }
        }

        Ok(())
    }

    /// Expands a volume's capacity.
    pub async fn controller_expand_volume(
        &self,
        volume_id: &VolumeId,
        new_size_bytes: i64,
        is_filesystem: bool,
        cancel: CancellationToken,
    ) -> Result<ExpandVolumeResponse> {
        let resolved = capacity::resolve_capacity(new_size_bytes, None)?;
        let volume = self
            .backend
            .resize_volume(volume_id, resolved, cancel)
            .await
            .map_err(|e| map_backend_error(&e))?;

        Ok(ExpandVolumeResponse {
            capacity_bytes: volume.size_bytes,
            node_expansion_required: is_filesystem,
        })
    }

    /// Creates a snapshot. The snapshot ID is derived deterministically
    /// from `name`, making repeated calls with the same name idempotent.
    pub async fn create_snapshot(
        &self,
        name: &str,
        source_slot_id: VolumeId,
        cancel: CancellationToken,
    ) -> Result<csi_core::Snapshot> {
        let snapshot_id = SnapshotId::derive(name);
        match self.backend.get_snapshot(&snapshot_id, cancel.clone()).await {
            Ok(existing) if existing.source_slot_id == source_slot_id => return Ok(existing),
            Ok(existing) => {
                return Err(ControllerError::new(
                    csi_core::CsiStatus::AlreadyExists,
                    format!(
                        "snapshot name {name} already used for a snapshot of a different volume ({})",
                        existing.source_slot_id
                    ),
                ))
            }
            Err(csi_backend::BackendError::SnapshotNotFound) => {}
            Err(e) => return Err(map_backend_error(&e)),
        }

        let snapshot = self
            .backend
            .create_snapshot(&source_slot_id, &snapshot_id, cancel)
            .await
            .map_err(|e| map_backend_error(&e))?;
        info!(snapshot_id = %snapshot_id, source_volume_id = %source_slot_id, "snapshot created");
        Ok(snapshot)
    }

    /// Deletes a snapshot. Idempotent: a missing snapshot is a success.
    pub async fn delete_snapshot(&self, snapshot_id: &SnapshotId, cancel: CancellationToken) -> Result<()> {
        match self.backend.delete_snapshot(snapshot_id, cancel).await {
            Ok(()) | Err(csi_backend::BackendError::SnapshotNotFound) => Ok(()),
            Err(e) => Err(map_backend_error(&e)),
        }
    }

    /// Lists snapshots with stable, offset-based pagination.
    pub async fn list_snapshots(
        &self,
        filter: SnapshotFilter,
        starting_token: Option<&str>,
        max_entries: usize,
        cancel: CancellationToken,
    ) -> Result<ListSnapshotsResponse> {
        let offset: usize = match starting_token {
            None => 0,
            Some(token) => token.parse().map_err(|_| {
                ControllerError::new(csi_core::CsiStatus::Aborted, "invalid pagination token")
            })?,
        };

        let mut all = self
            .backend
            .list_snapshots(filter, cancel)
            .await
            .map_err(|e| map_backend_error(&e))?;
        all.sort_by(|a, b| a.id.cmp(&b.id));

        if offset > all.len() {
            return Err(ControllerError::new(
                csi_core::CsiStatus::Aborted,
                "pagination token is past the end of the result set",
            ));
        }

        let page_size = if max_entries == 0 { all.len() - offset } else { max_entries };
        let end = (offset + page_size).min(all.len());
        let page = all[offset..end].to_vec();
        let next_token = if end < all.len() { Some(end.to_string()) } else { None };

        Ok(ListSnapshotsResponse {
            snapshots: page,
            next_token,
        })
    }

    /// Reports available capacity for a pool.
    pub async fn get_capacity(&self, base_path: &str, cancel: CancellationToken) -> Result<i64> {
        let info = self
            .backend
            .get_capacity(base_path, cancel)
            .await
            .map_err(|e| map_backend_error(&e))?;
        Ok(info.available_bytes)
    }

    /// Lists all provisioned volumes.
    pub async fn list_volumes(&self, cancel: CancellationToken) -> Result<Vec<csi_core::Volume>> {
        self.backend.list_volumes(cancel).await.map_err(|e| map_backend_error(&e))
    }
}
