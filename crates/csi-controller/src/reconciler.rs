//! The attachment reconciler: a periodic, lock-respecting sweep that
//! heals drift between in-memory attachment state, the persisted
//! mirror, the backend appliance, and the orchestrator's view of which
//! nodes still exist.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use csi_attach::AttachmentManager;
use csi_backend::BackendClient;
use csi_core::VolumeId;
use csi_telemetry::{Event, EventSink, Metrics, MigrationResult, Reason};

use crate::orchestrator::OrchestratorClient;

/// The default interval between reconciler sweeps.
pub const DEFAULT_INTERVAL: StdDuration = StdDuration::from_secs(300);

/// Counts of what a single sweep did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    /// Volumes examined this sweep.
    pub examined: usize,
    /// Attachment state destroyed because the backend volume is gone.
    pub volumes_missing: usize,
    /// Nodes pruned because the orchestrator no longer knows about them.
    pub stale_nodes_pruned: usize,
    /// In-progress migrations found to have exceeded their timeout.
    pub migrations_timed_out: usize,
    /// Volumes whose in-memory state disagreed with the persisted
    /// mirror; the mirror's view was adopted.
    pub mirror_disagreements_healed: usize,
}

/// Sweeps every tracked volume, healing drift one volume-lock at a
/// time so a live RPC against the same volume is never interleaved
/// with a reconciler mutation.
pub struct Reconciler {
    attach: Arc<AttachmentManager>,
    backend: Arc<dyn BackendClient>,
    orchestrator: Arc<dyn OrchestratorClient>,
    events: Arc<dyn EventSink>,
    metrics: Arc<Metrics>,
}

impl Reconciler {
    /// Builds a reconciler over its collaborators.
    #[must_use]
    pub fn new(
        attach: Arc<AttachmentManager>,
        backend: Arc<dyn BackendClient>,
        orchestrator: Arc<dyn OrchestratorClient>,
        events: Arc<dyn EventSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            attach,
            backend,
            orchestrator,
            events,
            metrics,
        }
    }

    /// Runs one sweep over every volume with tracked attachment state.
    pub async fn run_once(&self, cancel: CancellationToken) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let known_nodes = match self.orchestrator.list_node_ids().await {
            Ok(nodes) => Some(nodes),
            Err(e) => {
                warn!(error = %e, "reconciler could not list nodes; skipping stale-node pruning this sweep");
                None
            }
        };

        for volume_id in self.attach.tracked_volume_ids() {
            if cancel.is_cancelled() {
                break;
            }
            report.examined += 1;
            self.reconcile_one(&volume_id, known_nodes.as_deref(), cancel.clone(), &mut report)
                .await;
        }

        info!(
            examined = report.examined,
            volumes_missing = report.volumes_missing,
            stale_nodes_pruned = report.stale_nodes_pruned,
            migrations_timed_out = report.migrations_timed_out,
            mirror_disagreements_healed = report.mirror_disagreements_healed,
            "reconciler sweep complete"
        );
        report
    }

    /// Triggered by a node add/update/delete event from the
    /// orchestrator's informer: runs an immediate sweep instead of
    /// waiting for the next tick, since a node's disappearance can
    /// strand attachments on every volume it held, not just the one
    /// a live RPC happens to be touching.
    pub async fn on_node_event(&self, cancel: CancellationToken) -> ReconcileReport {
        info!("node event received; running an immediate reconciliation sweep");
        self.run_once(cancel).await
    }

    /// Called when the backend connection is reestablished after a
    /// disconnection: updates the connection gauge and runs an
    /// immediate sweep to catch drift that accumulated while the
    /// controller couldn't observe the backend's state.
    pub async fn on_backend_reconnected(&self, cancel: CancellationToken) -> ReconcileReport {
        self.metrics.set_connection_state(self.backend.address(), true);
        info!(address = self.backend.address(), "backend reconnected; running an immediate reconciliation sweep");
        self.run_once(cancel).await
    }

    /// Called when the backend connection is lost. Only updates the
    /// connection gauge; a sweep would just fail every `getVolume`
    /// call until the connection is back.
    pub fn on_backend_disconnected(&self) {
        warn!(address = self.backend.address(), "backend connection lost");
        self.metrics.set_connection_state(self.backend.address(), false);
    }

    async fn reconcile_one(
        &self,
        volume_id: &VolumeId,
        known_nodes: Option<&[csi_core::NodeId]>,
        cancel: CancellationToken,
        report: &mut ReconcileReport,
    ) {
        let _guard = self.attach.locks().lock(volume_id).await;

        if self.attach.get_attachment(volume_id).is_none() {
            return;
        }

        match self.attach.reconcile_with_mirror(volume_id).await {
            Ok(true) => {
                warn!(volume_id = %volume_id, "in-memory attachment state disagreed with persisted mirror; adopted the mirror's view");
                report.mirror_disagreements_healed += 1;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(volume_id = %volume_id, error = %e, "failed to read persisted mirror during reconciliation");
            }
        }

        let Some(state) = self.attach.get_attachment(volume_id) else {
            return;
        };

        if self.backend.get_volume(volume_id, cancel).await.is_err() {
            warn!(volume_id = %volume_id, "backend volume no longer exists; destroying attachment state");
            self.attach.destroy(volume_id).await;
            report.volumes_missing += 1;
            return;
        }

        if let Some(known) = known_nodes {
            let now = Utc::now();
            for node in state.nodes() {
                if known.contains(&node.node_id) {
                    continue;
                }
                warn!(volume_id = %volume_id, node_id = %node.node_id, "pruning attachment to node the orchestrator no longer knows about");
                if self.attach.remove_node(volume_id, &node.node_id, now).await.unwrap_or(false) {
                    // Last node removed; state already destroyed by remove_node.
                }
                report.stale_nodes_pruned += 1;
                self.events.emit(Event::new(
                    volume_id.clone(),
                    Reason::StaleMountDetected,
                    format!("pruned attachment to deleted node {}", node.node_id),
                    now,
                ));
            }
        }

        if state.is_migrating() && state.is_migration_timed_out(Utc::now()) {
            let now = Utc::now();
            let elapsed = state
                .migration_started_at()
                .map_or(chrono::Duration::zero(), |started| now - started);
            self.metrics.record_migration_result(MigrationResult::TimedOut, elapsed);
            self.events.emit(Event::migration_failed(volume_id.clone(), now));
            report.migrations_timed_out += 1;
            // The live-migration window stays open; resolving a timed-out
            // migration without an operator decision would silently pick
            // a winner, so the reconciler only reports it here.
        }
    }

    /// Runs `run_once` on `interval` until `cancel` fires.
    pub async fn run_forever(&self, interval: StdDuration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reconciler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.run_once(cancel.child_token()).await;
                }
            }
        }
    }
}
