//! # csi-backend
//!
//! The contract the raw transport to the NVMe-over-TCP storage
//! appliance must satisfy. The appliance client itself — the actual
//! wire protocol — is an external collaborator; this crate only
//! defines the trait and the error sentinels the controller plane
//! branches on.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;

pub use error::{BackendError, Result};

use async_trait::async_trait;
use csi_core::{SnapshotId, VolumeId};
use tokio_util::sync::CancellationToken;

/// Total and available capacity reported by the appliance for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityInfo {
    /// Total capacity of the pool, in bytes.
    pub total_bytes: i64,
    /// Capacity currently available for new provisioning, in bytes.
    pub available_bytes: i64,
}

/// Parameters for provisioning a new volume on the appliance.
#[derive(Debug, Clone)]
pub struct CreateVolumeOptions {
    /// The slot identifier to provision under.
    pub slot_id: VolumeId,
    /// Requested capacity in bytes.
    pub size_bytes: i64,
    /// The backing pool's base path.
    pub volume_path: String,
    /// The NVMe-oF target port to bind.
    pub nvme_port: u16,
}

/// Parameters for restoring a volume from an existing snapshot.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// The slot identifier the restored volume should be provisioned under.
    pub slot_id: VolumeId,
    /// The snapshot to restore from.
    pub snapshot_id: SnapshotId,
    /// Capacity to provision for the restored volume, in bytes. Must be
    /// at least the snapshot's original size.
    pub size_bytes: i64,
    /// The backing pool's base path.
    pub volume_path: String,
    /// The NVMe-oF target port to bind.
    pub nvme_port: u16,
}

/// An optional filter for `list_snapshots`. An implementation honors
/// both fields when set; a result must satisfy every filter present.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    /// Restrict to snapshots of this source volume, if set.
    pub source_slot_id: Option<VolumeId>,
    /// Restrict to this specific snapshot, if set.
    pub snapshot_id: Option<SnapshotId>,
}

/// The trait a storage appliance client must implement to back the
/// controller plane.
///
/// A single mutable session backs each `BackendClient`: the core never
/// parallelizes calls against one instance, so implementations may
/// assume calls are serialized by the caller (they may still be
/// interleaved with calls for unrelated volumes going through a
/// connection pool at a lower layer, if the implementation chooses to
/// provide one).
///
/// Every method accepts a [`CancellationToken`]; an RPC deadline is
/// expressed as the token's deadline by the caller, not as a parameter
/// here.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Provisions a new volume.
    async fn create_volume(
        &self,
        opts: CreateVolumeOptions,
        cancel: CancellationToken,
    ) -> Result<csi_core::Volume>;

    /// Deletes a volume. Implementations return `VolumeNotFound` rather
    /// than treating a missing volume as success — idempotency is a
    /// controller-plane concern, not a backend one.
    async fn delete_volume(&self, slot_id: &VolumeId, cancel: CancellationToken) -> Result<()>;

    /// Fetches a volume's current metadata.
    async fn get_volume(
        &self,
        slot_id: &VolumeId,
        cancel: CancellationToken,
    ) -> Result<csi_core::Volume>;

    /// Lists all provisioned volumes.
    async fn list_volumes(&self, cancel: CancellationToken) -> Result<Vec<csi_core::Volume>>;

    /// Resizes an existing volume, returning its updated metadata.
    async fn resize_volume(
        &self,
        slot_id: &VolumeId,
        new_size_bytes: i64,
        cancel: CancellationToken,
    ) -> Result<csi_core::Volume>;

    /// Reports the appliance's total and available capacity for a pool.
    async fn get_capacity(
        &self,
        base_path: &str,
        cancel: CancellationToken,
    ) -> Result<CapacityInfo>;

    /// Creates a snapshot of a volume.
    async fn create_snapshot(
        &self,
        source_slot_id: &VolumeId,
        snapshot_id: &SnapshotId,
        cancel: CancellationToken,
    ) -> Result<csi_core::Snapshot>;

    /// Deletes a snapshot. As with `delete_volume`, a missing snapshot
    /// is reported as `SnapshotNotFound`; the controller plane decides
    /// idempotency.
    async fn delete_snapshot(
        &self,
        snapshot_id: &SnapshotId,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Fetches a snapshot's metadata.
    async fn get_snapshot(
        &self,
        snapshot_id: &SnapshotId,
        cancel: CancellationToken,
    ) -> Result<csi_core::Snapshot>;

    /// Lists snapshots, optionally filtered by snapshot ID or source volume.
    async fn list_snapshots(
        &self,
        filter: SnapshotFilter,
        cancel: CancellationToken,
    ) -> Result<Vec<csi_core::Snapshot>>;

    /// Provisions a new volume by restoring the contents of an existing
    /// snapshot.
    async fn restore_snapshot(
        &self,
        opts: RestoreOptions,
        cancel: CancellationToken,
    ) -> Result<csi_core::Volume>;

    /// The appliance's network address, as echoed into publish context.
    fn address(&self) -> &str;

    /// Whether the session to the appliance is currently healthy.
    fn is_connected(&self) -> bool;

    /// Closes the session, releasing any held resources.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A minimal in-memory backend used to exercise the trait object
    /// contract in downstream crates' tests.
    #[derive(Default)]
    pub struct NoopBackend {
        pub connected: AtomicBool,
    }

    #[async_trait]
    impl BackendClient for NoopBackend {
        async fn create_volume(
            &self,
            _opts: CreateVolumeOptions,
            _cancel: CancellationToken,
        ) -> Result<csi_core::Volume> {
            Err(BackendError::Other("not implemented in test double".into()))
        }

        async fn delete_volume(&self, _slot_id: &VolumeId, _cancel: CancellationToken) -> Result<()> {
            Err(BackendError::VolumeNotFound)
        }

        async fn get_volume(
            &self,
            _slot_id: &VolumeId,
            _cancel: CancellationToken,
        ) -> Result<csi_core::Volume> {
            Err(BackendError::VolumeNotFound)
        }

        async fn list_volumes(&self, _cancel: CancellationToken) -> Result<Vec<csi_core::Volume>> {
            Ok(Vec::new())
        }

        async fn resize_volume(
            &self,
            _slot_id: &VolumeId,
            _new_size_bytes: i64,
            _cancel: CancellationToken,
        ) -> Result<csi_core::Volume> {
            Err(BackendError::VolumeNotFound)
        }

        async fn get_capacity(
            &self,
            _base_path: &str,
            _cancel: CancellationToken,
        ) -> Result<CapacityInfo> {
            Ok(CapacityInfo {
                total_bytes: 0,
                available_bytes: 0,
            })
        }

        async fn create_snapshot(
            &self,
            _source_slot_id: &VolumeId,
            _snapshot_id: &SnapshotId,
            _cancel: CancellationToken,
        ) -> Result<csi_core::Snapshot> {
            Err(BackendError::VolumeNotFound)
        }

        async fn delete_snapshot(
            &self,
            _snapshot_id: &SnapshotId,
            _cancel: CancellationToken,
        ) -> Result<()> {
            Err(BackendError::SnapshotNotFound)
        }

        async fn get_snapshot(
            &self,
            _snapshot_id: &SnapshotId,
            _cancel: CancellationToken,
        ) -> Result<csi_core::Snapshot> {
            Err(BackendError::SnapshotNotFound)
        }

        async fn list_snapshots(
            &self,
            _filter: SnapshotFilter,
            _cancel: CancellationToken,
        ) -> Result<Vec<csi_core::Snapshot>> {
            Ok(Vec::new())
        }

        async fn restore_snapshot(
            &self,
            _opts: RestoreOptions,
            _cancel: CancellationToken,
        ) -> Result<csi_core::Volume> {
            Err(BackendError::SnapshotNotFound)
        }

        fn address(&self) -> &str {
            "noop"
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn trait_object_is_send_sync() {
        let backend: Box<dyn BackendClient> = Box::new(NoopBackend::default());
        assert!(!backend.is_connected());
        assert!(backend.list_volumes(CancellationToken::new()).await.unwrap().is_empty());
    }
}
