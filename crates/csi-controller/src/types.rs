//! Request/response shapes for the controller RPC surface. These are
//! transport-agnostic: a gRPC layer (out of scope for this workspace)
//! converts wire messages to and from these types.

use std::collections::HashMap;

use csi_core::{AccessMode, NodeId, SnapshotId, VolumeId};

/// A single requested volume capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeCapability {
    /// The access mode being requested.
    pub access_mode: AccessMode,
    /// `Some(fs_type)` for a filesystem-mode mount, `None` for raw block.
    pub fs_type: Option<String>,
}

impl VolumeCapability {
    /// A raw block capability with the given access mode.
    #[must_use]
    pub const fn block(access_mode: AccessMode) -> Self {
        Self {
            access_mode,
            fs_type: None,
        }
    }

    /// A filesystem-mode capability with the given access mode and type.
    #[must_use]
    pub fn filesystem(access_mode: AccessMode, fs_type: impl Into<String>) -> Self {
        Self {
            access_mode,
            fs_type: Some(fs_type.into()),
        }
    }

    /// Whether this is a filesystem-mode (as opposed to raw block) capability.
    #[must_use]
    pub const fn is_filesystem(&self) -> bool {
        self.fs_type.is_some()
    }
}

/// The provenance of a volume being created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// Provision by restoring an existing snapshot.
    Snapshot(SnapshotId),
    /// Provision by cloning a live volume. Structurally representable
    /// so a request naming one is rejected explicitly rather than
    /// silently treated as a fresh volume; the backend adapter
    /// contract has no clone-from-volume operation.
    Volume(VolumeId),
}

/// A `CreateVolume` request.
#[derive(Debug, Clone)]
pub struct CreateVolumeRequest {
    /// The orchestrator-assigned name; doubles as the slot identifier,
    /// which is what makes `CreateVolume` idempotent by name.
    pub volume_id: VolumeId,
    /// The minimum acceptable capacity, in bytes.
    pub required_bytes: i64,
    /// The maximum acceptable capacity, in bytes (`0` means unbounded).
    pub limit_bytes: i64,
    /// The capabilities the volume must support.
    pub capabilities: Vec<VolumeCapability>,
    /// Raw storage-class parameters.
    pub parameters: HashMap<String, String>,
    /// The volume's provenance, if provisioned from a snapshot.
    pub content_source: Option<ContentSource>,
}

/// A `CreateVolume` response.
#[derive(Debug, Clone)]
pub struct CreateVolumeResponse {
    /// The provisioned volume's slot identifier.
    pub volume_id: VolumeId,
    /// The provisioned capacity, in bytes.
    pub capacity_bytes: i64,
    /// The volume context map echoed back on every subsequent RPC:
    /// backend address, NVMe target address/port/qualified name,
    /// backing file path, reconnect tuning, and the clamped migration
    /// timeout.
    pub context: HashMap<String, String>,
    /// Echoes the request's content source, if any.
    pub content_source: Option<ContentSource>,
}

/// A `ControllerPublishVolume` request.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// The volume to publish.
    pub volume_id: VolumeId,
    /// The node requesting the attachment.
    pub node_id: NodeId,
    /// The claim's namespace, for VMI resolution.
    pub namespace: String,
    /// The claim's name, for VMI resolution.
    pub pvc_name: String,
    /// The requested capability for this attachment.
    pub capability: VolumeCapability,
    /// Raw storage-class parameters (for the migration timeout).
    pub parameters: HashMap<String, String>,
}

/// The volume context returned from a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishContext {
    /// The NVMe-oF target address.
    pub address: String,
    /// The NVMe-oF target port.
    pub port: u16,
    /// The NVMe-oF target qualified name.
    pub target_qualified_name: String,
    /// The filesystem type, if this is a filesystem-mode attachment.
    pub fs_type: Option<String>,
}

/// A `ControllerExpandVolume` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandVolumeResponse {
    /// The volume's capacity after expansion, in bytes.
    pub capacity_bytes: i64,
    /// Whether the node must still perform a filesystem resize.
    pub node_expansion_required: bool,
}

/// A `ListSnapshots` response page.
#[derive(Debug, Clone)]
pub struct ListSnapshotsResponse {
    /// The snapshots in this page.
    pub snapshots: Vec<csi_core::Snapshot>,
    /// An opaque token for the next page, if more results remain.
    pub next_token: Option<String>,
}
