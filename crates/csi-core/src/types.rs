//! The core data model: volumes, snapshots, and attachment state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, SnapshotId, VolumeId};

/// The minimum accepted migration timeout.
pub const MIGRATION_TIMEOUT_MIN: ChronoDuration = ChronoDuration::seconds(30);

/// The maximum accepted migration timeout.
pub const MIGRATION_TIMEOUT_MAX: ChronoDuration = ChronoDuration::seconds(3600);

/// The default migration timeout when a storage class does not override it.
pub const MIGRATION_TIMEOUT_DEFAULT: ChronoDuration = ChronoDuration::seconds(300);

/// Clamps a migration timeout into `[MIGRATION_TIMEOUT_MIN, MIGRATION_TIMEOUT_MAX]`.
#[must_use]
pub fn clamp_migration_timeout(requested: ChronoDuration) -> ChronoDuration {
    requested.clamp(MIGRATION_TIMEOUT_MIN, MIGRATION_TIMEOUT_MAX)
}

/// How many writers an attachment may serve concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// At most one node may hold the attachment.
    SingleWriter,
    /// Up to two nodes may hold the attachment, bounded by a migration
    /// timeout, to support live migration.
    MultiWriter,
}

impl AccessMode {
    /// Whether a filesystem volume capability is compatible with this mode.
    ///
    /// Filesystem volumes cannot be safely shared by two writers, so
    /// `MultiWriter` is only valid for raw block capabilities.
    #[must_use]
    pub const fn compatible_with_filesystem(self) -> bool {
        matches!(self, Self::SingleWriter)
    }
}

/// A single node's hold on an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttachment {
    /// The node holding the attachment.
    pub node_id: NodeId,
    /// When the node's attachment was established.
    pub attached_at: DateTime<Utc>,
}

/// The live, in-memory (and mirrored) state of a volume's attachment to
/// one or two nodes.
///
/// Invariants:
/// 1. `nodes.len() <= 2`.
/// 2. If `access_mode == SingleWriter`, `nodes.len() <= 1`.
/// 3. `migration_started_at.is_some()` only while a second node is
///    attached under `MultiWriter`.
/// 4. `migration_timeout` is always within
///    `[MIGRATION_TIMEOUT_MIN, MIGRATION_TIMEOUT_MAX]`.
/// 5. `last_detach_at` is only set once `nodes` becomes empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentState {
    nodes: Vec<NodeAttachment>,
    access_mode: AccessMode,
    migration_started_at: Option<DateTime<Utc>>,
    migration_timeout: ChronoDuration,
    last_detach_at: Option<DateTime<Utc>>,
}

impl AttachmentState {
    /// Creates fresh state with a single primary attachment.
    #[must_use]
    pub fn new_primary(node_id: NodeId, access_mode: AccessMode, now: DateTime<Utc>) -> Self {
        Self {
            nodes: vec![NodeAttachment {
                node_id,
                attached_at: now,
            }],
            access_mode,
            migration_started_at: None,
            migration_timeout: MIGRATION_TIMEOUT_DEFAULT,
            last_detach_at: None,
        }
    }

    /// The nodes currently holding the attachment, in attach order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeAttachment] {
        &self.nodes
    }

    /// The attachment's access mode.
    #[must_use]
    pub const fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    /// The number of nodes currently attached.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether `node` already holds the attachment.
    #[must_use]
    pub fn is_attached_to(&self, node: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.node_id == node)
    }

    /// The primary (first-attached) node, if any.
    #[must_use]
    pub fn primary(&self) -> Option<&NodeAttachment> {
        self.nodes.first()
    }

    /// Whether a live migration is currently in progress (a second node
    /// has been appended and not yet resolved).
    #[must_use]
    pub const fn is_migrating(&self) -> bool {
        self.migration_started_at.is_some()
    }

    /// The configured migration timeout.
    #[must_use]
    pub const fn migration_timeout(&self) -> ChronoDuration {
        self.migration_timeout
    }

    /// Whether the in-progress migration has exceeded its timeout.
    #[must_use]
    pub fn is_migration_timed_out(&self, now: DateTime<Utc>) -> bool {
        match self.migration_started_at {
            Some(started) => now - started > self.migration_timeout,
            None => false,
        }
    }

    /// The timestamp of the most recent full detach, if any.
    #[must_use]
    pub const fn last_detach_at(&self) -> Option<DateTime<Utc>> {
        self.last_detach_at
    }

    /// When the current live-migration window was opened, if any.
    #[must_use]
    pub const fn migration_started_at(&self) -> Option<DateTime<Utc>> {
        self.migration_started_at
    }

    /// Whether `now` falls within `grace_period` of the last full detach.
    #[must_use]
    pub fn is_within_grace_period(&self, now: DateTime<Utc>, grace_period: ChronoDuration) -> bool {
        self.last_detach_at
            .is_some_and(|t| now - t <= grace_period)
    }

    /// Appends a secondary attachment, starting a bounded live-migration
    /// window.
    ///
    /// Caller must have already verified the multi-writer capacity
    /// invariants (`node_count() < 2`, `access_mode == MultiWriter`) —
    /// this is a narrow, no-surprises mutator that trusts its caller,
    /// the same contract the attachment manager's other setters use.
    pub fn add_secondary(
        &mut self,
        node_id: NodeId,
        now: DateTime<Utc>,
        migration_timeout: ChronoDuration,
    ) {
        self.nodes.push(NodeAttachment {
            node_id,
            attached_at: now,
        });
        self.migration_started_at = Some(now);
        self.migration_timeout = clamp_migration_timeout(migration_timeout);
    }

    /// Removes `node` from the attachment. Returns `true` if this was
    /// the last node, in which case `last_detach_at` is set to `now`
    /// and the caller should destroy the state entry.
    pub fn remove_node(&mut self, node: &NodeId, now: DateTime<Utc>) -> bool {
        self.nodes.retain(|n| &n.node_id != node);
        if self.nodes.len() <= 1 {
            self.migration_started_at = None;
        }
        if self.nodes.is_empty() {
            self.last_detach_at = Some(now);
            true
        } else {
            false
        }
    }

    /// Resets the grace-period clock, used when a fresh primary
    /// attachment supersedes it.
    pub fn clear_detach_timestamp(&mut self) {
        self.last_detach_at = None;
    }
}

/// A provisioned NVMe-over-TCP backed volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// The volume's slot identifier.
    pub slot_id: VolumeId,
    /// The backing file path on the storage appliance.
    pub path: String,
    /// Capacity in bytes.
    pub size_bytes: i64,
    /// The NVMe-oF target's listening port.
    pub port: u16,
    /// The NVMe-oF target qualified name.
    pub target_name: String,
}

/// A point-in-time snapshot of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The snapshot's deterministically derived identifier.
    pub id: SnapshotId,
    /// The slot identifier of the volume this snapshot was taken from.
    pub source_slot_id: VolumeId,
    /// Size of the snapshot's source volume at creation time, in bytes.
    pub size_bytes: i64,
    /// When the snapshot was created.
    pub created_at: DateTime<Utc>,
}

/// A resolved virtual machine key, as returned by the VMI grouper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmKey(String);

impl VmKey {
    /// Wraps a raw VM key string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VmKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
