//! Validated identifiers and the pure, injective derivations built on them.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static VOLUME_ID_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(
        r"^pvc-[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
    )
    .unwrap()
});

static SNAPSHOT_ID_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^snap-[0-9a-f]{32}$").unwrap()
});

/// The prefix every slot identifier carries.
pub const VOLUME_ID_PREFIX: &str = "pvc-";

/// The prefix every snapshot identifier carries.
pub const SNAPSHOT_ID_PREFIX: &str = "snap-";

/// The number of hex characters following [`SNAPSHOT_ID_PREFIX`].
pub const SNAPSHOT_ID_HASH_LEN: usize = 32;

/// The slot identifier for a volume: `pvc-<hex UUID with hyphens>`.
///
/// This is the identifier the orchestrator hands back on every
/// subsequent RPC for the volume, and the seed for the volume's
/// NVMe target qualified name and backing file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeId(String);

impl VolumeId {
    /// Validates and wraps a raw volume identifier string.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !VOLUME_ID_RE.is_match(&id) {
            return Err(Error::InvalidVolumeId {
                id,
                reason: "must match pvc-<uuid>".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for VolumeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<VolumeId> for String {
    fn from(id: VolumeId) -> Self {
        id.0
    }
}

impl AsRef<str> for VolumeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The identifier for a snapshot: `snap-<32 lowercase hex chars>`.
///
/// Orders lexicographically by the wrapped string, which for this
/// fixed-width hex format also orders by the underlying digest — used
/// to give `ListSnapshots` pagination a stable order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Validates and wraps a raw snapshot identifier string.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !SNAPSHOT_ID_RE.is_match(&id) {
            return Err(Error::InvalidSnapshotId {
                id,
                reason: format!(
                    "must match snap-<{SNAPSHOT_ID_HASH_LEN} lowercase hex chars>"
                ),
            });
        }
        Ok(Self(id))
    }

    /// Derives the deterministic, collision-resistant snapshot ID for a
    /// snapshot name. Two calls with the same `name` always agree; this
    /// is how `CreateSnapshot` achieves idempotency without a side
    /// table.
    #[must_use]
    pub fn derive(name: &str) -> Self {
        let digest = blake3::hash(name.as_bytes());
        let hex = digest.to_hex();
        Self(format!(
            "{SNAPSHOT_ID_PREFIX}{}",
            &hex.as_str()[..SNAPSHOT_ID_HASH_LEN]
        ))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SnapshotId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SnapshotId> for String {
    fn from(id: SnapshotId) -> Self {
        id.0
    }
}

/// The identifier of a cluster node, as handed to `ControllerPublishVolume`
/// and `ControllerUnpublishVolume`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// Wraps a node identifier. Node IDs are opaque orchestrator-assigned
    /// strings; the only requirement is non-emptiness.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidVolumeId {
                id,
                reason: "node id cannot be empty".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derives the NVMe target qualified name for a volume's slot identifier.
///
/// Pure and injective: distinct slot identifiers always yield distinct
/// qualified names, and the slot identifier can be recovered from the
/// qualified name via [`qualified_name_to_volume_id`].
#[must_use]
pub fn target_qualified_name(slot_id: &VolumeId) -> String {
    format!("nqn.2024-01.io.srvlab.metal-csi:{slot_id}")
}

/// The inverse of [`target_qualified_name`].
pub fn qualified_name_to_volume_id(qn: &str) -> Result<VolumeId> {
    let suffix = qn
        .strip_prefix("nqn.2024-01.io.srvlab.metal-csi:")
        .ok_or_else(|| Error::InvalidVolumeId {
            id: qn.to_string(),
            reason: "not a metal-csi target qualified name".to_string(),
        })?;
    VolumeId::new(suffix)
}

/// Derives the backing file path for a volume's slot identifier under
/// the given pool base path.
///
/// Pure and injective for a fixed `base_path`: distinct slot
/// identifiers always yield distinct paths.
#[must_use]
pub fn file_path(base_path: &str, slot_id: &VolumeId) -> String {
    format!("{}/{}", base_path.trim_end_matches('/'), slot_id)
}

/// The inverse of [`file_path`] for a fixed `base_path`.
pub fn file_path_to_volume_id(base_path: &str, path: &str) -> Result<VolumeId> {
    let prefix = format!("{}/", base_path.trim_end_matches('/'));
    let suffix = path
        .strip_prefix(&prefix)
        .ok_or_else(|| Error::InvalidVolumeId {
            id: path.to_string(),
            reason: "not under the configured pool base path".to_string(),
        })?;
    VolumeId::new(suffix)
}
