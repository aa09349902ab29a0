//! RPC-facing errors for the controller surface, and the mapping from
//! internal failures onto that taxonomy.

use csi_backend::BackendError;
use csi_core::{CsiStatus, VolumeId};
use thiserror::Error;

/// Result type alias for controller RPC handlers.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// An error surfaced by a controller RPC, already classified into the
/// coarse status taxonomy a transport layer maps onto wire codes.
#[derive(Debug, Error)]
#[error("{status:?}: {message}")]
pub struct ControllerError {
    /// The coarse status class.
    pub status: CsiStatus,
    /// A human-readable message; for `FailedPrecondition` rejections
    /// this carries the specific reason a transport layer would want
    /// to surface to a caller (e.g. naming the blocking node).
    pub message: String,
}

impl ControllerError {
    /// Builds an error with an explicit status and message.
    #[must_use]
    pub fn new(status: CsiStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// `INVALID_ARGUMENT`.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(CsiStatus::InvalidArgument, message)
    }

    /// `NOT_FOUND`.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CsiStatus::NotFound, message)
    }

    /// `FAILED_PRECONDITION`.
    #[must_use]
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(CsiStatus::FailedPrecondition, message)
    }

    /// `RESOURCE_EXHAUSTED`.
    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(CsiStatus::ResourceExhausted, message)
    }

    /// `UNAVAILABLE`.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(CsiStatus::Unavailable, message)
    }

    /// `OUT_OF_RANGE`.
    #[must_use]
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(CsiStatus::OutOfRange, message)
    }

    /// `INTERNAL`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CsiStatus::Internal, message)
    }
}

impl From<csi_core::Error> for ControllerError {
    fn from(err: csi_core::Error) -> Self {
        let status = CsiStatus::from(&err);
        Self::new(status, err.to_string())
    }
}

impl From<csi_attach::Error> for ControllerError {
    fn from(err: csi_attach::Error) -> Self {
        // The caller always holds the volume's lock and has already
        // checked the precondition these errors guard, so seeing one
        // here means the in-memory map and the request disagree about
        // state that should have been consistent.
        Self::internal(err.to_string())
    }
}

/// Maps a backend adapter error onto the RPC status taxonomy:
/// connection failures and timeouts become `UNAVAILABLE`, resource
/// exhaustion becomes `RESOURCE_EXHAUSTED`, and anything else is
/// `INTERNAL` — the backend is trusted to have already classified
/// not-found conditions into `BackendError::VolumeNotFound` /
/// `SnapshotNotFound`, which callers branch on directly rather than
/// going through this mapping.
#[must_use]
pub fn map_backend_error(err: &BackendError) -> ControllerError {
    match err {
        BackendError::ConnectionFailed(_) | BackendError::OperationTimeout => {
            ControllerError::unavailable(err.to_string())
        }
        BackendError::ResourceExhausted(_) => ControllerError::resource_exhausted(err.to_string()),
        BackendError::VolumeNotFound => {
            ControllerError::not_found(format!("volume not found: {err}"))
        }
        BackendError::SnapshotNotFound => {
            ControllerError::not_found(format!("snapshot not found: {err}"))
        }
        BackendError::Other(_) => ControllerError::internal(err.to_string()),
    }
}

/// Builds a `FAILED_PRECONDITION` naming the node blocking a publish
/// attempt and hinting at the multi-writer escape hatch.
#[must_use]
pub fn conflict_error(volume_id: &VolumeId, blocking_node: &csi_core::NodeId) -> ControllerError {
    ControllerError::failed_precondition(format!(
        "volume {volume_id} is attached single-writer to node {blocking_node}; request a \
         multi-writer block volume capability to allow live migration"
    ))
}
