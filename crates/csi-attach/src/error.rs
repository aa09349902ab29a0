//! Errors for the attachment manager.

use csi_core::VolumeId;
use thiserror::Error;

/// Result type alias for attachment manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the attachment manager may return.
#[derive(Debug, Error)]
pub enum Error {
    /// No attachment state exists for the volume.
    #[error("no attachment state for volume {0}")]
    NoAttachmentState(VolumeId),

    /// Writing the persistent mirror failed. This is
    /// logged and does not roll back the in-memory mutation; callers
    /// that need to know about it still receive this variant so they
    /// can choose to surface a warning.
    #[error("failed to persist attachment mirror for volume {volume_id}: {reason}")]
    MirrorWriteFailed {
        /// The volume whose mirror failed to write.
        volume_id: VolumeId,
        /// The underlying failure.
        reason: String,
    },

    /// Reading the persistent mirror failed.
    #[error("failed to read attachment mirror: {0}")]
    MirrorReadFailed(String),
}
