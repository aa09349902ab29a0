//! Tagged error sentinels for backend adapter calls.
//!
//! The core never string-matches a backend error message; every
//! outcome the controller needs to branch on is a distinct variant.

use thiserror::Error;

/// Result type alias for backend adapter calls.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors a [`crate::BackendClient`] implementation may return.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The appliance connection is down or could not be established.
    #[error("backend connection failed: {0}")]
    ConnectionFailed(String),

    /// The call exceeded its deadline.
    #[error("backend operation timed out")]
    OperationTimeout,

    /// The appliance is out of capacity for the requested operation.
    #[error("backend resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The named volume does not exist on the appliance.
    #[error("backend volume not found")]
    VolumeNotFound,

    /// The named snapshot does not exist on the appliance.
    #[error("backend snapshot not found")]
    SnapshotNotFound,

    /// Any other appliance-reported failure, not otherwise classified.
    #[error("backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// Whether this error represents a transport-level failure that a
    /// caller should map to `UNAVAILABLE` and may safely retry.
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::OperationTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        assert!(BackendError::ConnectionFailed("down".into()).is_transport_error());
        assert!(BackendError::OperationTimeout.is_transport_error());
        assert!(!BackendError::VolumeNotFound.is_transport_error());
        assert!(!BackendError::ResourceExhausted("full".into()).is_transport_error());
    }
}
