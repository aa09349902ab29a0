//! Error types and RPC status mapping for the controller plane.

use thiserror::Error;

/// Result type alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while validating or manipulating core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A volume identifier failed format validation.
    #[error("invalid volume id {id:?}: {reason}")]
    InvalidVolumeId {
        /// The identifier that failed validation.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A snapshot identifier failed format validation.
    #[error("invalid snapshot id {id:?}: {reason}")]
    InvalidSnapshotId {
        /// The identifier that failed validation.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A requested capacity value fell outside the supported range.
    #[error("requested capacity {requested} exceeds limit {limit}")]
    CapacityOutOfRange {
        /// The requested capacity in bytes.
        requested: i64,
        /// The maximum supported capacity in bytes.
        limit: i64,
    },

    /// A storage-class parameter failed validation.
    #[error("invalid parameter {key}={value:?}: {reason}")]
    InvalidParameter {
        /// The parameter key.
        key: String,
        /// The raw parameter value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A requested volume capability is not supported.
    #[error("unsupported capability: {reason}")]
    UnsupportedCapability {
        /// Why the capability is unsupported.
        reason: String,
    },

    /// A pagination token was malformed or out of range.
    #[error("invalid pagination token: {reason}")]
    InvalidPageToken {
        /// Why the token is invalid.
        reason: String,
    },
}

/// Coarse RPC outcome classes a transport layer maps onto wire status
/// codes. This crate never depends on a gRPC crate; it only classifies
/// outcomes onto distinct variants instead of string-matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsiStatus {
    /// Malformed input or a refused capability.
    InvalidArgument,
    /// The target of the operation does not exist.
    NotFound,
    /// The operation conflicts with existing state.
    FailedPrecondition,
    /// The target already exists with different properties.
    AlreadyExists,
    /// Capacity or quota exhaustion.
    ResourceExhausted,
    /// Transport or backend failure; safe to retry.
    Unavailable,
    /// A numeric value fell outside a supported range.
    OutOfRange,
    /// Malformed cursor or resumable operation state.
    Aborted,
    /// An invariant was violated or an unexpected internal error occurred.
    Internal,
}

impl From<&Error> for CsiStatus {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidVolumeId { .. }
            | Error::InvalidSnapshotId { .. }
            | Error::InvalidParameter { .. }
            | Error::UnsupportedCapability { .. } => Self::InvalidArgument,
            Error::CapacityOutOfRange { .. } => Self::OutOfRange,
            Error::InvalidPageToken { .. } => Self::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_out_of_range_maps_to_out_of_range() {
        let err = Error::CapacityOutOfRange {
            requested: 1 << 40,
            limit: 1 << 30,
        };
        assert_eq!(CsiStatus::from(&err), CsiStatus::OutOfRange);
    }

    #[test]
    fn invalid_parameter_maps_to_invalid_argument() {
        let err = Error::InvalidParameter {
            key: "ctrlLossTmo".into(),
            value: "-5".into(),
            reason: "must be >= -1".into(),
        };
        assert_eq!(CsiStatus::from(&err), CsiStatus::InvalidArgument);
    }
}
