//! # csi-core
//!
//! Core data model, identifier derivation, capacity policy, and
//! storage-class parameter resolution for the `metal-csi` controller
//! plane: an NVMe-over-TCP block storage CSI driver.
//!
//! This crate has no knowledge of gRPC, the orchestrator API, or the
//! backend appliance's wire protocol — it is the pure, synchronous
//! decision logic shared by every higher layer in the workspace.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capacity;
pub mod error;
pub mod ids;
pub mod params;
pub mod types;

pub use error::{CsiStatus, Error, Result};
pub use ids::{file_path, qualified_name_to_volume_id, target_qualified_name, NodeId, SnapshotId, VolumeId};
pub use params::{resolve as resolve_params, ResolvedParams};
pub use types::{AccessMode, AttachmentState, NodeAttachment, Snapshot, VmKey, Volume};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
