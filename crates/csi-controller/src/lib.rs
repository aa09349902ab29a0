//! # csi-controller
//!
//! The controller RPC surface and the attachment reconciler for the
//! NVMe-over-TCP block storage CSI driver: the two components that sit
//! on top of `csi-attach`, `csi-backend`, `csi-grouper`, and
//! `csi-telemetry` and turn their primitives into the decision
//! procedures a gRPC transport layer (out of scope for this workspace)
//! would drive.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod controller;
pub mod error;
pub mod orchestrator;
pub mod reconciler;
pub mod types;

pub use controller::{Controller, ControllerCapability, DEFAULT_GRACE_PERIOD};
pub use error::{map_backend_error, ControllerError, Result};
pub use orchestrator::{OrchestratorClient, OrchestratorError};
pub use reconciler::{ReconcileReport, Reconciler, DEFAULT_INTERVAL};
