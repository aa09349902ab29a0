//! # csi-telemetry
//!
//! Event and metric emitters for the `metal-csi` controller plane.
//! Exposition formats (Prometheus text, Kubernetes Event objects) are
//! out of scope; this crate only accumulates the structured data a
//! transport layer would expose.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod metrics;

pub use events::{Event, EventSink, Reason, RecordingEventSink, Severity, TracingEventSink};
pub use metrics::{AttachmentOp, MigrationResult, Metrics};
