//! The Kubernetes-style event taxonomy emitted by the attachment
//! decision procedure and the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use csi_core::{NodeId, VolumeId};

/// The severity of an emitted event, mirroring the orchestrator's
/// `Normal`/`Warning` event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// An expected, non-actionable occurrence.
    Normal,
    /// An anomaly an operator may need to act on.
    Warning,
}

/// A structured event about a volume's attachment lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the event occurred.
    pub at: DateTime<Utc>,
    /// The volume the event concerns.
    pub volume_id: VolumeId,
    /// The event's severity.
    pub severity: Severity,
    /// The event's short machine-readable reason.
    pub reason: Reason,
    /// A human-readable message.
    pub message: String,
}

/// The set of reasons an [`Event`] may carry. Each corresponds to a row
/// in the taxonomy below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    /// `ControllerPublishVolume` was rejected because another node holds
    /// a conflicting single-writer attachment.
    AttachmentConflict,
    /// A volume was newly attached to a node.
    VolumeAttached,
    /// A volume was detached from a node.
    VolumeDetached,
    /// A bounded live-migration window was opened.
    MigrationStarted,
    /// A live migration resolved to a single remaining node.
    MigrationCompleted,
    /// A live migration exceeded its timeout without resolving.
    MigrationFailed,
    /// The reconciler found a persisted attachment referencing a node
    /// the orchestrator no longer knows about.
    StaleMountDetected,
}

impl Reason {
    /// The severity associated with this reason.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::AttachmentConflict | Self::MigrationFailed => Severity::Warning,
            Self::VolumeAttached
            | Self::VolumeDetached
            | Self::MigrationStarted
            | Self::MigrationCompleted
            | Self::StaleMountDetected => Severity::Normal,
        }
    }
}

impl Event {
    /// Builds an event with the reason's default severity.
    #[must_use]
    pub fn new(volume_id: VolumeId, reason: Reason, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            at,
            volume_id,
            severity: reason.severity(),
            reason,
            message: message.into(),
        }
    }

    /// Builds an `AttachmentConflict` event naming the blocking node.
    #[must_use]
    pub fn attachment_conflict(volume_id: VolumeId, blocking_node: &NodeId, at: DateTime<Utc>) -> Self {
        Self::new(
            volume_id,
            Reason::AttachmentConflict,
            format!(
                "volume is attached single-writer to node {blocking_node}; use a multi-writer \
                 block volume capability to allow live migration"
            ),
            at,
        )
    }

    /// Builds a `MigrationFailed` event for a timed-out migration.
    #[must_use]
    pub fn migration_failed(volume_id: VolumeId, at: DateTime<Utc>) -> Self {
        Self::new(
            volume_id,
            Reason::MigrationFailed,
            "live migration exceeded its timeout without completing".to_string(),
            at,
        )
    }

    /// Builds a `MigrationCompleted` event reporting elapsed duration.
    #[must_use]
    pub fn migration_completed(volume_id: VolumeId, elapsed: chrono::Duration, at: DateTime<Utc>) -> Self {
        Self::new(
            volume_id,
            Reason::MigrationCompleted,
            format!("live migration completed in {}s", elapsed.num_seconds()),
            at,
        )
    }
}

/// A sink events are delivered to. The orchestrator-facing event API
/// (e.g. posting a Kubernetes `Event` object) is an external
/// collaborator; this trait is the seam a real implementation plugs
/// into.
pub trait EventSink: Send + Sync {
    /// Records an event.
    fn emit(&self, event: Event);
}

/// An [`EventSink`] that logs every event via `tracing` and otherwise
/// discards it. Suitable as a default when no richer sink is wired up.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        match event.severity {
            Severity::Normal => {
                tracing::info!(volume_id = %event.volume_id, reason = ?event.reason, "{}", event.message);
            }
            Severity::Warning => {
                tracing::warn!(volume_id = %event.volume_id, reason = ?event.reason, "{}", event.message);
            }
        }
    }
}

/// An [`EventSink`] that records every event in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: parking_lot::RwLock<Vec<Event>>,
}

impl RecordingEventSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: Event) {
        self.events.write().push(event);
    }
}
