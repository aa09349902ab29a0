//! The narrow slice of the orchestrator API the publish decision
//! procedure and the reconciler need: whether a node still exists.
//!
//! The full orchestrator client (watching node objects, reading pod
//! specs for the VMI grouper, writing events) is an external
//! collaborator; this crate only depends on the constructor-injected
//! trait below, never a concrete client.

use async_trait::async_trait;
use csi_core::NodeId;

/// Errors from a call against the orchestrator API.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The orchestrator API could not be reached or returned an error.
    #[error("orchestrator API error: {0}")]
    ApiError(String),
}

/// The orchestrator operations the controller plane depends on.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Whether the named node object still exists in the cluster.
    ///
    /// Used to distinguish a genuine single-writer conflict (the
    /// blocking node is alive) from a stale attachment left behind by
    /// a node that was deleted without a clean detach.
    async fn node_exists(&self, node_id: &NodeId) -> Result<bool, OrchestratorError>;

    /// Lists every node object currently known to the cluster, used by
    /// the reconciler's periodic sweep.
    async fn list_node_ids(&self) -> Result<Vec<NodeId>, OrchestratorError>;
}
