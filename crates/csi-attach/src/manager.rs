//! The attachment manager: the single owner of in-memory attachment
//! state, backed by a persistent mirror the reconciler can heal from.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use csi_core::{AccessMode, AttachmentState, NodeId, VolumeId};

use crate::error::{Error, Result};
use crate::locks::KeyedLockRegistry;
use crate::mirror::{self, PersistentMirror};

/// Summary counters for [`AttachmentManager::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttachmentManagerStats {
    /// Number of volumes with live attachment state.
    pub tracked_volumes: usize,
    /// Number of volumes currently in a live-migration window.
    pub migrating_volumes: usize,
    /// Total number of node attachments across all tracked volumes.
    pub total_attachments: usize,
}

/// Owns the in-memory attachment map and its persistent mirror.
///
/// Every mutator is meant to be called while the caller holds the
/// per-volume lock from [`AttachmentManager::locks`] — the manager
/// itself only guarantees that a single mutation is atomic with
/// respect to the in-memory map, not that a read-modify-write sequence
/// spanning an `.await` is atomic. That sequencing is the controller
/// and reconciler's responsibility.
pub struct AttachmentManager {
    state: RwLock<HashMap<VolumeId, AttachmentState>>,
    mirror: Arc<dyn PersistentMirror>,
    locks: KeyedLockRegistry<VolumeId>,
}

impl AttachmentManager {
    /// Creates a manager backed by the given persistent mirror, with an
    /// empty in-memory map. Call [`Self::initialize`] before serving
    /// traffic to rebuild the map from persisted state.
    #[must_use]
    pub fn new(mirror: Arc<dyn PersistentMirror>) -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            mirror,
            locks: KeyedLockRegistry::new(),
        }
    }

    /// The per-volume lock registry. Callers acquire a volume's lock
    /// before calling any mutator for that volume.
    #[must_use]
    pub fn locks(&self) -> &KeyedLockRegistry<VolumeId> {
        &self.locks
    }

    /// Rebuilds the in-memory map from every volume's persisted mirror.
    /// Volumes with no mirror, an unparseable mirror, or an
    /// unrecognized schema version start with no attachment state,
    /// matching a fresh volume.
    ///
    /// # Errors
    ///
    /// Returns an error only if listing the persisted mirrors itself
    /// fails; a single volume's undecodable mirror is skipped with a
    /// warning, not treated as fatal.
    pub async fn initialize(&self) -> Result<usize> {
        let mirrors = self
            .mirror
            .list_all()
            .await
            .map_err(|e| Error::MirrorReadFailed(e.to_string()))?;

        let mut restored = 0usize;
        let mut map = self.state.write();
        for (volume_id, raw) in mirrors {
            match mirror::decode(&raw) {
                Some(state) => {
                    map.insert(volume_id, state);
                    restored += 1;
                }
                None => {
                    warn!(volume_id = %volume_id, "persisted mirror is undecodable; starting with no attachment state");
                }
            }
        }
        info!(restored, "attachment manager initialized from persisted mirrors");
        Ok(restored)
    }

    /// Reads the current attachment state for a volume, if any.
    #[must_use]
    pub fn get_attachment(&self, volume_id: &VolumeId) -> Option<AttachmentState> {
        self.state.read().get(volume_id).cloned()
    }

    /// Whether `node_id` currently holds the attachment.
    #[must_use]
    pub fn is_attached_to_node(&self, volume_id: &VolumeId, node_id: &NodeId) -> bool {
        self.state
            .read()
            .get(volume_id)
            .is_some_and(|s| s.is_attached_to(node_id))
    }

    /// The number of nodes currently attached.
    #[must_use]
    pub fn get_node_count(&self, volume_id: &VolumeId) -> usize {
        self.state.read().get(volume_id).map_or(0, AttachmentState::node_count)
    }

    /// Whether `now` falls within `grace_period` of the volume's last
    /// full detach. `false` if the volume has no state at all (a
    /// volume that has never been attached has no grace period to be
    /// within).
    #[must_use]
    pub fn is_within_grace_period(
        &self,
        volume_id: &VolumeId,
        now: DateTime<Utc>,
        grace_period: ChronoDuration,
    ) -> bool {
        self.state
            .read()
            .get(volume_id)
            .is_some_and(|s| s.is_within_grace_period(now, grace_period))
    }

    /// Whether the volume is currently in a live-migration window.
    #[must_use]
    pub fn is_migrating(&self, volume_id: &VolumeId) -> bool {
        self.state.read().get(volume_id).is_some_and(AttachmentState::is_migrating)
    }

    /// Whether an in-progress migration has exceeded its timeout.
    #[must_use]
    pub fn is_migration_timed_out(&self, volume_id: &VolumeId, now: DateTime<Utc>) -> bool {
        self.state
            .read()
            .get(volume_id)
            .is_some_and(|s| s.is_migration_timed_out(now))
    }

    async fn persist(&self, volume_id: &VolumeId, state: &AttachmentState) {
        let raw = match mirror::encode(state) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(volume_id = %volume_id, error = %e, "failed to encode attachment mirror");
                return;
            }
        };
        if let Err(e) = self.mirror.write(volume_id, &raw).await {
            // The reconciler heals memory/mirror disagreement on its
            // next pass; a write failure here is not rolled back.
            warn!(volume_id = %volume_id, error = %e, "failed to persist attachment mirror");
        }
    }

    /// Creates fresh primary attachment state for a volume with no
    /// existing state (or superseding destroyed state), writes memory
    /// first, then best-effort persists the mirror.
    pub async fn track_primary(
        &self,
        volume_id: &VolumeId,
        node_id: NodeId,
        access_mode: AccessMode,
        now: DateTime<Utc>,
    ) -> AttachmentState {
        let state = AttachmentState::new_primary(node_id, access_mode, now);
        self.state.write().insert(volume_id.clone(), state.clone());
        debug!(volume_id = %volume_id, "tracked new primary attachment");
        self.persist(volume_id, &state).await;
        state
    }

    /// Appends a secondary attachment to existing state, opening a
    /// live-migration window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAttachmentState`] if the volume has no
    /// tracked state.
    pub async fn track_secondary(
        &self,
        volume_id: &VolumeId,
        node_id: NodeId,
        now: DateTime<Utc>,
        migration_timeout: ChronoDuration,
    ) -> Result<AttachmentState> {
        let updated = {
            let mut map = self.state.write();
            let state = map
                .get_mut(volume_id)
                .ok_or_else(|| Error::NoAttachmentState(volume_id.clone()))?;
            state.add_secondary(node_id, now, migration_timeout);
            state.clone()
        };
        debug!(volume_id = %volume_id, "tracked secondary attachment; migration window opened");
        self.persist(volume_id, &updated).await;
        Ok(updated)
    }

    /// Removes a node from a volume's attachment state. If this was the
    /// last node, the state is destroyed and `Ok(true)` is returned; the
    /// persisted mirror is cleared to reflect that.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAttachmentState`] if the volume has no
    /// tracked state.
    pub async fn remove_node(
        &self,
        volume_id: &VolumeId,
        node_id: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let (destroyed, remaining) = {
            let mut map = self.state.write();
            let state = map
                .get_mut(volume_id)
                .ok_or_else(|| Error::NoAttachmentState(volume_id.clone()))?;
            let destroyed = state.remove_node(node_id, now);
            if destroyed {
                let removed = map.remove(volume_id);
                (true, removed)
            } else {
                (false, Some(state.clone()))
            }
        };

        match (destroyed, remaining) {
            (true, Some(final_state)) => {
                info!(volume_id = %volume_id, node_id = %node_id, "removed last node; destroying attachment state");
                self.persist(volume_id, &final_state).await;
            }
            (false, Some(updated)) => {
                info!(volume_id = %volume_id, node_id = %node_id, "removed node from attachment");
                self.persist(volume_id, &updated).await;
            }
            _ => {}
        }

        Ok(destroyed)
    }

    /// Clears the grace-period clock on a volume's state, used when a
    /// fresh primary attachment supersedes a stale one within the
    /// handoff window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAttachmentState`] if the volume has no
    /// tracked state.
    pub async fn clear_detach_timestamp(&self, volume_id: &VolumeId) -> Result<()> {
        let updated = {
            let mut map = self.state.write();
            let state = map
                .get_mut(volume_id)
                .ok_or_else(|| Error::NoAttachmentState(volume_id.clone()))?;
            state.clear_detach_timestamp();
            state.clone()
        };
        self.persist(volume_id, &updated).await;
        Ok(())
    }

    /// Destroys a volume's tracked state outright, used by
    /// self-healing paths (stale-state recovery, volume deletion).
    pub async fn destroy(&self, volume_id: &VolumeId) {
        self.state.write().remove(volume_id);
        if let Err(e) = self.mirror.write(volume_id, "").await {
            warn!(volume_id = %volume_id, error = %e, "failed to clear attachment mirror");
        }
    }

    /// Lists every volume ID with tracked attachment state.
    #[must_use]
    pub fn tracked_volume_ids(&self) -> Vec<VolumeId> {
        self.state.read().keys().cloned().collect()
    }

    /// Reconciles a volume's in-memory state against its persisted
    /// mirror, which wins on disagreement. Returns `true` if the
    /// in-memory map was changed.
    ///
    /// # Errors
    ///
    /// Returns an error only if reading the persisted mirror itself
    /// fails; an undecodable mirror is treated the same as an absent
    /// one, matching [`Self::initialize`].
    pub async fn reconcile_with_mirror(&self, volume_id: &VolumeId) -> Result<bool> {
        let raw = self
            .mirror
            .read(volume_id)
            .await
            .map_err(|e| Error::MirrorReadFailed(e.to_string()))?;
        let mirrored = raw.as_deref().and_then(mirror::decode);
        let in_memory = self.state.read().get(volume_id).cloned();

        if mirrored == in_memory {
            return Ok(false);
        }

        let mut map = self.state.write();
        match mirrored {
            Some(state) => {
                map.insert(volume_id.clone(), state);
            }
            None => {
                map.remove(volume_id);
            }
        }
        Ok(true)
    }

    /// Summary counters over all tracked state.
    #[must_use]
    pub fn stats(&self) -> AttachmentManagerStats {
        let map = self.state.read();
        let migrating = map.values().filter(|s| s.is_migrating()).count();
        let total_attachments = map.values().map(AttachmentState::node_count).sum();
        AttachmentManagerStats {
            tracked_volumes: map.len(),
            migrating_volumes: migrating,
            total_attachments,
        }
    }
}
