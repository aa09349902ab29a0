//! # csi-grouper
//!
//! Resolves a `(namespace, pvcName)` pair to the virtual machine
//! instance (VMI) key currently mounting it — the VM key is the unit
//! the controller's per-VM lock is
//! taken on, so that all of one VM's volumes serialize through a
//! single ordering.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use csi_attach::KeyedLockRegistry;
use csi_core::VmKey;

/// The default cache TTL, positive and negative results alike.
pub const DEFAULT_CACHE_TTL: ChronoDuration = ChronoDuration::seconds(60);

/// A `(namespace, pvcName)` pair identifying a volume claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PvcRef {
    /// The claim's namespace.
    pub namespace: String,
    /// The claim's name.
    pub pvc_name: String,
}

impl PvcRef {
    /// Builds a reference from its parts.
    #[must_use]
    pub fn new(namespace: impl Into<String>, pvc_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pvc_name: pvc_name.into(),
        }
    }
}

/// The orchestrator lookup the grouper caches the result of: find a pod
/// mounting the claim that carries a VMI owner reference or label, and
/// return its VM key. An external collaborator in production (a
/// Kubernetes API client); this trait is the seam.
#[async_trait]
pub trait VmiLookup: Send + Sync {
    /// Resolves the PVC reference to a VM key, or `None` if no VMI pod
    /// currently mounts it.
    async fn resolve(&self, pvc: &PvcRef) -> Option<VmKey>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Option<VmKey>,
    expires_at: DateTime<Utc>,
}

/// Resolves PVCs to VM keys, with a TTL cache over both positive and
/// negative results, and a no-op mode for deployments that don't group
/// by VM at all.
pub enum VmiGrouper {
    /// Grouping is active.
    Enabled {
        /// The underlying orchestrator lookup.
        lookup: Arc<dyn VmiLookup>,
        /// The positive/negative result cache.
        cache: RwLock<HashMap<PvcRef, CacheEntry>>,
        /// How long a cached result (positive or negative) stays valid.
        ttl: ChronoDuration,
        /// The per-VM lock registry.
        locks: Arc<KeyedLockRegistry<VmKey>>,
    },
    /// Grouping is disabled: every PVC resolves to no VM key, and
    /// locking is a no-op.
    Disabled,
}

impl VmiGrouper {
    /// Builds an enabled grouper with the default TTL.
    #[must_use]
    pub fn enabled(lookup: Arc<dyn VmiLookup>) -> Self {
        Self::enabled_with_ttl(lookup, DEFAULT_CACHE_TTL)
    }

    /// Builds an enabled grouper with an explicit TTL.
    #[must_use]
    pub fn enabled_with_ttl(lookup: Arc<dyn VmiLookup>, ttl: ChronoDuration) -> Self {
        Self::Enabled {
            lookup,
            cache: RwLock::new(HashMap::new()),
            ttl,
            locks: Arc::new(KeyedLockRegistry::new()),
        }
    }

    /// Builds a disabled grouper.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::Disabled
    }

    /// Resolves a PVC to its VM key, consulting (and populating) the
    /// cache. Always returns `None` for a disabled grouper.
    pub async fn resolve(&self, pvc: &PvcRef, now: DateTime<Utc>) -> Option<VmKey> {
        let (lookup, cache, ttl) = match self {
            Self::Disabled => return None,
            Self::Enabled { lookup, cache, ttl, .. } => (lookup, cache, *ttl),
        };

        if let Some(entry) = cache.read().get(pvc) {
            if entry.expires_at > now {
                debug!(namespace = %pvc.namespace, pvc = %pvc.pvc_name, "vmi cache hit");
                return entry.value.clone();
            }
        }

        let resolved = lookup.resolve(pvc).await;
        cache.write().insert(
            pvc.clone(),
            CacheEntry {
                value: resolved.clone(),
                expires_at: now + ttl,
            },
        );
        resolved
    }

    /// Invalidates any cached result for a PVC, forcing the next
    /// [`Self::resolve`] call to consult the orchestrator again.
    pub fn invalidate(&self, pvc: &PvcRef) {
        if let Self::Enabled { cache, .. } = self {
            cache.write().remove(pvc);
        }
    }

    /// Acquires the per-VM lock for a resolved key. Returns the key
    /// (unchanged) and a guard; for `None` (a PVC with no owning VM, or
    /// a disabled grouper) the guard is `None` and dropping it is a
    /// no-op when the key is empty, since resolve never hands out one.
    pub async fn lock_vmi(&self, key: Option<VmKey>) -> (Option<VmKey>, Option<OwnedMutexGuard<()>>) {
        let Some(key) = key else {
            return (None, None);
        };
        let guard = match self {
            Self::Disabled => None,
            Self::Enabled { locks, .. } => Some(locks.lock(&key).await),
        };
        (Some(key), guard)
    }
}
