//! Domain metadata consumed by the coordinator.

use std::sync::Arc;

use uuid::Uuid;
use windlass_core::StoreResult;

/// Whether a domain replicates its workflows to other clusters.
///
/// `OneCluster` domains skip replication-task generation entirely even when
/// they are registered as global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationPolicy {
    OneCluster,
    MultiCluster,
}

/// Cached metadata of one domain.
#[derive(Debug, Clone)]
pub struct DomainEntry {
    pub id: Uuid,
    pub name: String,
    /// Whether the domain is registered across clusters. Local domains skip
    /// the replication hook on load.
    pub is_global: bool,
    /// Version stamped onto events generated while this cluster is active
    /// for the domain.
    pub failover_version: i64,
    pub replication_policy: ReplicationPolicy,
}

/// Read side of the domain metadata cache.
///
/// Lookups are served from memory; the cache refreshes itself from the
/// metadata store out of band. Shared and safe for concurrent use.
pub trait DomainCache: Send + Sync {
    fn domain_by_id(&self, domain_id: Uuid) -> StoreResult<Arc<DomainEntry>>;
}
