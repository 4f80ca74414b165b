use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A non-owning reference from a host node to a target node.
///
/// Pointers form a second graph over the same nodes, separate from the
/// parent/child tree. They are stored as their own records so that adding or
/// removing one never rewrites the host node. Removal is a soft delete.
///
/// At most one active pointer exists per `(host_id, target_id)` pair, a node
/// never points at itself, and the target is never an ancestor or descendant
/// of the host in the tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pointer {
    pub id: Uuid,
    pub host_id: Uuid,
    pub target_id: Uuid,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
