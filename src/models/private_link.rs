use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A view-only capability over a set of nodes.
///
/// Anyone presenting `key` may read every node in `node_ids` without holding
/// a contributor entry. The first entry of `node_ids` is the link's root: only
/// an admin of that node may rename or remove the link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrivateLink {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    /// Hide contributor identities from link holders.
    pub anonymous: bool,
    pub node_ids: Vec<Uuid>,
    pub creator_id: Uuid,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl PrivateLink {
    pub fn root_id(&self) -> Option<Uuid> {
        self.node_ids.first().copied()
    }
}

/// Input for creating a private link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrivateLinkInput {
    pub name: String,
    /// Extra nodes the link should cover besides the root.
    #[serde(default)]
    pub node_ids: Vec<Uuid>,
    #[serde(default)]
    pub anonymous: bool,
}
