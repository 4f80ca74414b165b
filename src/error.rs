//! Error taxonomy for node operations.
//!
//! Every operation returns a [`NodeError`] on failure. Permission checks run
//! before any state is touched, so a `PermissionDenied` never leaves partial
//! writes behind.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum NodeError {
    /// The actor lacks the capability the operation needs.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed input such as a blank or overlong title.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The operation is incompatible with the node's lifecycle state.
    #[error("Invalid node state: {0}")]
    NodeState(String),

    /// An attribute could not be changed through `update_fields`.
    #[error("Failed to update attribute '{key}': {reason}")]
    NodeUpdate { key: String, reason: String },

    /// A reorder request is not a permutation of the active children.
    #[error("Invalid child order: {0}")]
    InvalidOrder(String),

    /// A pointer request would break a pointer graph invariant.
    #[error("Invalid pointer: {0}")]
    InvalidPointer(String),

    /// Forking is switched off system-wide to conserve storage.
    #[error("Forking is disabled while disk saving mode is active")]
    DiskSavingMode,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Another writer changed the node between our read and our write.
    #[error("Node {0} was modified concurrently")]
    Conflict(Uuid),

    #[error("Database operation failed: {0}")]
    Database(#[from] rusqlite::Error),
}

impl NodeError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::NodeState(msg.into())
    }

    pub fn update(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NodeUpdate {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether an outer layer should report this as a malformed request rather
    /// than an authorization, lookup or server fault.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NodeState(_)
                | Self::NodeUpdate { .. }
                | Self::InvalidOrder(_)
                | Self::InvalidPointer(_)
        )
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
