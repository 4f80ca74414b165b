//! Outward callbacks for collaborators (add-ons, notifications).
//!
//! Hooks only return advisory text or observe committed nodes. Nothing they
//! return can change the outcome of a core operation.

use uuid::Uuid;

use crate::models::Node;

pub trait NodeHooks: Send + Sync {
    /// Extra confirmation prompts to show before `user` forks `node`.
    fn before_fork(&self, _node: &Node, _user: Option<Uuid>) -> Vec<String> {
        Vec::new()
    }

    /// Extra confirmation prompts to show before `node` is made public.
    fn before_make_public(&self, _node: &Node) -> Vec<String> {
        Vec::new()
    }

    /// Called once per node after the transaction that created it commits.
    fn node_created(&self, _node: &Node) {}
}

/// Hooks that do nothing.
pub struct NoHooks;

impl NodeHooks for NoHooks {}
