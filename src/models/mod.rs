//! Domain models for node-forest.
//!
//! # Core Concepts
//!
//! - [`Node`]: a project or component. Nodes form a forest through `parent_id`;
//!   sibling order is user-controlled and stored on the child.
//! - [`Pointer`]: a non-owning edge from a host node to a target node, forming a
//!   second graph that never overlaps the tree (no pointer to an ancestor or
//!   descendant).
//! - [`Contributor`]: an explicit [`Permission`] grant on a node. Admin rights
//!   cascade down the tree; lower rights do not.
//! - [`PrivateLink`]: a capability token granting read access to a set of nodes.
//!
//! Every operation is performed on behalf of an [`Auth`].

mod node;
mod permission;
mod pointer;
mod private_link;

pub use node::*;
pub use permission::*;
pub use pointer::*;
pub use private_link::*;
