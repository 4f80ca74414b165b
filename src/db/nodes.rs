//! Node tree manager: creation, child ordering, soft deletion and field edits.

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use rusqlite::Connection;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::permissions::{can_view, insert_contributor, require, require_user};
use super::{
    active_children_of, ancestors_of, descendant_ids, ensure_not_registration, fetch_live_node,
    fetch_node, insert_node, query_nodes, stored_children, touch_node, Database, NewNode,
};
use crate::error::{NodeError, NodeResult};
use crate::models::*;

/// Fields `update_fields` may change. Permissions, tree links and audit
/// columns have dedicated operations.
pub const WRITABLE_FIELDS: &[&str] = &["title", "description", "category"];

impl Database {
    /// Load a node by key. Soft-deleted nodes are still returned.
    pub fn get_node(&self, id: Uuid) -> NodeResult<Node> {
        self.read(|conn| fetch_node(conn, id))
    }

    pub fn create_node(&self, input: CreateNodeInput, auth: &Auth) -> NodeResult<Node> {
        let user = require_user(auth)?;

        let node = self.write(|tx| {
            if let Some(parent_id) = input.parent_id {
                let parent = fetch_live_node(tx, parent_id)?;
                require(tx, auth, &parent, Permission::Write)?;
                ensure_not_registration(&parent, "add components to")?;
                touch_node(tx, &parent)?;
            }

            let title = validate_title(&input.title).map_err(NodeError::Validation)?;

            let mut new = NewNode::new(title, input.category, user);
            new.parent_id = input.parent_id;
            new.description = input.description;
            new.is_collection = input.is_collection;

            let node = insert_node(tx, new)?;
            insert_contributor(tx, node.id, user, Permission::Admin, true)?;
            Ok(node)
        })?;

        tracing::info!("Created {} {} ({})", node.kind(), node.id, node.title);
        self.notify_created(std::slice::from_ref(&node));
        Ok(node)
    }

    /// Non-deleted children in user-controlled order.
    pub fn active_children(&self, id: Uuid) -> NodeResult<Vec<Node>> {
        self.read(|conn| {
            fetch_node(conn, id)?;
            active_children_of(conn, id)
        })
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self, id: Uuid) -> NodeResult<Vec<Node>> {
        self.read(|conn| {
            let node = fetch_node(conn, id)?;
            ancestors_of(conn, &node)
        })
    }

    /// Active top-level projects the user is an explicit contributor on.
    pub fn projects_for_user(&self, user_id: Uuid) -> NodeResult<Vec<Node>> {
        self.read(|conn| {
            query_nodes(
                conn,
                "parent_id IS NULL AND is_deleted = 0
                 AND id IN (SELECT node_id FROM contributors WHERE user_id = ?)
                 ORDER BY created_at",
                [user_id.to_string()],
            )
        })
    }

    /// The node and its active descendants that `auth` can see, nested.
    pub fn node_tree(&self, id: Uuid, auth: &Auth) -> NodeResult<NodeTree> {
        self.read(|conn| {
            let node = fetch_live_node(conn, id)?;
            require(conn, auth, &node, Permission::Read)?;
            build_tree(conn, auth, node)
        })
    }

    /// Replace the order of a node's active children.
    ///
    /// `new_order` must be exactly a permutation of the active children.
    /// Deleted children keep their relative order after the active ones.
    pub fn reorder_children(
        &self,
        id: Uuid,
        new_order: &[Uuid],
        auth: &Auth,
    ) -> NodeResult<Vec<Node>> {
        self.write(|tx| {
            let node = fetch_live_node(tx, id)?;
            require(tx, auth, &node, Permission::Write)?;
            ensure_not_registration(&node, "reorder components of")?;

            let (active, deleted): (Vec<Node>, Vec<Node>) = stored_children(tx, id)?
                .into_iter()
                .partition(|child| !child.is_deleted);

            let active_ids: HashSet<Uuid> = active.iter().map(|child| child.id).collect();
            let requested: HashSet<Uuid> = new_order.iter().copied().collect();

            if new_order.len() != active.len() || requested != active_ids {
                tracing::warn!("Got invalid component list when reordering node {}", id);
                return Err(NodeError::InvalidOrder(format!(
                    "Expected a permutation of the {} active components of node {}",
                    active.len(),
                    id
                )));
            }

            let stored_order = new_order.iter().chain(deleted.iter().map(|child| &child.id));
            for (position, child_id) in stored_order.enumerate() {
                tx.execute(
                    "UPDATE nodes SET position = ? WHERE id = ?",
                    (position as i64, child_id.to_string()),
                )?;
            }
            touch_node(tx, &node)?;

            active_children_of(tx, id)
        })
    }

    /// Soft-delete a node and, first, all of its active descendants.
    ///
    /// Returns the nearest ancestor the actor can still view, for redirection.
    pub fn soft_delete(&self, id: Uuid, auth: &Auth) -> NodeResult<Option<Node>> {
        let (redirect, deleted) = self.write(|tx| {
            let node = fetch_live_node(tx, id)?;
            require(tx, auth, &node, Permission::Admin)?;
            ensure_not_registration(&node, "delete")?;

            for descendant_id in descendant_ids(tx, id)? {
                let descendant = fetch_node(tx, descendant_id)?;
                if !descendant.is_deleted && descendant.is_registration() {
                    return Err(NodeError::state(format!(
                        "Could not delete {}: component {} is a registration",
                        node.kind(),
                        descendant.id
                    )));
                }
            }

            let mut deleted = Vec::new();
            delete_subtree(tx, &node, &mut deleted)?;

            let mut redirect = None;
            for ancestor in ancestors_of(tx, &node)? {
                if !ancestor.is_deleted && can_view(tx, auth, &ancestor)? {
                    redirect = Some(ancestor);
                    break;
                }
            }
            Ok((redirect, deleted))
        })?;

        tracing::info!("Deleted node {} and {} descendant(s)", id, deleted.len() - 1);
        Ok(redirect)
    }

    /// Edit whitelisted fields. Returns the names of fields whose value changed.
    pub fn update_fields(
        &self,
        id: Uuid,
        changes: &Map<String, Value>,
        auth: &Auth,
    ) -> NodeResult<BTreeSet<String>> {
        self.write(|tx| {
            let node = fetch_live_node(tx, id)?;
            require(tx, auth, &node, Permission::Write)?;
            ensure_not_registration(&node, "edit")?;

            let mut updated = node.clone();
            let mut changed = BTreeSet::new();

            for (key, value) in changes {
                match key.as_str() {
                    "title" => {
                        let raw = value
                            .as_str()
                            .ok_or_else(|| NodeError::update(key, "Title must be a string"))?;
                        let title = validate_title(raw).map_err(NodeError::Validation)?;
                        if title != updated.title {
                            updated.title = title;
                            changed.insert(key.clone());
                        }
                    }
                    "description" => {
                        let description = match value {
                            Value::Null => None,
                            Value::String(s) if s.trim().is_empty() => None,
                            Value::String(s) => Some(s.trim().to_string()),
                            _ => {
                                return Err(NodeError::update(
                                    key,
                                    "Description must be a string",
                                ))
                            }
                        };
                        if description != updated.description {
                            updated.description = description;
                            changed.insert(key.clone());
                        }
                    }
                    "category" => {
                        let category = value
                            .as_str()
                            .and_then(NodeCategory::from_str)
                            .ok_or_else(|| NodeError::update(key, "Unknown category"))?;
                        if category != updated.category {
                            updated.category = category;
                            changed.insert(key.clone());
                        }
                    }
                    other => {
                        return Err(NodeError::update(
                            other,
                            format!(
                                "Attribute is not editable; editable attributes are {}",
                                WRITABLE_FIELDS.join(", ")
                            ),
                        ))
                    }
                }
            }

            if changed.is_empty() {
                return Ok(changed);
            }

            let rows = tx.execute(
                "UPDATE nodes SET title = ?, description = ?, category = ?,
                     version = version + 1, updated_at = ?
                 WHERE id = ? AND version = ?",
                (
                    &updated.title,
                    &updated.description,
                    updated.category.as_str(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    node.version,
                ),
            )?;
            if rows == 0 {
                return Err(NodeError::Conflict(id));
            }

            tracing::info!(
                "Updated node {}: {}",
                id,
                changed.iter().cloned().collect::<Vec<_>>().join(", ")
            );
            Ok(changed)
        })
    }
}

fn build_tree(conn: &Connection, auth: &Auth, node: Node) -> NodeResult<NodeTree> {
    let mut children = Vec::new();
    for child in active_children_of(conn, node.id)? {
        if can_view(conn, auth, &child)? {
            children.push(build_tree(conn, auth, child)?);
        }
    }
    Ok(NodeTree { node, children })
}

/// Post-order: children are marked deleted before their parent.
fn delete_subtree(conn: &Connection, node: &Node, deleted: &mut Vec<Uuid>) -> NodeResult<()> {
    for child in active_children_of(conn, node.id)? {
        delete_subtree(conn, &child, deleted)?;
    }

    let now = Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE nodes SET is_deleted = 1, deleted_at = ?, updated_at = ?, version = version + 1
         WHERE id = ? AND version = ? AND is_deleted = 0",
        (&now, &now, node.id.to_string(), node.version),
    )?;
    if rows == 0 {
        return Err(NodeError::Conflict(node.id));
    }

    deleted.push(node.id);
    Ok(())
}
