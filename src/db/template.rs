//! Template engine: structural copies without contributors or pointers.

use rusqlite::Connection;
use uuid::Uuid;

use super::permissions::{can_view, insert_contributor, require, require_user};
use super::{active_children_of, fetch_live_node, insert_node, Database, NewNode, MAX_TREE_DEPTH};
use crate::error::{NodeError, NodeResult};
use crate::models::*;

impl Database {
    /// Create a new top-level node shaped like `id`.
    ///
    /// Only structure is copied: every node keeps its source title and
    /// category, and no description is carried over. `changes` apply to the
    /// new root only. Components the actor
    /// cannot view are left out. The actor is the sole admin of every created
    /// node, and no pointers are copied.
    pub fn use_as_template(
        &self,
        id: Uuid,
        auth: &Auth,
        changes: TemplateChanges,
    ) -> NodeResult<Node> {
        let user = require_user(auth)?;

        let created = self.write(|tx| {
            let source = fetch_live_node(tx, id)?;
            require(tx, auth, &source, Permission::Read)?;

            let mut root = templated_from(&source, user);
            if let Some(title) = &changes.title {
                root.title = validate_title(title).map_err(NodeError::Validation)?;
            }
            if let Some(category) = changes.category {
                root.category = category;
            }
            if let Some(description) = changes.description {
                root.description = Some(description);
            }

            let root = insert_node(tx, root)?;
            insert_contributor(tx, root.id, user, Permission::Admin, true)?;

            let mut created = vec![root.clone()];
            template_components(tx, auth, user, &source, root.id, 1, &mut created)?;
            Ok(created)
        })?;

        let root = created[0].clone();
        tracing::info!(
            "Created {} from template {} ({} node(s))",
            root.id,
            id,
            created.len()
        );
        self.notify_created(&created);
        Ok(root)
    }
}

fn templated_from(source: &Node, user: Uuid) -> NewNode {
    let mut new = NewNode::copy_of(source, user);
    new.description = None;
    new.template_node = Some(source.id);
    new
}

fn template_components(
    conn: &Connection,
    auth: &Auth,
    user: Uuid,
    source: &Node,
    new_parent: Uuid,
    depth: usize,
    created: &mut Vec<Node>,
) -> NodeResult<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(NodeError::state(format!(
            "Subtree of node {} is too deep to template",
            source.id
        )));
    }

    for child in active_children_of(conn, source.id)? {
        if !can_view(conn, auth, &child)? {
            continue;
        }

        let mut new = templated_from(&child, user);
        new.parent_id = Some(new_parent);
        let templated = insert_node(conn, new)?;
        insert_contributor(conn, templated.id, user, Permission::Admin, true)?;

        let templated_id = templated.id;
        created.push(templated);
        template_components(conn, auth, user, &child, templated_id, depth + 1, created)?;
    }

    Ok(())
}
