//! Registrations: frozen, immutable snapshots of a subtree.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use super::permissions::{contributors_of, explicit_permission, insert_contributor, require, require_user};
use super::pointers::{active_pointers_from, insert_pointer};
use super::{
    active_children_of, descendant_ids, ensure_not_registration, fetch_live_node, fetch_node,
    insert_node, query_nodes, Database, NewNode, MAX_TREE_DEPTH,
};
use crate::error::{NodeError, NodeResult};
use crate::models::*;

impl Database {
    /// Freeze `id` and its active components into a new registration.
    ///
    /// The registration starts private and `archiving`. Contributors are
    /// copied from each source node; pointers between registered nodes are
    /// re-targeted at the registered copies, other pointers keep their target.
    pub fn register_node(&self, id: Uuid, auth: &Auth) -> NodeResult<Node> {
        let user = require_user(auth)?;

        let created = self.write(|tx| {
            let source = fetch_live_node(tx, id)?;
            require(tx, auth, &source, Permission::Admin)?;
            ensure_not_registration(&source, "register")?;

            let mut snapshot = Snapshot::default();
            let root = register_one(tx, &source, None, &mut snapshot)?;
            if explicit_permission(tx, root.id, user)?.is_none() {
                insert_contributor(tx, root.id, user, Permission::Admin, false)?;
            }
            register_components(tx, &source, root.id, 1, &mut snapshot)?;

            for (source_id, registered_id) in &snapshot.order {
                for pointer in active_pointers_from(tx, *source_id)? {
                    let target = snapshot
                        .mapping
                        .get(&pointer.target_id)
                        .copied()
                        .unwrap_or(pointer.target_id);
                    insert_pointer(tx, *registered_id, target)?;
                }
            }

            Ok(snapshot.created)
        })?;

        let root = created[0].clone();
        tracing::info!("Registered node {} as {}", id, root.id);
        self.notify_created(&created);
        Ok(root)
    }

    /// Advance a registration: `archiving → complete` or `complete → retracted`.
    ///
    /// The new state applies to the registration and all its components.
    pub fn set_registration_state(
        &self,
        id: Uuid,
        state: RegistrationState,
        auth: &Auth,
    ) -> NodeResult<Node> {
        let node = self.write(|tx| {
            let node = fetch_live_node(tx, id)?;
            require(tx, auth, &node, Permission::Admin)?;

            let current = node.registration_state.ok_or_else(|| {
                NodeError::state(format!("Node {} is not a registration", id))
            })?;

            let allowed = matches!(
                (current, state),
                (RegistrationState::Archiving, RegistrationState::Complete)
                    | (RegistrationState::Complete, RegistrationState::Retracted)
            );
            if !allowed {
                return Err(NodeError::state(format!(
                    "Cannot move a registration from {} to {}",
                    current.as_str(),
                    state.as_str()
                )));
            }

            let now = Utc::now().to_rfc3339();
            let mut members = vec![id];
            members.extend(descendant_ids(tx, id)?);
            for member in members {
                tx.execute(
                    "UPDATE nodes SET registration_state = ?, version = version + 1, updated_at = ?
                     WHERE id = ?",
                    (state.as_str(), &now, member.to_string()),
                )?;
            }

            fetch_node(tx, id)
        })?;

        tracing::info!("Registration {} is now {}", id, state.as_str());
        Ok(node)
    }

    /// Active registrations made from `id`, oldest first.
    pub fn registrations_of(&self, id: Uuid) -> NodeResult<Vec<Node>> {
        self.read(|conn| {
            query_nodes(
                conn,
                "registered_from = ? AND registration_state IS NOT NULL AND is_deleted = 0
                 ORDER BY created_at",
                [id.to_string()],
            )
        })
    }
}

#[derive(Default)]
struct Snapshot {
    mapping: HashMap<Uuid, Uuid>,
    order: Vec<(Uuid, Uuid)>,
    created: Vec<Node>,
}

fn register_one(
    conn: &Connection,
    source: &Node,
    parent_id: Option<Uuid>,
    snapshot: &mut Snapshot,
) -> NodeResult<Node> {
    let mut new = NewNode::copy_of(source, source.creator_id);
    new.parent_id = parent_id;
    new.registered_from = Some(source.id);
    new.registration_state = Some(RegistrationState::Archiving);
    let registered = insert_node(conn, new)?;

    for contributor in contributors_of(conn, source.id)? {
        insert_contributor(
            conn,
            registered.id,
            contributor.user_id,
            contributor.permission,
            contributor.visible,
        )?;
    }

    snapshot.mapping.insert(source.id, registered.id);
    snapshot.order.push((source.id, registered.id));
    snapshot.created.push(registered.clone());
    Ok(registered)
}

fn register_components(
    conn: &Connection,
    source: &Node,
    registered_parent: Uuid,
    depth: usize,
    snapshot: &mut Snapshot,
) -> NodeResult<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(NodeError::state(format!(
            "Subtree of node {} is too deep to register",
            source.id
        )));
    }

    for child in active_children_of(conn, source.id)? {
        let registered = register_one(conn, &child, Some(registered_parent), snapshot)?;
        register_components(conn, &child, registered.id, depth + 1, snapshot)?;
    }
    Ok(())
}
