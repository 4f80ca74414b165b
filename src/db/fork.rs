//! Fork engine: deep copies of a subtree owned by the forking user.
//!
//! Forking runs in two passes inside the caller's transaction. The first
//! clones every active component the forker can view and records an
//! old id → new id mapping. The second replays the source pointers hosted
//! inside the subtree, re-targeting those whose target was cloned and
//! dropping the rest.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use uuid::Uuid;

use super::permissions::{can_view, insert_contributor, require, require_user};
use super::pointers::{active_pointers_from, insert_pointer};
use super::{
    active_children_of, fetch_live_node, insert_node, query_nodes, Database, NewNode,
    MAX_TREE_DEPTH,
};
use crate::config::Settings;
use crate::error::{NodeError, NodeResult};
use crate::models::*;

impl Database {
    /// Fork `id` and its visible active components for the acting user.
    ///
    /// The fork is private, marked `is_fork`, and lists the forker as its only
    /// contributor. Nothing is written if any step fails.
    pub fn fork_node(&self, id: Uuid, auth: &Auth, settings: &Settings) -> NodeResult<Node> {
        if settings.disk_saving_mode {
            return Err(NodeError::DiskSavingMode);
        }
        let user = require_user(auth)?;

        let created = self.write(|tx| {
            let source = fetch_live_node(tx, id)?;
            fork_subtree(tx, auth, user, &source)
        })?;

        let root = created[0].clone();
        tracing::info!(
            "Forked node {} into {} ({} node(s) created)",
            id,
            root.id,
            created.len()
        );
        self.notify_created(&created);
        Ok(root)
    }

    /// Active nodes forked directly from `id`.
    pub fn forks_of(&self, id: Uuid) -> NodeResult<Vec<Node>> {
        self.read(|conn| {
            query_nodes(
                conn,
                "forked_from = ? AND is_fork = 1 AND is_deleted = 0 ORDER BY created_at",
                [id.to_string()],
            )
        })
    }

    /// Advisory prompts to confirm before forking. Requires read access.
    pub fn before_fork(&self, id: Uuid, auth: &Auth) -> NodeResult<Vec<String>> {
        let (node, hidden, outbound) = self.read(|conn| {
            let node = fetch_live_node(conn, id)?;
            require(conn, auth, &node, Permission::Read)?;

            let mut subtree = HashSet::from([node.id]);
            let mut hidden = 0;
            let mut frontier = vec![node.id];
            while let Some(current) = frontier.pop() {
                for child in active_children_of(conn, current)? {
                    if can_view(conn, auth, &child)? {
                        subtree.insert(child.id);
                        frontier.push(child.id);
                    } else {
                        hidden += 1;
                    }
                }
            }

            let mut outbound = 0;
            for host in &subtree {
                outbound += active_pointers_from(conn, *host)?
                    .iter()
                    .filter(|pointer| !subtree.contains(&pointer.target_id))
                    .count();
            }

            Ok((node, hidden, outbound))
        })?;

        let mut prompts = Vec::new();
        if hidden > 0 {
            prompts.push(format!(
                "{} component(s) you cannot view will not be included in the fork.",
                hidden
            ));
        }
        if outbound > 0 {
            prompts.push(format!(
                "{} link(s) to content outside this {} will not be copied into the fork.",
                outbound,
                node.kind()
            ));
        }
        prompts.extend(self.hooks.before_fork(&node, auth.user));
        Ok(prompts)
    }
}

/// Fork `source` and its visible active descendants. The fork root comes first.
pub(super) fn fork_subtree(
    conn: &Connection,
    auth: &Auth,
    user: Uuid,
    source: &Node,
) -> NodeResult<Vec<Node>> {
    require(conn, auth, source, Permission::Read)?;

    let mut clones = Clones::default();

    let mut root = NewNode::copy_of(source, user);
    root.title = fork_title(&source.title);
    root.is_fork = true;
    root.forked_from = Some(source.id);
    let root = insert_node(conn, root)?;
    insert_contributor(conn, root.id, user, Permission::Admin, true)?;
    clones.record(source.id, root.clone());

    clone_components(conn, auth, user, source, root.id, 1, &mut clones)?;
    remap_pointers(conn, &clones)?;

    Ok(clones.created)
}

#[derive(Default)]
struct Clones {
    /// Source id → fork id.
    mapping: HashMap<Uuid, Uuid>,
    /// (source id, fork id) in creation order.
    order: Vec<(Uuid, Uuid)>,
    created: Vec<Node>,
}

impl Clones {
    fn record(&mut self, source_id: Uuid, fork: Node) {
        self.mapping.insert(source_id, fork.id);
        self.order.push((source_id, fork.id));
        self.created.push(fork);
    }
}

fn clone_components(
    conn: &Connection,
    auth: &Auth,
    user: Uuid,
    source: &Node,
    fork_parent: Uuid,
    depth: usize,
    clones: &mut Clones,
) -> NodeResult<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(NodeError::state(format!(
            "Subtree of node {} is too deep to fork",
            source.id
        )));
    }

    for child in active_children_of(conn, source.id)? {
        if !can_view(conn, auth, &child)? {
            tracing::debug!("Skipping component {} the forker cannot view", child.id);
            continue;
        }

        let mut new = NewNode::copy_of(&child, user);
        new.parent_id = Some(fork_parent);
        new.is_fork = true;
        new.forked_from = Some(child.id);
        let forked = insert_node(conn, new)?;
        insert_contributor(conn, forked.id, user, Permission::Admin, true)?;
        tracing::debug!("Forked component {} as {}", child.id, forked.id);

        let forked_id = forked.id;
        clones.record(child.id, forked);
        clone_components(conn, auth, user, &child, forked_id, depth + 1, clones)?;
    }

    Ok(())
}

/// Recreate pointers whose host and target were both cloned; drop the rest.
fn remap_pointers(conn: &Connection, clones: &Clones) -> NodeResult<()> {
    let mut dropped = 0;

    for (source_id, fork_id) in &clones.order {
        for pointer in active_pointers_from(conn, *source_id)? {
            match clones.mapping.get(&pointer.target_id) {
                Some(&target) => {
                    insert_pointer(conn, *fork_id, target)?;
                }
                None => dropped += 1,
            }
        }
    }

    if dropped > 0 {
        tracing::debug!("Dropped {} pointer(s) leaving the forked subtree", dropped);
    }
    Ok(())
}

fn fork_title(title: &str) -> String {
    format!("Fork of {}", title)
        .chars()
        .take(MAX_TITLE_LENGTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_title_prefixes_source_title() {
        assert_eq!(fork_title("Survey"), "Fork of Survey");
    }

    #[test]
    fn fork_title_stays_within_bound() {
        let long = "x".repeat(MAX_TITLE_LENGTH);
        assert_eq!(fork_title(&long).chars().count(), MAX_TITLE_LENGTH);
    }
}
