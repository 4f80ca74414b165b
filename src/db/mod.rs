//! SQLite-backed node store.
//!
//! [`Database`] is a cheap, cloneable handle. Every public operation either
//! runs a read against the connection or wraps its reads and writes in one
//! immediate transaction, so a failing precondition never leaves a partial
//! write behind. The per-component operations live in the submodules, each
//! adding an `impl Database` block.

mod fork;
mod nodes;
mod permissions;
mod pointers;
mod privacy;
mod private_links;
mod registrations;
mod schema;
mod template;

pub use nodes::WRITABLE_FIELDS;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{NodeError, NodeResult};
use crate::hooks::{NoHooks, NodeHooks};
use crate::models::*;

/// Upper bound on parent-chain length. Deeper chains are treated as corrupt.
pub const MAX_TREE_DEPTH: usize = 256;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
    hooks: Arc<dyn NodeHooks>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "node-forest")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("node-forest.db");
        Self::open(db_path)
    }

    /// Open the database named by `settings`, falling back to the platform data directory.
    pub fn open_with_settings(settings: &Settings) -> Result<Self> {
        match &settings.database_path {
            Some(path) => Self::open(path.clone()),
            None => Self::open_default(),
        }
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            hooks: Arc::new(NoHooks),
        }
    }

    /// Install collaborator hooks. Replaces any previously installed hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn NodeHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn).context("Failed to apply schema migrations")
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> NodeResult<T>) -> NodeResult<T> {
        let conn = self.conn.lock().expect("database lock poisoned");
        f(&conn)
    }

    /// Run `f` inside an immediate transaction. Any error rolls everything back.
    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> NodeResult<T>) -> NodeResult<T> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn notify_created(&self, nodes: &[Node]) {
        for node in nodes {
            self.hooks.node_created(node);
        }
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            hooks: self.hooks.clone(),
        }
    }
}

// ============================================================
// Row mapping
// ============================================================

const NODE_COLUMNS: &str = "id, parent_id, position, title, category, description, is_public, \
     is_deleted, is_fork, is_collection, forked_from, template_node, registered_from, \
     registration_state, creator_id, version, created_at, updated_at, deleted_at";

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: parse_uuid(row.get::<_, String>(0)?),
        parent_id: row.get::<_, Option<String>>(1)?.map(parse_uuid),
        position: row.get(2)?,
        title: row.get(3)?,
        category: NodeCategory::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(NodeCategory::Other),
        description: row.get(5)?,
        is_public: row.get::<_, i32>(6)? != 0,
        is_deleted: row.get::<_, i32>(7)? != 0,
        is_fork: row.get::<_, i32>(8)? != 0,
        is_collection: row.get::<_, i32>(9)? != 0,
        forked_from: row.get::<_, Option<String>>(10)?.map(parse_uuid),
        template_node: row.get::<_, Option<String>>(11)?.map(parse_uuid),
        registered_from: row.get::<_, Option<String>>(12)?.map(parse_uuid),
        registration_state: row
            .get::<_, Option<String>>(13)?
            .as_deref()
            .and_then(RegistrationState::from_str),
        creator_id: parse_uuid(row.get::<_, String>(14)?),
        version: row.get(15)?,
        created_at: parse_datetime(row.get::<_, String>(16)?),
        updated_at: parse_datetime(row.get::<_, String>(17)?),
        deleted_at: row.get::<_, Option<String>>(18)?.map(parse_datetime),
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn flag(value: bool) -> i32 {
    if value {
        1
    } else {
        0
    }
}

// ============================================================
// Shared node queries
// ============================================================

fn load_node(conn: &Connection, id: Uuid) -> NodeResult<Option<Node>> {
    let sql = format!("SELECT {} FROM nodes WHERE id = ?", NODE_COLUMNS);
    let node = conn
        .query_row(&sql, [id.to_string()], node_from_row)
        .optional()?;
    Ok(node)
}

/// Load a node by key, deleted or not.
fn fetch_node(conn: &Connection, id: Uuid) -> NodeResult<Node> {
    load_node(conn, id)?.ok_or_else(|| NodeError::not_found("Node", id))
}

/// Load a node that has not been soft-deleted.
fn fetch_live_node(conn: &Connection, id: Uuid) -> NodeResult<Node> {
    match load_node(conn, id)? {
        Some(node) if !node.is_deleted => Ok(node),
        _ => Err(NodeError::not_found("Node", id)),
    }
}

fn query_nodes(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> NodeResult<Vec<Node>> {
    let sql = format!("SELECT {} FROM nodes WHERE {}", NODE_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    let nodes = stmt
        .query_map(params, node_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

/// Children in stored order, including deleted ones.
fn stored_children(conn: &Connection, parent_id: Uuid) -> NodeResult<Vec<Node>> {
    query_nodes(
        conn,
        "parent_id = ? ORDER BY position, created_at",
        [parent_id.to_string()],
    )
}

fn active_children_of(conn: &Connection, parent_id: Uuid) -> NodeResult<Vec<Node>> {
    query_nodes(
        conn,
        "parent_id = ? AND is_deleted = 0 ORDER BY position, created_at",
        [parent_id.to_string()],
    )
}

/// Strict ancestors of `node`, nearest first.
///
/// Walks `parent_id` links upward and rejects chains that revisit a node or
/// exceed [`MAX_TREE_DEPTH`].
fn ancestors_of(conn: &Connection, node: &Node) -> NodeResult<Vec<Node>> {
    let mut seen = HashSet::from([node.id]);
    let mut ancestors = Vec::new();
    let mut next = node.parent_id;

    while let Some(parent_id) = next {
        if !seen.insert(parent_id) || ancestors.len() >= MAX_TREE_DEPTH {
            return Err(NodeError::state(format!(
                "Parent chain of node {} is cyclic or too deep",
                node.id
            )));
        }
        let parent = fetch_node(conn, parent_id)?;
        next = parent.parent_id;
        ancestors.push(parent);
    }

    Ok(ancestors)
}

/// Ids of every descendant of `node_id`, deleted ones included.
fn descendant_ids(conn: &Connection, node_id: Uuid) -> NodeResult<HashSet<Uuid>> {
    let mut found = HashSet::new();
    let mut frontier = vec![node_id];

    while let Some(current) = frontier.pop() {
        let mut stmt = conn.prepare("SELECT id FROM nodes WHERE parent_id = ?")?;
        let children = stmt
            .query_map([current.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for child in children.into_iter().map(parse_uuid) {
            if child == node_id || !found.insert(child) {
                return Err(NodeError::state(format!(
                    "Subtree of node {} contains a cycle",
                    node_id
                )));
            }
            frontier.push(child);
        }
    }

    Ok(found)
}

/// Record a mutation of `node`'s own row.
///
/// Fails with [`NodeError::Conflict`] when the row's version no longer matches
/// the snapshot the caller read.
fn touch_node(conn: &Connection, node: &Node) -> NodeResult<i64> {
    let rows = conn.execute(
        "UPDATE nodes SET version = version + 1, updated_at = ? WHERE id = ? AND version = ?",
        (Utc::now().to_rfc3339(), node.id.to_string(), node.version),
    )?;
    if rows == 0 {
        return Err(NodeError::Conflict(node.id));
    }
    Ok(node.version + 1)
}

fn ensure_not_registration(node: &Node, action: &str) -> NodeResult<()> {
    if node.is_registration() {
        return Err(NodeError::state(format!(
            "Cannot {} a registration; registrations are immutable",
            action
        )));
    }
    Ok(())
}

/// Column values for a node about to be inserted.
struct NewNode {
    parent_id: Option<Uuid>,
    title: String,
    category: NodeCategory,
    description: Option<String>,
    is_collection: bool,
    is_fork: bool,
    forked_from: Option<Uuid>,
    template_node: Option<Uuid>,
    registered_from: Option<Uuid>,
    registration_state: Option<RegistrationState>,
    creator_id: Uuid,
}

impl NewNode {
    fn new(title: String, category: NodeCategory, creator_id: Uuid) -> Self {
        Self {
            parent_id: None,
            title,
            category,
            description: None,
            is_collection: false,
            is_fork: false,
            forked_from: None,
            template_node: None,
            registered_from: None,
            registration_state: None,
            creator_id,
        }
    }

    /// Start from an existing node's metadata (title, category, description).
    fn copy_of(source: &Node, creator_id: Uuid) -> Self {
        let mut new = Self::new(source.title.clone(), source.category, creator_id);
        new.description = source.description.clone();
        new.is_collection = source.is_collection;
        new
    }
}

/// Insert a private node, appended after its parent's existing children.
fn insert_node(conn: &Connection, new: NewNode) -> NodeResult<Node> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let position: i64 = match new.parent_id {
        Some(parent_id) => conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM nodes WHERE parent_id = ?",
            [parent_id.to_string()],
            |row| row.get(0),
        )?,
        None => 0,
    };

    conn.execute(
        "INSERT INTO nodes (id, parent_id, position, title, category, description, is_public,
             is_deleted, is_fork, is_collection, forked_from, template_node, registered_from,
             registration_state, creator_id, version, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        rusqlite::params![
            id.to_string(),
            new.parent_id.map(|u| u.to_string()),
            position,
            &new.title,
            new.category.as_str(),
            &new.description,
            flag(new.is_fork),
            flag(new.is_collection),
            new.forked_from.map(|u| u.to_string()),
            new.template_node.map(|u| u.to_string()),
            new.registered_from.map(|u| u.to_string()),
            new.registration_state.map(|s| s.as_str()),
            new.creator_id.to_string(),
            now.to_rfc3339(),
            now.to_rfc3339(),
        ],
    )?;

    Ok(Node {
        id,
        parent_id: new.parent_id,
        position,
        title: new.title,
        category: new.category,
        description: new.description,
        is_public: false,
        is_deleted: false,
        is_fork: new.is_fork,
        is_collection: new.is_collection,
        forked_from: new.forked_from,
        template_node: new.template_node,
        registered_from: new.registered_from,
        registration_state: new.registration_state,
        creator_id: new.creator_id,
        version: 0,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_raw(conn: &Connection, title: &str, parent: Option<Uuid>) -> Node {
        let mut new = NewNode::new(title.to_string(), NodeCategory::Other, Uuid::new_v4());
        new.parent_id = parent;
        insert_node(conn, new).unwrap()
    }

    #[test]
    fn ancestors_detect_a_cyclic_parent_chain() {
        let conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&conn).unwrap();

        let root = insert_raw(&conn, "Root", None);
        let child = insert_raw(&conn, "Child", Some(root.id));
        conn.execute(
            "UPDATE nodes SET parent_id = ? WHERE id = ?",
            (child.id.to_string(), root.id.to_string()),
        )
        .unwrap();

        let child = fetch_node(&conn, child.id).unwrap();
        assert!(matches!(ancestors_of(&conn, &child), Err(NodeError::NodeState(_))));
        assert!(matches!(descendant_ids(&conn, root.id), Err(NodeError::NodeState(_))));
    }

    #[test]
    fn self_parent_is_rejected_by_the_schema() {
        let conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&conn).unwrap();

        let root = insert_raw(&conn, "Root", None);
        let result = conn.execute(
            "UPDATE nodes SET parent_id = id WHERE id = ?",
            [root.id.to_string()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&conn).unwrap();

        let node = insert_raw(&conn, "Root", None);
        assert_eq!(touch_node(&conn, &node).unwrap(), 1);
        assert!(matches!(touch_node(&conn, &node), Err(NodeError::Conflict(id)) if id == node.id));
    }
}
