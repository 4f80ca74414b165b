//! Permission model: explicit grants, admin inheritance and private links.
//!
//! Resolution order for `(user, node)`:
//! 1. the user's explicit contributor entry on the node,
//! 2. admin on any strict ancestor (only admin cascades down the tree),
//! 3. read, when the node is public,
//! 4. none.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    ancestors_of, ensure_not_registration, fetch_live_node, fetch_node, flag, parse_datetime,
    parse_uuid, touch_node, Database,
};
use crate::error::{NodeError, NodeResult};
use crate::models::*;

impl Database {
    pub fn effective_permission(&self, user: Option<Uuid>, node_id: Uuid) -> NodeResult<Permission> {
        self.read(|conn| {
            let node = fetch_node(conn, node_id)?;
            effective_permission(conn, user, &node)
        })
    }

    /// Whether `auth` may read the node, counting private links.
    pub fn can_view(&self, auth: &Auth, node_id: Uuid) -> NodeResult<bool> {
        self.read(|conn| {
            let node = fetch_node(conn, node_id)?;
            can_view(conn, auth, &node)
        })
    }

    /// Fail with `PermissionDenied` unless `auth` holds at least `level` on the node.
    pub fn require(&self, auth: &Auth, node_id: Uuid, level: Permission) -> NodeResult<()> {
        self.read(|conn| {
            let node = fetch_node(conn, node_id)?;
            require(conn, auth, &node, level)
        })
    }

    /// Explicit contributors in the order they were added.
    pub fn contributors(&self, node_id: Uuid) -> NodeResult<Vec<Contributor>> {
        self.read(|conn| {
            fetch_node(conn, node_id)?;
            contributors_of(conn, node_id)
        })
    }

    /// Contributors shown publicly as authors.
    pub fn visible_contributors(&self, node_id: Uuid) -> NodeResult<Vec<Contributor>> {
        Ok(self
            .contributors(node_id)?
            .into_iter()
            .filter(|c| c.visible)
            .collect())
    }

    pub fn add_contributor(
        &self,
        node_id: Uuid,
        user_id: Uuid,
        permission: Permission,
        visible: bool,
        auth: &Auth,
    ) -> NodeResult<Contributor> {
        if permission == Permission::None {
            return Err(NodeError::Validation(
                "Contributors must be granted at least read permission".to_string(),
            ));
        }

        let contributor = self.write(|tx| {
            let node = fetch_live_node(tx, node_id)?;
            require(tx, auth, &node, Permission::Admin)?;
            ensure_not_registration(&node, "add contributors to")?;

            if explicit_permission(tx, node_id, user_id)?.is_some() {
                return Err(NodeError::Validation(format!(
                    "User {} is already a contributor",
                    user_id
                )));
            }

            let contributor = insert_contributor(tx, node_id, user_id, permission, visible)?;
            touch_node(tx, &node)?;
            Ok(contributor)
        })?;

        tracing::info!(
            "Added contributor {} to node {} with {} permission",
            user_id,
            node_id,
            permission.as_str()
        );
        Ok(contributor)
    }

    /// Change an existing contributor's level. The last admin cannot be demoted.
    pub fn set_permission(
        &self,
        node_id: Uuid,
        user_id: Uuid,
        permission: Permission,
        auth: &Auth,
    ) -> NodeResult<Contributor> {
        if permission == Permission::None {
            return Err(NodeError::Validation(
                "Use remove_contributor to revoke access".to_string(),
            ));
        }

        self.write(|tx| {
            let node = fetch_live_node(tx, node_id)?;
            require(tx, auth, &node, Permission::Admin)?;
            ensure_not_registration(&node, "change contributors of")?;

            let current = explicit_permission(tx, node_id, user_id)?
                .ok_or_else(|| NodeError::not_found("Contributor", user_id))?;

            if current == Permission::Admin
                && permission != Permission::Admin
                && admin_count(tx, node_id)? == 1
            {
                return Err(NodeError::state("A node must keep at least one admin"));
            }

            tx.execute(
                "UPDATE contributors SET permission = ? WHERE node_id = ? AND user_id = ?",
                (permission.as_str(), node_id.to_string(), user_id.to_string()),
            )?;
            touch_node(tx, &node)?;

            contributor(tx, node_id, user_id)?
                .ok_or_else(|| NodeError::not_found("Contributor", user_id))
        })
    }

    pub fn remove_contributor(&self, node_id: Uuid, user_id: Uuid, auth: &Auth) -> NodeResult<()> {
        self.write(|tx| {
            let node = fetch_live_node(tx, node_id)?;
            require(tx, auth, &node, Permission::Admin)?;
            ensure_not_registration(&node, "remove contributors from")?;

            let current = explicit_permission(tx, node_id, user_id)?
                .ok_or_else(|| NodeError::not_found("Contributor", user_id))?;

            if current == Permission::Admin && admin_count(tx, node_id)? == 1 {
                return Err(NodeError::state("A node must keep at least one admin"));
            }

            tx.execute(
                "DELETE FROM contributors WHERE node_id = ? AND user_id = ?",
                (node_id.to_string(), user_id.to_string()),
            )?;
            touch_node(tx, &node)?;
            Ok(())
        })
    }
}

pub(super) fn explicit_permission(
    conn: &Connection,
    node_id: Uuid,
    user_id: Uuid,
) -> NodeResult<Option<Permission>> {
    let level = conn
        .query_row(
            "SELECT permission FROM contributors WHERE node_id = ? AND user_id = ?",
            (node_id.to_string(), user_id.to_string()),
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(level.as_deref().and_then(Permission::from_str))
}

pub(super) fn effective_permission(
    conn: &Connection,
    user: Option<Uuid>,
    node: &Node,
) -> NodeResult<Permission> {
    if let Some(user) = user {
        if let Some(level) = explicit_permission(conn, node.id, user)? {
            return Ok(level);
        }
        for ancestor in ancestors_of(conn, node)? {
            if explicit_permission(conn, ancestor.id, user)? == Some(Permission::Admin) {
                return Ok(Permission::Admin);
            }
        }
    }

    if node.is_public {
        Ok(Permission::Read)
    } else {
        Ok(Permission::None)
    }
}

fn link_grants(conn: &Connection, key: &str, node_id: Uuid) -> NodeResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM private_links l
         JOIN private_link_nodes n ON n.link_id = l.id
         WHERE l.key = ? AND l.is_deleted = 0 AND n.node_id = ?",
        (key, node_id.to_string()),
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(super) fn can_view(conn: &Connection, auth: &Auth, node: &Node) -> NodeResult<bool> {
    if effective_permission(conn, auth.user, node)? >= Permission::Read {
        return Ok(true);
    }
    match &auth.private_key {
        Some(key) => link_grants(conn, key, node.id),
        None => Ok(false),
    }
}

pub(super) fn require(
    conn: &Connection,
    auth: &Auth,
    node: &Node,
    level: Permission,
) -> NodeResult<()> {
    if level <= Permission::Read && can_view(conn, auth, node)? {
        return Ok(());
    }

    let actual = match auth.user {
        Some(user) => effective_permission(conn, Some(user), node)?,
        None => Permission::None,
    };

    if actual < level {
        return Err(NodeError::denied(format!(
            "{} permission required on {} {}",
            level.as_str(),
            node.kind(),
            node.id
        )));
    }
    Ok(())
}

/// The acting user, or `PermissionDenied` for anonymous requests.
pub(super) fn require_user(auth: &Auth) -> NodeResult<Uuid> {
    auth.user
        .ok_or_else(|| NodeError::denied("You must be logged in to do this"))
}

pub(super) fn insert_contributor(
    conn: &Connection,
    node_id: Uuid,
    user_id: Uuid,
    permission: Permission,
    visible: bool,
) -> NodeResult<Contributor> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO contributors (node_id, user_id, permission, visible, created_at)
         VALUES (?, ?, ?, ?, ?)",
        (
            node_id.to_string(),
            user_id.to_string(),
            permission.as_str(),
            flag(visible),
            now.to_rfc3339(),
        ),
    )?;

    Ok(Contributor {
        node_id,
        user_id,
        permission,
        visible,
        created_at: now,
    })
}

pub(super) fn contributors_of(conn: &Connection, node_id: Uuid) -> NodeResult<Vec<Contributor>> {
    let mut stmt = conn.prepare(
        "SELECT node_id, user_id, permission, visible, created_at
         FROM contributors WHERE node_id = ? ORDER BY created_at, rowid",
    )?;

    let contributors = stmt
        .query_map([node_id.to_string()], contributor_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(contributors)
}

fn contributor(conn: &Connection, node_id: Uuid, user_id: Uuid) -> NodeResult<Option<Contributor>> {
    let contributor = conn
        .query_row(
            "SELECT node_id, user_id, permission, visible, created_at
             FROM contributors WHERE node_id = ? AND user_id = ?",
            (node_id.to_string(), user_id.to_string()),
            contributor_from_row,
        )
        .optional()?;
    Ok(contributor)
}

fn contributor_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contributor> {
    Ok(Contributor {
        node_id: parse_uuid(row.get::<_, String>(0)?),
        user_id: parse_uuid(row.get::<_, String>(1)?),
        permission: Permission::from_str(&row.get::<_, String>(2)?).unwrap_or(Permission::Read),
        visible: row.get::<_, i32>(3)? != 0,
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn admin_count(conn: &Connection, node_id: Uuid) -> NodeResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM contributors WHERE node_id = ? AND permission = 'admin'",
        [node_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}
