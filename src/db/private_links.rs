//! Private (view-only) links.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use super::permissions::{require, require_user};
use super::{fetch_live_node, fetch_node, flag, parse_datetime, parse_uuid, Database};
use crate::error::{NodeError, NodeResult};
use crate::models::*;

impl Database {
    /// Create a link granting read access to `root_id` and `input.node_ids`.
    ///
    /// Requires admin on the root, which always becomes the first node of the link.
    pub fn create_private_link(
        &self,
        root_id: Uuid,
        input: CreatePrivateLinkInput,
        auth: &Auth,
    ) -> NodeResult<PrivateLink> {
        let user = require_user(auth)?;
        let name = validate_link_name(&input.name)?;

        let link = self.write(|tx| {
            let root = fetch_live_node(tx, root_id)?;
            require(tx, auth, &root, Permission::Admin)?;

            let mut node_ids = vec![root_id];
            for node_id in input.node_ids {
                fetch_live_node(tx, node_id)?;
                if !node_ids.contains(&node_id) {
                    node_ids.push(node_id);
                }
            }

            let id = Uuid::new_v4();
            let key = Uuid::new_v4().simple().to_string();
            let now = Utc::now();

            tx.execute(
                "INSERT INTO private_links (id, key, name, anonymous, creator_id, is_deleted, created_at)
                 VALUES (?, ?, ?, ?, ?, 0, ?)",
                (
                    id.to_string(),
                    &key,
                    &name,
                    flag(input.anonymous),
                    user.to_string(),
                    now.to_rfc3339(),
                ),
            )?;

            for (position, node_id) in node_ids.iter().enumerate() {
                tx.execute(
                    "INSERT INTO private_link_nodes (link_id, node_id, position) VALUES (?, ?, ?)",
                    (id.to_string(), node_id.to_string(), position as i64),
                )?;
            }

            Ok(PrivateLink {
                id,
                key,
                name,
                anonymous: input.anonymous,
                node_ids,
                creator_id: user,
                is_deleted: false,
                created_at: now,
            })
        })?;

        tracing::info!("Created private link {} on node {}", link.id, root_id);
        Ok(link)
    }

    pub fn get_private_link(&self, id: Uuid) -> NodeResult<PrivateLink> {
        self.read(|conn| fetch_link(conn, id))
    }

    /// Resolve an active link from its key.
    pub fn get_private_link_by_key(&self, key: &str) -> NodeResult<PrivateLink> {
        self.read(|conn| {
            let id = conn
                .query_row(
                    "SELECT id FROM private_links WHERE key = ? AND is_deleted = 0",
                    [key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .ok_or_else(|| NodeError::not_found("Private link", "<key>"))?;
            fetch_link(conn, parse_uuid(id))
        })
    }

    /// Active links covering `node_id`. Requires admin on the node.
    pub fn private_links_for(&self, node_id: Uuid, auth: &Auth) -> NodeResult<Vec<PrivateLink>> {
        self.read(|conn| {
            let node = fetch_node(conn, node_id)?;
            require(conn, auth, &node, Permission::Admin)?;

            let mut stmt = conn.prepare(
                "SELECT l.id FROM private_links l
                 JOIN private_link_nodes n ON n.link_id = l.id
                 WHERE n.node_id = ? AND l.is_deleted = 0
                 ORDER BY l.created_at",
            )?;
            let ids = stmt
                .query_map([node_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            ids.into_iter()
                .map(|id| fetch_link(conn, parse_uuid(id)))
                .collect()
        })
    }

    /// Rename a link. Requires admin on the link's root node.
    pub fn rename_private_link(&self, id: Uuid, name: &str, auth: &Auth) -> NodeResult<PrivateLink> {
        let name = validate_link_name(name)?;

        self.write(|tx| {
            let mut link = fetch_active_link(tx, id)?;
            require_link_admin(tx, &link, auth)?;

            tx.execute(
                "UPDATE private_links SET name = ? WHERE id = ?",
                (&name, id.to_string()),
            )?;
            link.name = name;
            Ok(link)
        })
    }

    /// Soft-delete a link. Requires admin on the link's root node.
    pub fn remove_private_link(&self, id: Uuid, auth: &Auth) -> NodeResult<()> {
        self.write(|tx| {
            let link = fetch_active_link(tx, id)?;
            require_link_admin(tx, &link, auth)?;

            tx.execute(
                "UPDATE private_links SET is_deleted = 1 WHERE id = ?",
                [id.to_string()],
            )?;
            Ok(())
        })?;

        tracing::info!("Removed private link {}", id);
        Ok(())
    }
}

fn validate_link_name(name: &str) -> NodeResult<String> {
    validate_title(name).map_err(|_| NodeError::Validation("Invalid link name.".to_string()))
}

fn require_link_admin(conn: &Connection, link: &PrivateLink, auth: &Auth) -> NodeResult<()> {
    let root_id = link
        .root_id()
        .ok_or_else(|| NodeError::state(format!("Private link {} covers no nodes", link.id)))?;
    let root = fetch_node(conn, root_id)?;
    require(conn, auth, &root, Permission::Admin)
}

fn fetch_active_link(conn: &Connection, id: Uuid) -> NodeResult<PrivateLink> {
    let link = fetch_link(conn, id)?;
    if link.is_deleted {
        return Err(NodeError::not_found("Private link", id));
    }
    Ok(link)
}

fn fetch_link(conn: &Connection, id: Uuid) -> NodeResult<PrivateLink> {
    let link = conn
        .query_row(
            "SELECT id, key, name, anonymous, creator_id, is_deleted, created_at
             FROM private_links WHERE id = ?",
            [id.to_string()],
            |row| {
                Ok(PrivateLink {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    key: row.get(1)?,
                    name: row.get(2)?,
                    anonymous: row.get::<_, i32>(3)? != 0,
                    node_ids: Vec::new(),
                    creator_id: parse_uuid(row.get::<_, String>(4)?),
                    is_deleted: row.get::<_, i32>(5)? != 0,
                    created_at: parse_datetime(row.get::<_, String>(6)?),
                })
            },
        )
        .optional()?
        .ok_or_else(|| NodeError::not_found("Private link", id))?;

    let mut stmt = conn.prepare(
        "SELECT node_id FROM private_link_nodes WHERE link_id = ? ORDER BY position",
    )?;
    let node_ids = stmt
        .query_map([id.to_string()], |row| row.get::<_, String>(0))?
        .map(|r| r.map(parse_uuid))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PrivateLink { node_ids, ..link })
}
