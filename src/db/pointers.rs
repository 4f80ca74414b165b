//! Pointer graph manager.
//!
//! Pointers are their own rows; adding or removing one never rewrites the
//! host node. Duplicate active edges are rejected here and by a partial unique
//! index, so two concurrent adds of the same edge cannot both land.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use uuid::Uuid;

use super::fork::fork_subtree;
use super::permissions::{require, require_user};
use super::{
    ancestors_of, descendant_ids, ensure_not_registration, fetch_live_node, fetch_node,
    parse_datetime, parse_uuid, Database,
};
use crate::config::Settings;
use crate::error::{NodeError, NodeResult};
use crate::models::*;

const POINTER_COLUMNS: &str = "id, host_id, target_id, is_deleted, created_at, deleted_at";

impl Database {
    pub fn get_pointer(&self, id: Uuid) -> NodeResult<Pointer> {
        self.read(|conn| fetch_pointer(conn, id))
    }

    /// Active pointers hosted by `host_id`, oldest first.
    pub fn pointers_from(&self, host_id: Uuid) -> NodeResult<Vec<Pointer>> {
        self.read(|conn| {
            fetch_node(conn, host_id)?;
            active_pointers_from(conn, host_id)
        })
    }

    /// Active pointers targeting `node_id`, skipping those hosted by collections
    /// or by deleted nodes.
    pub fn pointed_at(&self, node_id: Uuid) -> NodeResult<Vec<Pointer>> {
        self.read(|conn| {
            fetch_node(conn, node_id)?;
            let sql = format!(
                "SELECT {} FROM pointers
                 WHERE target_id = ? AND is_deleted = 0
                   AND host_id IN (SELECT id FROM nodes WHERE is_collection = 0 AND is_deleted = 0)
                 ORDER BY created_at, rowid",
                POINTER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let pointers = stmt
                .query_map([node_id.to_string()], pointer_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(pointers)
        })
    }

    /// Point `host_id` at every node in `target_ids`. All or nothing.
    pub fn add_pointers(
        &self,
        host_id: Uuid,
        target_ids: &[Uuid],
        auth: &Auth,
    ) -> NodeResult<Vec<Pointer>> {
        if target_ids.is_empty() {
            return Err(NodeError::Validation(
                "No nodes given to point at".to_string(),
            ));
        }

        let pointers = self.write(|tx| {
            let host = fetch_live_node(tx, host_id)?;
            require(tx, auth, &host, Permission::Write)?;
            ensure_not_registration(&host, "add pointers to")?;

            let mut guard = PointerGuard::for_host(tx, &host)?;
            let mut pointers = Vec::with_capacity(target_ids.len());
            for &target_id in target_ids {
                guard.check(tx, target_id)?;
                pointers.push(insert_pointer(tx, host_id, target_id)?);
            }
            Ok(pointers)
        })?;

        tracing::info!("Added {} pointer(s) to node {}", pointers.len(), host_id);
        Ok(pointers)
    }

    /// Soft-delete one of `host_id`'s active pointers.
    pub fn remove_pointer(&self, host_id: Uuid, pointer_id: Uuid, auth: &Auth) -> NodeResult<Pointer> {
        let pointer = self.write(|tx| {
            let host = fetch_live_node(tx, host_id)?;
            require(tx, auth, &host, Permission::Write)?;
            ensure_not_registration(&host, "remove pointers from")?;

            let pointer = fetch_pointer(tx, pointer_id)?;
            ensure_hosted_by(&pointer, host_id)?;
            delete_pointer(tx, pointer)
        })?;

        tracing::info!("Removed pointer {} from node {}", pointer_id, host_id);
        Ok(pointer)
    }

    /// Move the pointer from `from_id` to `target_id` over to `to_id`.
    ///
    /// Removal and re-creation share one transaction: if the new edge is
    /// invalid the original stays in place.
    pub fn move_pointer(
        &self,
        from_id: Uuid,
        to_id: Uuid,
        target_id: Uuid,
        auth: &Auth,
    ) -> NodeResult<Pointer> {
        let pointer = self.write(|tx| {
            let from = fetch_live_node(tx, from_id)?;
            let to = fetch_live_node(tx, to_id)?;
            require(tx, auth, &from, Permission::Write)?;
            require(tx, auth, &to, Permission::Write)?;
            ensure_not_registration(&from, "remove pointers from")?;
            ensure_not_registration(&to, "add pointers to")?;

            let existing = active_pointer_between(tx, from_id, target_id)?.ok_or_else(|| {
                NodeError::InvalidPointer(format!(
                    "Node {} does not point at node {}",
                    from_id, target_id
                ))
            })?;
            delete_pointer(tx, existing)?;

            let mut guard = PointerGuard::for_host(tx, &to)?;
            guard.check(tx, target_id)?;
            insert_pointer(tx, to_id, target_id)
        })?;

        tracing::info!(
            "Moved pointer to node {} from node {} to node {}",
            target_id,
            from_id,
            to_id
        );
        Ok(pointer)
    }

    /// Replace a pointer with a pointer to a fresh fork of its target.
    ///
    /// Returns the new pointer; its `target_id` is the fork's root.
    pub fn fork_pointer(
        &self,
        host_id: Uuid,
        pointer_id: Uuid,
        auth: &Auth,
        settings: &Settings,
    ) -> NodeResult<Pointer> {
        if settings.disk_saving_mode {
            return Err(NodeError::DiskSavingMode);
        }
        let user = require_user(auth)?;

        let (pointer, created) = self.write(|tx| {
            let host = fetch_live_node(tx, host_id)?;
            require(tx, auth, &host, Permission::Write)?;
            ensure_not_registration(&host, "fork pointers of")?;

            let original = fetch_pointer(tx, pointer_id)?;
            ensure_hosted_by(&original, host_id)?;
            let target = fetch_live_node(tx, original.target_id)?;

            let created = fork_subtree(tx, auth, user, &target)?;
            let fork_root = created[0].id;

            delete_pointer(tx, original)?;
            let mut guard = PointerGuard::for_host(tx, &host)?;
            guard.check(tx, fork_root)?;
            let pointer = insert_pointer(tx, host_id, fork_root)?;
            Ok((pointer, created))
        })?;

        tracing::info!(
            "Forked pointer {} on node {} into fork {}",
            pointer_id,
            host_id,
            pointer.target_id
        );
        self.notify_created(&created);
        Ok(pointer)
    }
}

/// Tracks which targets a host may still point at within one operation.
struct PointerGuard {
    host_id: Uuid,
    /// Ancestors and descendants of the host in the tree.
    related: HashSet<Uuid>,
    /// Targets already pointed at, including ones added earlier in this batch.
    targets: HashSet<Uuid>,
}

impl PointerGuard {
    fn for_host(conn: &Connection, host: &Node) -> NodeResult<Self> {
        let mut related = descendant_ids(conn, host.id)?;
        related.extend(ancestors_of(conn, host)?.into_iter().map(|node| node.id));

        let targets = active_pointers_from(conn, host.id)?
            .into_iter()
            .map(|pointer| pointer.target_id)
            .collect();

        Ok(Self {
            host_id: host.id,
            related,
            targets,
        })
    }

    fn check(&mut self, conn: &Connection, target_id: Uuid) -> NodeResult<()> {
        fetch_live_node(conn, target_id)?;

        if target_id == self.host_id {
            return Err(NodeError::InvalidPointer(
                "A node cannot point at itself".to_string(),
            ));
        }
        if self.related.contains(&target_id) {
            return Err(NodeError::InvalidPointer(format!(
                "Node {} is an ancestor or descendant of node {}",
                target_id, self.host_id
            )));
        }
        if !self.targets.insert(target_id) {
            return Err(NodeError::InvalidPointer(format!(
                "Node {} already points at node {}",
                self.host_id, target_id
            )));
        }
        Ok(())
    }
}

fn pointer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pointer> {
    Ok(Pointer {
        id: parse_uuid(row.get::<_, String>(0)?),
        host_id: parse_uuid(row.get::<_, String>(1)?),
        target_id: parse_uuid(row.get::<_, String>(2)?),
        is_deleted: row.get::<_, i32>(3)? != 0,
        created_at: parse_datetime(row.get::<_, String>(4)?),
        deleted_at: row.get::<_, Option<String>>(5)?.map(parse_datetime),
    })
}

fn fetch_pointer(conn: &Connection, id: Uuid) -> NodeResult<Pointer> {
    let sql = format!("SELECT {} FROM pointers WHERE id = ?", POINTER_COLUMNS);
    conn.query_row(&sql, [id.to_string()], pointer_from_row)
        .optional()?
        .ok_or_else(|| NodeError::not_found("Pointer", id))
}

pub(super) fn active_pointers_from(conn: &Connection, host_id: Uuid) -> NodeResult<Vec<Pointer>> {
    let sql = format!(
        "SELECT {} FROM pointers WHERE host_id = ? AND is_deleted = 0 ORDER BY created_at, rowid",
        POINTER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let pointers = stmt
        .query_map([host_id.to_string()], pointer_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pointers)
}

fn active_pointer_between(
    conn: &Connection,
    host_id: Uuid,
    target_id: Uuid,
) -> NodeResult<Option<Pointer>> {
    let sql = format!(
        "SELECT {} FROM pointers WHERE host_id = ? AND target_id = ? AND is_deleted = 0",
        POINTER_COLUMNS
    );
    let pointer = conn
        .query_row(
            &sql,
            (host_id.to_string(), target_id.to_string()),
            pointer_from_row,
        )
        .optional()?;
    Ok(pointer)
}

fn ensure_hosted_by(pointer: &Pointer, host_id: Uuid) -> NodeResult<()> {
    if pointer.is_deleted || pointer.host_id != host_id {
        return Err(NodeError::InvalidPointer(format!(
            "Pointer {} is not an active pointer of node {}",
            pointer.id, host_id
        )));
    }
    Ok(())
}

/// Insert an edge whose invariants the caller has already checked.
pub(super) fn insert_pointer(conn: &Connection, host_id: Uuid, target_id: Uuid) -> NodeResult<Pointer> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let result = conn.execute(
        "INSERT INTO pointers (id, host_id, target_id, is_deleted, created_at)
         VALUES (?, ?, ?, 0, ?)",
        (
            id.to_string(),
            host_id.to_string(),
            target_id.to_string(),
            now.to_rfc3339(),
        ),
    );

    match result {
        Ok(_) => Ok(Pointer {
            id,
            host_id,
            target_id,
            is_deleted: false,
            created_at: now,
            deleted_at: None,
        }),
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            Err(NodeError::InvalidPointer(format!(
                "Node {} already points at node {}",
                host_id, target_id
            )))
        }
        Err(err) => Err(err.into()),
    }
}

fn delete_pointer(conn: &Connection, mut pointer: Pointer) -> NodeResult<Pointer> {
    let now = Utc::now();
    let rows = conn.execute(
        "UPDATE pointers SET is_deleted = 1, deleted_at = ? WHERE id = ? AND is_deleted = 0",
        (now.to_rfc3339(), pointer.id.to_string()),
    )?;
    if rows == 0 {
        return Err(NodeError::InvalidPointer(format!(
            "Pointer {} was already removed",
            pointer.id
        )));
    }
    pointer.is_deleted = true;
    pointer.deleted_at = Some(now);
    Ok(pointer)
}
