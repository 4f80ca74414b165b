//! Privacy state machine.
//!
//! Privacy is per node: toggling a project never touches its components.

use chrono::Utc;
use uuid::Uuid;

use super::permissions::require;
use super::{fetch_live_node, query_nodes, Database};
use crate::error::{NodeError, NodeResult};
use crate::models::*;

impl Database {
    /// Move a node between private and public. Requires admin.
    ///
    /// Returns `false` when the node was already in the requested state.
    pub fn set_privacy(&self, id: Uuid, privacy: Privacy, auth: &Auth) -> NodeResult<bool> {
        let changed = self.write(|tx| {
            let node = fetch_live_node(tx, id)?;
            require(tx, auth, &node, Permission::Admin)?;
            check_transition(&node, privacy)?;

            if node.is_public == privacy.is_public() {
                return Ok(false);
            }

            let rows = tx.execute(
                "UPDATE nodes SET is_public = ?, version = version + 1, updated_at = ?
                 WHERE id = ? AND version = ?",
                (
                    privacy.is_public(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    node.version,
                ),
            )?;
            if rows == 0 {
                return Err(NodeError::Conflict(id));
            }
            Ok(true)
        })?;

        if changed {
            tracing::info!("Made node {} {:?}", id, privacy);
        }
        Ok(changed)
    }

    /// Advisory prompts to confirm before making a node public. Requires admin.
    pub fn before_set_public(&self, id: Uuid, auth: &Auth) -> NodeResult<Vec<String>> {
        let (node, archiving) = self.read(|conn| {
            let node = fetch_live_node(conn, id)?;
            require(conn, auth, &node, Permission::Admin)?;
            let archiving = query_nodes(
                conn,
                "registered_from = ? AND registration_state = 'archiving' AND is_deleted = 0",
                [id.to_string()],
            )?;
            Ok((node, archiving.len()))
        })?;

        let mut prompts = Vec::new();
        if archiving > 0 {
            prompts.push(format!(
                "This {} has {} registration(s) still archiving. They will stay private until archiving completes.",
                node.kind(),
                archiving
            ));
        }
        prompts.extend(self.hooks.before_make_public(&node));
        Ok(prompts)
    }
}

fn check_transition(node: &Node, privacy: Privacy) -> NodeResult<()> {
    let Some(state) = node.registration_state else {
        return Ok(());
    };

    let blocked = match (privacy, state) {
        (Privacy::Public, RegistrationState::Archiving) => {
            "Registrations cannot be made public while they are archiving"
        }
        (Privacy::Public, RegistrationState::Retracted) => {
            "Retracted registrations cannot be made public"
        }
        (Privacy::Private, _) => "Registrations must be retracted, not made private",
        (Privacy::Public, RegistrationState::Complete) => return Ok(()),
    };

    tracing::warn!("Blocked privacy change on node {}: {}", node.id, blocked);
    Err(NodeError::state(blocked))
}
