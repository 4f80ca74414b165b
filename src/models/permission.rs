use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capability a user holds on a node.
///
/// Levels are cumulative: `Admin` implies `Write`, which implies `Read`.
/// The derived ordering follows that hierarchy, so `level >= Permission::Write`
/// is the usual way to test for write access.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    None,
    Read,
    Write,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// An explicit permission grant on a node.
///
/// `visible` contributors are the ones listed publicly as authors; hidden
/// contributors keep their access but are not shown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contributor {
    pub node_id: Uuid,
    pub user_id: Uuid,
    pub permission: Permission,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
}

/// The actor behind an operation.
///
/// Authentication happens elsewhere; by the time an `Auth` reaches the core
/// the user id is trusted. A request may also carry the key of a private link,
/// which grants read access to the link's nodes without a contributor entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    pub user: Option<Uuid>,
    pub private_key: Option<String>,
}

impl Auth {
    pub fn user(id: Uuid) -> Self {
        Self {
            user: Some(id),
            private_key: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.user.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_levels_are_ordered() {
        assert!(Permission::Admin > Permission::Write);
        assert!(Permission::Write > Permission::Read);
        assert!(Permission::Read > Permission::None);
    }
}
