use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest title a node may carry, counted in characters after trimming.
pub const MAX_TITLE_LENGTH: usize = 200;

/// A project or one of its components.
///
/// Nodes form a forest: a node with no `parent_id` is a top-level project,
/// everything below it is a component. Child order lives on the child row
/// (`position`) so the parent record never embeds its children. Nodes are
/// never physically removed; `is_deleted` is a tombstone.
///
/// # Lineage
/// A node created by forking records its source in `forked_from`, one created
/// from a template records it in `template_node`, and a registration records
/// the node it froze in `registered_from`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Sort key among siblings. Only meaningful relative to other children of the same parent.
    pub position: i64,
    pub title: String,
    pub category: NodeCategory,
    pub description: Option<String>,
    pub is_public: bool,
    pub is_deleted: bool,
    pub is_fork: bool,
    /// Container-only nodes (bookmark folders). Their pointers are hidden from `pointed_at`.
    pub is_collection: bool,
    pub forked_from: Option<Uuid>,
    pub template_node: Option<Uuid>,
    pub registered_from: Option<Uuid>,
    /// `Some` exactly when the node is a registration.
    pub registration_state: Option<RegistrationState>,
    pub creator_id: Uuid,
    /// Bumped on every mutation of the node record; used for optimistic concurrency.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Node {
    /// Registrations are frozen snapshots and reject every structural mutation.
    pub fn is_registration(&self) -> bool {
        self.registration_state.is_some()
    }

    pub fn is_project(&self) -> bool {
        self.parent_id.is_none()
    }

    /// "project" or "component", for user-facing messages.
    pub fn kind(&self) -> &'static str {
        if self.is_project() {
            "project"
        } else {
            "component"
        }
    }
}

/// What a node represents.
///
/// Top-level nodes are normally `Project`; components use one of the
/// research-phase subtypes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Project,
    Hypothesis,
    MethodsAndMeasures,
    Procedure,
    Instrumentation,
    Software,
    Data,
    Analysis,
    Communication,
    Other,
}

impl NodeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Hypothesis => "hypothesis",
            Self::MethodsAndMeasures => "methods_and_measures",
            Self::Procedure => "procedure",
            Self::Instrumentation => "instrumentation",
            Self::Software => "software",
            Self::Data => "data",
            Self::Analysis => "analysis",
            Self::Communication => "communication",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Self::Project),
            "hypothesis" => Some(Self::Hypothesis),
            "methods_and_measures" => Some(Self::MethodsAndMeasures),
            "procedure" => Some(Self::Procedure),
            "instrumentation" => Some(Self::Instrumentation),
            "software" => Some(Self::Software),
            "data" => Some(Self::Data),
            "analysis" => Some(Self::Analysis),
            "communication" => Some(Self::Communication),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Lifecycle of a registration.
///
/// - `Archiving`: snapshot is being copied; may not be made public yet
/// - `Complete`: archived and stable
/// - `Retracted`: withdrawn; stays visible as a tombstone but may not be made public
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Archiving,
    Complete,
    Retracted,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archiving => "archiving",
            Self::Complete => "complete",
            Self::Retracted => "retracted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "archiving" => Some(Self::Archiving),
            "complete" => Some(Self::Complete),
            "retracted" => Some(Self::Retracted),
            _ => None,
        }
    }
}

/// Input for creating a new node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeInput {
    pub title: String,
    pub category: NodeCategory,
    /// Parent node for a component. `None` creates a top-level project.
    pub parent_id: Option<Uuid>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_collection: bool,
}

impl CreateNodeInput {
    pub fn project(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            category: NodeCategory::Project,
            parent_id: None,
            description: None,
            is_collection: false,
        }
    }

    pub fn component(parent_id: Uuid, title: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            title: title.into(),
            category,
            parent_id: Some(parent_id),
            description: None,
            is_collection: false,
        }
    }
}

/// Overrides applied to the root of a template copy. Unset fields keep the source value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateChanges {
    pub title: Option<String>,
    pub category: Option<NodeCategory>,
    pub description: Option<String>,
}

/// A node with its nested active children, used for tree responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTree {
    #[serde(flatten)]
    pub node: Node,
    pub children: Vec<NodeTree>,
}

/// Which way `set_privacy` should move a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Public,
    Private,
}

impl Privacy {
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Public)
    }
}

/// Validate a title and return its trimmed form.
pub fn validate_title(title: &str) -> Result<String, String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err("Title cannot be blank.".to_string());
    }
    if trimmed.chars().count() > MAX_TITLE_LENGTH {
        return Err(format!(
            "Title cannot exceed {} characters.",
            MAX_TITLE_LENGTH
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_title_trims_whitespace() {
        assert_eq!(validate_title("  Survey  ").unwrap(), "Survey");
    }

    #[test]
    fn validate_title_rejects_blank() {
        assert!(validate_title("   ").is_err());
        assert!(validate_title("").is_err());
    }

    #[test]
    fn validate_title_counts_characters_not_bytes() {
        let accented = "é".repeat(MAX_TITLE_LENGTH);
        assert!(validate_title(&accented).is_ok());

        let too_long = "a".repeat(MAX_TITLE_LENGTH + 1);
        assert!(validate_title(&too_long).is_err());
    }

    #[test]
    fn category_strings_match_serde_names() {
        let json = serde_json::to_string(&NodeCategory::MethodsAndMeasures).unwrap();
        assert_eq!(json, "\"methods_and_measures\"");
        assert_eq!(
            NodeCategory::from_str(NodeCategory::MethodsAndMeasures.as_str()),
            Some(NodeCategory::MethodsAndMeasures)
        );
        assert_eq!(NodeCategory::from_str("folder"), None);
    }
}
