//! ASCII tree rendering for node hierarchies.

use crate::models::NodeTree;

const PUBLIC: char = '●';
const PRIVATE: char = '○';
const REGISTRATION: char = '◆';

/// Get the marker for a node's visibility.
fn marker(tree: &NodeTree) -> char {
    if tree.node.is_registration() {
        REGISTRATION
    } else if tree.node.is_public {
        PUBLIC
    } else {
        PRIVATE
    }
}

/// Render a node tree as ASCII art with visibility markers.
///
/// Example output:
/// ```text
/// Survey Study
/// ├── ● Hypotheses
/// ├── ○ Raw Data
/// │   ├── ○ Wave 1
/// │   └── ○ Wave 2
/// └── ● Analysis Scripts
/// ```
pub fn render_tree(tree: &NodeTree) -> String {
    let mut output = String::new();
    render_node(&mut output, tree, "", true, true);
    output
}

fn render_node(output: &mut String, tree: &NodeTree, prefix: &str, is_last: bool, is_root: bool) {
    if is_root {
        output.push_str(&tree.node.title);
        output.push('\n');
    } else {
        let branch = if is_last { "└── " } else { "├── " };
        output.push_str(prefix);
        output.push_str(branch);
        output.push(marker(tree));
        output.push(' ');
        output.push_str(&tree.node.title);
        output.push('\n');
    }

    let child_prefix = if is_root {
        String::new()
    } else {
        let continuation = if is_last { "    " } else { "│   " };
        format!("{}{}", prefix, continuation)
    };

    for (i, child) in tree.children.iter().enumerate() {
        let child_is_last = i == tree.children.len() - 1;
        render_node(output, child, &child_prefix, child_is_last, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Node, NodeCategory};
    use chrono::Utc;
    use uuid::Uuid;

    fn make_tree(title: &str, is_public: bool, children: Vec<NodeTree>) -> NodeTree {
        NodeTree {
            node: Node {
                id: Uuid::new_v4(),
                parent_id: None,
                position: 0,
                title: title.to_string(),
                category: NodeCategory::Project,
                description: None,
                is_public,
                is_deleted: false,
                is_fork: false,
                is_collection: false,
                forked_from: None,
                template_node: None,
                registered_from: None,
                registration_state: None,
                creator_id: Uuid::new_v4(),
                version: 0,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                deleted_at: None,
            },
            children,
        }
    }

    #[test]
    fn test_single_root() {
        let tree = make_tree("Survey Study", false, vec![]);
        assert_eq!(render_tree(&tree), "Survey Study\n");
    }

    #[test]
    fn test_nested_children() {
        let tree = make_tree(
            "Survey Study",
            true,
            vec![
                make_tree("Hypotheses", true, vec![]),
                make_tree(
                    "Raw Data",
                    false,
                    vec![
                        make_tree("Wave 1", false, vec![]),
                        make_tree("Wave 2", false, vec![]),
                    ],
                ),
                make_tree("Analysis Scripts", true, vec![]),
            ],
        );
        let expected = "Survey Study\n├── ● Hypotheses\n├── ○ Raw Data\n│   ├── ○ Wave 1\n│   └── ○ Wave 2\n└── ● Analysis Scripts\n";
        assert_eq!(render_tree(&tree), expected);
    }
}
