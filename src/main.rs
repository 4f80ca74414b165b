use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use node_forest::config::Settings;
use node_forest::db::Database;
use node_forest::models::*;
use node_forest::render::render_tree;

#[derive(Parser)]
#[command(name = "nodeforest")]
#[command(about = "Manage project/component trees, pointers, forks and templates")]
struct Cli {
    /// Acting user id. Omit to act anonymously.
    #[arg(long, global = true)]
    user: Option<Uuid>,

    /// Private link key granting read access
    #[arg(long, global = true)]
    link_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project, or a component with --parent
    Create {
        title: String,
        #[arg(long, default_value = "project", value_parser = parse_category)]
        category: NodeCategory,
        #[arg(long)]
        parent: Option<Uuid>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Show a node as JSON
    Show { id: Uuid },
    /// Render the visible tree under a node
    Tree { id: Uuid },
    /// List active children in order
    Children { id: Uuid },
    /// Edit title, description or category
    Update {
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Reorder the active children of a node
    Reorder { id: Uuid, order: Vec<Uuid> },
    /// Soft-delete a node and its components
    Delete { id: Uuid },
    /// Make a node public or private
    Privacy {
        id: Uuid,
        #[arg(value_enum)]
        state: PrivacyArg,
    },
    /// Fork a node and its visible components
    Fork { id: Uuid },
    /// Create a new project shaped like an existing node
    Template {
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
    },
    /// Freeze a node into a registration
    Register { id: Uuid },
    /// Pointer operations
    #[command(subcommand)]
    Pointer(PointerCommand),
    /// Grant a user access to a node
    Contribute {
        node: Uuid,
        contributor: Uuid,
        #[arg(long, default_value = "write", value_parser = parse_permission)]
        permission: Permission,
        #[arg(long)]
        hidden: bool,
    },
    /// Create a view-only link
    Link {
        node: Uuid,
        name: String,
        /// Additional nodes the link covers
        #[arg(long)]
        nodes: Vec<Uuid>,
        #[arg(long)]
        anonymous: bool,
    },
}

#[derive(Subcommand)]
enum PointerCommand {
    /// Point a host node at one or more targets
    Add { host: Uuid, targets: Vec<Uuid> },
    /// Remove a pointer from its host
    Remove { host: Uuid, pointer: Uuid },
    /// Move the pointer to TARGET from FROM to TO
    Move { from: Uuid, to: Uuid, target: Uuid },
    /// Replace a pointer with a pointer to a fork of its target
    Fork { host: Uuid, pointer: Uuid },
    /// List pointers targeting a node
    PointedAt { node: Uuid },
}

#[derive(Clone, Copy, ValueEnum)]
enum PrivacyArg {
    Public,
    Private,
}

fn parse_category(s: &str) -> Result<NodeCategory, String> {
    NodeCategory::from_str(s).ok_or_else(|| format!("unknown category '{}'", s))
}

fn parse_permission(s: &str) -> Result<Permission, String> {
    match Permission::from_str(s) {
        Some(Permission::None) | None => Err(format!("invalid permission '{}'", s)),
        Some(level) => Ok(level),
    }
}

/// Initialize tracing on stderr so stdout carries only JSON output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "node_forest=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let settings = Settings::from_env();
    let db = Database::open_with_settings(&settings)?;
    db.migrate()?;

    let auth = Auth {
        user: cli.user,
        private_key: cli.link_key,
    };

    match cli.command {
        Commands::Create {
            title,
            category,
            parent,
            description,
        } => {
            let node = db.create_node(
                CreateNodeInput {
                    title,
                    category,
                    parent_id: parent,
                    description,
                    is_collection: false,
                },
                &auth,
            )?;
            print_json(&node)?;
        }
        Commands::Show { id } => {
            db.require(&auth, id, Permission::Read)?;
            print_json(&db.get_node(id)?)?;
        }
        Commands::Tree { id } => {
            let tree = db.node_tree(id, &auth)?;
            print!("{}", render_tree(&tree));
        }
        Commands::Children { id } => {
            db.require(&auth, id, Permission::Read)?;
            print_json(&db.active_children(id)?)?;
        }
        Commands::Update {
            id,
            title,
            description,
            category,
        } => {
            let mut changes = serde_json::Map::new();
            if let Some(title) = title {
                changes.insert("title".into(), title.into());
            }
            if let Some(description) = description {
                changes.insert("description".into(), description.into());
            }
            if let Some(category) = category {
                changes.insert("category".into(), category.into());
            }
            let updated = db.update_fields(id, &changes, &auth)?;
            print_json(&updated)?;
        }
        Commands::Reorder { id, order } => {
            print_json(&db.reorder_children(id, &order, &auth)?)?;
        }
        Commands::Delete { id } => {
            let redirect = db.soft_delete(id, &auth)?;
            print_json(&serde_json::json!({
                "deleted": id,
                "redirect": redirect.map(|node| node.id),
            }))?;
        }
        Commands::Privacy { id, state } => {
            let privacy = match state {
                PrivacyArg::Public => Privacy::Public,
                PrivacyArg::Private => Privacy::Private,
            };
            if privacy == Privacy::Public {
                for prompt in db.before_set_public(id, &auth)? {
                    eprintln!("note: {}", prompt);
                }
            }
            let changed = db.set_privacy(id, privacy, &auth)?;
            print_json(&serde_json::json!({ "changed": changed, "privacy": privacy }))?;
        }
        Commands::Fork { id } => {
            for prompt in db.before_fork(id, &auth)? {
                eprintln!("note: {}", prompt);
            }
            print_json(&db.fork_node(id, &auth, &settings)?)?;
        }
        Commands::Template { id, title } => {
            let changes = TemplateChanges {
                title,
                ..Default::default()
            };
            print_json(&db.use_as_template(id, &auth, changes)?)?;
        }
        Commands::Register { id } => {
            print_json(&db.register_node(id, &auth)?)?;
        }
        Commands::Pointer(command) => match command {
            PointerCommand::Add { host, targets } => {
                print_json(&db.add_pointers(host, &targets, &auth)?)?;
            }
            PointerCommand::Remove { host, pointer } => {
                print_json(&db.remove_pointer(host, pointer, &auth)?)?;
            }
            PointerCommand::Move { from, to, target } => {
                print_json(&db.move_pointer(from, to, target, &auth)?)?;
            }
            PointerCommand::Fork { host, pointer } => {
                print_json(&db.fork_pointer(host, pointer, &auth, &settings)?)?;
            }
            PointerCommand::PointedAt { node } => {
                db.require(&auth, node, Permission::Read)?;
                print_json(&db.pointed_at(node)?)?;
            }
        },
        Commands::Contribute {
            node,
            contributor,
            permission,
            hidden,
        } => {
            print_json(&db.add_contributor(node, contributor, permission, !hidden, &auth)?)?;
        }
        Commands::Link {
            node,
            name,
            nodes,
            anonymous,
        } => {
            let link = db.create_private_link(
                node,
                CreatePrivateLinkInput {
                    name,
                    node_ids: nodes,
                    anonymous,
                },
                &auth,
            )?;
            print_json(&link)?;
        }
    }

    Ok(())
}
