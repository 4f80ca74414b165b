use node_forest::config::Settings;
use node_forest::db::Database;
use node_forest::models::*;
use speculate2::speculate;
use tempfile::TempDir;
use uuid::Uuid;

fn open_at(dir: &TempDir) -> Database {
    let settings = Settings {
        disk_saving_mode: false,
        database_path: Some(dir.path().join("data").join("forest.db")),
    };
    let db = Database::open_with_settings(&settings).expect("Failed to open database");
    db.migrate().expect("Failed to run migrations");
    db
}

speculate! {
    before {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let owner = Uuid::new_v4();
    }

    describe "on-disk database" {
        it "creates missing parent directories" {
            open_at(&dir);
            assert!(dir.path().join("data").join("forest.db").exists());
        }

        it "keeps nodes and pointers across reopen" {
            let (project, target) = {
                let db = open_at(&dir);
                let auth = Auth::user(owner);
                let project = db
                    .create_node(CreateNodeInput::project("Persistent"), &auth)
                    .expect("Failed to create project");
                let target = db
                    .create_node(CreateNodeInput::project("Target"), &auth)
                    .expect("Failed to create project");
                db.add_pointers(project.id, &[target.id], &auth)
                    .expect("Failed to add pointers");
                (project, target)
            };

            let db = open_at(&dir);
            let reloaded = db.get_node(project.id).expect("Query failed");
            assert_eq!(reloaded.title, "Persistent");
            assert_eq!(reloaded.created_at, project.created_at);

            let pointers = db.pointers_from(project.id).expect("Query failed");
            assert_eq!(pointers.len(), 1);
            assert_eq!(pointers[0].target_id, target.id);
        }

        it "migrates an existing file idempotently" {
            let db = open_at(&dir);
            db.migrate().expect("Second migration run failed");
            drop(db);

            let db = open_at(&dir);
            assert!(db.projects_for_user(owner).expect("Query failed").is_empty());
        }
    }
}
