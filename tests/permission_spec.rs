use node_forest::db::Database;
use node_forest::error::NodeError;
use node_forest::models::*;
use serde_json::json;
use speculate2::speculate;
use uuid::Uuid;

fn create_project(db: &Database, owner: Uuid, title: &str) -> Node {
    db.create_node(CreateNodeInput::project(title), &Auth::user(owner))
        .expect("Failed to create project")
}

fn create_component(db: &Database, owner: Uuid, parent: &Node, title: &str) -> Node {
    db.create_node(
        CreateNodeInput::component(parent.id, title, NodeCategory::Hypothesis),
        &Auth::user(owner),
    )
    .expect("Failed to create component")
}

fn link_input(name: &str, node_ids: Vec<Uuid>) -> CreatePrivateLinkInput {
    CreatePrivateLinkInput {
        name: name.to_string(),
        node_ids,
        anonymous: false,
    }
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let auth = Auth::user(owner);
        let project = create_project(&db, owner, "Study");
    }

    describe "effective_permission" {
        it "is none for strangers on private nodes" {
            assert_eq!(
                db.effective_permission(Some(other), project.id).expect("Query failed"),
                Permission::None
            );
            assert_eq!(
                db.effective_permission(None, project.id).expect("Query failed"),
                Permission::None
            );
        }

        it "is read for everyone on public nodes" {
            db.set_privacy(project.id, Privacy::Public, &auth).expect("Failed to publish");

            assert_eq!(
                db.effective_permission(Some(other), project.id).expect("Query failed"),
                Permission::Read
            );
            assert_eq!(
                db.effective_permission(None, project.id).expect("Query failed"),
                Permission::Read
            );
        }

        it "inherits admin from an ancestor" {
            let component = create_component(&db, owner, &project, "Child");
            let grandchild = create_component(&db, owner, &component, "Grandchild");
            db.add_contributor(project.id, other, Permission::Admin, true, &auth)
                .expect("Failed to add contributor");

            assert_eq!(
                db.effective_permission(Some(other), grandchild.id).expect("Query failed"),
                Permission::Admin
            );
        }

        it "does not inherit write from an ancestor" {
            let component = create_component(&db, owner, &project, "Child");
            db.add_contributor(project.id, other, Permission::Write, true, &auth)
                .expect("Failed to add contributor");

            assert_eq!(
                db.effective_permission(Some(other), component.id).expect("Query failed"),
                Permission::None
            );
        }

        it "prefers an explicit entry over ancestor admin" {
            let component = create_component(&db, owner, &project, "Child");
            db.add_contributor(project.id, other, Permission::Admin, true, &auth)
                .expect("Failed to add contributor");
            db.add_contributor(component.id, other, Permission::Read, true, &auth)
                .expect("Failed to add contributor");

            assert_eq!(
                db.effective_permission(Some(other), component.id).expect("Query failed"),
                Permission::Read
            );
        }
    }

    describe "contributors" {
        it "lists contributors in the order they were added" {
            db.add_contributor(project.id, other, Permission::Write, false, &auth)
                .expect("Failed to add contributor");

            let contributors = db.contributors(project.id).expect("Query failed");
            let users: Vec<Uuid> = contributors.iter().map(|c| c.user_id).collect();
            assert_eq!(users, vec![owner, other]);

            let visible = db.visible_contributors(project.id).expect("Query failed");
            assert_eq!(visible.len(), 1);
            assert_eq!(visible[0].user_id, owner);
        }

        it "rejects a duplicate contributor" {
            let err = db
                .add_contributor(project.id, owner, Permission::Read, true, &auth)
                .unwrap_err();
            assert!(matches!(err, NodeError::Validation(_)));
        }

        it "rejects a grant of no permission" {
            let err = db
                .add_contributor(project.id, other, Permission::None, true, &auth)
                .unwrap_err();
            assert!(matches!(err, NodeError::Validation(_)));
        }

        it "requires admin to add contributors" {
            db.add_contributor(project.id, other, Permission::Write, true, &auth)
                .expect("Failed to add contributor");

            let err = db
                .add_contributor(project.id, Uuid::new_v4(), Permission::Read, true, &Auth::user(other))
                .unwrap_err();
            assert!(matches!(err, NodeError::PermissionDenied(_)));
        }

        it "changes a contributor's permission" {
            db.add_contributor(project.id, other, Permission::Read, true, &auth)
                .expect("Failed to add contributor");

            let updated = db
                .set_permission(project.id, other, Permission::Admin, &auth)
                .expect("Failed to set permission");

            assert_eq!(updated.permission, Permission::Admin);
            assert_eq!(
                db.effective_permission(Some(other), project.id).expect("Query failed"),
                Permission::Admin
            );
        }

        it "keeps at least one admin" {
            let err = db
                .set_permission(project.id, owner, Permission::Write, &auth)
                .unwrap_err();
            assert!(matches!(err, NodeError::NodeState(_)));

            let err = db.remove_contributor(project.id, owner, &auth).unwrap_err();
            assert!(matches!(err, NodeError::NodeState(_)));
        }

        it "removes a contributor" {
            db.add_contributor(project.id, other, Permission::Write, true, &auth)
                .expect("Failed to add contributor");

            db.remove_contributor(project.id, other, &auth).expect("Failed to remove");

            assert_eq!(db.contributors(project.id).expect("Query failed").len(), 1);
            assert_eq!(
                db.effective_permission(Some(other), project.id).expect("Query failed"),
                Permission::None
            );
        }
    }

    describe "private links" {
        it "grants read access to the linked nodes" {
            let link = db
                .create_private_link(project.id, link_input("Reviewers", vec![]), &auth)
                .expect("Failed to create link");

            assert_eq!(link.node_ids, vec![project.id]);
            assert_eq!(link.key.len(), 32);

            let reviewer = Auth::anonymous().with_private_key(link.key.clone());
            assert!(db.can_view(&reviewer, project.id).expect("Query failed"));
            db.node_tree(project.id, &reviewer).expect("Failed to read tree");
        }

        it "puts the root first and covers additional nodes" {
            let component = create_component(&db, owner, &project, "Child");
            let unlinked = create_component(&db, owner, &project, "Unlinked");

            let link = db
                .create_private_link(project.id, link_input("Reviewers", vec![component.id, project.id]), &auth)
                .expect("Failed to create link");

            assert_eq!(link.node_ids, vec![project.id, component.id]);
            let reviewer = Auth::anonymous().with_private_key(link.key);
            assert!(db.can_view(&reviewer, component.id).expect("Query failed"));
            assert!(!db.can_view(&reviewer, unlinked.id).expect("Query failed"));
        }

        it "never grants write access" {
            let link = db
                .create_private_link(project.id, link_input("Reviewers", vec![]), &auth)
                .expect("Failed to create link");
            let reviewer = Auth::user(other).with_private_key(link.key);

            let err = db
                .update_fields(
                    project.id,
                    &json!({ "title": "Hijacked" }).as_object().cloned().expect("object"),
                    &reviewer,
                )
                .unwrap_err();
            assert!(matches!(err, NodeError::PermissionDenied(_)));
        }

        it "stops granting access once removed" {
            let link = db
                .create_private_link(project.id, link_input("Reviewers", vec![]), &auth)
                .expect("Failed to create link");

            db.remove_private_link(link.id, &auth).expect("Failed to remove link");

            let reviewer = Auth::anonymous().with_private_key(link.key.clone());
            assert!(!db.can_view(&reviewer, project.id).expect("Query failed"));
            assert!(db.get_private_link(link.id).expect("Query failed").is_deleted);
            assert!(matches!(
                db.get_private_link_by_key(&link.key).unwrap_err(),
                NodeError::NotFound { .. }
            ));
        }

        it "renames a link and lists it for the node" {
            let link = db
                .create_private_link(project.id, link_input("Draft", vec![]), &auth)
                .expect("Failed to create link");

            let renamed = db
                .rename_private_link(link.id, "Journal review", &auth)
                .expect("Failed to rename");
            assert_eq!(renamed.name, "Journal review");

            let links = db.private_links_for(project.id, &auth).expect("Query failed");
            assert_eq!(links.len(), 1);
            assert_eq!(links[0].name, "Journal review");
            assert_eq!(db.get_private_link_by_key(&link.key).expect("Query failed").id, link.id);
        }

        it "rejects a blank name" {
            let err = db
                .create_private_link(project.id, link_input("  ", vec![]), &auth)
                .unwrap_err();
            assert!(matches!(err, NodeError::Validation(_)));
        }

        it "requires admin on the root" {
            db.add_contributor(project.id, other, Permission::Write, true, &auth)
                .expect("Failed to add contributor");

            let err = db
                .create_private_link(project.id, link_input("Mine", vec![]), &Auth::user(other))
                .unwrap_err();
            assert!(matches!(err, NodeError::PermissionDenied(_)));
        }
    }

    describe "registrations" {
        it "freezes a copy of the subtree" {
            let component = create_component(&db, owner, &project, "Hypotheses");
            db.add_contributor(project.id, other, Permission::Write, true, &auth)
                .expect("Failed to add contributor");

            let registration = db.register_node(project.id, &auth).expect("Failed to register");

            assert!(registration.is_registration());
            assert_eq!(registration.registered_from, Some(project.id));
            assert_eq!(registration.registration_state, Some(RegistrationState::Archiving));
            assert!(!registration.is_public);

            let children = db.active_children(registration.id).expect("Query failed");
            assert_eq!(children.len(), 1);
            assert_eq!(children[0].registered_from, Some(component.id));
            assert!(children[0].is_registration());

            let users: Vec<Uuid> = db
                .contributors(registration.id)
                .expect("Query failed")
                .into_iter()
                .map(|c| c.user_id)
                .collect();
            assert_eq!(users, vec![owner, other]);

            let registrations = db.registrations_of(project.id).expect("Query failed");
            assert_eq!(registrations.len(), 1);
            assert_eq!(registrations[0].id, registration.id);
        }

        it "keeps pointers, re-targeting those inside the subtree" {
            let data = create_component(&db, owner, &project, "Data");
            let analysis = create_component(&db, owner, &project, "Analysis");
            let outside = create_project(&db, owner, "Outside");
            db.add_pointers(analysis.id, &[data.id, outside.id], &auth)
                .expect("Failed to add pointers");

            let registration = db.register_node(project.id, &auth).expect("Failed to register");

            let children = db.active_children(registration.id).expect("Query failed");
            let targets: Vec<Uuid> = db
                .pointers_from(children[1].id)
                .expect("Query failed")
                .into_iter()
                .map(|pointer| pointer.target_id)
                .collect();
            assert_eq!(targets, vec![children[0].id, outside.id]);
        }

        it "rejects mutations" {
            let registration = db.register_node(project.id, &auth).expect("Failed to register");
            let outside = create_project(&db, owner, "Outside");

            let errors = vec![
                db.update_fields(
                    registration.id,
                    &json!({ "title": "Changed" }).as_object().cloned().expect("object"),
                    &auth,
                )
                .map(|_| ())
                .unwrap_err(),
                db.create_node(
                    CreateNodeInput::component(registration.id, "Late", NodeCategory::Other),
                    &auth,
                )
                .map(|_| ())
                .unwrap_err(),
                db.soft_delete(registration.id, &auth).map(|_| ()).unwrap_err(),
                db.add_pointers(registration.id, &[outside.id], &auth).map(|_| ()).unwrap_err(),
                db.add_contributor(registration.id, other, Permission::Read, true, &auth)
                    .map(|_| ())
                    .unwrap_err(),
                db.reorder_children(registration.id, &[], &auth).map(|_| ()).unwrap_err(),
                db.register_node(registration.id, &auth).map(|_| ()).unwrap_err(),
            ];

            for err in errors {
                assert!(matches!(err, NodeError::NodeState(_)), "unexpected error {:?}", err);
            }
        }

        it "advances archiving to complete to retracted" {
            let registration = db.register_node(project.id, &auth).expect("Failed to register");
            let component_count = db.active_children(registration.id).expect("Query failed").len();
            assert_eq!(component_count, 0);

            let complete = db
                .set_registration_state(registration.id, RegistrationState::Complete, &auth)
                .expect("Failed to complete");
            assert_eq!(complete.registration_state, Some(RegistrationState::Complete));

            let err = db
                .set_registration_state(registration.id, RegistrationState::Archiving, &auth)
                .unwrap_err();
            assert!(matches!(err, NodeError::NodeState(_)));

            let retracted = db
                .set_registration_state(registration.id, RegistrationState::Retracted, &auth)
                .expect("Failed to retract");
            assert_eq!(retracted.registration_state, Some(RegistrationState::Retracted));
        }

        it "cannot skip from archiving to retracted" {
            let registration = db.register_node(project.id, &auth).expect("Failed to register");

            let err = db
                .set_registration_state(registration.id, RegistrationState::Retracted, &auth)
                .unwrap_err();
            assert!(matches!(err, NodeError::NodeState(_)));
        }

        it "requires admin to register" {
            db.add_contributor(project.id, other, Permission::Write, true, &auth)
                .expect("Failed to add contributor");

            let err = db.register_node(project.id, &Auth::user(other)).unwrap_err();
            assert!(matches!(err, NodeError::PermissionDenied(_)));
            assert!(db.registrations_of(project.id).expect("Query failed").is_empty());
        }
    }
}
