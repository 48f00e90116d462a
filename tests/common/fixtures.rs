//! Test fixtures for common test data
//!
//! The canonical universe is a project tracker: projects own issues,
//! issues own comments, and `project_members` rows confer scoped roles via
//! an ASSIGN. Fixed UUIDs keep tests reproducible.

use fluxsync_permissions::models::{ForeignKey, Record, RoleRecord, SchemaInfo, TableInfo};
use fluxsync_permissions::{InMemoryGraph, Relation, Scope};
use serde_json::json;

/// Fixed UUIDs for testing (reproducible tests)
pub mod ids {
    use uuid::Uuid;

    /// The ASSIGN materializing project membership roles
    pub const MEMBERSHIP_ASSIGN: Uuid = Uuid::from_u128(0x00000000_0000_0000_0000_0000000000a1);
    /// The ASSIGN materializing unscoped admin roles
    pub const ADMIN_ASSIGN: Uuid = Uuid::from_u128(0x00000000_0000_0000_0000_0000000000a2);
    /// An ASSIGN that is never part of the rules (for staleness tests)
    pub const RETIRED_ASSIGN: Uuid = Uuid::from_u128(0x00000000_0000_0000_0000_0000000000a9);
}

pub fn projects() -> Relation {
    Relation::public("projects")
}

pub fn issues() -> Relation {
    Relation::public("issues")
}

pub fn comments() -> Relation {
    Relation::public("comments")
}

pub fn project_members() -> Relation {
    Relation::public("project_members")
}

pub fn admins() -> Relation {
    Relation::public("admins")
}

/// Build a record from column/value pairs
pub fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// The canonical project-tracker schema
pub fn schema() -> SchemaInfo {
    let fk = |col: &str, to: Relation| ForeignKey {
        columns: vec![col.to_string()],
        references: to,
        referenced_columns: vec!["id".to_string()],
    };
    SchemaInfo::new(vec![
        TableInfo {
            relation: projects(),
            columns: vec!["id".into(), "name".into(), "owner".into()],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
        },
        TableInfo {
            relation: issues(),
            columns: vec![
                "id".into(),
                "project_id".into(),
                "title".into(),
                "priority".into(),
                "owner".into(),
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![fk("project_id", projects())],
        },
        TableInfo {
            relation: comments(),
            columns: vec!["id".into(), "issue_id".into(), "body".into()],
            primary_key: vec!["id".into()],
            foreign_keys: vec![fk("issue_id", issues())],
        },
        TableInfo {
            relation: project_members(),
            columns: vec!["id".into(), "user_id".into(), "project_id".into(), "role".into()],
            primary_key: vec!["id".into()],
            foreign_keys: vec![fk("project_id", projects())],
        },
        TableInfo {
            relation: admins(),
            columns: vec!["id".into(), "user_id".into()],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
        },
    ])
}

/// Graph rows: projects p1, p7 and p8; issue 42 lives under p7
pub fn base_graph() -> InMemoryGraph {
    let mut graph = InMemoryGraph::new(schema());
    for project in ["p1", "p7", "p8"] {
        graph.insert(
            projects(),
            record(&[("id", json!(project)), ("name", json!(project)), ("owner", json!("root"))]),
        );
    }
    graph.insert(
        issues(),
        record(&[
            ("id", json!("i42")),
            ("project_id", json!("p7")),
            ("title", json!("universal answer")),
            ("priority", json!(2)),
            ("owner", json!("alice")),
        ]),
    );
    graph.insert(issues(), issue_43());
    graph.insert(
        comments(),
        record(&[("id", json!("c1")), ("issue_id", json!("i42")), ("body", json!("hi"))]),
    );
    graph
}

/// An issue under project p8, owned by bob
pub fn issue_43() -> Record {
    record(&[
        ("id", json!("i43")),
        ("project_id", json!("p8")),
        ("title", json!("other project work")),
        ("priority", json!(5)),
        ("owner", json!("bob")),
    ])
}

/// The issue 42 row as stored in [`base_graph`]
pub fn issue_42() -> Record {
    record(&[
        ("id", json!("i42")),
        ("project_id", json!("p7")),
        ("title", json!("universal answer")),
        ("priority", json!(2)),
        ("owner", json!("alice")),
    ])
}

/// A membership role row for `user` in `project`
pub fn member_role(user: &str, project: &str) -> RoleRecord {
    RoleRecord {
        assign_id: ids::MEMBERSHIP_ASSIGN,
        user_id: user.to_string(),
        role_name: "member".to_string(),
        scope: Some(Scope::new(projects(), project)),
    }
}

/// An unscoped admin role row for `user`
pub fn admin_role(user: &str) -> RoleRecord {
    RoleRecord {
        assign_id: ids::ADMIN_ASSIGN,
        user_id: user.to_string(),
        role_name: "admin".to_string(),
        scope: None,
    }
}
