//! Test factories for generating test data
//!
//! Builder-style helpers for rules and changes, plus a counter-based
//! factory for unique issue rows.

use std::sync::atomic::{AtomicU64, Ordering};

use fluxsync_permissions::models::{
    AssignSpec, CheckExpr, CheckOp, CheckOperand, GrantSpec, RoleSource, RulesSpec,
};
use fluxsync_permissions::{DataChange, Lsn, Privilege, Relation, Transaction};
use serde_json::json;
use uuid::Uuid;

use super::fixtures::{self, record};

/// Builder for GRANT specs
pub struct GrantBuilder {
    spec: GrantSpec,
}

impl GrantBuilder {
    pub fn new(privilege: Privilege, table: Relation, role: &str) -> Self {
        Self {
            spec: GrantSpec {
                table,
                privilege,
                role: role.to_string(),
                columns: None,
                check: None,
                scope: None,
            },
        }
    }

    pub fn scoped(mut self, scope: Relation) -> Self {
        self.spec.scope = Some(scope);
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.spec.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn check(mut self, check: CheckExpr) -> Self {
        self.spec.check = Some(check);
        self
    }

    pub fn build(self) -> GrantSpec {
        self.spec
    }
}

/// GRANT <privilege> ON <table> TO <role>
pub fn grant(privilege: Privilege, table: Relation, role: &str) -> GrantSpec {
    GrantBuilder::new(privilege, table, role).build()
}

/// GRANT <privilege> ON <table> TO <role> SCOPED TO <scope>
pub fn scoped_grant(
    privilege: Privilege,
    table: Relation,
    role: &str,
    scope: Relation,
) -> GrantSpec {
    GrantBuilder::new(privilege, table, role).scoped(scope).build()
}

/// The membership ASSIGN: project_members rows confer their `role` column
/// scoped to the referenced project
pub fn membership_assign() -> AssignSpec {
    AssignSpec {
        id: fixtures::ids::MEMBERSHIP_ASSIGN,
        table: fixtures::project_members(),
        user_column: "user_id".to_string(),
        role: RoleSource::Column("role".to_string()),
        scope: Some(fixtures::projects()),
        condition: None,
    }
}

/// An unscoped ASSIGN with a static role name
pub fn static_assign(id: Uuid, table: Relation, role: &str) -> AssignSpec {
    AssignSpec {
        id,
        table,
        user_column: "user_id".to_string(),
        role: RoleSource::Static(role.to_string()),
        scope: None,
        condition: None,
    }
}

/// Rules from grant and assign lists
pub fn rules(grants: Vec<GrantSpec>, assigns: Vec<AssignSpec>) -> RulesSpec {
    RulesSpec { grants, assigns }
}

/// `column <op> literal` comparison
pub fn column_check(column: &str, op: CheckOp, value: serde_json::Value) -> CheckExpr {
    CheckExpr::Cmp {
        left: CheckOperand::Column(column.to_string()),
        op,
        right: CheckOperand::Literal(value),
    }
}

/// `column = auth.user_id` comparison
pub fn owner_check(column: &str) -> CheckExpr {
    CheckExpr::Cmp {
        left: CheckOperand::Column(column.to_string()),
        op: CheckOp::Eq,
        right: CheckOperand::Auth("user_id".to_string()),
    }
}

/// A single-change transaction at lsn 1
pub fn tx(change: DataChange) -> Transaction {
    Transaction::new(Lsn(1), vec![change])
}

pub fn tx_at(lsn: u64, changes: Vec<DataChange>) -> Transaction {
    Transaction::new(Lsn(lsn), changes)
}

/// Factory for unique issue rows
pub struct IssueFactory {
    counter: AtomicU64,
}

impl Default for IssueFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl IssueFactory {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// An insert of a fresh issue under `project`
    pub fn insert(&self, project: &str, owner: &str) -> DataChange {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        DataChange::Insert {
            relation: fixtures::issues(),
            record: record(&[
                ("id", json!(format!("gen-i{n}"))),
                ("project_id", json!(project)),
                ("title", json!(format!("issue {n}"))),
                ("priority", json!(3)),
                ("owner", json!(owner)),
            ]),
        }
    }
}

/// An update of issue 42 setting the given columns
pub fn update_issue_42(set: &[(&str, serde_json::Value)]) -> DataChange {
    let old = fixtures::issue_42();
    let mut new = old.clone();
    for (col, value) in set {
        new.insert(col.to_string(), value.clone());
    }
    DataChange::update(fixtures::issues(), old, new)
}

/// An insert making `user` a member of `project`
pub fn membership_insert(user: &str, project: &str, role: &str) -> DataChange {
    DataChange::Insert {
        relation: fixtures::project_members(),
        record: record(&[
            ("id", json!(format!("m-{user}-{project}"))),
            ("user_id", json!(user)),
            ("project_id", json!(project)),
            ("role", json!(role)),
        ]),
    }
}
