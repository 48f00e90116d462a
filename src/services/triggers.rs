//! Assign triggers: role side-effects of writes
//!
//! Every ASSIGN statement compiles to a trigger watching its user-role
//! table. When a validated write touches that table, the trigger emits role
//! edits describing how the current user's membership changed, which the
//! write buffer folds into the transient role set for the rest of the
//! transaction.

use std::collections::HashMap;

use anyhow::Context as _;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    AssignSpec, Auth, DataChange, Record, Relation, Role, RoleSource, RowId, SchemaInfo, Scope,
};
use crate::services::check::{CheckContext, CompiledCheck};

/// A role edit produced by applying a change to a watched table
#[derive(Debug, Clone, PartialEq)]
pub enum RoleEdit {
    Insert(Role),
    Update(Role),
    Delete(Role),
}

/// One compiled ASSIGN trigger
#[derive(Debug, Clone)]
pub struct AssignTrigger {
    assign_id: Uuid,
    user_column: String,
    role_source: RoleSource,
    scope: Option<Relation>,
    /// Columns on the watched table referencing the scope relation
    scope_fk: Option<Vec<String>>,
    condition: Option<CompiledCheck>,
}

impl AssignTrigger {
    fn compile(spec: &AssignSpec, schema: &SchemaInfo) -> anyhow::Result<Self> {
        let scope_fk = match &spec.scope {
            Some(scope) => {
                let fk = schema.direct_fk(&spec.table, scope).with_context(|| {
                    format!(
                        "assign {} on {} is scoped to {} but the table has no foreign key to it",
                        spec.id, spec.table, scope
                    )
                })?;
                Some(fk.columns.clone())
            }
            None => None,
        };
        let condition = spec
            .condition
            .as_ref()
            .map(CompiledCheck::compile)
            .transpose()
            .with_context(|| format!("assign {} has an invalid IF clause", spec.id))?;
        Ok(Self {
            assign_id: spec.id,
            user_column: spec.user_column.clone(),
            role_source: spec.role.clone(),
            scope: spec.scope.clone(),
            scope_fk,
            condition,
        })
    }

    /// The role this row confers on the authenticated user, or `None` when
    /// the row is bound to somebody else, fails the IF clause, or carries
    /// no usable role name or scope.
    fn role_for(&self, record: &Record, auth: &Auth) -> Option<Role> {
        let user_id = auth.user_id.as_deref()?;
        if string_column(record, &self.user_column)? != user_id {
            return None;
        }

        if let Some(condition) = &self.condition {
            match condition.evaluate(CheckContext { record, auth }) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => {
                    warn!(assign = %self.assign_id, %err, "assign IF clause failed to evaluate, row ignored");
                    return None;
                }
            }
        }

        let role_name = match &self.role_source {
            RoleSource::Static(name) => name.clone(),
            RoleSource::Column(col) => string_column(record, col)?,
        };

        match (&self.scope, &self.scope_fk) {
            (Some(scope_relation), Some(fk_columns)) => {
                let scope_id = fk_row_id(record, fk_columns)?;
                Some(Role::Scoped {
                    assign_id: self.assign_id,
                    user_id: user_id.to_string(),
                    role_name,
                    scope: Scope {
                        relation: scope_relation.clone(),
                        id: scope_id,
                    },
                })
            }
            _ => Some(Role::Unscoped {
                assign_id: self.assign_id,
                user_id: user_id.to_string(),
                role_name,
            }),
        }
    }

    /// Apply a change to this trigger, producing the role edits it implies
    /// for the authenticated user.
    fn apply(&self, change: &DataChange, auth: &Auth) -> Vec<RoleEdit> {
        match change {
            DataChange::Insert { record, .. } => self
                .role_for(record, auth)
                .map(RoleEdit::Insert)
                .into_iter()
                .collect(),
            DataChange::Delete { old_record, .. } => self
                .role_for(old_record, auth)
                .map(RoleEdit::Delete)
                .into_iter()
                .collect(),
            DataChange::Update {
                old_record, record, ..
            } => {
                let old_role = self.role_for(old_record, auth);
                let new_role = self.role_for(record, auth);
                match (old_role, new_role) {
                    (None, None) => vec![],
                    (None, Some(role)) => vec![RoleEdit::Insert(role)],
                    (Some(role), None) => vec![RoleEdit::Delete(role)],
                    (Some(old), Some(new)) => {
                        if old.scope() == new.scope() {
                            vec![RoleEdit::Update(new)]
                        } else {
                            // The row kept its user but moved to another
                            // scope root: retire the old entry.
                            vec![RoleEdit::Delete(old), RoleEdit::Insert(new)]
                        }
                    }
                }
            }
        }
    }
}

/// Triggers grouped by the relation they watch
#[derive(Debug, Clone, Default)]
pub struct TriggerTable {
    triggers: HashMap<Relation, Vec<AssignTrigger>>,
}

impl TriggerTable {
    pub fn compile(assigns: &[AssignSpec], schema: &SchemaInfo) -> anyhow::Result<Self> {
        let mut triggers: HashMap<Relation, Vec<AssignTrigger>> = HashMap::new();
        for assign in assigns {
            let trigger = AssignTrigger::compile(assign, schema)?;
            triggers.entry(assign.table.clone()).or_default().push(trigger);
        }
        Ok(Self { triggers })
    }

    /// Role edits implied by a change, in trigger declaration order.
    /// Changes to unwatched relations emit nothing.
    pub fn apply(&self, change: &DataChange, auth: &Auth) -> Vec<RoleEdit> {
        let Some(triggers) = self.triggers.get(change.relation()) else {
            return Vec::new();
        };
        triggers
            .iter()
            .flat_map(|trigger| trigger.apply(change, auth))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

fn string_column(record: &Record, column: &str) -> Option<String> {
    match record.get(column)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn fk_row_id(record: &Record, columns: &[String]) -> Option<RowId> {
    let mut parts = Vec::with_capacity(columns.len());
    for col in columns {
        match record.get(col)? {
            serde_json::Value::Null => return None,
            serde_json::Value::String(s) => parts.push(s.clone()),
            other => parts.push(other.to_string()),
        }
    }
    Some(RowId(parts))
}
