//! The decision engine: validating writes and filtering reads
//!
//! Both paths share one matching procedure: look up the candidate
//! role-grants for `(relation, privilege)`, try the unscoped candidates
//! first (no graph traversal), then the scoped candidates whose scope root
//! contains the change, then transient permissions. The first grant that
//! accepts the change decides it; candidates never veto each other.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::models::{
    DataChange, Lsn, Privilege, Record, Relation, RowId, TablePermission, Transaction,
};
use crate::services::check::{CheckContext, CheckError};
use crate::services::graph::{Graph, ScopePath};
use crate::services::permissions::{AssignedRoles, Permissions, RoleGrant};
use crate::services::transient::TransientStore;
use crate::utils::error::PermissionError;

/// A change dropped from an outbound transaction because its own mutation
/// made it unreadable: the client must delete the row locally.
#[derive(Debug, Clone)]
pub struct MoveOut {
    pub relation: Relation,
    pub id: RowId,
    /// The chain from the row to the scope root it was readable under
    pub scope_path: ScopePath,
    pub change: DataChange,
}

/// What one authorization decision is made about: a real change, or the
/// synthetic scope-move half of an update that crosses scope roots.
enum Checkable<'a> {
    Change(&'a DataChange),
    ScopeMove {
        /// The scope relation the row moved within; scoped candidates are
        /// restricted to it so entering the new scope needs its own
        /// authorization
        scope_relation: &'a Relation,
        relation: &'a Relation,
        record: &'a Record,
        changed_columns: &'a BTreeSet<String>,
    },
}

impl<'a> Checkable<'a> {
    fn relation(&self) -> &Relation {
        match self {
            Checkable::Change(change) => change.relation(),
            Checkable::ScopeMove { relation, .. } => relation,
        }
    }

    fn privilege(&self) -> Privilege {
        match self {
            Checkable::Change(change) => change.required_privilege(),
            Checkable::ScopeMove { .. } => Privilege::Update,
        }
    }

    /// The row image scope containment is resolved against. Updates and
    /// deletes resolve where the row currently is; the scope-move half
    /// resolves where the update puts it.
    fn resolution_record(&self) -> &Record {
        match self {
            Checkable::Change(DataChange::Insert { record, .. }) => record,
            Checkable::Change(DataChange::Update { old_record, .. })
            | Checkable::Change(DataChange::Delete { old_record, .. }) => old_record,
            Checkable::ScopeMove { record, .. } => record,
        }
    }

    /// The row image CHECK expressions see
    fn check_record(&self) -> &Record {
        match self {
            Checkable::Change(DataChange::Delete { old_record, .. }) => old_record,
            Checkable::Change(change) => change.record(),
            Checkable::ScopeMove { record, .. } => record,
        }
    }

    /// Columns the column rule applies to; `None` for deletes
    fn columns(&self) -> Option<Vec<&String>> {
        match self {
            Checkable::Change(DataChange::Insert { record, .. }) => Some(record.keys().collect()),
            Checkable::Change(DataChange::Update {
                changed_columns, ..
            }) => Some(changed_columns.iter().collect()),
            Checkable::ScopeMove {
                changed_columns, ..
            } => Some(changed_columns.iter().collect()),
            Checkable::Change(DataChange::Delete { .. }) => None,
        }
    }

    /// For scope moves, the scope relation candidates must belong to
    fn scope_restriction(&self) -> Option<&Relation> {
        match self {
            Checkable::ScopeMove { scope_relation, .. } => Some(scope_relation),
            Checkable::Change(_) => None,
        }
    }
}

impl Permissions {
    /// Validate an inbound client transaction as a whole.
    ///
    /// Changes are checked in order; each accepted change is layered into
    /// the write buffer and run through the assign triggers before the
    /// next is considered, so a transaction can create a scope root (or a
    /// role-conferring row) and rely on it later. The first denial aborts
    /// the whole transaction and leaves `self` untouched.
    pub fn validate_write(
        &self,
        upstream: &dyn Graph,
        tx: &Transaction,
    ) -> Result<Permissions, PermissionError> {
        let mut next = self.clone();
        for change in &tx.changes {
            {
                let graph = next.write_buffer.with_upstream(upstream);
                for checkable in expand(&next, &graph, change) {
                    let role_grant = decide_write(&next, &graph, tx.lsn, &checkable)?;
                    debug!(
                        relation = %checkable.relation(),
                        privilege = %checkable.privilege(),
                        role = %role_grant.role,
                        "change allowed"
                    );
                }
            }
            let edits = next.triggers.apply(change, &next.auth);
            next.write_buffer.apply_change(&next.schema, change);
            if !edits.is_empty() {
                next.write_buffer.update_transient_roles(edits, &next.grants);
            }
        }
        Ok(next)
    }

    /// Filter an outbound transaction down to the changes the session may
    /// observe. Updates that were readable before but not after their own
    /// mutation are reported as move-outs for the shapes subsystem.
    pub fn filter_read(&self, graph: &dyn Graph, tx: &Transaction) -> (Transaction, Vec<MoveOut>) {
        let mut kept: Vec<DataChange> = Vec::new();
        let mut move_outs: Vec<MoveOut> = Vec::new();

        for change in &tx.changes {
            let accepting = read_accepting(
                self,
                graph,
                tx.lsn,
                change.relation(),
                post_image(change),
                post_image(change),
            );
            if !accepting.is_empty() {
                if let Some(projected) = project_change(self, change, &accepting) {
                    kept.push(projected);
                }
                continue;
            }

            // Not readable any more. An update readable in its pre-image
            // state became unreadable through its own mutation.
            if let DataChange::Update { old_record, .. } = change {
                let before =
                    read_accepting(self, graph, tx.lsn, change.relation(), old_record, old_record);
                if let Some((_, scope_path)) = before.into_iter().next() {
                    if let Some(id) = self.schema.row_id(change.relation(), old_record) {
                        debug!(relation = %change.relation(), %id, "change moved out of scope");
                        move_outs.push(MoveOut {
                            relation: change.relation().clone(),
                            id,
                            scope_path,
                            change: change.clone(),
                        });
                    }
                }
            }
        }

        (Transaction::new(tx.lsn, kept), move_outs)
    }

    /// Observe the session's own transaction arriving back on the
    /// replication stream: pending buffer state it covered is dropped.
    pub fn receive_transaction(&self, tx: &Transaction) -> Permissions {
        let mut next = self.clone();
        next.write_buffer.receive_transaction(&next.schema, tx);
        next
    }
}

/// Expand an update into the original change plus one synthetic scope-move
/// per scope relation whose foreign keys it modified. Never recursive:
/// scope moves are not themselves expanded.
fn expand<'a>(
    perms: &'a Permissions,
    graph: &dyn Graph,
    change: &'a DataChange,
) -> Vec<Checkable<'a>> {
    let mut out = vec![Checkable::Change(change)];
    if let DataChange::Update {
        relation,
        record,
        changed_columns,
        ..
    } = change
    {
        for scope_relation in perms.scopes.iter() {
            if graph.modified_fks(scope_relation, change).is_empty() {
                continue;
            }
            debug!(%relation, scope = %scope_relation, "update moves the row between scope roots");
            out.push(Checkable::ScopeMove {
                scope_relation,
                relation,
                record,
                changed_columns,
            });
        }
    }
    out
}

/// The write-path decision for one checkable: the first accepting
/// role-grant, or the denial/evaluation error.
fn decide_write(
    perms: &Permissions,
    graph: &dyn Graph,
    lsn: Lsn,
    checkable: &Checkable<'_>,
) -> Result<RoleGrant, PermissionError> {
    let action = TablePermission::new(checkable.relation().clone(), checkable.privilege());
    let denial = || PermissionError::denied(checkable.privilege(), checkable.relation());

    // Roles materialized earlier in this transaction augment (or create)
    // the compiled bucket.
    let empty = AssignedRoles::default();
    let base = perms.roles.get(&action).unwrap_or(&empty);
    let bucket = perms.write_buffer.transient_roles(base, &action);
    if bucket.is_empty() {
        return Err(denial());
    }

    let eval_error = |err: CheckError| PermissionError::CheckEvaluation {
        relation: checkable.relation().clone(),
        reason: err.to_string(),
    };

    for role_grant in &bucket.unscoped {
        if accepts(perms, role_grant, checkable, true).map_err(eval_error)? {
            return Ok(role_grant.clone());
        }
    }

    let resolution = checkable.resolution_record();
    for role_grant in &bucket.scoped {
        let Some(scope) = role_grant.role.scope() else {
            continue;
        };
        if let Some(restriction) = checkable.scope_restriction() {
            if &scope.relation != restriction {
                continue;
            }
        }
        let roots = graph.scope_id(&scope.relation, checkable.relation(), resolution);
        if !roots.iter().any(|(id, _)| id == &scope.id) {
            continue;
        }
        if accepts(perms, role_grant, checkable, true).map_err(eval_error)? {
            return Ok(role_grant.clone());
        }
    }

    let store = TransientStore::named(&perms.transient_lut);
    for (role_grant, transient) in store.for_roles(&bucket.scoped, lsn) {
        if let Some(restriction) = checkable.scope_restriction() {
            if &transient.target_relation != restriction {
                continue;
            }
        }
        let roots = graph.scope_id(&transient.target_relation, checkable.relation(), resolution);
        if !roots.iter().any(|(id, _)| id == &transient.target_id) {
            continue;
        }
        if accepts(perms, &role_grant, checkable, true).map_err(eval_error)? {
            return Ok(role_grant);
        }
    }

    Err(denial())
}

/// Whether one grant accepts the change: column rule (writes only) then
/// CHECK rule.
fn accepts(
    perms: &Permissions,
    role_grant: &RoleGrant,
    checkable: &Checkable<'_>,
    enforce_columns: bool,
) -> Result<bool, CheckError> {
    if enforce_columns {
        if let Some(columns) = checkable.columns() {
            if !role_grant.grant.allows_columns(columns.into_iter()) {
                return Ok(false);
            }
        }
    }
    if let Some(check) = &role_grant.grant.check {
        return check.evaluate(CheckContext {
            record: checkable.check_record(),
            auth: &perms.auth,
        });
    }
    Ok(true)
}

/// The row image a read decision is made against
fn post_image(change: &DataChange) -> &Record {
    change.record()
}

/// Every role-grant accepting a read of `record`, each with the scope path
/// it was contained under (empty for unscoped grants). The read path never
/// consults the write buffer: the read graph is authoritative.
fn read_accepting(
    perms: &Permissions,
    graph: &dyn Graph,
    lsn: Lsn,
    relation: &Relation,
    resolution_record: &Record,
    check_record: &Record,
) -> Vec<(RoleGrant, ScopePath)> {
    let action = TablePermission::new(relation.clone(), Privilege::Select);
    let Some(bucket) = perms.roles.get(&action) else {
        return Vec::new();
    };

    let apply_checks = perms.config.read.apply_checks;
    let mut accepting: Vec<(RoleGrant, ScopePath)> = Vec::new();

    let passes = |role_grant: &RoleGrant| -> bool {
        if !apply_checks {
            return true;
        }
        let Some(check) = &role_grant.grant.check else {
            return true;
        };
        match check.evaluate(CheckContext {
            record: check_record,
            auth: &perms.auth,
        }) {
            Ok(value) => value,
            Err(err) => {
                warn!(%relation, %err, "CHECK failed to evaluate on read, change filtered");
                false
            }
        }
    };

    for role_grant in &bucket.unscoped {
        if passes(role_grant) {
            accepting.push((role_grant.clone(), ScopePath::new()));
        }
    }

    for role_grant in &bucket.scoped {
        let Some(scope) = role_grant.role.scope() else {
            continue;
        };
        let roots = graph.scope_id(&scope.relation, relation, resolution_record);
        if let Some((_, path)) = roots.into_iter().find(|(id, _)| id == &scope.id) {
            if passes(role_grant) {
                accepting.push((role_grant.clone(), path));
            }
        }
    }

    let store = TransientStore::named(&perms.transient_lut);
    for (role_grant, transient) in store.for_roles(&bucket.scoped, lsn) {
        let roots = graph.scope_id(&transient.target_relation, relation, resolution_record);
        if let Some((_, path)) = roots
            .into_iter()
            .find(|(id, _)| id == &transient.target_id)
        {
            if passes(&role_grant) {
                accepting.push((role_grant, path));
            }
        }
    }

    accepting
}

/// Project an outbound change to the columns the accepting grants expose.
/// Primary-key columns are always kept. Returns `None` when projection
/// leaves an update with nothing visible to say.
fn project_change(
    perms: &Permissions,
    change: &DataChange,
    accepting: &[(RoleGrant, ScopePath)],
) -> Option<DataChange> {
    if !perms.config.read.apply_column_projection {
        return Some(change.clone());
    }

    // A single accepting grant without a column list exposes everything.
    let mut visible: HashSet<String> = HashSet::new();
    for (role_grant, _) in accepting {
        match &role_grant.grant.columns {
            None => return Some(change.clone()),
            Some(columns) => visible.extend(columns.iter().cloned()),
        }
    }
    for pk in perms.schema.primary_key(change.relation()) {
        visible.insert(pk.clone());
    }

    let keep = |record: &Record| -> Record {
        record
            .iter()
            .filter(|(col, _)| visible.contains(*col))
            .map(|(col, value)| (col.clone(), value.clone()))
            .collect()
    };

    Some(match change {
        DataChange::Insert { relation, record } => DataChange::Insert {
            relation: relation.clone(),
            record: keep(record),
        },
        DataChange::Update {
            relation,
            old_record,
            record,
            changed_columns,
        } => {
            let changed: BTreeSet<String> = changed_columns
                .iter()
                .filter(|col| visible.contains(*col))
                .cloned()
                .collect();
            if changed.is_empty() {
                return None;
            }
            DataChange::Update {
                relation: relation.clone(),
                old_record: keep(old_record),
                record: keep(record),
                changed_columns: changed,
            }
        }
        DataChange::Delete {
            relation,
            old_record,
        } => DataChange::Delete {
            relation: relation.clone(),
            old_record: keep(old_record),
        },
    })
}
