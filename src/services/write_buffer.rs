//! The write buffer: pending changes layered over the data graph
//!
//! A client transaction is validated change by change, and later changes
//! may depend on earlier ones: a transaction can create a project and then
//! insert an issue under it. The buffer records validated changes as an
//! overlay that shadows the upstream graph during scope resolution, and
//! carries the transient roles that assign triggers materialized, until the
//! transaction loops back from the upstream and the overlay becomes
//! redundant.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::models::{
    DataChange, Record, Relation, RowId, SchemaInfo, Scope, TablePermission, Transaction,
};
use crate::services::graph::Graph;
use crate::services::permissions::{AssignedRoles, Grant, RoleGrant};
use crate::services::triggers::RoleEdit;

/// Identity of a pending role: one per assign and scope root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PendingKey {
    assign_id: Uuid,
    scope: Option<Scope>,
}

impl PendingKey {
    fn of(role: &crate::models::Role) -> Option<Self> {
        Some(Self {
            assign_id: role.assign_id()?,
            scope: role.scope().cloned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OverlayRow {
    Present(Record),
    Deleted,
}

/// Pending writes and transient roles for one session
#[derive(Debug, Clone, Default)]
pub struct WriteBuffer {
    overlay: HashMap<Relation, BTreeMap<RowId, OverlayRow>>,
    pending_roles: HashMap<PendingKey, Vec<RoleGrant>>,
}

impl WriteBuffer {
    pub fn is_empty(&self) -> bool {
        self.overlay.is_empty() && self.pending_roles.is_empty()
    }

    /// Bind the buffer over an upstream graph for the duration of a
    /// decision. The returned view implements [`Graph`] with the overlay
    /// shadowing upstream rows.
    pub fn with_upstream<'a>(&'a self, upstream: &'a dyn Graph) -> BufferedGraph<'a> {
        BufferedGraph {
            buffer: self,
            upstream,
        }
    }

    /// Record a validated change so subsequent lookups observe it
    pub fn apply_change(&mut self, schema: &SchemaInfo, change: &DataChange) {
        match change {
            DataChange::Insert { relation, record }
            | DataChange::Update {
                relation, record, ..
            } => {
                if let Some(id) = schema.row_id(relation, record) {
                    self.overlay
                        .entry(relation.clone())
                        .or_default()
                        .insert(id, OverlayRow::Present(record.clone()));
                }
            }
            DataChange::Delete {
                relation,
                old_record,
            } => {
                if let Some(id) = schema.row_id(relation, old_record) {
                    self.overlay
                        .entry(relation.clone())
                        .or_default()
                        .insert(id, OverlayRow::Deleted);
                }
            }
        }
    }

    /// Integrate role edits produced by assign triggers, matching new
    /// roles against the grant list the same way the rules compiler does.
    pub fn update_transient_roles(&mut self, edits: Vec<RoleEdit>, grants: &[Arc<Grant>]) {
        for edit in edits {
            match edit {
                RoleEdit::Insert(role) | RoleEdit::Update(role) => {
                    let Some(key) = PendingKey::of(&role) else {
                        continue;
                    };
                    let role_grants: Vec<RoleGrant> = grants
                        .iter()
                        .filter(|grant| grant.matches_role(&role))
                        .map(|grant| RoleGrant {
                            role: role.clone(),
                            grant: grant.clone(),
                        })
                        .collect();
                    debug!(role = %role, grants = role_grants.len(), "transient role surfaced");
                    self.pending_roles.insert(key, role_grants);
                }
                RoleEdit::Delete(role) => {
                    if let Some(key) = PendingKey::of(&role) {
                        self.pending_roles.remove(&key);
                    }
                }
            }
        }
    }

    /// Extend a candidate bucket with pending role-grants applicable to
    /// `action`.
    pub fn transient_roles(&self, bucket: &AssignedRoles, action: &TablePermission) -> AssignedRoles {
        let mut extended = bucket.clone();
        for role_grants in self.pending_roles.values() {
            for role_grant in role_grants {
                if role_grant.grant.table != action.relation
                    || role_grant.grant.privilege != action.privilege
                {
                    continue;
                }
                if role_grant.role.has_scope() {
                    extended.scoped.push(role_grant.clone());
                } else {
                    extended.unscoped.push(role_grant.clone());
                }
            }
        }
        extended
    }

    /// Observe the session's own writes arriving back from the upstream:
    /// matching overlay entries are now redundant and dropped. When the
    /// overlay drains the pending roles go with it; their durable
    /// counterparts arrive through the next roles refresh.
    pub fn receive_transaction(&mut self, schema: &SchemaInfo, tx: &Transaction) {
        for change in &tx.changes {
            let (relation, record) = match change {
                DataChange::Insert { relation, record }
                | DataChange::Update {
                    relation, record, ..
                } => (relation, record),
                DataChange::Delete {
                    relation,
                    old_record,
                } => (relation, old_record),
            };
            let Some(id) = schema.row_id(relation, record) else {
                continue;
            };
            if let Some(table) = self.overlay.get_mut(relation) {
                table.remove(&id);
                if table.is_empty() {
                    self.overlay.remove(relation);
                }
            }
        }
        if self.overlay.is_empty() && !self.pending_roles.is_empty() {
            debug!("write buffer drained, transient roles stabilized");
            self.pending_roles.clear();
        }
    }
}

/// The buffer bound over an upstream graph: the layered view used while
/// validating a transaction.
pub struct BufferedGraph<'a> {
    buffer: &'a WriteBuffer,
    upstream: &'a dyn Graph,
}

impl Graph for BufferedGraph<'_> {
    fn schema(&self) -> &SchemaInfo {
        self.upstream.schema()
    }

    fn depth_limit(&self) -> usize {
        self.upstream.depth_limit()
    }

    fn fetch(&self, relation: &Relation, id: &RowId) -> Option<Record> {
        match self
            .buffer
            .overlay
            .get(relation)
            .and_then(|table| table.get(id))
        {
            Some(OverlayRow::Present(record)) => Some(record.clone()),
            Some(OverlayRow::Deleted) => None,
            None => self.upstream.fetch(relation, id),
        }
    }
}
