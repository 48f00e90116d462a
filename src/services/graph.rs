//! Scope resolution over the user-visible data graph
//!
//! The decision engine never touches storage directly; it consumes a
//! [`Graph`] capability that can locate the scope root(s) a row belongs to
//! by walking foreign keys, and report which foreign-key columns an update
//! modified. The write buffer layers pending changes over any upstream
//! `Graph` with the same contract.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::models::{DataChange, Record, Relation, RowId, SchemaInfo};

/// The chain of rows from a change up to (and including) its scope root
pub type ScopePath = Vec<(Relation, RowId)>;

/// Read access to the replicated data graph.
///
/// `scope_id` and `modified_fks` have default implementations in terms of
/// `schema` and `fetch`, so backends only supply row lookup. Multiple scope
/// roots may be returned when the schema gives a row several foreign-key
/// chains to the scope relation.
pub trait Graph {
    /// The schema snapshot this graph was built against
    fn schema(&self) -> &SchemaInfo;

    /// Upper bound on foreign-key hops during scope walks
    fn depth_limit(&self) -> usize {
        32
    }

    /// Fetch a row by primary key, `None` when it does not exist
    fn fetch(&self, relation: &Relation, id: &RowId) -> Option<Record>;

    /// The scope roots under `scope` reachable from this row.
    ///
    /// The final hop is resolved from the foreign-key value itself, so a
    /// root created earlier in the same transaction (or not loaded into an
    /// in-memory backend) still yields its id. Intermediate rows must be
    /// fetchable or the chain is a dead end.
    fn scope_id(
        &self,
        scope: &Relation,
        relation: &Relation,
        record: &Record,
    ) -> Vec<(RowId, ScopePath)> {
        let schema = self.schema();
        let mut roots: Vec<(RowId, ScopePath)> = Vec::new();

        for path in schema.scope_paths(scope, relation, self.depth_limit()) {
            let mut trail: ScopePath = Vec::with_capacity(path.len() + 1);
            if let Some(own_id) = schema.row_id(relation, record) {
                trail.push((relation.clone(), own_id));
            }

            if path.is_empty() {
                // The row is its own scope root.
                if let Some(id) = schema.row_id(relation, record) {
                    push_root(&mut roots, id, trail);
                }
                continue;
            }

            let mut current: Record = record.clone();
            for (hop, step) in path.iter().enumerate() {
                let Some(parent_id) = fk_value(&current, &step.columns) else {
                    trace!(%scope, relation = %step.relation, "scope walk hit a null foreign key");
                    break;
                };
                trail.push((step.references.clone(), parent_id.clone()));

                if hop + 1 == path.len() {
                    push_root(&mut roots, parent_id, trail.clone());
                    break;
                }
                match self.fetch(&step.references, &parent_id) {
                    Some(parent) => current = parent,
                    None => {
                        trace!(%scope, parent = %step.references, id = %parent_id, "scope walk missing intermediate row");
                        break;
                    }
                }
            }
        }
        roots
    }

    /// Foreign-key columns modified by this change that participate in the
    /// scope chain for `scope`. Only updates can move rows between scopes.
    fn modified_fks(&self, scope: &Relation, change: &DataChange) -> Vec<String> {
        let DataChange::Update {
            relation,
            old_record,
            record,
            changed_columns,
        } = change
        else {
            return Vec::new();
        };
        self.schema()
            .scope_fk_columns(scope, relation, self.depth_limit())
            .into_iter()
            .filter(|col| {
                changed_columns.contains(col) && old_record.get(col) != record.get(col)
            })
            .collect()
    }
}

fn push_root(roots: &mut Vec<(RowId, ScopePath)>, id: RowId, path: ScopePath) {
    if !roots.iter().any(|(existing, _)| existing == &id) {
        roots.push((id, path));
    }
}

/// Read a (possibly composite) foreign-key value from a record. Null or
/// missing components mean the key is unset.
fn fk_value(record: &Record, columns: &[String]) -> Option<RowId> {
    let mut parts = Vec::with_capacity(columns.len());
    for col in columns {
        match record.get(col) {
            None | Some(serde_json::Value::Null) => return None,
            Some(serde_json::Value::String(s)) => parts.push(s.clone()),
            Some(other) => parts.push(other.to_string()),
        }
    }
    Some(RowId(parts))
}

/// An in-memory data graph: rows per relation keyed by primary key.
///
/// Used as the read graph in tests and the dry-run tool, and as the
/// upstream beneath a write buffer.
#[derive(Debug, Clone)]
pub struct InMemoryGraph {
    schema: SchemaInfo,
    rows: HashMap<Relation, BTreeMap<RowId, Record>>,
    depth_limit: usize,
}

impl InMemoryGraph {
    pub fn new(schema: SchemaInfo) -> Self {
        Self {
            schema,
            rows: HashMap::new(),
            depth_limit: 32,
        }
    }

    pub fn with_depth_limit(mut self, depth_limit: usize) -> Self {
        self.depth_limit = depth_limit;
        self
    }

    /// Load a row, replacing any previous image
    pub fn insert(&mut self, relation: Relation, record: Record) {
        if let Some(id) = self.schema.row_id(&relation, &record) {
            self.rows.entry(relation).or_default().insert(id, record);
        }
    }

    /// Apply a replicated change to the stored rows
    pub fn apply_change(&mut self, change: &DataChange) {
        match change {
            DataChange::Insert { relation, record }
            | DataChange::Update {
                relation, record, ..
            } => {
                self.insert(relation.clone(), record.clone());
            }
            DataChange::Delete {
                relation,
                old_record,
            } => {
                if let Some(id) = self.schema.row_id(relation, old_record) {
                    if let Some(table) = self.rows.get_mut(relation) {
                        table.remove(&id);
                    }
                }
            }
        }
    }

    pub fn apply_transaction(&mut self, tx: &crate::models::Transaction) {
        for change in &tx.changes {
            self.apply_change(change);
        }
    }
}

impl Graph for InMemoryGraph {
    fn schema(&self) -> &SchemaInfo {
        &self.schema
    }

    fn depth_limit(&self) -> usize {
        self.depth_limit
    }

    fn fetch(&self, relation: &Relation, id: &RowId) -> Option<Record> {
        self.rows.get(relation)?.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ForeignKey, TableInfo};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn schema() -> SchemaInfo {
        let fk = |col: &str, to: &str| ForeignKey {
            columns: vec![col.to_string()],
            references: Relation::public(to),
            referenced_columns: vec!["id".to_string()],
        };
        SchemaInfo::new(vec![
            TableInfo {
                relation: Relation::public("projects"),
                columns: vec!["id".into(), "name".into()],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
            },
            TableInfo {
                relation: Relation::public("issues"),
                columns: vec!["id".into(), "project_id".into(), "title".into()],
                primary_key: vec!["id".into()],
                foreign_keys: vec![fk("project_id", "projects")],
            },
            TableInfo {
                relation: Relation::public("comments"),
                columns: vec!["id".into(), "issue_id".into(), "body".into()],
                primary_key: vec!["id".into()],
                foreign_keys: vec![fk("issue_id", "issues")],
            },
        ])
    }

    fn graph() -> InMemoryGraph {
        let mut graph = InMemoryGraph::new(schema());
        graph.insert(
            Relation::public("projects"),
            record(&[("id", json!("p1")), ("name", json!("One"))]),
        );
        graph.insert(
            Relation::public("issues"),
            record(&[("id", json!("i1")), ("project_id", json!("p1"))]),
        );
        graph
    }

    #[test]
    fn test_direct_child_resolves_scope_root() {
        let graph = graph();
        let rec = record(&[("id", json!("i1")), ("project_id", json!("p1"))]);
        let roots = graph.scope_id(&Relation::public("projects"), &Relation::public("issues"), &rec);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].0, RowId::single("p1"));
        assert_eq!(
            roots[0].1,
            vec![
                (Relation::public("issues"), RowId::single("i1")),
                (Relation::public("projects"), RowId::single("p1")),
            ]
        );
    }

    #[test]
    fn test_two_hop_walk_fetches_intermediate() {
        let graph = graph();
        let rec = record(&[("id", json!("c1")), ("issue_id", json!("i1"))]);
        let roots = graph.scope_id(
            &Relation::public("projects"),
            &Relation::public("comments"),
            &rec,
        );
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].0, RowId::single("p1"));
    }

    #[test]
    fn test_missing_intermediate_row_is_a_dead_end() {
        let graph = graph();
        let rec = record(&[("id", json!("c1")), ("issue_id", json!("i404"))]);
        let roots = graph.scope_id(
            &Relation::public("projects"),
            &Relation::public("comments"),
            &rec,
        );
        assert!(roots.is_empty());
    }

    #[test]
    fn test_null_fk_has_no_scope() {
        let graph = graph();
        let rec = record(&[("id", json!("i2")), ("project_id", json!(null))]);
        let roots = graph.scope_id(&Relation::public("projects"), &Relation::public("issues"), &rec);
        assert!(roots.is_empty());
    }

    #[test]
    fn test_scope_relation_resolves_to_itself() {
        let graph = graph();
        let rec = record(&[("id", json!("p1")), ("name", json!("One"))]);
        let roots = graph.scope_id(
            &Relation::public("projects"),
            &Relation::public("projects"),
            &rec,
        );
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].0, RowId::single("p1"));
    }

    #[test]
    fn test_modified_fks_only_reports_scope_columns() {
        let graph = graph();
        let change = DataChange::Update {
            relation: Relation::public("issues"),
            old_record: record(&[("id", json!("i1")), ("project_id", json!("p1")), ("title", json!("a"))]),
            record: record(&[("id", json!("i1")), ("project_id", json!("p2")), ("title", json!("b"))]),
            changed_columns: BTreeSet::from(["project_id".to_string(), "title".to_string()]),
        };
        assert_eq!(
            graph.modified_fks(&Relation::public("projects"), &change),
            vec!["project_id".to_string()]
        );

        let unrelated = DataChange::Update {
            relation: Relation::public("issues"),
            old_record: record(&[("id", json!("i1")), ("project_id", json!("p1"))]),
            record: record(&[("id", json!("i1")), ("project_id", json!("p1"))]),
            changed_columns: BTreeSet::from(["title".to_string()]),
        };
        assert!(graph
            .modified_fks(&Relation::public("projects"), &unrelated)
            .is_empty());
    }

    #[test]
    fn test_inserts_and_deletes_never_move_scopes() {
        let graph = graph();
        let change = DataChange::Insert {
            relation: Relation::public("issues"),
            record: record(&[("id", json!("i9")), ("project_id", json!("p1"))]),
        };
        assert!(graph
            .modified_fks(&Relation::public("projects"), &change)
            .is_empty());
    }
}
