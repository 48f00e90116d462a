//! Schema metadata consumed from the schema loader
//!
//! The core never introspects the database itself; the loader hands it a
//! `SchemaInfo` snapshot with the column lists and foreign-key graph the
//! scope resolver needs.

use serde::{Deserialize, Serialize};

use crate::models::{Record, Relation, RowId};

/// A foreign key from one table to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing columns on the owning table
    pub columns: Vec<String>,

    /// The table the key points at
    pub references: Relation,

    /// Referenced columns, usually the primary key
    pub referenced_columns: Vec<String>,
}

/// Column and key metadata for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub relation: Relation,
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

/// One hop of a foreign-key walk towards a scope root
#[derive(Debug, Clone, PartialEq)]
pub struct FkStep {
    /// Table the step starts from
    pub relation: Relation,
    /// Referencing columns on that table
    pub columns: Vec<String>,
    /// Table the step lands on
    pub references: Relation,
    /// Columns identifying the parent row
    pub referenced_columns: Vec<String>,
}

/// A chain of foreign-key hops from a table up to a scope root. Empty when
/// the table is the scope relation itself.
pub type FkPath = Vec<FkStep>;

/// A versioned snapshot of the replicated schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
}

impl SchemaInfo {
    pub fn new(tables: Vec<TableInfo>) -> Self {
        Self { tables }
    }

    pub fn table(&self, relation: &Relation) -> Option<&TableInfo> {
        self.tables.iter().find(|t| &t.relation == relation)
    }

    /// Primary-key columns of a table, empty when the table is unknown
    pub fn primary_key(&self, relation: &Relation) -> &[String] {
        self.table(relation)
            .map(|t| t.primary_key.as_slice())
            .unwrap_or(&[])
    }

    /// Identify the row a record describes
    pub fn row_id(&self, relation: &Relation, record: &Record) -> Option<RowId> {
        let table = self.table(relation)?;
        RowId::from_record(record, &table.primary_key)
    }

    /// All foreign-key chains leading from `from` up to the `scope` root.
    ///
    /// A table may reach the same scope relation along several chains (the
    /// schema permits a row to live in more than one scope instance), so
    /// every acyclic chain within `max_depth` hops is returned. `from`
    /// being the scope relation itself yields one empty chain.
    pub fn scope_paths(&self, scope: &Relation, from: &Relation, max_depth: usize) -> Vec<FkPath> {
        let mut paths = Vec::new();
        let mut visited = vec![from.clone()];
        self.collect_paths(scope, from, max_depth, &mut visited, &mut Vec::new(), &mut paths);
        paths
    }

    fn collect_paths(
        &self,
        scope: &Relation,
        current: &Relation,
        remaining: usize,
        visited: &mut Vec<Relation>,
        prefix: &mut FkPath,
        out: &mut Vec<FkPath>,
    ) {
        if current == scope {
            out.push(prefix.clone());
            return;
        }
        if remaining == 0 {
            return;
        }
        let Some(table) = self.table(current) else {
            return;
        };
        for fk in &table.foreign_keys {
            if visited.contains(&fk.references) {
                continue;
            }
            visited.push(fk.references.clone());
            prefix.push(FkStep {
                relation: current.clone(),
                columns: fk.columns.clone(),
                references: fk.references.clone(),
                referenced_columns: fk.referenced_columns.clone(),
            });
            self.collect_paths(scope, &fk.references, remaining - 1, visited, prefix, out);
            prefix.pop();
            visited.pop();
        }
    }

    /// Foreign-key columns on `from` that participate in any chain towards
    /// `scope`. These are the columns whose modification moves a row
    /// between scope instances.
    pub fn scope_fk_columns(&self, scope: &Relation, from: &Relation, max_depth: usize) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for path in self.scope_paths(scope, from, max_depth) {
            if let Some(first) = path.first() {
                for col in &first.columns {
                    if !columns.contains(col) {
                        columns.push(col.clone());
                    }
                }
            }
        }
        columns
    }

    /// The foreign key on `from` referencing `scope` directly, used by
    /// assign triggers to read a role's scope root out of a watched row.
    pub fn direct_fk(&self, from: &Relation, scope: &Relation) -> Option<&ForeignKey> {
        self.table(from)?
            .foreign_keys
            .iter()
            .find(|fk| &fk.references == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, pk: &[&str], fks: Vec<ForeignKey>) -> TableInfo {
        TableInfo {
            relation: Relation::public(name),
            columns: vec![],
            primary_key: pk.iter().map(|c| c.to_string()).collect(),
            foreign_keys: fks,
        }
    }

    fn fk(col: &str, to: &str) -> ForeignKey {
        ForeignKey {
            columns: vec![col.to_string()],
            references: Relation::public(to),
            referenced_columns: vec!["id".to_string()],
        }
    }

    fn tree_schema() -> SchemaInfo {
        SchemaInfo::new(vec![
            table("projects", &["id"], vec![]),
            table("issues", &["id"], vec![fk("project_id", "projects")]),
            table("comments", &["id"], vec![fk("issue_id", "issues")]),
        ])
    }

    #[test]
    fn test_scope_path_over_two_hops() {
        let schema = tree_schema();
        let paths = schema.scope_paths(
            &Relation::public("projects"),
            &Relation::public("comments"),
            8,
        );
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 2);
        assert_eq!(paths[0][0].columns, vec!["issue_id".to_string()]);
        assert_eq!(paths[0][1].columns, vec!["project_id".to_string()]);
    }

    #[test]
    fn test_scope_relation_has_empty_path() {
        let schema = tree_schema();
        let paths = schema.scope_paths(
            &Relation::public("projects"),
            &Relation::public("projects"),
            8,
        );
        assert_eq!(paths, vec![Vec::<FkStep>::new()]);
    }

    #[test]
    fn test_unrelated_table_has_no_path() {
        let schema = tree_schema();
        let paths = schema.scope_paths(
            &Relation::public("comments"),
            &Relation::public("projects"),
            8,
        );
        assert!(paths.is_empty());
    }

    #[test]
    fn test_scope_fk_columns_are_first_hop_only() {
        let schema = tree_schema();
        let cols = schema.scope_fk_columns(
            &Relation::public("projects"),
            &Relation::public("issues"),
            8,
        );
        assert_eq!(cols, vec!["project_id".to_string()]);

        // Two hops away: the local fk is issue_id, not project_id.
        let cols = schema.scope_fk_columns(
            &Relation::public("projects"),
            &Relation::public("comments"),
            8,
        );
        assert_eq!(cols, vec!["issue_id".to_string()]);
    }

    #[test]
    fn test_depth_limit_prunes_long_chains() {
        let schema = tree_schema();
        let paths = schema.scope_paths(
            &Relation::public("projects"),
            &Relation::public("comments"),
            1,
        );
        assert!(paths.is_empty());
    }
}
