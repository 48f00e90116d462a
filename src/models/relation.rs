//! Relations, privileges and row identity

use std::fmt;

use serde::{Deserialize, Serialize};

/// A qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relation {
    /// Database schema the table lives in (e.g. "public")
    pub schema: String,

    /// Table name
    pub name: String,
}

impl Relation {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Shorthand for a table in the "public" schema
    pub fn public(name: impl Into<String>) -> Self {
        Self::new("public", name)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\".\"{}\"", self.schema, self.name)
    }
}

/// Privileges that can be granted on a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Privilege {
    Insert,
    Update,
    Delete,
    Select,
}

impl Privilege {
    /// Get all privileges
    pub fn all() -> Vec<Privilege> {
        vec![
            Privilege::Insert,
            Privilege::Update,
            Privilege::Delete,
            Privilege::Select,
        ]
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
            Privilege::Select => "SELECT",
        }
    }

    /// SQL verb used in denial messages, including the trailing keyword
    /// spacing expected by clients ("INSERT INTO ", "UPDATE ", ...).
    pub fn verb(&self) -> &'static str {
        match self {
            Privilege::Insert => "INSERT INTO ",
            Privilege::Update => "UPDATE ",
            Privilege::Delete => "DELETE FROM ",
            Privilege::Select => "SELECT ",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key of the main permissions lookup table: a table paired with the
/// privilege being exercised on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TablePermission {
    pub relation: Relation,
    pub privilege: Privilege,
}

impl TablePermission {
    pub fn new(relation: Relation, privilege: Privilege) -> Self {
        Self {
            relation,
            privilege,
        }
    }
}

/// A primary-key value identifying a row.
///
/// Values are kept in their stringified form so composite and non-string
/// keys compare and print uniformly across the wire and the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub Vec<String>);

impl RowId {
    pub fn single(value: impl Into<String>) -> Self {
        Self(vec![value.into()])
    }

    /// Build a row id from pk column values in a record. Returns `None`
    /// when any pk column is missing from the record.
    pub fn from_record(record: &crate::models::Record, pk_columns: &[String]) -> Option<Self> {
        let mut parts = Vec::with_capacity(pk_columns.len());
        for col in pk_columns {
            let value = record.get(col)?;
            parts.push(stringify_value(value));
        }
        Some(Self(parts))
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        Self::single(value)
    }
}

/// A scope root: a row in `relation` identified by `id` that anchors a
/// subtree of related rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub relation: Relation,
    pub id: RowId,
}

impl Scope {
    pub fn new(relation: Relation, id: impl Into<RowId>) -> Self {
        Self {
            relation,
            id: id.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.relation, self.id)
    }
}

impl From<String> for RowId {
    fn from(value: String) -> Self {
        Self::single(value)
    }
}

/// Render a JSON value the way it appears in a primary key
fn stringify_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A monotonically increasing log position
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
