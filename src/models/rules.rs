//! Compiled DDLX rules as consumed from the rules pipeline
//!
//! The DDLX dialect itself is parsed upstream; this module models the
//! records the parser hands over: GRANT statements conferring privileges on
//! tables and ASSIGN statements computing role membership from rows.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Privilege, Relation};

/// The full rules record a permissions build consumes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesSpec {
    #[serde(default)]
    pub grants: Vec<GrantSpec>,
    #[serde(default)]
    pub assigns: Vec<AssignSpec>,
}

/// One GRANT statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantSpec {
    /// Table the privilege applies to
    pub table: Relation,

    pub privilege: Privilege,

    /// Role name the grant is issued to. The reserved names `ANYONE` and
    /// `AUTHENTICATED` bind the grant to the synthetic roles.
    pub role: String,

    /// Restrict the grant to a column subset; `None` means all columns
    #[serde(default)]
    pub columns: Option<Vec<String>>,

    /// Boolean gate evaluated against each change
    #[serde(default)]
    pub check: Option<CheckExpr>,

    /// Scope relation for grants issued to scoped roles
    #[serde(default)]
    pub scope: Option<Relation>,
}

/// One ASSIGN statement: materializes roles from rows of `table`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignSpec {
    pub id: Uuid,

    /// The user-role table the assign watches
    pub table: Relation,

    /// Column holding the user id the role belongs to
    pub user_column: String,

    /// Where the role name comes from
    pub role: RoleSource,

    /// Scope relation; the watched table must carry a foreign key to it
    #[serde(default)]
    pub scope: Option<Relation>,

    /// Extra condition a row must satisfy to confer the role
    #[serde(default, rename = "if")]
    pub condition: Option<CheckExpr>,
}

/// Source of an assigned role's name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    /// A fixed name from the ASSIGN statement
    Static(String),

    /// Read from a column of the watched row
    Column(String),
}

/// A structured CHECK expression
///
/// Produced by the expression compiler from the SQL text in a GRANT or
/// ASSIGN; evaluated against the change's row images and the session
/// claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckExpr {
    /// A single comparison
    Cmp {
        left: CheckOperand,
        op: CheckOp,
        right: CheckOperand,
    },

    /// Conjunction: true when every branch is true
    All(Vec<CheckExpr>),

    /// Disjunction: true when any branch is true
    Any(Vec<CheckExpr>),

    Not(Box<CheckExpr>),
}

/// One side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOperand {
    /// A column of the row under evaluation, dotted paths reaching into
    /// JSON values
    Column(String),

    /// A claim of the authenticated session, e.g. `user_id`
    Auth(String),

    /// A literal value
    Literal(serde_json::Value),
}

/// Comparison operators supported by CHECK expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Matches,
    NotMatches,
}
