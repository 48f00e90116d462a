//! Error types and handling

use thiserror::Error;

use crate::models::{Privilege, Relation};

/// Failures surfaced by transaction validation.
///
/// The `Denied` message format is part of the wire contract with clients
/// and must not change shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PermissionError {
    /// No role-grant accepted the change
    #[error("permissions: user does not have permission to {}{relation}", .privilege.verb())]
    Denied {
        privilege: Privilege,
        relation: Relation,
    },

    /// A CHECK predicate could not be evaluated against the change. This
    /// indicates malformed rules or input, not a policy decision.
    #[error("permissions: failed to evaluate CHECK on {relation}: {reason}")]
    CheckEvaluation { relation: Relation, reason: String },
}

impl PermissionError {
    pub fn denied(privilege: Privilege, relation: &Relation) -> Self {
        Self::Denied {
            privilege,
            relation: relation.clone(),
        }
    }

    /// Whether this is an authorization decision rather than an
    /// evaluation fault
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }
}
