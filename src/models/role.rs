//! Roles held by a replicating user

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Scope;

/// A role a user holds for the duration of a permissions build.
///
/// `Anyone` and `Authenticated` are synthetic: they are injected by the
/// rules compiler rather than materialized from assignment rows. The other
/// two variants carry the id of the ASSIGN statement that produced them so
/// transient permissions can be keyed back to their origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Role {
    /// Matches every request, authenticated or not
    Anyone,

    /// Matches any request made by an authenticated user
    Authenticated { user_id: String },

    /// Granted by an ASSIGN with no scope root
    Unscoped {
        assign_id: Uuid,
        user_id: String,
        role_name: String,
    },

    /// Granted by an ASSIGN rooted at a specific row
    Scoped {
        assign_id: Uuid,
        user_id: String,
        role_name: String,
        scope: Scope,
    },
}

impl Role {
    pub fn has_scope(&self) -> bool {
        matches!(self, Role::Scoped { .. })
    }

    /// The scope root this role is anchored at, if any
    pub fn scope(&self) -> Option<&Scope> {
        match self {
            Role::Scoped { scope, .. } => Some(scope),
            _ => None,
        }
    }

    /// The originating ASSIGN, for materialized roles
    pub fn assign_id(&self) -> Option<Uuid> {
        match self {
            Role::Unscoped { assign_id, .. } | Role::Scoped { assign_id, .. } => Some(*assign_id),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Anyone => f.write_str("anyone"),
            Role::Authenticated { user_id } => write!(f, "authenticated({user_id})"),
            Role::Unscoped {
                role_name, user_id, ..
            } => write!(f, "{role_name}@{user_id}"),
            Role::Scoped {
                role_name,
                user_id,
                scope,
                ..
            } => write!(f, "{role_name}@{user_id} in {scope}"),
        }
    }
}

/// A materialized role-assignment row, as loaded from the roles table.
///
/// Stale records (whose assign no longer exists in the rules) are filtered
/// out during compilation, not rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// The ASSIGN statement this row was materialized by
    pub assign_id: Uuid,

    pub user_id: String,

    pub role_name: String,

    /// Scope root, when the originating ASSIGN carries one
    #[serde(default)]
    pub scope: Option<Scope>,
}

impl RoleRecord {
    /// Convert to the in-memory role for the given authenticated user.
    /// Returns `None` for rows belonging to other users.
    pub fn to_role(&self, user_id: &str) -> Option<Role> {
        if self.user_id != user_id {
            return None;
        }
        Some(match &self.scope {
            Some(scope) => Role::Scoped {
                assign_id: self.assign_id,
                user_id: self.user_id.clone(),
                role_name: self.role_name.clone(),
                scope: scope.clone(),
            },
            None => Role::Unscoped {
                assign_id: self.assign_id,
                user_id: self.user_id.clone(),
                role_name: self.role_name.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Relation;

    #[test]
    fn test_has_scope_is_a_variant_test() {
        let scoped = Role::Scoped {
            assign_id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            role_name: "member".to_string(),
            scope: Scope::new(Relation::public("projects"), "7"),
        };
        assert!(scoped.has_scope());
        assert!(!Role::Anyone.has_scope());
    }

    #[test]
    fn test_role_record_filters_other_users() {
        let record = RoleRecord {
            assign_id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            role_name: "admin".to_string(),
            scope: None,
        };
        assert!(record.to_role("bob").is_none());

        let role = record.to_role("alice").unwrap();
        assert_eq!(role.assign_id(), Some(record.assign_id));
        assert!(!role.has_scope());
    }

    #[test]
    fn test_role_display() {
        let role = Role::Scoped {
            assign_id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            role_name: "member".to_string(),
            scope: Scope::new(Relation::public("projects"), "7"),
        };
        assert_eq!(role.to_string(), "member@alice in \"public\".\"projects\"/7");
    }
}
