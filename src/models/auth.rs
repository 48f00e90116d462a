//! Authenticated session context

use serde::{Deserialize, Serialize};

/// The identity a permissions build is computed for.
///
/// Produced by the session layer from a verified token; the core never
/// inspects or validates credentials itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    /// The authenticated user, or `None` for an anonymous session
    pub user_id: Option<String>,

    /// Raw claims carried by the session token, visible to CHECK
    /// expressions via `auth.<claim>` references
    #[serde(default)]
    pub claims: serde_json::Value,
}

impl Auth {
    /// An anonymous session: only `Anyone` grants apply
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A session for a known user with no extra claims
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            claims: serde_json::Value::Null,
        }
    }

    /// Look up a claim by dotted path, `user_id` resolving to the subject
    pub fn claim(&self, path: &str) -> Option<serde_json::Value> {
        if path == "user_id" {
            return self.user_id.clone().map(serde_json::Value::String);
        }
        let mut current = &self.claims;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current.clone())
    }
}
