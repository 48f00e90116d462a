//! Process-wide transient permissions store
//!
//! A transient permission widens a scoped role to an extra `(relation, id)`
//! target for a bounded range of log positions. Entries are written by the
//! subsystem that observes role churn on the replication stream; the
//! permissions core only reads, keyed by the lsn of the transaction under
//! evaluation. Stores are registered by name so every session in the
//! process shares one table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Lsn, Relation, RowId};
use crate::services::permissions::RoleGrant;

/// The registry of named stores
static REGISTRY: Lazy<RwLock<HashMap<String, Arc<TransientStore>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// A transient widening of a role produced by one assign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transient {
    /// The assign whose roles this entry widens
    pub assign_id: Uuid,

    /// The extra scope root the role temporarily applies to
    pub target_relation: Relation,
    pub target_id: RowId,

    /// Last log position the entry is valid at, inclusive
    pub valid_to: Lsn,
}

/// A many-reader table of transient permissions keyed by assign id
#[derive(Debug, Default)]
pub struct TransientStore {
    entries: RwLock<HashMap<Uuid, Vec<Transient>>>,
}

impl TransientStore {
    /// Look up or create the store registered under `name`
    pub fn named(name: &str) -> Arc<TransientStore> {
        if let Ok(registry) = REGISTRY.read() {
            if let Some(store) = registry.get(name) {
                return store.clone();
            }
        }
        let mut registry = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
        registry
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TransientStore::default()))
            .clone()
    }

    pub fn insert(&self, transient: Transient) {
        if let Ok(mut entries) = self.entries.write() {
            entries
                .entry(transient.assign_id)
                .or_default()
                .push(transient);
        }
    }

    /// Drop entries no longer valid at `lsn`. Called by the writer side as
    /// the log advances.
    pub fn expire(&self, lsn: Lsn) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, transients| {
                transients.retain(|t| t.valid_to >= lsn);
                !transients.is_empty()
            });
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// For each candidate role-grant, the transient targets applicable at
    /// `lsn`. Candidates without an assign id (the synthetic roles) never
    /// match.
    pub fn for_roles(&self, candidates: &[RoleGrant], lsn: Lsn) -> Vec<(RoleGrant, Transient)> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for candidate in candidates {
            let Some(assign_id) = candidate.role.assign_id() else {
                continue;
            };
            if let Some(transients) = entries.get(&assign_id) {
                for transient in transients {
                    if transient.valid_to >= lsn {
                        out.push((candidate.clone(), transient.clone()));
                    }
                }
            }
        }
        out
    }
}
