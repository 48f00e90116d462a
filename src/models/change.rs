//! Replicated change records and transactions

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{Lsn, Privilege, Relation};

/// A row as it appears on the replication stream: column name to value.
///
/// Ordered so records print and compare deterministically.
pub type Record = BTreeMap<String, serde_json::Value>;

/// A single row change within a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataChange {
    /// A newly inserted row
    Insert { relation: Relation, record: Record },

    /// An update carrying both images and the set of columns it touched
    Update {
        relation: Relation,
        old_record: Record,
        record: Record,
        changed_columns: BTreeSet<String>,
    },

    /// A deleted row, identified by its last image
    Delete {
        relation: Relation,
        old_record: Record,
    },
}

impl DataChange {
    /// Construct an update, deriving the changed column set from the two
    /// images.
    pub fn update(relation: Relation, old_record: Record, record: Record) -> Self {
        let changed_columns = record
            .iter()
            .filter(|(col, value)| old_record.get(*col) != Some(*value))
            .map(|(col, _)| col.clone())
            .collect();
        Self::Update {
            relation,
            old_record,
            record,
            changed_columns,
        }
    }

    /// The table this change applies to
    pub fn relation(&self) -> &Relation {
        match self {
            DataChange::Insert { relation, .. }
            | DataChange::Update { relation, .. }
            | DataChange::Delete { relation, .. } => relation,
        }
    }

    /// The privilege a client needs to perform this change
    pub fn required_privilege(&self) -> Privilege {
        match self {
            DataChange::Insert { .. } => Privilege::Insert,
            DataChange::Update { .. } => Privilege::Update,
            DataChange::Delete { .. } => Privilege::Delete,
        }
    }

    /// The row image the change leaves behind: the new record for inserts
    /// and updates, the old record for deletes.
    pub fn record(&self) -> &Record {
        match self {
            DataChange::Insert { record, .. } | DataChange::Update { record, .. } => record,
            DataChange::Delete { old_record, .. } => old_record,
        }
    }

    /// The pre-image, where one exists
    pub fn old_record(&self) -> Option<&Record> {
        match self {
            DataChange::Insert { .. } => None,
            DataChange::Update { old_record, .. } | DataChange::Delete { old_record, .. } => {
                Some(old_record)
            }
        }
    }
}

/// An ordered group of changes that must be accepted or rejected as a whole
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Log position the transaction was (or will be) committed at
    pub lsn: Lsn,

    /// Changes in commit order
    pub changes: Vec<DataChange>,
}

impl Transaction {
    pub fn new(lsn: Lsn, changes: Vec<DataChange>) -> Self {
        Self { lsn, changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
