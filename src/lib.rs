//! FluxSync permissions core
//!
//! Row-level access control for bidirectional replication: validates
//! inbound client transactions against compiled DDLX rules and filters
//! outbound changes down to the rows a session is entitled to see.

pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use config::PermissionsConfig;
pub use models::{Auth, DataChange, Lsn, Privilege, Relation, Role, RowId, Scope, Transaction};
pub use services::{
    Graph, InMemoryGraph, MoveOut, Permissions, PermissionsUpdate, Transient, TransientStore,
    WriteBuffer,
};
pub use utils::error::PermissionError;
