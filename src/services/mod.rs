//! Decision logic services

pub mod check;
pub mod engine;
pub mod graph;
pub mod permissions;
pub mod transient;
pub mod triggers;
pub mod write_buffer;

pub use check::{CheckContext, CheckError, CompiledCheck};
pub use engine::MoveOut;
pub use graph::{Graph, InMemoryGraph, ScopePath};
pub use permissions::{
    AssignedRoles, Grant, Permissions, PermissionsUpdate, RoleGrant, RulesSource,
};
pub use transient::{Transient, TransientStore};
pub use triggers::{RoleEdit, TriggerTable};
pub use write_buffer::{BufferedGraph, WriteBuffer};
