//! Data models

mod auth;
mod change;
mod relation;
mod role;
mod rules;
mod schema;

pub use auth::*;
pub use change::*;
pub use relation::*;
pub use role::*;
pub use rules::*;
pub use schema::*;
