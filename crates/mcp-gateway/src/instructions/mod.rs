//! Instruction map: how flattened user keys land in catalog backends.
//!
//! The map is either loaded from a generated `mapping.json` or built from the
//! catalog directly; [`schema`] emits the matching user-config JSON schema.

pub mod builder;
pub mod schema;
pub mod types;

pub use builder::*;
pub use schema::*;
pub use types::*;
