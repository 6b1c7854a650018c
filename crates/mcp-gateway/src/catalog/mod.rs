//! Backend catalog: typed descriptors and loaders for Docker-style catalogs.

pub mod load;
pub mod types;

pub use load::*;
pub use types::*;
