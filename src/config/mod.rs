//! Configuration
//!
//! TOML file with one table per section; every field has a default so an
//! empty or missing file is valid.

mod schema;
mod store;

pub use schema::*;
pub use store::ConfigStore;
