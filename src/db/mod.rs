//! Database module.
//!
//! Provides the SQLite-backed target registry and check log.

mod models;
mod store;

pub use models::*;
pub use store::*;
