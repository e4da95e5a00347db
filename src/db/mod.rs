//! Database module: entity models and SQL repositories.
//!
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `pim_sync::db` — the repository API
//! and commonly used models are re-exported here.

pub mod model;
pub mod repo;

pub use model::{Checkpoint, ConnectionState};
pub use repo::*;
