//! Database module.
//!
//! SQLite storage for the target registry, the probe result time series and
//! persisted settings, with embedded migrations.

mod models;
mod store;

pub use models::*;
pub use store::*;
