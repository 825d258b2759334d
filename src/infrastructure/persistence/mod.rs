//! Zone state persistence
//!
//! - Versioned JSON records with a forward-only migration chain
//! - Atomic temp-file-and-rename writes
//! - Corrupt records degrade to "no state" instead of failing startup

pub mod json_store;
pub mod migration;

pub use json_store::{decode, encode, read_file, write_file, JsonStateStore};
pub use migration::migrate;
