//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - Serialized defaults
//! - YAML file loading
//! - `THERMOTUNE_` environment variable overrides
//! - Validation that rejects rather than clamps

pub mod loader;

pub use loader::{ConfigError, ConfigLoader, DEFAULT_CONFIG_FILE, ENV_PREFIX};
