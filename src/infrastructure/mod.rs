//! Infrastructure layer module
//!
//! Adapters around the zone pipeline:
//! - Configuration management (figment: defaults, YAML file, environment)
//! - Logging infrastructure (tracing)
//! - JSON state persistence, implementing the domain `StateStore` port

pub mod config;
pub mod logging;
pub mod persistence;
