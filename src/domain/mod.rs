//! Domain layer for the thermotune controller
//!
//! This module contains the zone data model, errors and collaborator ports.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
