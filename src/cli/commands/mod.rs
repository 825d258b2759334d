pub mod baseline;
pub mod config;
pub mod simulate;
pub mod state;
