//! Core data model, configuration, and persistence for runwarden.
//!
//! Everything the orchestration engine shares across crates lives here:
//! the Agent / Run / CostRecord records, the TOML configuration, and the
//! tenant-scoped repository traits with their in-memory and SQLite backends.

pub mod config;
pub mod store;
pub mod text;
pub mod types;
