//! powerstream-storage: archive backends for historical search.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, evaluates the predicate form)
//! - `postgres`: PostgreSQL via `sqlx` (runs the relational form)

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryArchive;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresArchive, PostgresOptions};
