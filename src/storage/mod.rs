mod memory;
mod object_store;
mod sqlite;

pub use memory::*;
pub use object_store::*;
pub use sqlite::*;

/// SQL migration for the document tables
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");
