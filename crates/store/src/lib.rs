//! Run store implementations for Lorekeep.

pub mod file_backend;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::FileRunStore;
pub use in_memory::InMemoryRunStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRunStore;
