//! Storage traits and implementations
//!
//! The store is the only coordination medium between the sync stages. The
//! trait-based design allows swapping between in-memory and SQLite storage.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::{DuplicateKeyError, MailStore, SizeAggregate};
