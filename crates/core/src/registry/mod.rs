//! Work item registry: persisted state of every item and its history.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteRegistry;
pub use store::{ItemFilter, Registry, RegistryError};
pub use types::*;
