//! Fire-and-forget operator notifications.

mod events;
mod handle;
mod writer;

pub use events::*;
pub use handle::*;
pub use writer::*;

use crate::registry::RegistryError;

/// Storage for notifications.
pub trait NotificationStore: Send + Sync {
    /// Insert a record, returning the assigned id.
    fn insert(&self, record: &NotificationRecord) -> Result<i64, RegistryError>;

    /// Most recent records first.
    fn recent(&self, limit: i64) -> Result<Vec<NotificationRecord>, RegistryError>;
}
