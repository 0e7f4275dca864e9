//! Storage and persistence layer
//!
//! - `PersistenceGateway` - the "flush if dirty" contract accounts write through
//! - File system implementation
//! - Snapshot model

mod file_system;
mod models;

pub use file_system::FileStore;
pub use models::AccountSnapshot;

use crate::error::StorageError;

/// Durable storage for account state.
///
/// Best effort: accounts log failures and retry on their next mutation.
/// Flushing unchanged data must be harmless.
pub trait PersistenceGateway: Send + Sync {
    fn flush(&self, account: &str, snapshot: &AccountSnapshot) -> Result<(), StorageError>;
}
