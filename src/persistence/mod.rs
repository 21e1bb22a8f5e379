//! Persistence layer: the record store contract, its adapters, and the
//! instance record codec.

use std::future::Future;
use std::pin::Pin;

use crate::errors::StoreError;

pub mod db;
pub mod instance_repo;
pub mod memory;
pub mod schema;

/// Result type returned by [`RecordStore`] operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable mapping from a namespaced key to an opaque text value.
///
/// Implementations must make `set` atomic per key: a concurrent `get`
/// observes either the previous value or the new one, never a mix.
pub trait RecordStore: Send + Sync {
    /// Fetch the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing is stored under `key`,
    /// or [`StoreError::Backend`] when the backend fails.
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = StoreResult<String>> + Send + '_>>;

    /// Replace the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the backend fails.
    fn set(
        &self,
        key: &str,
        value: String,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>>;
}

pub use db::SqliteStore;
pub use instance_repo::InstanceRepo;
pub use memory::MemoryStore;
