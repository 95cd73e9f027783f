//! Storage backend adapters.
//!
//! A backend persists ticket payloads and field indexes. Every method is a
//! single-key operation and is atomic on its own; nothing spans two calls.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackendConfig, BackendKind};
use crate::error::StoreError;

/// Operations a storage engine must provide.
///
/// Payloads are opaque serialized tickets. Index operations address one field
/// and one ticket id at a time.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the name of this backend implementation.
    fn name(&self) -> &str;

    /// Store `payload` under `id` unless the id is taken.
    ///
    /// Returns false if a payload already exists.
    async fn insert_ticket(&self, id: &str, payload: String) -> Result<bool, StoreError>;

    async fn get_ticket(&self, id: &str) -> Result<Option<String>, StoreError>;

    /// Fetch several payloads. The result is positionally aligned with `ids`.
    async fn get_tickets(&self, ids: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Remove a payload. Absent ids are not an error.
    async fn delete_ticket(&self, id: &str) -> Result<(), StoreError>;

    /// Record `id` with `value` in a numeric field index.
    async fn numeric_insert(&self, field: &str, id: &str, value: f64) -> Result<(), StoreError>;

    async fn numeric_remove(&self, field: &str, id: &str) -> Result<(), StoreError>;

    /// Ids whose value lies in the inclusive range `[min, max]`.
    async fn numeric_range(
        &self,
        field: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError>;

    /// Replace the tag values recorded for `id` in a tag field index.
    async fn tag_insert(&self, field: &str, id: &str, values: &[String])
        -> Result<(), StoreError>;

    async fn tag_remove(&self, field: &str, id: &str) -> Result<(), StoreError>;

    /// Ids carrying `value` in a tag field.
    async fn tag_members(&self, field: &str, value: &str) -> Result<Vec<String>, StoreError>;

    /// Add `id` to the set of indexed tickets.
    async fn registry_insert(&self, id: &str) -> Result<(), StoreError>;

    async fn registry_remove(&self, id: &str) -> Result<(), StoreError>;

    async fn registry_members(&self) -> Result<Vec<String>, StoreError>;

    /// Release backend resources. Later calls fail with `Unavailable`.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Factory function to create a backend from config
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn Backend>, StoreError> {
    match config.kind {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendKind::Sqlite => Ok(Arc::new(SqliteBackend::open(config)?)),
    }
}

pub(crate) fn closed_error(backend: &str) -> StoreError {
    StoreError::Unavailable(format!("{} backend is closed", backend))
}
