//! Mock backend for testing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{Backend, MemoryBackend};
use crate::error::StoreError;

/// Backend wrapping [`MemoryBackend`] with injectable faults.
///
/// Provides controllable behavior for testing:
/// - Fail index writes for chosen fields
/// - Delay every call to exercise cancellation
/// - Count payload lookups
pub struct MockBackend {
    inner: MemoryBackend,
    /// Fields whose index writes fail with `Unavailable`.
    failing_fields: Arc<RwLock<HashSet<String>>>,
    /// Added before every call.
    delay: Arc<RwLock<Option<Duration>>>,
    /// Number of `get_tickets` calls made.
    batch_reads: AtomicUsize,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("failing_fields", &"<fields>")
            .field("delay", &"<delay>")
            .field("batch_reads", &self.batch_reads.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            failing_fields: Arc::new(RwLock::new(HashSet::new())),
            delay: Arc::new(RwLock::new(None)),
            batch_reads: AtomicUsize::new(0),
        }
    }

    /// Make index writes on `field` fail until [`heal_field`](Self::heal_field).
    pub async fn fail_field(&self, field: &str) {
        self.failing_fields.write().await.insert(field.to_string());
    }

    pub async fn heal_field(&self, field: &str) {
        self.failing_fields.write().await.remove(field);
    }

    /// Sleep this long before every call.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().await = delay;
    }

    pub fn batch_reads(&self) -> usize {
        self.batch_reads.load(Ordering::Relaxed)
    }

    async fn pause(&self) {
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn check_field(&self, field: &str) -> Result<(), StoreError> {
        if self.failing_fields.read().await.contains(field) {
            return Err(StoreError::Unavailable(format!(
                "injected failure on field '{}'",
                field
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn insert_ticket(&self, id: &str, payload: String) -> Result<bool, StoreError> {
        self.pause().await;
        self.inner.insert_ticket(id, payload).await
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<String>, StoreError> {
        self.pause().await;
        self.inner.get_ticket(id).await
    }

    async fn get_tickets(&self, ids: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        self.pause().await;
        self.batch_reads.fetch_add(1, Ordering::Relaxed);
        self.inner.get_tickets(ids).await
    }

    async fn delete_ticket(&self, id: &str) -> Result<(), StoreError> {
        self.pause().await;
        self.inner.delete_ticket(id).await
    }

    async fn numeric_insert(&self, field: &str, id: &str, value: f64) -> Result<(), StoreError> {
        self.pause().await;
        self.check_field(field).await?;
        self.inner.numeric_insert(field, id, value).await
    }

    async fn numeric_remove(&self, field: &str, id: &str) -> Result<(), StoreError> {
        self.pause().await;
        self.inner.numeric_remove(field, id).await
    }

    async fn numeric_range(
        &self,
        field: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        self.pause().await;
        self.inner.numeric_range(field, min, max).await
    }

    async fn tag_insert(
        &self,
        field: &str,
        id: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        self.pause().await;
        self.check_field(field).await?;
        self.inner.tag_insert(field, id, values).await
    }

    async fn tag_remove(&self, field: &str, id: &str) -> Result<(), StoreError> {
        self.pause().await;
        self.inner.tag_remove(field, id).await
    }

    async fn tag_members(&self, field: &str, value: &str) -> Result<Vec<String>, StoreError> {
        self.pause().await;
        self.inner.tag_members(field, value).await
    }

    async fn registry_insert(&self, id: &str) -> Result<(), StoreError> {
        self.pause().await;
        self.inner.registry_insert(id).await
    }

    async fn registry_remove(&self, id: &str) -> Result<(), StoreError> {
        self.pause().await;
        self.inner.registry_remove(id).await
    }

    async fn registry_members(&self) -> Result<Vec<String>, StoreError> {
        self.pause().await;
        self.inner.registry_members().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}
