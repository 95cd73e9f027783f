//! In-process backend.
//!
//! Payloads, field indexes and the registry each live in a sharded
//! concurrent map, so writers touching different tickets or fields rarely
//! wait on each other and no operation takes a store-wide lock.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};

use super::{closed_error, Backend};
use crate::error::StoreError;
use crate::index::{NumericTree, TagTree};

pub struct MemoryBackend {
    tickets: DashMap<String, String>,
    numeric: DashMap<String, NumericTree>,
    tags: DashMap<String, TagTree>,
    registry: DashSet<String>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tickets: DashMap::new(),
            numeric: DashMap::new(),
            tags: DashMap::new(),
            registry: DashSet::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error(self.name()));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert_ticket(&self, id: &str, payload: String) -> Result<bool, StoreError> {
        self.ensure_open()?;
        match self.tickets.entry(id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(payload);
                Ok(true)
            }
        }
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<String>, StoreError> {
        self.ensure_open()?;
        Ok(self.tickets.get(id).map(|payload| payload.value().clone()))
    }

    async fn get_tickets(&self, ids: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        self.ensure_open()?;
        Ok(ids
            .iter()
            .map(|id| self.tickets.get(id).map(|payload| payload.value().clone()))
            .collect())
    }

    async fn delete_ticket(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.tickets.remove(id);
        Ok(())
    }

    async fn numeric_insert(&self, field: &str, id: &str, value: f64) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.numeric
            .entry(field.to_string())
            .or_default()
            .insert(id, value);
        Ok(())
    }

    async fn numeric_remove(&self, field: &str, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        let emptied = match self.numeric.get_mut(field) {
            Some(mut tree) => tree.remove(id) && tree.is_empty(),
            None => false,
        };
        // The guard is gone; re-check under the shard lock before pruning.
        if emptied {
            self.numeric.remove_if(field, |_, tree| tree.is_empty());
        }
        Ok(())
    }

    async fn numeric_range(
        &self,
        field: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .numeric
            .get(field)
            .map(|tree| tree.range(min, max))
            .unwrap_or_default())
    }

    async fn tag_insert(
        &self,
        field: &str,
        id: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.tags
            .entry(field.to_string())
            .or_default()
            .insert(id, values);
        Ok(())
    }

    async fn tag_remove(&self, field: &str, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        let emptied = match self.tags.get_mut(field) {
            Some(mut tree) => tree.remove(id) && tree.is_empty(),
            None => false,
        };
        if emptied {
            self.tags.remove_if(field, |_, tree| tree.is_empty());
        }
        Ok(())
    }

    async fn tag_members(&self, field: &str, value: &str) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .tags
            .get(field)
            .map(|tree| tree.members(value))
            .unwrap_or_default())
    }

    async fn registry_insert(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.registry.insert(id.to_string());
        Ok(())
    }

    async fn registry_remove(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.registry.remove(id);
        Ok(())
    }

    async fn registry_members(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;
        Ok(self.registry.iter().map(|id| id.key().clone()).collect())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_rejects_duplicate() {
        let backend = MemoryBackend::new();
        assert!(backend.insert_ticket("t1", "a".to_string()).await.unwrap());
        assert!(!backend.insert_ticket("t1", "b".to_string()).await.unwrap());
        assert_eq!(
            backend.get_ticket("t1").await.unwrap(),
            Some("a".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_single_winner() {
        let backend = std::sync::Arc::new(MemoryBackend::new());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let backend = std::sync::Arc::clone(&backend);
                tokio::spawn(async move { backend.insert_ticket("t1", i.to_string()).await })
            })
            .collect();

        let mut winners = Vec::new();
        for (i, handle) in handles.into_iter().enumerate() {
            if handle.await.unwrap().unwrap() {
                winners.push(i.to_string());
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(backend.get_ticket("t1").await.unwrap(), winners.pop());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_field_writes() {
        let backend = std::sync::Arc::new(MemoryBackend::new());

        let handles: Vec<_> = (0..200)
            .map(|i| {
                let backend = std::sync::Arc::clone(&backend);
                tokio::spawn(async move {
                    let id = format!("t{}", i);
                    backend.registry_insert(&id).await?;
                    backend.numeric_insert("mmr", &id, i as f64).await?;
                    backend.tag_insert("region", &id, &["eu".to_string()]).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(backend.numeric_range("mmr", 0.0, 199.0).await.unwrap().len(), 200);
        assert_eq!(backend.tag_members("region", "eu").await.unwrap().len(), 200);
        assert_eq!(backend.registry_members().await.unwrap().len(), 200);
    }

    #[tokio::test]
    async fn test_get_tickets_aligned_with_ids() {
        let backend = MemoryBackend::new();
        backend.insert_ticket("t1", "one".to_string()).await.unwrap();
        backend.insert_ticket("t3", "three".to_string()).await.unwrap();

        let ids = vec!["t1".to_string(), "t2".to_string(), "t3".to_string()];
        let payloads = backend.get_tickets(&ids).await.unwrap();
        assert_eq!(
            payloads,
            vec![Some("one".to_string()), None, Some("three".to_string())]
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.delete_ticket("missing").await.unwrap();
        backend.insert_ticket("t1", "a".to_string()).await.unwrap();
        backend.delete_ticket("t1").await.unwrap();
        backend.delete_ticket("t1").await.unwrap();
        assert_eq!(backend.get_ticket("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_numeric_index() {
        let backend = MemoryBackend::new();
        backend.numeric_insert("mmr", "t1", 1500.0).await.unwrap();
        backend.numeric_insert("mmr", "t2", 900.0).await.unwrap();

        assert_eq!(
            backend.numeric_range("mmr", 1400.0, 1600.0).await.unwrap(),
            vec!["t1"]
        );
        assert!(backend
            .numeric_range("level", 0.0, 10.0)
            .await
            .unwrap()
            .is_empty());

        backend.numeric_remove("mmr", "t1").await.unwrap();
        backend.numeric_remove("never", "t1").await.unwrap();
        assert!(backend.numeric.get("mmr").is_some());
        backend.numeric_remove("mmr", "t2").await.unwrap();
        assert!(backend.numeric.get("mmr").is_none());
        assert!(backend
            .numeric_range("mmr", 1400.0, 1600.0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_tag_index() {
        let backend = MemoryBackend::new();
        backend
            .tag_insert("region", "t1", &["eu".to_string()])
            .await
            .unwrap();
        assert_eq!(backend.tag_members("region", "eu").await.unwrap(), vec!["t1"]);

        backend.tag_remove("region", "t1").await.unwrap();
        assert!(backend.tag_members("region", "eu").await.unwrap().is_empty());
        assert!(backend.tags.get("region").is_none());
    }

    #[tokio::test]
    async fn test_registry() {
        let backend = MemoryBackend::new();
        backend.registry_insert("t1").await.unwrap();
        backend.registry_insert("t1").await.unwrap();
        assert_eq!(backend.registry_members().await.unwrap(), vec!["t1"]);
        backend.registry_remove("t1").await.unwrap();
        assert!(backend.registry_members().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_backend_is_unavailable() {
        let backend = MemoryBackend::new();
        backend.close().await.unwrap();
        let err = backend.get_ticket("t1").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
