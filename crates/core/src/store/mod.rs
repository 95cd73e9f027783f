//! The ticket state store service.
//!
//! [`StateStore`] is the contract matchmaking components program against.
//! [`TicketStateStore`] implements it on top of any [`Backend`](crate::backend::Backend).

mod service;

pub use service::TicketStateStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::context::RequestContext;
use crate::error::StoreError;
use crate::filter::{Filter, PageCallback};
use crate::ticket::Ticket;

/// Storage and lookup of in-flight matchmaking tickets.
///
/// Payload storage and indexing are separate steps: a created ticket is not
/// visible to [`filter_tickets`](Self::filter_tickets) until it is indexed.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a new ticket. Fails with `AlreadyExists` if the id is taken.
    async fn create_ticket(&self, ctx: &RequestContext, ticket: &Ticket)
        -> Result<(), StoreError>;

    /// Fetch a ticket by id. Fails with `NotFound` if absent.
    async fn get_ticket(&self, ctx: &RequestContext, id: &str) -> Result<Ticket, StoreError>;

    /// Remove a ticket payload. Succeeds for unknown ids; leaves indexes alone.
    async fn delete_ticket(&self, ctx: &RequestContext, id: &str) -> Result<(), StoreError>;

    /// Make a ticket searchable on its declared fields.
    async fn index_ticket(&self, ctx: &RequestContext, ticket: &Ticket)
        -> Result<(), StoreError>;

    /// Make a ticket unsearchable. Succeeds if it was never indexed.
    async fn deindex_ticket(&self, ctx: &RequestContext, id: &str) -> Result<(), StoreError>;

    /// Deliver every indexed ticket matching all `filters`, in pages of at most
    /// `page_size`.
    async fn filter_tickets(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page_size: usize,
        callback: &mut PageCallback<'_>,
    ) -> Result<(), StoreError>;

    /// Release backend resources. Every later call fails with `Unavailable`.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Factory function to create a state store from config
pub fn create_state_store(config: &StoreConfig) -> Result<Arc<dyn StateStore>, StoreError> {
    Ok(Arc::new(TicketStateStore::open(config.clone())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, IndexField};

    #[tokio::test]
    async fn test_create_state_store_memory() {
        let store = create_state_store(&StoreConfig::in_memory(vec![IndexField::numeric("mmr")]))
            .unwrap();
        let ctx = RequestContext::background();

        store
            .create_ticket(&ctx, &Ticket::with_id("t1"))
            .await
            .unwrap();
        assert_eq!(store.get_ticket(&ctx, "t1").await.unwrap().id, "t1");
    }

    #[tokio::test]
    async fn test_create_state_store_sqlite() {
        let mut config = StoreConfig::in_memory(vec![IndexField::tag("region")]);
        config.backend.kind = BackendKind::Sqlite;
        let store = create_state_store(&config).unwrap();
        let ctx = RequestContext::background();

        let ticket = Ticket::with_id("t1").with_tag("region", "eu");
        store.create_ticket(&ctx, &ticket).await.unwrap();
        store.index_ticket(&ctx, &ticket).await.unwrap();

        let mut seen = Vec::new();
        store
            .filter_tickets(&ctx, &[Filter::tag("region", "eu")], 5, &mut |page: Vec<Ticket>| {
                seen.extend(page.into_iter().map(|t| t.id));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["t1"]);
    }

    #[test]
    fn test_create_state_store_invalid_config() {
        let config = StoreConfig::in_memory(vec![IndexField::numeric("mmr"), IndexField::tag("mmr")]);
        let result = create_state_store(&config);
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    }
}
