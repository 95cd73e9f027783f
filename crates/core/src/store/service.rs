use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, info_span, Instrument, Span};

use super::StateStore;
use crate::backend::{create_backend, Backend};
use crate::config::{validate_config, StoreConfig};
use crate::context::RequestContext;
use crate::error::StoreError;
use crate::filter::{Filter, FilterEngine, PageCallback};
use crate::index::IndexManager;
use crate::metrics;
use crate::primary::PrimaryStore;
use crate::reconciler::Reconciler;
use crate::ticket::Ticket;

/// [`StateStore`] built from a primary store, an index manager and a filter
/// engine sharing one backend.
pub struct TicketStateStore {
    config: StoreConfig,
    backend: Arc<dyn Backend>,
    primary: Arc<PrimaryStore>,
    indexes: Arc<IndexManager>,
    filters: FilterEngine,
    span: Span,
    closed: AtomicBool,
}

impl TicketStateStore {
    /// Assemble a store over an already-open backend.
    pub fn new(config: StoreConfig, backend: Arc<dyn Backend>) -> Self {
        let span = info_span!(
            "statestore",
            app = "openmatch",
            component = "statestore",
            backend = backend.name()
        );
        let primary = Arc::new(PrimaryStore::new(Arc::clone(&backend)));
        let indexes = Arc::new(IndexManager::new(
            Arc::clone(&backend),
            config.indexes.clone(),
        ));
        let filters = FilterEngine::new(Arc::clone(&indexes), Arc::clone(&primary));

        Self {
            config,
            backend,
            primary,
            indexes,
            filters,
            span,
            closed: AtomicBool::new(false),
        }
    }

    /// Validate `config` and open the backend it names.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        validate_config(&config)?;
        let backend = create_backend(&config.backend)?;
        let store = Self::new(config, backend);
        info!(
            parent: &store.span,
            indexes = store.config.indexes.len(),
            "Opened state store"
        );
        Ok(store)
    }

    /// Replace the span every operation is recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Background sweeper for dangling index entries, using this store's
    /// reconciler settings. The caller decides whether to start it.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.config.reconciler.clone(),
            Arc::clone(&self.indexes),
            Arc::clone(&self.primary),
        )
        .with_span(self.span.clone())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Unavailable("state store is closed".to_string()));
        }
        Ok(())
    }

    /// Run one operation inside the store span and record its outcome.
    async fn observe<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = async {
            self.ensure_open()?;
            fut.await
        }
        .instrument(self.span.clone())
        .await;

        if let Err(e) = &result {
            debug!(parent: &self.span, operation, error = %e, "Operation failed");
        }
        metrics::record_operation(operation, &result);
        result
    }
}

#[async_trait]
impl StateStore for TicketStateStore {
    async fn create_ticket(
        &self,
        ctx: &RequestContext,
        ticket: &Ticket,
    ) -> Result<(), StoreError> {
        self.observe("create_ticket", async {
            self.primary.create(ctx, ticket).await?;
            debug!(ticket_id = %ticket.id, "Created ticket");
            Ok(())
        })
        .await
    }

    async fn get_ticket(&self, ctx: &RequestContext, id: &str) -> Result<Ticket, StoreError> {
        self.observe("get_ticket", self.primary.get(ctx, id)).await
    }

    async fn delete_ticket(&self, ctx: &RequestContext, id: &str) -> Result<(), StoreError> {
        self.observe("delete_ticket", async {
            self.primary.delete(ctx, id).await?;
            debug!(ticket_id = %id, "Deleted ticket");
            Ok(())
        })
        .await
    }

    async fn index_ticket(
        &self,
        ctx: &RequestContext,
        ticket: &Ticket,
    ) -> Result<(), StoreError> {
        self.observe("index_ticket", async {
            ticket.validate()?;
            self.indexes.index_ticket(ctx, ticket).await
        })
        .await
    }

    async fn deindex_ticket(&self, ctx: &RequestContext, id: &str) -> Result<(), StoreError> {
        self.observe("deindex_ticket", self.indexes.deindex_ticket(ctx, id))
            .await
    }

    async fn filter_tickets(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page_size: usize,
        callback: &mut PageCallback<'_>,
    ) -> Result<(), StoreError> {
        self.observe(
            "filter_tickets",
            self.filters.filter(ctx, filters, page_size, callback),
        )
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.backend.close().instrument(self.span.clone()).await;
        metrics::record_operation("close", &result);
        info!(parent: &self.span, "Closed state store");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::IndexField;
    use crate::error::ErrorKind;

    fn create_test_store() -> TicketStateStore {
        TicketStateStore::new(
            StoreConfig::in_memory(vec![IndexField::numeric("mmr"), IndexField::tag("mode")]),
            Arc::new(MemoryBackend::new()),
        )
    }

    async fn ids_matching(store: &TicketStateStore, filters: &[Filter]) -> Vec<String> {
        let mut ids = Vec::new();
        store
            .filter_tickets(
                &RequestContext::background(),
                filters,
                10,
                &mut |page: Vec<Ticket>| {
                    ids.extend(page.into_iter().map(|t| t.id));
                    Ok(())
                },
            )
            .await
            .unwrap();
        ids
    }

    #[tokio::test]
    async fn test_created_ticket_not_visible_until_indexed() {
        let store = create_test_store();
        let ctx = RequestContext::background();
        let ticket = Ticket::with_id("t1").with_number("mmr", 1500.0);

        store.create_ticket(&ctx, &ticket).await.unwrap();
        assert!(ids_matching(&store, &[Filter::range("mmr", 0.0, 3000.0)])
            .await
            .is_empty());

        store.index_ticket(&ctx, &ticket).await.unwrap();
        assert_eq!(
            ids_matching(&store, &[Filter::range("mmr", 0.0, 3000.0)]).await,
            vec!["t1"]
        );
    }

    #[tokio::test]
    async fn test_deindex_keeps_payload() {
        let store = create_test_store();
        let ctx = RequestContext::background();
        let ticket = Ticket::with_id("t1").with_tag("mode", "ranked");

        store.create_ticket(&ctx, &ticket).await.unwrap();
        store.index_ticket(&ctx, &ticket).await.unwrap();
        store.deindex_ticket(&ctx, "t1").await.unwrap();

        assert!(ids_matching(&store, &[Filter::tag("mode", "ranked")])
            .await
            .is_empty());
        assert_eq!(store.get_ticket(&ctx, "t1").await.unwrap(), ticket);
    }

    #[tokio::test]
    async fn test_index_rejects_invalid_ticket() {
        let store = create_test_store();
        let err = store
            .index_ticket(&RequestContext::background(), &Ticket::with_id(""))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let store = create_test_store();
        let ctx = RequestContext::background();
        store.create_ticket(&ctx, &Ticket::with_id("t1")).await.unwrap();

        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(store.is_closed());

        let err = store.get_ticket(&ctx, "t1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        let err = store.delete_ticket(&ctx, "t1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        let err = store
            .filter_tickets(&ctx, &[], 1, &mut |_page: Vec<Ticket>| Ok(()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_canceled_context() {
        let store = create_test_store();
        let ctx = RequestContext::background();
        ctx.cancel();

        let err = store
            .create_ticket(&ctx, &Ticket::with_id("t1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
        let err = store
            .get_ticket(&RequestContext::background(), "t1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_custom_span() {
        let store = create_test_store().with_span(tracing::info_span!("matchmaker"));
        store
            .create_ticket(&RequestContext::background(), &Ticket::with_id("t1"))
            .await
            .unwrap();
    }
}
