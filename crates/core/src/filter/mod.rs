//! Filtered, paginated ticket lookup.
//!
//! A filter call first asks every referenced field index for its candidate
//! ids and intersects them. The surviving ids are then resolved against the
//! primary store lazily, one page at a time. No snapshot is taken: tickets
//! deleted mid-call resolve to nothing and are skipped.

mod pages;
mod types;

pub use pages::TicketPages;
pub use types::{matches_all, Filter, Predicate};

use std::sync::Arc;

use tracing::debug;

use crate::context::RequestContext;
use crate::error::StoreError;
use crate::index::IndexManager;
use crate::metrics;
use crate::primary::PrimaryStore;
use crate::ticket::Ticket;

/// Callback receiving one page of filter results.
///
/// Returning an error stops the filter call, which then returns that error.
pub type PageCallback<'a> = dyn FnMut(Vec<Ticket>) -> Result<(), StoreError> + Send + 'a;

pub struct FilterEngine {
    indexes: Arc<IndexManager>,
    primary: Arc<PrimaryStore>,
}

impl FilterEngine {
    pub fn new(indexes: Arc<IndexManager>, primary: Arc<PrimaryStore>) -> Self {
        Self { indexes, primary }
    }

    /// Start a page sequence. Calling this again restarts from scratch.
    pub async fn pages(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page_size: usize,
    ) -> Result<TicketPages, StoreError> {
        if page_size == 0 {
            return Err(StoreError::InvalidArgument(
                "page size must be at least 1".to_string(),
            ));
        }

        let ids = self.indexes.candidates(ctx, filters).await?;
        debug!(candidates = ids.len(), filters = filters.len(), "Resolved filter candidates");

        Ok(TicketPages::new(
            Arc::clone(&self.primary),
            filters.to_vec(),
            ids,
            page_size,
        ))
    }

    /// Deliver every matching ticket to `callback`, one page per call.
    ///
    /// Stops at the first callback error and returns it unchanged.
    pub async fn filter(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page_size: usize,
        callback: &mut PageCallback<'_>,
    ) -> Result<(), StoreError> {
        let started = std::time::Instant::now();
        let result = self.drive(ctx, filters, page_size, callback).await;

        let label = match &result {
            Ok(()) => "ok",
            Err(e) => e.kind().as_str(),
        };
        metrics::FILTER_DURATION
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn drive(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page_size: usize,
        callback: &mut PageCallback<'_>,
    ) -> Result<(), StoreError> {
        let mut pages = self.pages(ctx, filters, page_size).await?;

        while let Some(page) = pages.next_page(ctx).await? {
            ctx.check()?;
            let count = page.len();
            callback(page)?;
            metrics::TICKETS_DELIVERED.inc_by(count as u64);
        }

        debug!(
            delivered = pages.delivered(),
            skipped = pages.skipped(),
            "Filter finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend};
    use crate::config::IndexField;

    struct Harness {
        backend: Arc<MemoryBackend>,
        indexes: Arc<IndexManager>,
        primary: Arc<PrimaryStore>,
        engine: FilterEngine,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MemoryBackend::new());
        let indexes = Arc::new(IndexManager::new(
            backend.clone(),
            vec![IndexField::numeric("mmr"), IndexField::tag("region")],
        ));
        let primary = Arc::new(PrimaryStore::new(backend.clone()));
        let engine = FilterEngine::new(Arc::clone(&indexes), Arc::clone(&primary));
        Harness {
            backend,
            indexes,
            primary,
            engine,
        }
    }

    async fn add(h: &Harness, ticket: Ticket) {
        let ctx = RequestContext::background();
        h.primary.create(&ctx, &ticket).await.unwrap();
        h.indexes.index_ticket(&ctx, &ticket).await.unwrap();
    }

    async fn collect(h: &Harness, filters: &[Filter], page_size: usize) -> Vec<Vec<String>> {
        let mut pages = Vec::new();
        h.engine
            .filter(
                &RequestContext::background(),
                filters,
                page_size,
                &mut |page: Vec<Ticket>| {
                    pages.push(page.into_iter().map(|t| t.id).collect());
                    Ok(())
                },
            )
            .await
            .unwrap();
        pages
    }

    #[tokio::test]
    async fn test_single_match_one_page() {
        let h = harness();
        add(&h, Ticket::with_id("t1").with_number("mmr", 1500.0)).await;

        let pages = collect(&h, &[Filter::range("mmr", 1400.0, 1600.0)], 10).await;
        assert_eq!(pages, vec![vec!["t1".to_string()]]);
    }

    #[tokio::test]
    async fn test_no_match_no_callback() {
        let h = harness();
        add(&h, Ticket::with_id("t1").with_number("mmr", 1500.0)).await;

        let pages = collect(&h, &[Filter::range("mmr", 0.0, 100.0)], 10).await;
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn test_page_count_is_ceiling() {
        let h = harness();
        for i in 0..7 {
            add(&h, Ticket::with_id(format!("t{}", i)).with_number("mmr", 1000.0 + i as f64)).await;
        }

        let pages = collect(&h, &[Filter::range("mmr", 0.0, 2000.0)], 3).await;
        assert_eq!(pages.len(), 3);
        let mut all: Vec<String> = pages.into_iter().flatten().collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 7);
    }

    #[tokio::test]
    async fn test_dangling_references_skipped() {
        let h = harness();
        add(&h, Ticket::with_id("keep").with_number("mmr", 10.0)).await;
        add(&h, Ticket::with_id("gone").with_number("mmr", 10.0)).await;
        h.backend.delete_ticket("gone").await.unwrap();

        let pages = collect(&h, &[Filter::range("mmr", 0.0, 20.0)], 10).await;
        assert_eq!(pages, vec![vec!["keep".to_string()]]);
    }

    #[tokio::test]
    async fn test_callback_error_stops_iteration() {
        let h = harness();
        for i in 0..5 {
            add(&h, Ticket::with_id(format!("t{}", i)).with_number("mmr", 1.0)).await;
        }

        let mut calls = 0;
        let err = h
            .engine
            .filter(
                &RequestContext::background(),
                &[Filter::range("mmr", 0.0, 2.0)],
                1,
                &mut |_page: Vec<Ticket>| {
                    calls += 1;
                    if calls == 2 {
                        return Err(StoreError::Unavailable("consumer gave up".to_string()));
                    }
                    Ok(())
                },
            )
            .await
            .unwrap_err();

        assert_eq!(calls, 2);
        assert!(matches!(err, StoreError::Unavailable(ref msg) if msg == "consumer gave up"));
    }

    #[tokio::test]
    async fn test_zero_page_size_rejected() {
        let h = harness();
        let err = h
            .engine
            .filter(&RequestContext::background(), &[], 0, &mut |_page: Vec<Ticket>| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_pages_restart() {
        let h = harness();
        add(&h, Ticket::with_id("a").with_tag("region", "eu")).await;
        let ctx = RequestContext::background();
        let filters = [Filter::tag("region", "eu")];

        let mut first = h.engine.pages(&ctx, &filters, 5).await.unwrap();
        assert!(first.next_page(&ctx).await.unwrap().is_some());
        assert!(first.next_page(&ctx).await.unwrap().is_none());

        let mut again = h.engine.pages(&ctx, &filters, 5).await.unwrap();
        assert!(again.next_page(&ctx).await.unwrap().is_some());
    }
}
