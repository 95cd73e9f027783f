//! Testing utilities shared by unit and integration tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use ticketstore_core::testing::{fixtures, MockBackend};
//!
//! let backend = MockBackend::new();
//! backend.fail_field("region").await;
//!
//! let store = TicketStateStore::new(fixtures::config(), Arc::new(backend));
//! ```

mod mock_backend;

pub use mock_backend::MockBackend;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::config::{IndexField, StoreConfig};
    use crate::context::RequestContext;
    use crate::error::StoreError;
    use crate::filter::Filter;
    use crate::store::StateStore;
    use crate::ticket::Ticket;

    /// Memory-backed config declaring `mmr` (numeric), `level` (numeric),
    /// `region` (tag) and `mode` (tag).
    pub fn config() -> StoreConfig {
        StoreConfig::in_memory(vec![
            IndexField::numeric("mmr"),
            IndexField::numeric("level"),
            IndexField::tag("region"),
            IndexField::tag("mode"),
        ])
    }

    /// Ticket with an `mmr` rating.
    pub fn rated_ticket(id: &str, mmr: f64) -> Ticket {
        Ticket::with_id(id).with_number("mmr", mmr)
    }

    /// Ticket with an `mmr` rating, a region and a game mode.
    pub fn player_ticket(id: &str, mmr: f64, region: &str, mode: &str) -> Ticket {
        rated_ticket(id, mmr)
            .with_tag("region", region)
            .with_tag("mode", mode)
    }

    /// Create and index in one go.
    pub async fn add_indexed(store: &dyn StateStore, ticket: &Ticket) -> Result<(), StoreError> {
        let ctx = RequestContext::background();
        store.create_ticket(&ctx, ticket).await?;
        store.index_ticket(&ctx, ticket).await
    }

    /// Run a filter and collect the delivered pages as id lists.
    pub async fn collect_pages(
        store: &dyn StateStore,
        filters: &[Filter],
        page_size: usize,
    ) -> Result<Vec<Vec<String>>, StoreError> {
        let mut pages = Vec::new();
        store
            .filter_tickets(
                &RequestContext::background(),
                filters,
                page_size,
                &mut |page: Vec<Ticket>| {
                    pages.push(page.into_iter().map(|t| t.id).collect());
                    Ok(())
                },
            )
            .await?;
        Ok(pages)
    }

    /// Like [`collect_pages`], flattened and sorted.
    pub async fn matching_ids(
        store: &dyn StateStore,
        filters: &[Filter],
    ) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = collect_pages(store, filters, 100)
            .await?
            .into_iter()
            .flatten()
            .collect();
        ids.sort();
        Ok(ids)
    }
}
