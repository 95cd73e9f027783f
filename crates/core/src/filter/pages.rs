//! Lazy page sequence over filter results.

use std::sync::Arc;

use tracing::{debug, warn};

use super::types::{matches_all, Filter};
use crate::context::RequestContext;
use crate::error::StoreError;
use crate::metrics;
use crate::primary::PrimaryStore;
use crate::ticket::Ticket;

/// Pages of tickets matching a filter set.
///
/// The candidate ids are fixed when the sequence is created; each id is
/// resolved at most once, so no ticket is delivered twice. Ids whose payload
/// is gone, or whose stored fields no longer satisfy the filters, are skipped
/// and do not count toward the page size.
pub struct TicketPages {
    primary: Arc<PrimaryStore>,
    filters: Vec<Filter>,
    ids: Vec<String>,
    cursor: usize,
    page_size: usize,
    delivered: usize,
    skipped: usize,
}

impl TicketPages {
    pub(crate) fn new(
        primary: Arc<PrimaryStore>,
        filters: Vec<Filter>,
        ids: Vec<String>,
        page_size: usize,
    ) -> Self {
        Self {
            primary,
            filters,
            ids,
            cursor: 0,
            page_size,
            delivered: 0,
            skipped: 0,
        }
    }

    /// Next non-empty page, or `None` once every candidate has been resolved.
    pub async fn next_page(
        &mut self,
        ctx: &RequestContext,
    ) -> Result<Option<Vec<Ticket>>, StoreError> {
        let mut page = Vec::with_capacity(self.page_size.min(self.remaining()));

        while page.len() < self.page_size && self.cursor < self.ids.len() {
            ctx.check()?;

            let want = self.page_size - page.len();
            let end = (self.cursor + want).min(self.ids.len());
            let batch = &self.ids[self.cursor..end];
            let resolved = self.primary.get_many(ctx, batch).await?;

            for (id, ticket) in batch.iter().zip(resolved) {
                match ticket {
                    Some(ticket) if matches_all(&self.filters, &ticket.search_fields) => {
                        page.push(ticket)
                    }
                    Some(_) => {
                        debug!(ticket_id = %id, "Skipping ticket that no longer matches");
                        self.skipped += 1;
                    }
                    None => {
                        warn!(ticket_id = %id, "Skipping dangling index reference");
                        metrics::DANGLING_SKIPPED.inc();
                        self.skipped += 1;
                    }
                }
            }
            self.cursor = end;
        }

        if page.is_empty() {
            return Ok(None);
        }
        self.delivered += page.len();
        Ok(Some(page))
    }

    /// Candidate ids not yet resolved.
    pub fn remaining(&self) -> usize {
        self.ids.len() - self.cursor
    }

    /// Tickets handed out so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Candidates skipped so far (dangling or no longer matching).
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
