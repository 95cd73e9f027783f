//! Secondary index maintenance.
//!
//! The [`IndexManager`] owns the declared searchable fields and writes one
//! back-reference per field through the backend. Fields are written
//! independently: a failure on one field leaves the others in place, and the
//! caller sees the first error once every field has been attempted.
//!
//! The indexed registry is written before any field on index and removed after
//! every field on deindex. Any id with a field entry is therefore listed in the
//! registry, which is what the reconciler walks.

mod tree;

pub use tree::{NumericTree, SortKey, TagTree};

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::config::{FieldKind, IndexField};
use crate::context::RequestContext;
use crate::error::StoreError;
use crate::filter::{Filter, Predicate};
use crate::ticket::Ticket;

pub struct IndexManager {
    backend: Arc<dyn Backend>,
    fields: Vec<IndexField>,
}

impl IndexManager {
    pub fn new(backend: Arc<dyn Backend>, fields: Vec<IndexField>) -> Self {
        Self { backend, fields }
    }

    /// Declared searchable fields.
    pub fn fields(&self) -> &[IndexField] {
        &self.fields
    }

    /// Add back-references for every declared field the ticket carries.
    pub async fn index_ticket(
        &self,
        ctx: &RequestContext,
        ticket: &Ticket,
    ) -> Result<(), StoreError> {
        let id = ticket.id.as_str();
        ctx.run(self.backend.registry_insert(id)).await?;

        let mut writes: Vec<(&str, BoxFuture<'_, Result<(), StoreError>>)> = Vec::new();

        for field in &self.fields {
            match field.kind {
                FieldKind::Numeric => {
                    if let Some(value) = ticket.search_fields.number(&field.name) {
                        writes.push((
                            field.name.as_str(),
                            self.backend.numeric_insert(&field.name, id, value),
                        ));
                    }
                }
                FieldKind::Tag => {
                    if let Some(values) = ticket.search_fields.tags.get(&field.name) {
                        if values.is_empty() {
                            continue;
                        }
                        let values: Vec<String> = values.iter().cloned().collect();
                        let backend = Arc::clone(&self.backend);
                        let name = field.name.clone();
                        let owned_id = id.to_string();
                        writes.push((
                            field.name.as_str(),
                            async move { backend.tag_insert(&name, &owned_id, &values).await }
                                .boxed(),
                        ));
                    }
                }
            }
        }

        let written = writes.len();
        let (names, futures): (Vec<_>, Vec<_>) = writes.into_iter().unzip();
        let results = ctx.run(async { Ok(join_all(futures).await) }).await?;
        let first_error = Self::first_error(id, "index", &names, results);

        if let Some(e) = first_error {
            return Err(e);
        }

        debug!(ticket_id = %id, fields = written, "Indexed ticket");
        Ok(())
    }

    /// Remove `id` from every index. Absent entries are not an error.
    pub async fn deindex_ticket(&self, ctx: &RequestContext, id: &str) -> Result<(), StoreError> {
        let removals: Vec<BoxFuture<'_, Result<(), StoreError>>> = self
            .fields
            .iter()
            .map(|field| match field.kind {
                FieldKind::Numeric => self.backend.numeric_remove(&field.name, id),
                FieldKind::Tag => self.backend.tag_remove(&field.name, id),
            })
            .collect();
        let names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();

        let results = ctx.run(async { Ok(join_all(removals).await) }).await?;
        if let Some(e) = Self::first_error(id, "deindex", &names, results) {
            return Err(e);
        }

        ctx.run(self.backend.registry_remove(id)).await?;
        debug!(ticket_id = %id, "Deindexed ticket");
        Ok(())
    }

    /// Ids satisfying every filter, each listed once, in ascending order.
    ///
    /// An empty filter set selects every indexed ticket.
    pub async fn candidates(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
    ) -> Result<Vec<String>, StoreError> {
        for filter in filters {
            filter.validate(&self.fields)?;
        }

        if filters.is_empty() {
            return self.indexed_ids(ctx).await;
        }

        let mut sets: Vec<HashSet<String>> = Vec::with_capacity(filters.len());
        for filter in filters {
            let ids = match &filter.predicate {
                Predicate::Range { min, max } => {
                    ctx.run(self.backend.numeric_range(&filter.field, *min, *max))
                        .await?
                }
                Predicate::Tag { value } => {
                    ctx.run(self.backend.tag_members(&filter.field, value))
                        .await?
                }
            };
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sets.push(ids.into_iter().collect());
        }

        Ok(intersect(sets))
    }

    /// Every id currently in the indexed registry, sorted.
    pub async fn indexed_ids(&self, ctx: &RequestContext) -> Result<Vec<String>, StoreError> {
        let mut ids = ctx.run(self.backend.registry_members()).await?;
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn first_error(
        id: &str,
        op: &str,
        names: &[&str],
        results: Vec<Result<(), StoreError>>,
    ) -> Option<StoreError> {
        let mut first = None;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!(ticket_id = %id, field = %name, error = %e, "Failed to {} field", op);
                first.get_or_insert(e);
            }
        }
        first
    }
}

/// Intersect candidate sets, smallest first, and return sorted ids.
fn intersect(mut sets: Vec<HashSet<String>>) -> Vec<String> {
    sets.sort_by_key(|s| s.len());
    let mut iter = sets.into_iter();
    let Some(smallest) = iter.next() else {
        return Vec::new();
    };
    let rest: Vec<HashSet<String>> = iter.collect();

    let mut ids: Vec<String> = smallest
        .into_iter()
        .filter(|id| rest.iter().all(|s| s.contains(id)))
        .collect();
    ids.sort();
    ids
}
