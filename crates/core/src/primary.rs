//! Ticket payload persistence.

use std::sync::Arc;

use crate::backend::Backend;
use crate::context::RequestContext;
use crate::error::StoreError;
use crate::ticket::Ticket;

/// Key-value storage of tickets by id, serialized as JSON.
///
/// Never touches indexes.
pub struct PrimaryStore {
    backend: Arc<dyn Backend>,
}

impl PrimaryStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn create(&self, ctx: &RequestContext, ticket: &Ticket) -> Result<(), StoreError> {
        ticket.validate()?;
        let payload = serde_json::to_string(ticket)?;

        let inserted = ctx
            .run(self.backend.insert_ticket(&ticket.id, payload))
            .await?;
        if !inserted {
            return Err(StoreError::AlreadyExists(ticket.id.clone()));
        }
        Ok(())
    }

    pub async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Ticket, StoreError> {
        match ctx.run(self.backend.get_ticket(id)).await? {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    /// Resolve ids in one round trip. Missing ids come back as `None`.
    pub async fn get_many(
        &self,
        ctx: &RequestContext,
        ids: &[String],
    ) -> Result<Vec<Option<Ticket>>, StoreError> {
        let payloads = ctx.run(self.backend.get_tickets(ids)).await?;
        if payloads.len() != ids.len() {
            return Err(StoreError::Internal(format!(
                "backend returned {} payloads for {} ids",
                payloads.len(),
                ids.len()
            )));
        }

        payloads
            .into_iter()
            .map(|p| p.map(|json| serde_json::from_str(&json)).transpose())
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<(), StoreError> {
        ctx.run(self.backend.delete_ticket(id)).await
    }
}
