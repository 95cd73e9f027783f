//! Core ticket data types.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Searchable attributes of a ticket.
///
/// Only the fields declared in the store configuration are indexed. Anything
/// else is kept with the ticket but ignored by indexing and filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchFields {
    /// Numeric attributes, e.g. `mmr = 1500`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub numbers: BTreeMap<String, f64>,

    /// Tag fields. Each field holds a set of values, e.g. `region = {"eu"}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, BTreeSet<String>>,
}

impl SearchFields {
    pub fn number(&self, field: &str) -> Option<f64> {
        self.numbers.get(field).copied()
    }

    pub fn has_tag(&self, field: &str, value: &str) -> bool {
        self.tags.get(field).is_some_and(|values| values.contains(value))
    }
}

/// Where a matched ticket should connect. Opaque to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Assignment {
    pub connection: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

/// A matchmaking request awaiting assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    /// Unique identifier. Immutable once created.
    pub id: String,

    pub search_fields: SearchFields,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<Assignment>,

    /// Caller-defined data carried alongside the ticket.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// New ticket with a generated UUID.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            search_fields: SearchFields::default(),
            assignment: None,
            extensions: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_number(mut self, field: impl Into<String>, value: f64) -> Self {
        self.search_fields.numbers.insert(field.into(), value);
        self
    }

    pub fn with_tag(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_fields
            .tags
            .entry(field.into())
            .or_default()
            .insert(value.into());
        self
    }

    pub fn with_assignment(mut self, assignment: Assignment) -> Self {
        self.assignment = Some(assignment);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Reject tickets the store cannot persist faithfully.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.id.is_empty() {
            return Err(StoreError::InvalidArgument(
                "ticket id cannot be empty".to_string(),
            ));
        }
        if let Some((field, value)) = self
            .search_fields
            .numbers
            .iter()
            .find(|(_, v)| !v.is_finite())
        {
            return Err(StoreError::InvalidArgument(format!(
                "ticket {} field '{}' is not a finite number: {}",
                self.id, field, value
            )));
        }
        Ok(())
    }
}

impl Default for Ticket {
    fn default() -> Self {
        Self::new()
    }
}
