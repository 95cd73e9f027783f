//! Filter predicates.

use serde::{Deserialize, Serialize};

use crate::config::{FieldKind, IndexField};
use crate::error::StoreError;
use crate::ticket::SearchFields;

/// Condition on a single field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// Inclusive numeric range.
    Range { min: f64, max: f64 },
    /// Exact tag value.
    Tag { value: String },
}

impl Predicate {
    pub fn kind(&self) -> FieldKind {
        match self {
            Predicate::Range { .. } => FieldKind::Numeric,
            Predicate::Tag { .. } => FieldKind::Tag,
        }
    }
}

/// A predicate bound to a declared field. A filter set is the AND of its filters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub field: String,
    #[serde(flatten)]
    pub predicate: Predicate,
}

impl Filter {
    pub fn range(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            field: field.into(),
            predicate: Predicate::Range { min, max },
        }
    }

    pub fn tag(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            predicate: Predicate::Tag {
                value: value.into(),
            },
        }
    }

    /// Check the filter against the declared fields.
    pub fn validate(&self, declared: &[IndexField]) -> Result<(), StoreError> {
        let field = declared
            .iter()
            .find(|f| f.name == self.field)
            .ok_or_else(|| {
                StoreError::InvalidArgument(format!("field '{}' is not indexed", self.field))
            })?;

        if field.kind != self.predicate.kind() {
            return Err(StoreError::InvalidArgument(format!(
                "field '{}' is {:?}, predicate expects {:?}",
                self.field,
                field.kind,
                self.predicate.kind()
            )));
        }

        if let Predicate::Range { min, max } = self.predicate {
            if min.is_nan() || max.is_nan() {
                return Err(StoreError::InvalidArgument(format!(
                    "range on '{}' has a NaN bound",
                    self.field
                )));
            }
            if min > max {
                return Err(StoreError::InvalidArgument(format!(
                    "range on '{}' has min {} greater than max {}",
                    self.field, min, max
                )));
            }
        }

        Ok(())
    }

    /// Evaluate the filter against a ticket's stored search fields.
    pub fn matches(&self, fields: &SearchFields) -> bool {
        match &self.predicate {
            Predicate::Range { min, max } => fields
                .number(&self.field)
                .is_some_and(|v| *min <= v && v <= *max),
            Predicate::Tag { value } => fields.has_tag(&self.field, value),
        }
    }
}

/// True if every filter matches.
pub fn matches_all(filters: &[Filter], fields: &SearchFields) -> bool {
    filters.iter().all(|f| f.matches(fields))
}
