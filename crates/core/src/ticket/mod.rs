//! Matchmaking ticket model.

mod types;

pub use types::{Assignment, SearchFields, Ticket};
