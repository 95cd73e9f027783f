pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod index;
pub mod metrics;
pub mod primary;
pub mod reconciler;
pub mod store;
pub mod testing;
pub mod ticket;

pub use backend::{create_backend, Backend, MemoryBackend, SqliteBackend};
pub use config::{
    load_config, load_config_from_str, validate_config, BackendConfig, BackendKind, ConfigError,
    FieldKind, IndexField, ReconcilerConfig, StoreConfig,
};
pub use context::RequestContext;
pub use error::{ErrorKind, StoreError};
pub use filter::{Filter, PageCallback, Predicate, TicketPages};
pub use reconciler::{Reconciler, SweepReport};
pub use store::{create_state_store, StateStore, TicketStateStore};
pub use ticket::{Assignment, SearchFields, Ticket};
