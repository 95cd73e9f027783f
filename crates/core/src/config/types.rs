use serde::{Deserialize, Serialize};

/// Root configuration for a state store instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    /// Searchable fields. Fixed for the lifetime of the store.
    #[serde(default)]
    pub indexes: Vec<IndexField>,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl StoreConfig {
    /// In-memory store with the given index declarations.
    pub fn in_memory(indexes: Vec<IndexField>) -> Self {
        Self {
            backend: BackendConfig::default(),
            indexes,
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// Backend connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// SQLite database path, or ":memory:". Ignored by the memory backend.
    #[serde(default = "default_address")]
    pub address: String,
    /// Number of pooled backend connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// How long a connection waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            address: default_address(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

fn default_address() -> String {
    ":memory:".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_busy_timeout() -> u64 {
    5000
}

/// Available storage backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    Sqlite,
}

/// Declaration of one searchable field.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct IndexField {
    pub name: String,
    pub kind: FieldKind,
}

impl IndexField {
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Numeric,
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Tag,
        }
    }
}

/// How a searchable field is indexed.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Ordered index supporting inclusive range queries.
    Numeric,
    /// Set-membership index keyed by tag value.
    Tag,
}

/// Background reconciliation sweep configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Time between sweeps (milliseconds).
    #[serde(default = "default_sweep_interval")]
    pub interval_ms: u64,
}

fn default_sweep_interval() -> u64 {
    30_000
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_sweep_interval(),
        }
    }
}
