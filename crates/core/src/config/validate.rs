use std::collections::HashSet;

use super::{types::StoreConfig, BackendKind, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Pool size is at least 1
/// - SQLite address is not empty
/// - Index names are non-empty and unique
/// - Reconciler interval is not 0
pub fn validate_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.backend.pool_size == 0 {
        return Err(ConfigError::ValidationError(
            "backend.pool_size cannot be 0".to_string(),
        ));
    }

    if config.backend.kind == BackendKind::Sqlite && config.backend.address.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "backend.address is required for the sqlite backend".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for field in &config.indexes {
        if field.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "index name cannot be empty".to_string(),
            ));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "index '{}' is declared more than once",
                field.name
            )));
        }
    }

    if config.reconciler.interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "reconciler.interval_ms cannot be 0".to_string(),
        ));
    }

    Ok(())
}
