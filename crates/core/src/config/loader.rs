use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::StoreConfig, ConfigError};

/// Load configuration from file with environment variable overrides
///
/// Overrides use the `TICKETSTORE_` prefix with `__` between sections,
/// e.g. `TICKETSTORE_BACKEND__POOL_SIZE=16`.
pub fn load_config(path: &Path) -> Result<StoreConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: StoreConfig = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("TICKETSTORE_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<StoreConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
