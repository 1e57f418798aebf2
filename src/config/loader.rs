//! Configuration loading from layered sources.

use std::path::PathBuf;

use thiserror::Error;
use toml::{Table, Value};

use crate::config::schema::GatewayConfig;
use crate::config::sources::{merge_sources, ConfigSource};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading. Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid override `{key}` from {origin}: {reason}")]
    Override {
        key: String,
        origin: String,
        reason: String,
    },

    #[error("configuration does not match schema: {0}")]
    Schema(#[from] toml::de::Error),

    #[error("failed to build configuration defaults: {0}")]
    Defaults(#[from] toml::ser::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Merge, deserialize and validate configuration from the given sources.
pub fn load_config(sources: &[ConfigSource]) -> Result<GatewayConfig, ConfigError> {
    let schema = match Value::try_from(GatewayConfig::default())? {
        Value::Table(table) => table,
        _ => Table::new(),
    };

    let merged = merge_sources(sources, &schema)?;
    let config: GatewayConfig = Value::Table(merged).try_into()?;

    validate_config(&config)?;

    Ok(config)
}
