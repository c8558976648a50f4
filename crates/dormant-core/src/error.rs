//! Configuration errors. Fatal at load time.

use std::path::PathBuf;

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for `{field}`: {value:?}")]
    Duration { field: String, value: String },

    #[error("invalid address for `{field}`: {value:?}")]
    Address { field: String, value: String },

    #[error("invalid thresholds: {0}")]
    Thresholds(String),

    #[error("no rules configured")]
    NoRules,

    #[error("rule {index}: {reason}")]
    Rule { index: usize, reason: String },

    #[error("invalid MAC address: {0:?}")]
    MacAddress(String),

    #[error("executor: {0}")]
    Executor(String),
}
