//! Error types for configuration loading and trigger parsing.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while locating, parsing, or validating configuration.
///
/// These are the only errors allowed to abort the daemon, and they are
/// raised before any queue or lifecycle state is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// A queue message that could not be turned into a trigger event.
#[derive(Debug, Error)]
pub enum TriggerParseError {
    #[error("message envelope is not valid JSON: {0}")]
    Envelope(String),

    #[error("notification payload is not a lifecycle message: {0}")]
    Payload(String),
}
