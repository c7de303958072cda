//! Error types for the trace engine.

use thiserror::Error;

/// Crate error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid stream endpoint URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;
