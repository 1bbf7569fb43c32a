//! Common error types for sweeper

use thiserror::Error;

/// Common result type for sweeper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the sweeper crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML configuration file could not be parsed
    #[error("Invalid configuration file: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Invalid user input or parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
