use thiserror::Error;

/// Top-level error type for the memflow workspace.
///
/// Subsystem crates define their own error types and wrap this one where they
/// touch configuration or I/O, so `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MemflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl From<toml::de::Error> for MemflowError {
    fn from(err: toml::de::Error) -> Self {
        MemflowError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for MemflowError {
    fn from(err: toml::ser::Error) -> Self {
        MemflowError::Config(err.to_string())
    }
}

/// A specialized `Result` type for memflow operations.
pub type Result<T> = std::result::Result<T, MemflowError>;
