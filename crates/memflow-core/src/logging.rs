//! Tracing subscriber setup shared by memflow binaries and demos.

use tracing_subscriber::EnvFilter;

use crate::error::{MemflowError, Result};

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `default_level` (for example the
/// configured `general.log_level`) is used. Fails if a global subscriber is
/// already installed.
pub fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| MemflowError::Logging(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| MemflowError::Logging(e.to_string()))
}
