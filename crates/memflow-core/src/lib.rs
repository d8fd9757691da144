pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::MemflowConfig;
pub use error::{MemflowError, Result};
pub use logging::init_tracing;
pub use types::*;
