use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{ClockType, ConsumerMode, Timestamp};

/// Top-level configuration for a memflow working memory.
///
/// Loaded from `~/.memflow/config.toml` by default. Every section is optional
/// and falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemflowConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub timer: TimerConfig,
}

impl MemflowConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MemflowConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Render the configuration as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Action queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Who drains the queue: the flushing caller or a dedicated worker.
    pub consumer_mode: ConsumerMode,
    /// Default wait for rendezvous results, in milliseconds. 0 waits forever.
    pub rendezvous_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            consumer_mode: ConsumerMode::Passive,
            rendezvous_timeout_ms: 0,
        }
    }
}

impl QueueConfig {
    /// The rendezvous wait as a `Duration`, `None` meaning unbounded.
    pub fn rendezvous_timeout(&self) -> Option<Duration> {
        (self.rendezvous_timeout_ms > 0).then(|| Duration::from_millis(self.rendezvous_timeout_ms))
    }
}

/// Timer service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Clock backing the timer service.
    pub clock: ClockType,
    /// Initial time of a pseudo clock, in milliseconds. Ignored for realtime.
    pub start_time_ms: i64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            clock: ClockType::Realtime,
            start_time_ms: 0,
        }
    }
}

impl TimerConfig {
    pub fn start_time(&self) -> Timestamp {
        Timestamp(self.start_time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemflowError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = MemflowConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.queue.consumer_mode, ConsumerMode::Passive);
        assert_eq!(config.queue.rendezvous_timeout_ms, 0);
        assert_eq!(config.timer.clock, ClockType::Realtime);
        assert_eq!(config.timer.start_time_ms, 0);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"

[queue]
consumer_mode = "worker"
rendezvous_timeout_ms = 2500

[timer]
clock = "pseudo"
start_time_ms = 1000
"#;
        let file = create_temp_config(content);
        let config = MemflowConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.queue.consumer_mode, ConsumerMode::Worker);
        assert_eq!(
            config.queue.rendezvous_timeout(),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(config.timer.clock, ClockType::Pseudo);
        assert_eq!(config.timer.start_time(), Timestamp(1000));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[timer]
clock = "pseudo"
"#;
        let file = create_temp_config(content);
        let config = MemflowConfig::load(file.path()).unwrap();
        assert_eq!(config.timer.clock, ClockType::Pseudo);
        assert_eq!(config.timer.start_time_ms, 0);
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.queue.consumer_mode, ConsumerMode::Passive);
    }

    #[test]
    fn test_load_invalid_config_is_config_error() {
        let file = create_temp_config("[queue]\nconsumer_mode = \"eager\"\n");
        let err = MemflowConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, MemflowError::Config(_)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = MemflowConfig::load_or_default(Path::new("/nonexistent/memflow.toml"));
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = MemflowConfig::default();
        config.queue.consumer_mode = ConsumerMode::Worker;
        config.timer.clock = ClockType::Pseudo;
        config.timer.start_time_ms = 77;
        config.save(&path).unwrap();

        let reloaded = MemflowConfig::load(&path).unwrap();
        assert_eq!(reloaded.queue.consumer_mode, ConsumerMode::Worker);
        assert_eq!(reloaded.timer.clock, ClockType::Pseudo);
        assert_eq!(reloaded.timer.start_time_ms, 77);
    }

    #[test]
    fn test_zero_rendezvous_timeout_is_unbounded() {
        assert_eq!(QueueConfig::default().rendezvous_timeout(), None);
    }
}
