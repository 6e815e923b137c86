use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub capture_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    /// Age after which a leftover item lock is presumed abandoned.
    pub lock_stale_ms: u64,
    pub capture_rate_per_minute: u32,
    pub destinations: Vec<DestinationSeed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationSeed {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub schema_keys: Vec<String>,
}

impl DestinationSeed {
    fn named(name: &str, schema_keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            icon: None,
            color: None,
            schema_keys: schema_keys.iter().map(|key| key.to_string()).collect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_timeout_ms: 2000,
            lock_timeout_ms: 500,
            lock_stale_ms: 30_000,
            capture_rate_per_minute: 120,
            destinations: vec![
                DestinationSeed::named("Next", &["priority", "effort"]),
                DestinationSeed::named("Waiting", &["waiting_on", "follow_up"]),
                DestinationSeed::named("Someday", &[]),
                DestinationSeed::named("Reference", &["url"]),
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.capture_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture_timeout_ms must be positive".to_string(),
            ));
        }
        if self.lock_stale_ms <= self.lock_timeout_ms {
            return Err(ConfigError::Invalid(
                "lock_stale_ms must exceed lock_timeout_ms".to_string(),
            ));
        }
        if self.capture_rate_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "capture_rate_per_minute must be positive".to_string(),
            ));
        }
        if let Some(seed) = self.destinations.iter().find(|seed| seed.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "destination seed with schema keys {:?} has no name",
                seed.schema_keys
            )));
        }
        Ok(())
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_millis(self.lock_stale_ms)
    }
}
