//! Configuration management for hashwatch
//!
//! This module provides configuration structures and defaults for the event
//! source, the classifier queue and the content hasher.

use std::path::Path;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Global configuration for hashwatch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashWatchConfig {
    /// Event source and queue configuration
    pub watcher: WatcherConfig,
    /// Content hashing configuration
    pub hasher: HasherConfig,
}

/// Configuration for file watching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Quiet period before a burst of notifications for one path is forwarded
    pub debounce_ms: u64,
    /// Upper bound on how long a continuously written path may be held back
    pub max_debounce_ms: u64,
    /// How often the source thread wakes to flush settled events
    pub tick_ms: u64,
    /// Capacity of the queue between the source and the classifier
    pub queue_capacity: usize,
}

/// Configuration for content hashing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HasherConfig {
    /// Read buffer size in bytes
    pub buffer_size: usize,
    /// How many times to re-hash a file that changes while being read
    pub stable_read_attempts: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            max_debounce_ms: 1000,
            tick_ms: 25,
            queue_capacity: 4096,
        }
    }
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            stable_read_attempts: 3,
        }
    }
}

impl WatcherConfig {
    pub fn debounce_duration(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_debounce_duration(&self) -> Duration {
        Duration::from_millis(self.max_debounce_ms)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl HashWatchConfig {
    /// Load configuration from a TOML file. Missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise start from defaults; then apply
    /// environment overrides and validate.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Some(ms) = env_parse("HASHWATCH_DEBOUNCE_MS") {
            self.watcher.debounce_ms = ms;
        }

        if let Some(capacity) = env_parse("HASHWATCH_QUEUE_CAPACITY") {
            self.watcher.queue_capacity = capacity;
        }

        if let Some(size) = env_parse("HASHWATCH_HASH_BUFFER_SIZE") {
            self.hasher.buffer_size = size;
        }

        if let Some(attempts) = env_parse("HASHWATCH_STABLE_READ_ATTEMPTS") {
            self.hasher.stable_read_attempts = attempts;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.watcher.queue_capacity == 0 {
            bail!("queue_capacity must be greater than 0");
        }

        if self.watcher.tick_ms == 0 {
            bail!("tick_ms must be greater than 0");
        }

        if self.watcher.max_debounce_ms < self.watcher.debounce_ms {
            bail!("max_debounce_ms must not be smaller than debounce_ms");
        }

        if self.hasher.buffer_size == 0 {
            bail!("buffer_size must be greater than 0");
        }

        if self.hasher.stable_read_attempts == 0 {
            bail!("stable_read_attempts must be greater than 0");
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, value);
            None
        }
    }
}
